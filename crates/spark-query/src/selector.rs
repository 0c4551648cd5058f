//! # 选择器（Selector）
//!
//! ## 核心意图（Why）
//! - 将 [`KeyExpr`] 与可选的参数串组合成一次查询的完整目标描述；
//! - 参数串承载 RPC 风格的实参或过滤条件，形如 `a=1&b=hello%20world&flag`。
//!
//! ## 文本形式（What）
//! - 无参数时为 `<key-expr>`，有参数时为 `<key-expr>?<parameters>`；
//! - 文本形式可往返：`Selector::parse(&s.to_string())` 得到相等的键表达式与原始参数串；
//! - 参数按需解析：`parameters_string_map` 以 `&` 切分，每段仅在第一个 `=` 处拆分键值，
//!   值做 URL 百分号解码（`+` 视为空格），无 `=` 的键映射到空串，重复键使整次解析失败。

use core::fmt;
use core::str::FromStr;
use std::collections::HashMap;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};

use crate::error::{QueryError, Result};
use crate::key_expr::KeyExpr;

/// 参数名到解码后取值的映射。
pub type ParameterMap = HashMap<String, String>;

const PARAMETERS_SEPARATOR: char = '?';
const LIST_SEPARATOR: char = '&';
const FIELD_SEPARATOR: char = '=';

/// 键表达式与可选参数串的组合。
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Selector {
    key_expr: KeyExpr,
    parameters: Option<String>,
}

impl Selector {
    /// 以键表达式与原始参数串构造选择器，参数串不做任何转换。
    pub fn new(key_expr: KeyExpr, parameters: Option<String>) -> Self {
        Self {
            key_expr,
            parameters,
        }
    }

    /// 由键值对构造选择器，取值会被百分号编码。
    ///
    /// - **契约 (What)**：键按原样写入，因此键本身不应包含 `&`、`=`；
    ///   空迭代器得到无参数选择器。
    pub fn with_parameters<'a, I>(key_expr: KeyExpr, pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut raw = String::new();
        for (key, value) in pairs {
            if !raw.is_empty() {
                raw.push(LIST_SEPARATOR);
            }
            raw.push_str(key);
            raw.push(FIELD_SEPARATOR);
            raw.push_str(&encode_component(value));
        }
        let parameters = (!raw.is_empty()).then_some(raw);
        Self::new(key_expr, parameters)
    }

    /// 解析 `<key-expr>[?<parameters>]` 文本。
    pub fn parse(text: &str) -> Result<Self> {
        match text.split_once(PARAMETERS_SEPARATOR) {
            Some((key_expr, parameters)) => Ok(Self::new(
                KeyExpr::new(key_expr)?,
                Some(parameters.to_owned()),
            )),
            None => Ok(Self::new(KeyExpr::new(text)?, None)),
        }
    }

    /// 键表达式。
    pub fn key_expr(&self) -> &KeyExpr {
        &self.key_expr
    }

    /// 原始参数串。
    pub fn parameters(&self) -> Option<&str> {
        self.parameters.as_deref()
    }

    /// 将参数串解析为名值映射。
    ///
    /// # 教案式说明
    /// - **契约 (What)**：
    ///   - 未设置参数时返回 `Ok(None)`；
    ///   - 同名参数出现两次返回 [`QueryError::DuplicateParameter`]，不做覆盖或合并；
    ///   - 取值解码失败返回 [`QueryError::ParameterDecode`]；
    ///   - 空片段（如 `a=1&&b=2` 中间的空串）被跳过。
    /// - **执行 (How)**：单次线性扫描，失败即返回，调用方观察不到部分结果。
    pub fn parameters_string_map(&self) -> Result<Option<ParameterMap>> {
        let Some(raw) = self.parameters.as_deref() else {
            return Ok(None);
        };

        let mut map = ParameterMap::new();
        for token in raw.split(LIST_SEPARATOR).filter(|token| !token.is_empty()) {
            let (key, value) = match token.split_once(FIELD_SEPARATOR) {
                Some((key, value)) => (key, Some(value)),
                None => (token, None),
            };
            if map.contains_key(key) {
                return Err(QueryError::DuplicateParameter {
                    key: key.to_owned(),
                });
            }
            let decoded = match value {
                Some(value) => decode_component(key, value)?,
                None => String::new(),
            };
            map.insert(key.to_owned(), decoded);
        }
        Ok(Some(map))
    }

    /// 读取单个参数的解码值；参数串自身非法时返回解析错误。
    pub fn parameter(&self, name: &str) -> Result<Option<String>> {
        Ok(self
            .parameters_string_map()?
            .and_then(|mut map| map.remove(name)))
    }

    /// 拆分为键表达式与原始参数串。
    pub fn into_parts(self) -> (KeyExpr, Option<String>) {
        (self.key_expr, self.parameters)
    }

    /// 释放选择器持有的键表达式。
    ///
    /// 按值消费 `self`，重复关闭在类型层面即不可能发生。
    pub fn close(self) {
        drop(self);
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.parameters {
            Some(parameters) => write!(f, "{}{PARAMETERS_SEPARATOR}{parameters}", self.key_expr),
            None => write!(f, "{}", self.key_expr),
        }
    }
}

impl From<KeyExpr> for Selector {
    fn from(key_expr: KeyExpr) -> Self {
        Self::new(key_expr, None)
    }
}

impl FromStr for Selector {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<&str> for Selector {
    type Error = QueryError;

    fn try_from(value: &str) -> Result<Self> {
        Self::parse(value)
    }
}

/// 取值中保持原样的字符：字母数字与 `-_.~*`，其余字节一律写为 `%XX`。
const VALUE_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'*');

/// URL 表单规则的百分号解码：`+` 为空格，`%XX` 为一个字节，结果必须是合法 UTF-8。
///
/// `percent_decode_str` 对残缺转义按字面放行，因此先拒绝不完整或非十六进制的 `%` 序列。
fn decode_component(parameter: &str, value: &str) -> Result<String> {
    let decode_error = |reason: String| QueryError::ParameterDecode {
        parameter: parameter.to_owned(),
        reason,
    };

    let bytes = value.as_bytes();
    for (index, _) in value.match_indices('%') {
        let escape = bytes.get(index + 1..index + 3).unwrap_or(&bytes[index + 1..]);
        if escape.len() < 2 || !escape.iter().all(u8::is_ascii_hexdigit) {
            return Err(decode_error(format!(
                "invalid escape `%{}` at byte {index}",
                String::from_utf8_lossy(escape)
            )));
        }
    }

    let spaced = value.replace('+', " ");
    percent_decode_str(&spaced)
        .decode_utf8()
        .map(|decoded| decoded.into_owned())
        .map_err(|err| decode_error(format!("invalid UTF-8: {err}")))
}

/// [`decode_component`] 的逆操作：空格写为 `+`，其余按 [`VALUE_ENCODE_SET`] 编码。
fn encode_component(value: &str) -> String {
    value
        .split(' ')
        .map(|part| utf8_percent_encode(part, VALUE_ENCODE_SET).to_string())
        .collect::<Vec<_>>()
        .join("+")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selector(text: &str) -> Selector {
        Selector::parse(text).expect("测试选择器应合法")
    }

    fn map(text: &str) -> ParameterMap {
        selector(text)
            .parameters_string_map()
            .expect("参数应可解析")
            .expect("参数串应存在")
    }

    #[test]
    fn absent_parameters_yield_none() {
        assert_eq!(selector("a/b").parameters_string_map(), Ok(None));
        assert_eq!(selector("a/b").to_string(), "a/b");
    }

    #[test]
    fn parses_pairs_and_bare_keys() {
        let parsed = map("a/b?a=1&b=2");
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed["a"], "1");
        assert_eq!(parsed["b"], "2");

        let flag = map("a/b?flag");
        assert_eq!(flag["flag"], "");
    }

    #[test]
    fn duplicate_key_aborts_whole_parse() {
        let err = selector("a/b?a=1&a=2")
            .parameters_string_map()
            .expect_err("重复参数必须失败");
        assert_eq!(
            err,
            QueryError::DuplicateParameter {
                key: "a".to_owned()
            }
        );
        // 裸键与带值的同名键同样视为重复。
        assert!(selector("a/b?x&x=1").parameters_string_map().is_err());
    }

    #[test]
    fn splits_on_first_equals_only() {
        assert_eq!(map("k?expr=a=b")["expr"], "a=b");
    }

    #[test]
    fn percent_decodes_values() {
        assert_eq!(map("k?greeting=hello%20world")["greeting"], "hello world");
        assert_eq!(map("k?q=a+b")["q"], "a b");
        assert_eq!(map("k?u=%E4%BD%A0%E5%A5%BD")["u"], "你好");
    }

    #[test]
    fn malformed_escapes_are_decode_errors() {
        for text in ["k?v=%", "k?v=%4", "k?v=%zz", "k?v=%FF"] {
            let err = selector(text)
                .parameters_string_map()
                .expect_err(text);
            assert!(
                matches!(err, QueryError::ParameterDecode { ref parameter, .. } if parameter == "v"),
                "`{text}` 应报告解码错误"
            );
        }
    }

    #[test]
    fn empty_tokens_are_skipped() {
        let parsed = map("k?a=1&&b=2&");
        assert_eq!(parsed.len(), 2);
    }

    #[test]
    fn textual_form_round_trips() {
        let original = selector("demo/**?a=1&flag&b=x%26y");
        let reparsed = selector(&original.to_string());
        assert_eq!(reparsed, original);
        assert_eq!(reparsed.parameters(), Some("a=1&flag&b=x%26y"));
    }

    #[test]
    fn with_parameters_encodes_values() {
        let key_expr = KeyExpr::new("rpc/add").unwrap();
        let built = Selector::with_parameters(key_expr, [("x", "1 + 2"), ("y", "a&b=c")]);
        assert_eq!(built.to_string(), "rpc/add?x=1+%2B+2&y=a%26b%3Dc");
        assert_eq!(built.parameter("x").unwrap().as_deref(), Some("1 + 2"));
        assert_eq!(built.parameter("y").unwrap().as_deref(), Some("a&b=c"));
        assert_eq!(built.parameter("z").unwrap(), None);
    }

    #[test]
    fn invalid_key_expr_is_rejected_at_parse() {
        assert!(matches!(
            Selector::parse("a//b?x=1"),
            Err(QueryError::InvalidKeyExpr { .. })
        ));
    }
}
