//! # 键表达式（KeyExpr）
//!
//! ## 语法约束（What）
//! - 由 `/` 分隔的非空段组成，不允许首尾 `/` 或连续 `//`；
//! - `*` 只能单独成段（匹配恰好一段），`**` 只能单独成段（匹配零或多段）；
//! - 禁止出现 `?`（选择器参数分隔符）、`#` 与 `$`；
//! - `**/**` 视为非规范形式并拒绝。
//!
//! 校验通过后键表达式即不可变，相等性等同于字符串相等。

use core::fmt;
use core::str::FromStr;
use std::sync::Arc;

use crate::error::{QueryError, Result};

const DELIMITER: char = '/';
const SINGLE_WILD: &str = "*";
const DOUBLE_WILD: &str = "**";
const FORBIDDEN: &[char] = &['?', '#', '$'];

/// 经过校验的键表达式。
///
/// # 教案式说明
/// - **契约 (What)**：内部以 `Arc<str>` 共享，克隆零拷贝；构造成功后永不为空；
/// - **生命周期**：值类型语义，最后一个克隆被丢弃时释放。
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyExpr(Arc<str>);

impl KeyExpr {
    /// 校验并构造键表达式。
    pub fn new(expr: impl AsRef<str>) -> Result<Self> {
        let expr = expr.as_ref();
        validate(expr)?;
        Ok(Self(Arc::from(expr)))
    }

    /// 字符串视图。
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 是否包含通配段。
    pub fn is_wild(&self) -> bool {
        self.chunks().any(|chunk| chunk == SINGLE_WILD || chunk == DOUBLE_WILD)
    }

    /// 以 `/` 拼接后缀并重新校验。
    pub fn join(&self, suffix: &str) -> Result<Self> {
        Self::new(format!("{}{DELIMITER}{suffix}", self.0))
    }

    /// 两个键表达式描述的键空间是否相交。
    ///
    /// - **执行 (How)**：逐段比较，`*` 吞掉恰好一段，`**` 吞掉零或多段；
    ///   任一侧的 `**` 都有“跳过自身”与“吞掉对侧一段”两条分支，两侧都不含 `**` 时退化为逐段比较。
    /// - **风险 (Trade-offs)**：含 `**` 时按段数乘积计费，与 `**` 的个数无关。
    pub fn intersects(&self, other: &KeyExpr) -> bool {
        let left: Vec<&str> = self.chunks().collect();
        let right: Vec<&str> = other.chunks().collect();
        chunks_intersect(&left, &right)
    }

    fn chunks(&self) -> impl Iterator<Item = &str> {
        self.0.split(DELIMITER)
    }
}

fn validate(expr: &str) -> Result<()> {
    if expr.is_empty() {
        return Err(QueryError::invalid_key_expr(expr, "empty key expression"));
    }
    if let Some(ch) = expr.chars().find(|ch| FORBIDDEN.contains(ch)) {
        return Err(QueryError::invalid_key_expr(
            expr,
            format!("forbidden character `{ch}`"),
        ));
    }
    if expr.starts_with(DELIMITER) || expr.ends_with(DELIMITER) {
        return Err(QueryError::invalid_key_expr(
            expr,
            "leading or trailing `/`",
        ));
    }

    let mut previous: Option<&str> = None;
    for chunk in expr.split(DELIMITER) {
        if chunk.is_empty() {
            return Err(QueryError::invalid_key_expr(expr, "empty chunk"));
        }
        if chunk.contains('*') && chunk != SINGLE_WILD && chunk != DOUBLE_WILD {
            return Err(QueryError::invalid_key_expr(
                expr,
                format!("wildcard must form a whole chunk, found `{chunk}`"),
            ));
        }
        if chunk == DOUBLE_WILD && previous == Some(DOUBLE_WILD) {
            return Err(QueryError::invalid_key_expr(
                expr,
                "`**/**` is not canonical",
            ));
        }
        previous = Some(chunk);
    }
    Ok(())
}

/// 自底向上的区间表：`below[j]` 记录 `left[i + 1..]` 与 `right[j..]` 是否相交，
/// `row[j]` 记录 `left[i..]` 与 `right[j..]`。时间 O(n·m)，额外空间 O(m)，不递归。
fn chunks_intersect(left: &[&str], right: &[&str]) -> bool {
    let has_double = |chunks: &[&str]| chunks.contains(&DOUBLE_WILD);
    if !has_double(left) && !has_double(right) {
        return left.len() == right.len()
            && left.iter().zip(right).all(|(l, r)| chunk_matches(l, r));
    }

    let width = right.len() + 1;
    let mut below = vec![false; width];
    let mut row = vec![false; width];
    for i in (0..=left.len()).rev() {
        for j in (0..=right.len()).rev() {
            row[j] = match (left.get(i).copied(), right.get(j).copied()) {
                (None, None) => true,
                (Some(DOUBLE_WILD), _) => below[j] || (j < right.len() && row[j + 1]),
                (_, Some(DOUBLE_WILD)) => row[j + 1] || (i < left.len() && below[j]),
                (None, _) | (_, None) => false,
                (Some(l), Some(r)) => chunk_matches(l, r) && below[j + 1],
            };
        }
        core::mem::swap(&mut below, &mut row);
    }
    below[0]
}

fn chunk_matches(left: &str, right: &str) -> bool {
    left == SINGLE_WILD || right == SINGLE_WILD || left == right
}

impl fmt::Display for KeyExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for KeyExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("KeyExpr").field(&&*self.0).finish()
    }
}

impl AsRef<str> for KeyExpr {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for KeyExpr {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<&str> for KeyExpr {
    type Error = QueryError;

    fn try_from(value: &str) -> Result<Self> {
        Self::new(value)
    }
}

impl TryFrom<String> for KeyExpr {
    type Error = QueryError;

    fn try_from(value: String) -> Result<Self> {
        validate(&value)?;
        Ok(Self(Arc::from(value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ke(expr: &str) -> KeyExpr {
        KeyExpr::new(expr).expect("测试用键表达式应合法")
    }

    #[test]
    fn rejects_malformed_expressions() {
        for bad in ["", "/a", "a/", "a//b", "a?b", "a/#", "a/$*", "a*b", "a/**/**"] {
            let err = KeyExpr::new(bad).expect_err(bad);
            assert!(
                matches!(err, QueryError::InvalidKeyExpr { .. }),
                "`{bad}` 应被拒绝"
            );
        }
    }

    #[test]
    fn accepts_wildcard_chunks() {
        assert!(ke("demo/*/value").is_wild());
        assert!(ke("demo/**").is_wild());
        assert!(!ke("example/testing/keyexpr").is_wild());
    }

    #[test]
    fn intersection_follows_wildcard_semantics() {
        assert!(ke("a/b/c").intersects(&ke("a/b/c")));
        assert!(ke("a/*/c").intersects(&ke("a/b/c")));
        assert!(!ke("a/*").intersects(&ke("a/b/c")));
        assert!(ke("a/**").intersects(&ke("a")));
        assert!(ke("a/**").intersects(&ke("a/b/c")));
        assert!(ke("**/c").intersects(&ke("a/*/c")));
        assert!(ke("a/**/d").intersects(&ke("a/b/**")));
        assert!(!ke("a/b").intersects(&ke("a/c")));
        assert!(!ke("a/**/d").intersects(&ke("a/b/c")));
    }

    #[test]
    fn many_double_wildcards_match_in_polynomial_time() {
        let repeated = |chunk: &str, times: usize| vec![chunk; times].join("/");
        let pattern = ke(&format!("{}/b", repeated("**/a", 20)));
        let concrete = ke(&format!("{}/c", repeated("a", 40)));
        let matching = ke(&format!("{}/b", repeated("a", 40)));

        let started = std::time::Instant::now();
        assert!(!pattern.intersects(&concrete));
        assert!(!concrete.intersects(&pattern));
        assert!(pattern.intersects(&matching));
        assert!(
            started.elapsed() < std::time::Duration::from_secs(1),
            "`**` 数量不得导致指数级匹配耗时"
        );
    }

    #[test]
    fn deep_expressions_do_not_exhaust_the_stack() {
        let deep = ke(&vec!["a"; 20_000].join("/"));
        assert!(deep.intersects(&deep));

        let wide = ke(&format!("**/{}", vec!["a"; 2_000].join("/")));
        let concrete = ke(&vec!["a"; 2_001].join("/"));
        assert!(wide.intersects(&concrete));
        assert!(!wide.intersects(&ke("b")));
    }

    #[test]
    fn join_revalidates() {
        assert_eq!(ke("a/b").join("c").unwrap(), ke("a/b/c"));
        assert!(ke("a").join("").is_err());
    }
}
