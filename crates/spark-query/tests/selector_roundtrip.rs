//! 选择器文本形式与参数解析的性质测试。

use std::collections::BTreeMap;

use proptest::prelude::*;
use spark_query::{KeyExpr, QueryError, Selector};

fn chunk() -> impl Strategy<Value = String> {
    prop_oneof![
        6 => "[a-z0-9_-]{1,8}",
        1 => Just("*".to_owned()),
        1 => Just("**".to_owned()),
    ]
}

fn key_expr() -> impl Strategy<Value = KeyExpr> {
    prop::collection::vec(chunk(), 1..5)
        .prop_map(|chunks| chunks.join("/"))
        .prop_filter_map("非规范的 `**/**` 被跳过", |text| KeyExpr::new(text).ok())
}

proptest! {
    #[test]
    fn textual_form_round_trips(key_expr in key_expr(), parameters in prop::option::of("\\PC*")) {
        let selector = Selector::new(key_expr.clone(), parameters.clone());
        let parsed = Selector::parse(&selector.to_string()).unwrap();
        prop_assert_eq!(parsed.key_expr(), &key_expr);
        prop_assert_eq!(parsed.parameters(), parameters.as_deref());
    }

    #[test]
    fn encoded_values_decode_back(
        key_expr in key_expr(),
        pairs in prop::collection::btree_map("[a-z]{1,6}", "\\PC*", 0..6),
    ) {
        let selector = Selector::with_parameters(
            key_expr,
            pairs.iter().map(|(key, value)| (key.as_str(), value.as_str())),
        );
        let decoded: BTreeMap<String, String> = selector
            .parameters_string_map()
            .unwrap()
            .unwrap_or_default()
            .into_iter()
            .collect();
        prop_assert_eq!(decoded, pairs);
    }
}

#[test]
fn duplicate_detection_and_decoding() {
    let duplicated = Selector::parse("demo/a?a=1&a=2").unwrap();
    assert_eq!(
        duplicated.parameters_string_map(),
        Err(QueryError::DuplicateParameter { key: "a".into() })
    );

    let pairs = Selector::parse("demo/a?a=1&b=2").unwrap();
    let map = pairs.parameters_string_map().unwrap().unwrap();
    assert_eq!(map.len(), 2);
    assert_eq!(map["a"], "1");
    assert_eq!(map["b"], "2");

    let flag = Selector::parse("demo/a?flag").unwrap();
    let map = flag.parameters_string_map().unwrap().unwrap();
    assert_eq!(map["flag"], "");

    let greeting = Selector::parse("demo/a?msg=hello%20world").unwrap();
    assert_eq!(greeting.parameter("msg").unwrap().as_deref(), Some("hello world"));
}
