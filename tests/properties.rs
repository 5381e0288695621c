use object_path_query::infoset::{boolean_value, double_value, number, string_value};
use object_path_query::{Engine, EngineConfig, PathContext, Value};
use proptest::prelude::*;
use serde_json::json;

fn path_text() -> impl Strategy<Value = String> {
    let step = prop_oneof![
        "[a-c]".prop_map(|s| s),
        ("[a-c]", 1..5usize).prop_map(|(s, n)| format!("{s}[{n}]")),
        Just("@x".to_string()),
        Just("..".to_string()),
        Just("*".to_string()),
    ];
    (any::<bool>(), prop::collection::vec(step, 1..5)).prop_map(|(absolute, steps)| {
        let body = steps.join("/");
        if absolute {
            format!("/{body}")
        } else {
            body
        }
    })
}

proptest! {
    #[test]
    fn compilation_is_idempotent(text in path_text()) {
        let engine = Engine::new(EngineConfig { cache_capacity: 1, ..EngineConfig::default() });
        let first = engine.compile(&text).unwrap();
        engine.compile("evict/me").unwrap();
        let again = engine.compile(&text).unwrap();
        prop_assert_eq!(&*first, &*again);
    }

    #[test]
    fn union_is_ascending_and_unique(len in 1..8usize, picks in prop::collection::vec(0..8usize, 1..6)) {
        let ctx = PathContext::new(json!({"a": (0..len).collect::<Vec<_>>()}));
        let picks: Vec<usize> = picks.into_iter().map(|p| p % len + 1).collect();
        let text = picks.iter().map(|p| format!("a[{p}]")).collect::<Vec<_>>().join(" | ");
        let paths: Vec<String> = ctx
            .iterate_pointers(&text)
            .unwrap()
            .map(|p| p.unwrap().as_path())
            .collect();
        let mut expected = picks.clone();
        expected.sort_unstable();
        expected.dedup();
        let expected: Vec<String> = expected.iter().map(|p| format!("/a[{p}]")).collect();
        prop_assert_eq!(paths, expected);
    }

    #[test]
    fn replaying_an_expression_is_deterministic(values in prop::collection::vec(-50i64..50, 0..10)) {
        let ctx = PathContext::new(json!({"v": values}));
        let compiled = ctx.compile("v[. > 0] | v[. < -10]").unwrap();
        let run = || -> Vec<String> {
            compiled
                .iterate_pointers(&ctx)
                .unwrap()
                .map(|p| p.unwrap().as_path())
                .collect()
        };
        prop_assert_eq!(run(), run());
    }

    #[test]
    fn coercions_are_total(s in ".*", n in any::<f64>()) {
        let text = Value::String(s.clone());
        let _ = number(&text);
        let _ = double_value(&text);
        prop_assert_eq!(boolean_value(&text), !s.is_empty());
        let _ = string_value(&Value::Number(n));
        let _ = boolean_value(&Value::Number(n));
    }

    #[test]
    fn integral_numbers_print_without_fraction(n in -1_000_000i64..1_000_000) {
        prop_assert_eq!(string_value(&Value::Number(n as f64)), n.to_string());
    }
}

#[test]
fn empty_string_diverges_between_number_and_double_value() {
    let empty = Value::from("");
    assert!(number(&empty).is_nan());
    assert_eq!(double_value(&empty), 0.0);
}

#[test]
fn boolean_of_signed_zero_and_nan() {
    assert!(!boolean_value(&Value::Number(-0.0)));
    assert!(!boolean_value(&Value::Number(f64::NAN)));
    assert_eq!(string_value(&Value::Number(3.0)), "3");
    assert_eq!(string_value(&Value::Number(3.5)), "3.5");
}
