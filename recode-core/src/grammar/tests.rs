use serde_yaml::Value;

use super::*;

fn yaml(s: &str) -> Value {
    serde_yaml::from_str(s).unwrap()
}

fn keys_of(values: &[&str]) -> RuleInput<'static> {
    RuleInput::Keys(key_set(values))
}

#[test]
fn any_of_intersects_with_the_allowed_set() {
    let rule = GrammarRule::any_of(&["a", "b"]);
    assert_eq!(rule.apply(&keys_of(&["a", "c"])), key_set(&["a"]));
    assert_eq!(rule.apply(&keys_of(&["c", "d"])), key_set(&[]));
    // not a key set at all
    assert_eq!(rule.apply(&RuleInput::Scalar(&Value::from("a"))), key_set(&[]));
}

#[test]
fn n_of_requires_an_exact_count() {
    let rule = GrammarRule::n_of(2, &["a", "b", "c"]);
    assert_eq!(rule.apply(&keys_of(&["a", "b"])), key_set(&["a", "b"]));
    assert_eq!(rule.apply(&keys_of(&["a"])), key_set(&[]));
    assert_eq!(rule.apply(&keys_of(&["a", "b", "c"])), key_set(&[]));
}

#[test]
fn all_of_requires_every_member() {
    let rule = GrammarRule::all_of(&["a", "b"]);
    assert_eq!(rule.apply(&keys_of(&["a", "b", "x"])), key_set(&["a", "b"]));
    assert_eq!(rule.apply(&keys_of(&["a", "x"])), key_set(&[]));
}

#[test]
fn at_least_n_of_accepts_a_surplus() {
    let rule = GrammarRule::at_least_n_of(1, &["a", "b"]);
    assert_eq!(rule.apply(&keys_of(&["a", "b"])), key_set(&["a", "b"]));
    assert_eq!(rule.apply(&keys_of(&["x"])), key_set(&[]));
}

#[test]
#[should_panic]
fn at_least_n_of_rejects_impossible_n() {
    let _ = GrammarRule::at_least_n_of(3, &["a", "b"]);
}

#[test]
fn terminal_variable_checks_kind_and_allowed_values() {
    let any_scalar = GrammarRule::terminal_variable(None);
    assert!(!any_scalar.apply(&RuleInput::Scalar(&Value::from(7))).is_empty());
    assert!(any_scalar.apply(&keys_of(&["a"])).is_empty());

    let typed = GrammarRule::terminal_variable(Some(ScalarKind::Bool));
    assert!(!typed.apply(&RuleInput::Scalar(&Value::from(true))).is_empty());
    assert!(typed.apply(&RuleInput::Scalar(&Value::from("true"))).is_empty());

    let enumerated = GrammarRule::terminal_variable_in(ScalarKind::Str, &["int", "str"]);
    assert!(!enumerated.apply(&RuleInput::Scalar(&Value::from("int"))).is_empty());
    assert!(enumerated.apply(&RuleInput::Scalar(&Value::from("list"))).is_empty());
}

#[test]
fn terminal_collection_checks_every_item() {
    let rule = GrammarRule::terminal_collection(ScalarKind::Str);
    let ok = [Value::from("x"), Value::from("y")];
    assert_eq!(rule.apply(&RuleInput::Items(&ok)), key_set(&["x", "y"]));
    let mixed = [Value::from("x"), Value::from(3)];
    assert!(rule.apply(&RuleInput::Items(&mixed)).is_empty());
    assert!(rule.apply(&RuleInput::Scalar(&Value::from("x"))).is_empty());
}

#[test]
fn nonterminal_collection_yields_the_sole_keys() {
    let rule = GrammarRule::nonterminal_collection(&["if", "default"]);
    let items = yaml("[{if: {x: 1}}, {default: {y: 2}}, {other: 3}]");
    let accepted = rule.apply(&RuleInput::Items(items.as_sequence().unwrap()));
    assert_eq!(accepted, key_set(&["if", "default"]));

    // a scalar entry disqualifies the whole collection
    let broken = yaml("[{if: {x: 1}}, plain]");
    assert!(rule
        .apply(&RuleInput::Items(broken.as_sequence().unwrap()))
        .is_empty());
}

#[test]
fn combine_unions_its_alternatives() {
    let rule = GrammarRule::combine(vec![
        GrammarRule::all_of(&["a"]),
        GrammarRule::any_of(&["b", "c"]),
    ]);
    assert_eq!(rule.apply(&keys_of(&["a", "b", "x"])), key_set(&["a", "b"]));
}

#[test]
fn match_power_scores_segments() {
    assert_eq!(match_power("/"), 1.0);
    assert_eq!(match_power("arguments"), 1.0);
    assert_eq!(match_power("arguments.*"), 1.5);
    assert_eq!(match_power("arguments.*.type"), 2.5);
    assert_eq!(match_power("*"), 0.5);
}

fn toy_schema() -> Vec<(String, GrammarRule)> {
    vec![
        (DOCUMENT_ROOT.into(), GrammarRule::all_of(&["alpha", "beta"])),
        ("alpha".into(), GrammarRule::terminal_variable(None)),
        (
            "beta".into(),
            GrammarRule::combine(vec![
                GrammarRule::any_of(&["gamma", "steps"]),
                GrammarRule::terminal_variable(None),
            ]),
        ),
        (
            "gamma".into(),
            GrammarRule::terminal_collection(ScalarKind::Str),
        ),
        (
            "steps".into(),
            GrammarRule::nonterminal_collection(&["run", "skip"]),
        ),
        ("run".into(), GrammarRule::terminal_variable(None)),
        ("skip".into(), GrammarRule::terminal_variable(None)),
    ]
}

#[test]
fn unknown_keys_are_dropped() {
    let validator = DocumentValidator::new(toy_schema());
    let doc = yaml("{alpha: 1, beta: {gamma: [x, y]}, zzz: 1}");
    let result = validator.validate(&doc).unwrap();
    assert!(result.get("zzz").is_none());
    assert_eq!(result.get("alpha"), Some(&Value::from(1)));
    assert_eq!(
        result.get("beta").unwrap().get("gamma"),
        Some(&yaml("[x, y]"))
    );
}

#[test]
fn list_entries_are_filtered_by_key() {
    let validator = DocumentValidator::new(toy_schema());
    let doc = yaml("{alpha: 1, beta: {steps: [{run: 1}, {skip: 2}, {other: 3}]}}");
    let result = validator.validate(&doc).unwrap();
    let steps = result
        .get("beta")
        .unwrap()
        .get("steps")
        .unwrap()
        .as_sequence()
        .unwrap();
    assert_eq!(steps.len(), 2);
    assert_eq!(steps[0], yaml("{run: 1}"));
    assert_eq!(steps[1], yaml("{skip: 2}"));
}

#[test]
fn subtree_without_a_rule_becomes_null() {
    let schema = vec![
        (DOCUMENT_ROOT.to_owned(), GrammarRule::all_of(&["alpha", "beta"])),
        ("alpha".to_owned(), GrammarRule::terminal_variable(None)),
    ];
    let validator = DocumentValidator::new(schema);
    let result = validator.validate(&yaml("{alpha: 1, beta: 2}")).unwrap();
    assert_eq!(result.get("beta"), Some(&Value::Null));
}

#[test]
fn validation_is_idempotent() {
    let validator = DocumentValidator::new(toy_schema());
    let docs = [
        yaml("{alpha: 1, beta: {gamma: [x, y], junk: 2}, zzz: 1}"),
        yaml("{alpha: yes, beta: {steps: [{run: 1}, {bad: 2}]}}"),
        yaml("{alpha: 1}"),
        yaml("[1, 2]"),
    ];
    for doc in docs {
        let once = validator.validate(&doc);
        let twice = once.as_ref().and_then(|v| validator.validate(v));
        assert_eq!(once, twice);
    }
}

fn assert_subset(output: &Value, input: &Value) {
    match (output, input) {
        (Value::Mapping(out), Value::Mapping(inp)) => {
            for (key, value) in out {
                let original = inp.get(key).expect("output key exists in input");
                if !value.is_null() {
                    assert_subset(value, original);
                }
            }
        }
        (Value::Sequence(out), Value::Sequence(inp)) => {
            for item in out {
                match item {
                    Value::Mapping(map) => {
                        let key = map.keys().next().unwrap();
                        assert!(inp.iter().any(|candidate| {
                            candidate
                                .as_mapping()
                                .is_some_and(|m| m.contains_key(key))
                        }));
                    }
                    scalar => assert!(inp.contains(scalar)),
                }
            }
        }
        (out, inp) => assert_eq!(out, inp),
    }
}

#[test]
fn validation_returns_a_subset_of_the_input() {
    let validator = DocumentValidator::new(toy_schema());
    let doc = yaml(
        "{alpha: 1, beta: {gamma: [x, y], steps: [{run: 1}, {other: 2}], junk: true}, zzz: 0}",
    );
    let result = validator.validate(&doc).unwrap();
    assert_subset(&result, &doc);
}

#[test]
fn wildcard_patterns_lose_to_literal_ones() {
    let schema = vec![
        (DOCUMENT_ROOT.to_owned(), GrammarRule::any()),
        ("outer".to_owned(), GrammarRule::any()),
        ("outer.*".to_owned(), GrammarRule::terminal_variable(None)),
        (
            "outer.special".to_owned(),
            GrammarRule::terminal_variable(Some(ScalarKind::Bool)),
        ),
    ];
    let validator = DocumentValidator::new(schema);
    // `outer.special` (power 2.0) shadows `outer.*` (power 1.5): the typed
    // rule applies and rejects the non-boolean value.
    let result = validator
        .validate(&yaml("{outer: {special: 1, plain: 1}}"))
        .unwrap();
    let outer = result.get("outer").unwrap();
    assert_eq!(outer.get("special"), Some(&Value::Null));
    assert_eq!(outer.get("plain"), Some(&Value::from(1)));
}

#[test]
fn power_ties_resolve_to_the_longest_pattern() {
    // Tail matching makes `streams` also match a path ending in
    // `nb-streams`; the longer literal pattern must win the tie.
    let schema = vec![
        (DOCUMENT_ROOT.to_owned(), GrammarRule::any()),
        ("streams".to_owned(), GrammarRule::any_of(&["video"])),
        (
            "nb-streams".to_owned(),
            GrammarRule::terminal_variable(Some(ScalarKind::Int)),
        ),
    ];
    let validator = DocumentValidator::new(schema);
    let result = validator.validate(&yaml("{nb-streams: 4}")).unwrap();
    // had `streams` (a key-set rule) won, the scalar would be rejected
    assert_eq!(result.get("nb-streams"), Some(&Value::from(4)));
}

#[test]
fn ambiguous_patterns_drop_the_subtree() {
    let schema = vec![
        (DOCUMENT_ROOT.to_owned(), GrammarRule::any()),
        ("a".to_owned(), GrammarRule::any()),
        ("a.*".to_owned(), GrammarRule::terminal_variable(None)),
        ("*.b".to_owned(), GrammarRule::terminal_variable(None)),
    ];
    let validator = DocumentValidator::new(schema);
    // `/.a.b` matches both `a.*` and `*.b` at power 1.5; unresolvable.
    let result = validator.validate(&yaml("{a: {b: 1, c: 2}}")).unwrap();
    let a = result.get("a").unwrap();
    assert_eq!(a.get("b"), Some(&Value::Null));
    assert_eq!(a.get("c"), Some(&Value::from(2)));
}

#[test]
#[should_panic]
fn schema_requires_a_root_rule() {
    let _ = DocumentValidator::new(vec![(
        "alpha".to_owned(),
        GrammarRule::terminal_variable(None),
    )]);
}
