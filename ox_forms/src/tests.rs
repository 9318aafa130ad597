use crate::computed::evaluate_computed;
use crate::conditions::{evaluate_condition, evaluate_condition_list, evaluate_conditions};
use crate::path;
use crate::roles::{filter_config_by_role, has_role_access, is_role_visible, Role};
use crate::schema::{ComputedSpec, Condition, Conditions, Field, FormConfig, RoleList, RoleRules};
use crate::tree::flatten_step_fields;
use crate::validation::build_schema;
use crate::wizard::{Direction, StepWizard, Transition};
use serde_json::{json, Value};

fn name_condition() -> Condition {
    Condition::op("eq", "user.name", Some(json!("John")))
}

#[test]
fn test_condition_matches_nested_value() {
    assert!(evaluate_condition(&name_condition(), &json!({"user": {"name": "John"}})));
    assert!(!evaluate_condition(&name_condition(), &json!({"user": {"name": "Jane"}})));
}

#[test]
fn test_computed_doubles_age() {
    let spec = ComputedSpec::new("user.age*2", &["user.age"]);
    assert_eq!(evaluate_computed(&spec, &json!({"user": {"age": 25}})), Some(json!(50)));
}

#[test]
fn test_min_role_visibility() {
    let rules: RoleRules = serde_json::from_value(json!({"minRole": "sales"})).unwrap();
    assert!(!is_role_visible(Some("user"), &rules));
    assert!(is_role_visible(Some("admin"), &rules));
}

#[test]
fn test_filter_drops_admin_field_for_user() {
    let config: FormConfig = serde_json::from_value(json!({
        "steps": [{"id": "s1", "fields": [{"name": "a"}, {"name": "b", "allowedRoles": ["admin"]}]}]
    }))
    .unwrap();
    let filtered = filter_config_by_role(&config, Some("user"));
    assert_eq!(filtered.steps.len(), 1);
    assert_eq!(filtered.steps[0].id, "s1");
    assert_eq!(filtered.steps[0].fields, vec![Field::new("a", "text")]);
}

#[test]
fn test_required_when_toggles_schema() {
    let fields: Vec<Field> = serde_json::from_value(json!([
        {"name": "email", "type": "text", "requiredWhen": [{"op": "truthy", "left": "hasEmail"}]}
    ]))
    .unwrap();
    assert!(!build_schema(&fields, &json!({"hasEmail": false})).is_required("email"));
    assert!(build_schema(&fields, &json!({"hasEmail": true})).is_required("email"));
}

#[test]
fn test_unknown_operator_is_false() {
    let condition = Condition::op("xyz", "a", None);
    assert!(!evaluate_condition(&condition, &json!({"a": 1})));
}

#[test]
fn test_path_round_trip() {
    let cases = [
        ("a", json!(1)),
        ("a.b.c", json!("deep")),
        ("list", json!([1, 2])),
        ("user.address.zip", json!(null)),
        ("x.y", json!({"z": true})),
    ];
    for (p, v) in cases {
        let mut tree = json!({"a": {"b": 3}, "x": 5});
        path::set(&mut tree, p, v.clone());
        assert_eq!(path::get(&tree, p), Some(&v), "path {p}");
    }
}

#[test]
fn test_condition_lists_are_conjunctions() {
    let values = json!({"a": 2, "b": "yes", "c": [1, 2]});
    let pool = [
        Condition::op("gt", "a", Some(json!(1))),
        Condition::op("eq", "b", Some(json!("no"))),
        Condition::op("in", "a", Some(json!([1, 2, 3]))),
        Condition::op("empty", "missing", None),
        Condition::js("a * 2 == 4"),
    ];
    assert!(evaluate_condition_list(&[], &values));
    for mask in 0u32..(1 << pool.len()) {
        let picked: Vec<Condition> = pool
            .iter()
            .enumerate()
            .filter(|(i, _)| mask & (1 << i) != 0)
            .map(|(_, c)| c.clone())
            .collect();
        let expected = picked.iter().all(|c| evaluate_condition(c, &values));
        assert_eq!(evaluate_conditions(&Conditions::from(picked), &values), expected, "mask {mask:b}");
    }
}

#[test]
fn test_undeclared_dependency_does_not_change_output() {
    let spec = ComputedSpec::new("price * qty", &["price", "qty"]);
    let mut values = json!({"price": 3, "qty": 2, "discount": 0});
    let before = evaluate_computed(&spec, &values);
    assert_eq!(before, evaluate_computed(&spec, &values));
    path::set(&mut values, "discount", json!(5));
    assert_eq!(before, evaluate_computed(&spec, &values));
}

#[test]
fn test_role_hierarchy_is_monotonic() {
    for required in Role::ALL {
        let list = RoleList::One(required.as_str().to_string());
        if has_role_access(Some("admin"), Some(&list), true) {
            for role in Role::ALL.iter().filter(|r| r.level() >= required.level()) {
                assert!(has_role_access(Some(role.as_str()), Some(&list), true));
            }
        }
    }
}

#[test]
fn test_step_transition_gating() {
    let config: FormConfig = serde_json::from_value(json!({"steps": [
        {"id": "one", "fields": [{"name": "title", "type": "text", "required": true}]},
        {"id": "two"}
    ]}))
    .unwrap();
    let mut wizard = StepWizard::new();
    let mut values = json!({});

    let first = wizard.go_to(1, Direction::Next, &config.steps, &values).unwrap();
    assert!(matches!(first, Transition::Rejected { .. }));
    assert_eq!(wizard.current(), 0);
    for field in flatten_step_fields(&config.steps[0]) {
        assert!(wizard.is_touched(&field.name));
    }

    path::set(&mut values, "title", Value::from("Hello"));
    let second = wizard.go_to(1, Direction::Next, &config.steps, &values).unwrap();
    assert_eq!(second, Transition::Moved { from: 0, to: 1 });
    assert!(wizard.is_completed(0));
}
