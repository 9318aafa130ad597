//! Computed fields: evaluation and dependency-driven recalculation.
//!
//! Recalculation is driven only by the declared `deps` of each computed
//! field. Expressions are never inspected to discover what they read, so a
//! dependency missing from `deps` leaves the field stale until some declared
//! dependency changes.

use std::collections::BTreeMap;

use log::debug;
use serde_json::{Map, Value};

use crate::conditions::strict_equals;
use crate::expr;
use crate::path;
use crate::schema::{ComputedSpec, Field, FieldKind, FormConfig};
use crate::tree::{self, NodeRef};

/// Computed field path to its declared dependency paths.
pub type DependencyMap = BTreeMap<String, Vec<String>>;

/// Evaluates `spec.expr` against the current values, with every declared
/// dependency also exposed under its full dotted path as a flat key.
pub fn evaluate_computed(spec: &ComputedSpec, values: &Value) -> Option<Value> {
    if spec.expr.trim().is_empty() {
        return None;
    }

    let mut context: Map<String, Value> = values.as_object().cloned().unwrap_or_default();
    for dep in &spec.deps {
        if let Some(value) = path::get(values, dep) {
            context.insert(dep.clone(), value.clone());
        }
    }

    let result = expr::evaluate(&spec.expr, &Value::Object(context));
    if result.is_none() {
        debug!("Computed expression '{}' produced no value", spec.expr);
    }
    result
}

fn visit_computed<'a>(node: NodeRef<'a>, found: &mut BTreeMap<String, &'a ComputedSpec>) {
    tree::walk(node, &mut |n| match n.as_field() {
        Some(field) => {
            if let Some(spec) = &field.computed {
                found.insert(field.name.clone(), spec);
            }
            // Array rows and table cells are addressed relative to their row.
            !matches!(field.kind(), FieldKind::Array | FieldKind::Table)
        }
        None => n.is_layout(),
    });
}

/// Computed fields reachable from `fields`, including fields nested in
/// groups.
pub fn collect_dependencies<'a>(fields: impl IntoIterator<Item = &'a Field>) -> DependencyMap {
    let mut found = BTreeMap::new();
    for field in fields {
        visit_computed(NodeRef::Field(field), &mut found);
    }
    found
        .into_iter()
        .map(|(name, spec)| (name, spec.deps.clone()))
        .collect()
}

/// Every computed field in the configuration, keyed by field path.
pub fn collect_computed(config: &FormConfig) -> BTreeMap<String, ComputedSpec> {
    let mut found = BTreeMap::new();
    for step in &config.steps {
        visit_computed(NodeRef::Step(step), &mut found);
    }
    found
        .into_iter()
        .map(|(name, spec)| (name, spec.clone()))
        .collect()
}

pub fn dependency_map(specs: &BTreeMap<String, ComputedSpec>) -> DependencyMap {
    specs
        .iter()
        .map(|(name, spec)| (name.clone(), spec.deps.clone()))
        .collect()
}

/// Fields with at least one declared dependency whose resolved value differs
/// between `prev` and `current`.
pub fn fields_needing_recalculation(prev: &Value, current: &Value, deps: &DependencyMap) -> Vec<String> {
    deps.iter()
        .filter(|(_, paths)| {
            paths
                .iter()
                .any(|dep| !strict_equals(path::get(prev, dep), path::get(current, dep)))
        })
        .map(|(name, _)| name.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn evaluates_against_declared_dependencies() {
        let spec = ComputedSpec::new("user.age * 2", &["user.age"]);
        assert_eq!(evaluate_computed(&spec, &json!({"user": {"age": 25}})), Some(json!(50)));
    }

    #[test]
    fn failure_yields_none() {
        let spec = ComputedSpec::new("price * qty", &["price", "qty"]);
        assert_eq!(evaluate_computed(&spec, &json!({"price": 3})), None);
        assert_eq!(evaluate_computed(&ComputedSpec::default(), &json!({"a": 1})), None);
    }

    #[test]
    fn recalculation_is_idempotent() {
        let spec = ComputedSpec::new("price * qty", &["price", "qty"]);
        let values = json!({"price": 2.5, "qty": 4, "note": "x"});
        let first = evaluate_computed(&spec, &values);
        assert_eq!(first, evaluate_computed(&spec, &values));

        let mut changed = values.clone();
        path::set(&mut changed, "note", json!("y"));
        assert_eq!(first, evaluate_computed(&spec, &changed));
        assert_eq!(first, Some(json!(10)));
    }

    #[test]
    fn collects_nested_group_dependencies() {
        let fields: Vec<Field> = serde_json::from_value(json!([
            {"name": "total", "computed": {"expr": "a + b", "deps": ["a", "b"]}},
            {"name": "g", "type": "group", "fields": [
                {"name": "g.double", "computed": {"expr": "a * 2", "deps": ["a"]}}
            ]},
            {"name": "rows", "type": "array", "itemSchema": {"fields": [
                {"name": "line", "computed": {"expr": "qty", "deps": ["qty"]}}
            ]}}
        ]))
        .unwrap();
        let deps = collect_dependencies(&fields);
        assert_eq!(deps.len(), 2);
        assert_eq!(deps["total"], ["a", "b"]);
        assert_eq!(deps["g.double"], ["a"]);
    }

    #[test]
    fn row_fields_stay_out_but_row_paths_are_tracked() {
        let fields: Vec<Field> = serde_json::from_value(json!([
            {"name": "items", "type": "table", "columns": [{"key": "qty"}]},
            {"name": "lines", "type": "array", "itemSchema": {"fields": [
                {"name": "amount", "computed": {"expr": "qty * 2", "deps": ["qty"]}}
            ]}},
            {"name": "firstQty", "computed": {"expr": "items.0.qty", "deps": ["items.0.qty"]}}
        ]))
        .unwrap();
        let deps = collect_dependencies(&fields);
        assert_eq!(deps.keys().collect::<Vec<_>>(), ["firstQty"]);

        let prev = json!({"items": [{"qty": 1}, {"qty": 2}]});
        let mut current = prev.clone();
        path::set(&mut current, "items.1.qty", json!(3));
        assert!(fields_needing_recalculation(&prev, &current, &deps).is_empty());
        path::set(&mut current, "items.0.qty", json!(4));
        assert_eq!(fields_needing_recalculation(&prev, &current, &deps), ["firstQty"]);
    }

    #[test]
    fn collects_across_steps() {
        let config: FormConfig = serde_json::from_value(json!({
            "steps": [
                {"id": "1", "sections": [{"fields": [
                    {"name": "x", "computed": {"expr": "a", "deps": ["a"]}}]}]},
                {"id": "2", "tabs": [{"fields": [
                    {"name": "y", "computed": {"expr": "x + 1", "deps": ["x"]}}]}]}
            ]
        }))
        .unwrap();
        let specs = collect_computed(&config);
        assert_eq!(specs.keys().collect::<Vec<_>>(), ["x", "y"]);
        assert_eq!(dependency_map(&specs)["y"], ["x"]);
    }

    #[test]
    fn detects_changed_dependencies() {
        let mut deps = DependencyMap::new();
        deps.insert("total".into(), vec!["order.price".into(), "order.qty".into()]);
        deps.insert("label".into(), vec!["name".into()]);

        let prev = json!({"order": {"price": 2, "qty": 1}, "name": "a"});
        let current = json!({"order": {"price": 2, "qty": 3}, "name": "a"});
        assert_eq!(fields_needing_recalculation(&prev, &current, &deps), ["total"]);
        assert!(fields_needing_recalculation(&prev, &prev, &deps).is_empty());

        let appeared = json!({"order": {"price": 2, "qty": 1}, "name": "a", "extra": 1});
        assert!(fields_needing_recalculation(&prev, &appeared, &deps).is_empty());
        let removed = json!({"order": {"price": 2, "qty": 1}});
        assert_eq!(fields_needing_recalculation(&prev, &removed, &deps), ["label"]);
    }
}
