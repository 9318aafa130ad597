//! Loading form configuration documents and checking them before use.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use log::{debug, error, trace};

use crate::conditions::Operator;
use crate::error::ConfigError;
use crate::expr::Expression;
use crate::schema::{Conditions, Field, FieldKind, FormConfig};
use crate::tree::{self, NodeRef};

/// Reads a `.json`, `.yaml` or `.yml` form configuration.
pub fn load_form_config(path: &Path) -> Result<FormConfig, ConfigError> {
    debug!("Loading form config from: {:?}", path);

    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    trace!("Form config content:\n{}", contents);

    match path.extension().and_then(|s| s.to_str()) {
        Some("yaml") | Some("yml") => {
            debug!("Parsing as YAML");
            Ok(FormConfig::from_yaml_str(&contents)?)
        }
        Some("json") => {
            debug!("Parsing as JSON");
            Ok(FormConfig::from_json_str(&contents)?)
        }
        other => {
            error!("Unsupported form config file format: {:?}", other);
            Err(ConfigError::UnsupportedFormat(other.unwrap_or_default().to_string()))
        }
    }
}

fn check_conditions(owner: &str, attribute: &str, conditions: Option<&Conditions>, issues: &mut Vec<String>) {
    match conditions {
        None => {}
        Some(Conditions::Invalid(_)) => issues.push(format!("{owner}: {attribute} must be an array")),
        Some(Conditions::List(list)) => {
            for condition in list {
                if let Some(js) = &condition.js {
                    if let Err(e) = Expression::parse(js) {
                        issues.push(format!("{owner}: {attribute} expression '{js}' is invalid: {e}"));
                    }
                } else if let Some(op) = &condition.op {
                    if let Err(e) = op.parse::<Operator>() {
                        issues.push(format!("{owner}: {attribute} uses {e}"));
                    }
                }
            }
        }
    }
}

fn check_field(field: &Field, issues: &mut Vec<String>) {
    let owner = if field.name.is_empty() {
        format!("field of type '{}'", field.field_type)
    } else {
        format!("field '{}'", field.name)
    };

    if field.name.is_empty() && !field.is_container() {
        issues.push(format!("{owner} has no name"));
    }
    check_conditions(&owner, "visibleWhen", field.visible_when.as_ref(), issues);
    check_conditions(&owner, "enabledWhen", field.enabled_when.as_ref(), issues);
    check_conditions(&owner, "requiredWhen", field.required_when.as_ref(), issues);

    if let Some(computed) = &field.computed {
        if computed.expr.trim().is_empty() {
            issues.push(format!("{owner}: computed field has no expr"));
        } else if let Err(e) = Expression::parse(&computed.expr) {
            issues.push(format!("{owner}: computed expr '{}' is invalid: {e}", computed.expr));
        }
    }
}

impl FormConfig {
    /// Every problem found in the configuration, or `Ok` when there are none.
    pub fn check(&self) -> Result<(), ConfigError> {
        let mut issues = Vec::new();
        if self.steps.is_empty() {
            issues.push("configuration has no steps".to_string());
        }

        for (index, step) in self.steps.iter().enumerate() {
            let mut seen = BTreeSet::new();
            tree::walk(NodeRef::Step(step), &mut |node| match node.as_field() {
                Some(field) => {
                    check_field(field, &mut issues);
                    if !field.name.is_empty() && !seen.insert(field.name.as_str()) {
                        issues.push(format!("step {} ('{}'): duplicate field '{}'", index, step.id, field.name));
                    }
                    field.kind() == FieldKind::Group
                }
                None => node.is_layout(),
            });

            for field in tree::flatten_step_fields(step) {
                let rows = field.item_schema.iter().flat_map(|schema| schema.fields.iter());
                for row_field in rows {
                    check_field(row_field, &mut issues);
                }
            }
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(issues))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config(value: serde_json::Value) -> FormConfig {
        serde_json::from_value(value).unwrap()
    }

    fn issues(config: &FormConfig) -> Vec<String> {
        match config.check() {
            Err(ConfigError::Invalid(issues)) => issues,
            other => panic!("expected issues, got {other:?}"),
        }
    }

    #[test]
    fn empty_configuration_is_invalid() {
        assert_eq!(issues(&config(json!({}))), ["configuration has no steps"]);
    }

    #[test]
    fn well_formed_configuration_passes() {
        let cfg = config(json!({"steps": [{"id": "a", "fields": [
            {"name": "n", "visibleWhen": [{"op": "==", "left": "x", "right": 1}]},
            {"type": "group", "fields": [{"name": "g.a", "requiredWhen": [{"js": "x > 1"}]}]},
            {"name": "t", "computed": {"expr": "x * 2", "deps": ["x"]}}
        ]}]}));
        assert!(cfg.check().is_ok());
    }

    #[test]
    fn reports_each_problem() {
        let cfg = config(json!({"steps": [{"id": "a", "fields": [
            {"type": "text"},
            {"name": "dup"},
            {"name": "dup", "enabledWhen": {"op": "eq"}},
            {"name": "c", "visibleWhen": [{"op": "xyz", "left": "a"}, {"js": "a >"}]},
            {"name": "d", "computed": {"expr": "", "deps": []}},
            {"name": "rows", "type": "array", "itemSchema": {"fields": [{"type": "number"}]}}
        ]}]}));
        let found = issues(&cfg);
        assert_eq!(found.len(), 7, "{found:?}");
        assert!(found.contains(&"field of type 'text' has no name".to_string()));
        assert!(found.contains(&"step 0 ('a'): duplicate field 'dup'".to_string()));
        assert!(found.contains(&"field 'dup': enabledWhen must be an array".to_string()));
        assert!(found.contains(&"field 'd': computed field has no expr".to_string()));
        assert!(found.contains(&"field of type 'number' has no name".to_string()));
        assert!(found.iter().any(|i| i.starts_with("field 'c': visibleWhen uses")));
        assert!(found.iter().any(|i| i.starts_with("field 'c': visibleWhen expression 'a >'")));
    }
}
