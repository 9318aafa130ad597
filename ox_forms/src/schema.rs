use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::api::ApiSpec;

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FormConfig {
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub meta: Value,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub theme: Value,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub layout: Value,
    #[serde(default)]
    pub steps: Vec<Step>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub initial_values: Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<Action>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl FormConfig {
    pub fn from_json_str(source: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(source)
    }

    pub fn from_yaml_str(source: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(source)
    }

    /// Actions in effect for `step_index`: the step's own list when it has
    /// one, the global list otherwise.
    pub fn actions_for_step(&self, step_index: usize) -> &[Action] {
        self.steps
            .get(step_index)
            .and_then(|step| step.actions.as_deref())
            .unwrap_or(&self.actions)
    }
}

/// Role restriction attributes shared by steps, tabs, sections, fields and
/// table columns.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RoleRules {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_roles: Option<RoleList>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub denied_roles: Option<RoleList>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_hierarchical: Option<bool>,
}

impl RoleRules {
    pub fn is_unrestricted(&self) -> bool {
        self.allowed_roles.is_none()
            && self.denied_roles.is_none()
            && self.min_role.is_none()
            && self.max_role.is_none()
    }
}

/// A role attribute written either as `"admin"` or `["admin", "sales"]`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(untagged)]
pub enum RoleList {
    One(String),
    Many(Vec<String>),
}

impl RoleList {
    pub fn as_slice(&self) -> &[String] {
        match self {
            RoleList::One(role) => std::slice::from_ref(role),
            RoleList::Many(roles) => roles,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sections: Vec<Section>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tabs: Vec<Tab>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<Field>,
    /// Overrides the form-level actions while this step is active.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actions: Option<Vec<Action>>,
    #[serde(flatten)]
    pub roles: RoleRules,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Intermediate layout container. Sections and tabs share one shape.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sections: Vec<Section>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tabs: Vec<Tab>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<Field>,
    #[serde(flatten)]
    pub roles: RoleRules,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

pub type Section = Container;
pub type Tab = Container;

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Field {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default = "default_field_type")]
    pub field_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visible_when: Option<Conditions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled_when: Option<Conditions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_when: Option<Conditions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub computed: Option<ComputedSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<FieldValidation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<FieldOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
    /// Children of a `group`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<Field>,
    /// Row template of an `array`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_schema: Option<ItemSchema>,
    /// Columns of a `table`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub columns: Vec<Column>,
    #[serde(flatten)]
    pub roles: RoleRules,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Fields without a `type` render and validate as `text`. Text validation
/// accepts numbers and booleans through their display form, so untyped
/// scalar values of any kind pass the base type check.
fn default_field_type() -> String {
    "text".to_string()
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl Field {
    pub fn new(name: &str, field_type: &str) -> Self {
        Self {
            name: name.to_string(),
            field_type: field_type.to_string(),
            ..Default::default()
        }
    }

    pub fn kind(&self) -> FieldKind {
        FieldKind::from(self.field_type.as_str())
    }

    /// Label shown to users, falling back to the field name.
    pub fn display_label(&self) -> &str {
        self.label
            .as_deref()
            .filter(|l| !l.is_empty())
            .unwrap_or(&self.name)
    }

    /// Pure containers carry no value of their own and may omit `name`.
    pub fn is_container(&self) -> bool {
        self.kind() == FieldKind::Group
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ItemSchema {
    #[serde(default)]
    pub fields: Vec<Field>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Column {
    #[serde(default)]
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub column_type: Option<String>,
    #[serde(flatten)]
    pub roles: RoleRules,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One declarative test. Either `js` (an expression) or `op`/`left`/`right`.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct Condition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub js: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub op: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub left: Option<String>,
    /// `Some(Value::Null)` for an explicit `null`, `None` when absent.
    #[serde(
        default,
        deserialize_with = "deserialize_present",
        skip_serializing_if = "Option::is_none"
    )]
    pub right: Option<Value>,
}

fn deserialize_present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl Condition {
    pub fn js(expression: &str) -> Self {
        Self {
            js: Some(expression.to_string()),
            ..Default::default()
        }
    }

    pub fn op(op: &str, left: &str, right: Option<Value>) -> Self {
        Self {
            js: None,
            op: Some(op.to_string()),
            left: Some(left.to_string()),
            right,
        }
    }
}

/// AND-combined condition list. Anything that is not a list of condition
/// objects is kept as `Invalid` and never holds.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(untagged)]
pub enum Conditions {
    List(Vec<Condition>),
    Invalid(Value),
}

impl From<Vec<Condition>> for Conditions {
    fn from(list: Vec<Condition>) -> Self {
        Conditions::List(list)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ComputedSpec {
    #[serde(default)]
    pub expr: String,
    #[serde(default)]
    pub deps: Vec<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub read_only: bool,
}

impl ComputedSpec {
    pub fn new(expr: &str, deps: &[&str]) -> Self {
        Self {
            expr: expr.to_string(),
            deps: deps.iter().map(|d| d.to_string()).collect(),
            read_only: false,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FieldValidation {
    /// Forces the constraint family (`string`, `number`, `date`, `array`)
    /// regardless of the field type.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub rule_type: Option<String>,
    /// Length, range, date bound or item count depending on the family.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regex: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub email: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub url: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub integer: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub positive: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub one_of: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_message: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FieldOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(rename = "static", default, skip_serializing_if = "Option::is_none")]
    pub static_options: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api: Option<ApiSpec>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    #[serde(rename = "type", default)]
    pub action_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Behaviour of a `custom` action, e.g. `apiCall`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api: Option<ApiSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success_description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Action {
    pub fn new(action_type: &str) -> Self {
        Self {
            action_type: action_type.to_string(),
            ..Default::default()
        }
    }

    pub fn kind(&self) -> ActionKind {
        match self.action_type.as_str() {
            "prev" => ActionKind::Prev,
            "next" => ActionKind::Next,
            "submit" => ActionKind::Submit,
            "reset" => ActionKind::Reset,
            "custom" => ActionKind::Custom,
            _ => ActionKind::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Prev,
    Next,
    Submit,
    Reset,
    Custom,
    Unknown,
}

/// Built-in field types. Anything else is carried as `Custom` and resolved
/// through the widget registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FieldKind {
    Text,
    Textarea,
    Number,
    Select,
    Radio,
    Checkbox,
    Switch,
    Date,
    Time,
    DateTime,
    Slider,
    Color,
    Upload,
    RichText,
    Array,
    Table,
    Group,
    Custom(String),
}

impl FieldKind {
    pub const BUILT_IN: [FieldKind; 17] = [
        FieldKind::Text,
        FieldKind::Textarea,
        FieldKind::Number,
        FieldKind::Select,
        FieldKind::Radio,
        FieldKind::Checkbox,
        FieldKind::Switch,
        FieldKind::Date,
        FieldKind::Time,
        FieldKind::DateTime,
        FieldKind::Slider,
        FieldKind::Color,
        FieldKind::Upload,
        FieldKind::RichText,
        FieldKind::Array,
        FieldKind::Table,
        FieldKind::Group,
    ];

    pub fn as_str(&self) -> &str {
        match self {
            FieldKind::Text => "text",
            FieldKind::Textarea => "textarea",
            FieldKind::Number => "number",
            FieldKind::Select => "select",
            FieldKind::Radio => "radio",
            FieldKind::Checkbox => "checkbox",
            FieldKind::Switch => "switch",
            FieldKind::Date => "date",
            FieldKind::Time => "time",
            FieldKind::DateTime => "datetime",
            FieldKind::Slider => "slider",
            FieldKind::Color => "color",
            FieldKind::Upload => "upload",
            FieldKind::RichText => "richtext",
            FieldKind::Array => "array",
            FieldKind::Table => "table",
            FieldKind::Group => "group",
            FieldKind::Custom(name) => name,
        }
    }

    pub fn is_built_in(&self) -> bool {
        !matches!(self, FieldKind::Custom(_))
    }
}

impl From<&str> for FieldKind {
    fn from(value: &str) -> Self {
        FieldKind::BUILT_IN
            .iter()
            .find(|kind| kind.as_str() == value)
            .cloned()
            .unwrap_or_else(|| FieldKind::Custom(value.to_string()))
    }
}

impl FromStr for FieldKind {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(FieldKind::from(s))
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deserializes_camel_case_document() {
        let config: FormConfig = serde_json::from_value(json!({
            "meta": {"title": "Signup"},
            "initialValues": {"user": {"name": ""}},
            "steps": [{
                "id": "s1",
                "title": "Account",
                "minRole": "user",
                "sections": [{"id": "main", "columns": 2, "fields": [
                    {"name": "user.name", "type": "text", "required": true,
                     "visibleWhen": [{"op": "truthy", "left": "show"}],
                     "help": "Your full name"}
                ]}]
            }]
        }))
        .unwrap();

        let step = &config.steps[0];
        assert_eq!(step.roles.min_role.as_deref(), Some("user"));
        let section = &step.sections[0];
        assert_eq!(section.extra.get("columns"), Some(&json!(2)));
        let field = &section.fields[0];
        assert!(field.required);
        assert!(matches!(field.visible_when, Some(Conditions::List(ref l)) if l.len() == 1));
        assert_eq!(field.extra.get("help"), Some(&json!("Your full name")));
        assert_eq!(config.initial_values, json!({"user": {"name": ""}}));
    }

    #[test]
    fn role_attributes_accept_string_or_list() {
        let field: Field = serde_json::from_value(json!({
            "name": "a", "allowedRoles": "admin", "deniedRoles": ["guest", "user"]
        }))
        .unwrap();
        assert_eq!(field.roles.allowed_roles.unwrap().as_slice(), ["admin".to_string()]);
        assert_eq!(field.roles.denied_roles.unwrap().as_slice().len(), 2);
    }

    #[test]
    fn malformed_condition_list_is_kept_as_invalid() {
        let field: Field = serde_json::from_value(json!({
            "name": "a", "visibleWhen": {"op": "eq"}
        }))
        .unwrap();
        assert!(matches!(field.visible_when, Some(Conditions::Invalid(_))));
    }

    #[test]
    fn explicit_null_right_operand_is_present() {
        let c: Condition = serde_json::from_value(json!({"op": "eq", "left": "a", "right": null})).unwrap();
        assert_eq!(c.right, Some(Value::Null));
        let c: Condition = serde_json::from_value(json!({"op": "truthy", "left": "a"})).unwrap();
        assert_eq!(c.right, None);
    }

    #[test]
    fn document_round_trips_unknown_attributes() {
        let source = json!({
            "steps": [{"id": "s1", "title": "One", "layoutHint": "wide",
                       "fields": [{"name": "x", "type": "slider", "marks": {"0": "low"}}]}],
            "actions": [{"type": "submit", "label": "Send"}]
        });
        let config: FormConfig = serde_json::from_value(source.clone()).unwrap();
        assert_eq!(serde_json::to_value(&config).unwrap(), source);
    }

    #[test]
    fn field_kind_parsing() {
        assert_eq!(FieldKind::from("datetime"), FieldKind::DateTime);
        assert_eq!(FieldKind::from("signature"), FieldKind::Custom("signature".into()));
        assert!(Field::new("x", "group").is_container());
        let missing_type: Field = serde_json::from_value(json!({"name": "x"})).unwrap();
        assert_eq!(missing_type.kind(), FieldKind::Text);
    }

    #[test]
    fn step_actions_override_global() {
        let config: FormConfig = serde_json::from_value(json!({
            "actions": [{"type": "next"}],
            "steps": [{"id": "a"}, {"id": "b", "actions": [{"type": "submit"}]}]
        }))
        .unwrap();
        assert_eq!(config.actions_for_step(0)[0].kind(), ActionKind::Next);
        assert_eq!(config.actions_for_step(1)[0].kind(), ActionKind::Submit);
    }
}
