use crate::schema::{Field, FieldKind};
use anyhow::Error;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Resolved interactive state of one field for the current values and role.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct FieldState {
    pub visible: bool,
    pub enabled: bool,
    pub required: bool,
}

impl Default for FieldState {
    fn default() -> Self {
        Self {
            visible: true,
            enabled: true,
            required: false,
        }
    }
}

/// Context passed to renderers
pub struct RenderContext<'a> {
    /// Whole value tree of the form.
    pub values: &'a Value,
    /// State of the field being rendered.
    pub state: FieldState,
    /// Resolved option list for selection fields, when one has been loaded.
    pub options: Option<&'a [OptionItem]>,
    /// Validation message to show next to the field, if any.
    pub error: Option<&'a str>,
    /// Already rendered children, for container fields.
    pub children: &'a [String],
    pub props: &'a HashMap<String, Value>,
}

impl<'a> RenderContext<'a> {
    pub fn new(values: &'a Value, props: &'a HashMap<String, Value>) -> Self {
        Self {
            values,
            state: FieldState::default(),
            options: None,
            error: None,
            children: &[],
            props,
        }
    }
}

pub trait ElementRenderer: Send + Sync {
    /// Field types this renderer handles.
    fn handled_types(&self) -> Vec<FieldKind>;

    /// Render the field to a string (HTML)
    fn render(&self, field: &Field, ctx: &RenderContext) -> Result<String, Error>;
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct OptionItem {
    pub label: String,
    pub value: Value,
}
