use crate::api::normalize_options;
use crate::conditions::{is_enabled, is_required, is_visible};
use crate::error::ValidationErrors;
use crate::registry::WidgetRegistry;
use crate::schema::{Container, Field, FieldKind, Step};
use crate::traits::{FieldState, OptionItem, RenderContext};
use crate::tree::{self, NodeRef};
use anyhow::{Context, Result};
use log::warn;
use serde_json::Value;
use std::collections::HashMap;

/// Visibility (role, then `visibleWhen`), enablement (`enabledWhen`, and
/// never for read-only computed fields) and requiredness for one field.
pub fn field_state(field: &Field, values: &Value, role: Option<&str>) -> FieldState {
    let read_only = field.computed.as_ref().is_some_and(|c| c.read_only);
    FieldState {
        visible: is_visible(values, field, role),
        enabled: !read_only && is_enabled(values, field),
        required: is_required(values, field),
    }
}

/// Options written inline under `options.static`, normalised to items.
pub fn static_options(field: &Field) -> Vec<OptionItem> {
    match field.options.as_ref().and_then(|o| o.static_options.as_ref()) {
        Some(items) => normalize_options(&Value::Array(items.clone()), None, None),
        None => Vec::new(),
    }
}

/// Escapes text for use in HTML content and attribute values.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

pub fn unknown_field_placeholder(field_type: &str) -> String {
    format!(r#"<div class="form-unknown-field">Unknown field type: {}</div>"#, escape(field_type))
}

/// A field of a step together with its resolved state.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedField<'a> {
    pub field: &'a Field,
    pub state: FieldState,
}

/// Everything besides the configuration that rendering reads.
#[derive(Debug, Clone, Copy)]
pub struct FormView<'a> {
    pub values: &'a Value,
    pub role: Option<&'a str>,
    /// Option lists loaded from the API layer, keyed by field name.
    pub options: Option<&'a HashMap<String, Vec<OptionItem>>>,
    /// Messages to display; callers pass only the errors of touched fields.
    pub errors: Option<&'a ValidationErrors>,
}

impl<'a> FormView<'a> {
    pub fn new(values: &'a Value) -> Self {
        Self {
            values,
            role: None,
            options: None,
            errors: None,
        }
    }

    pub fn with_role(mut self, role: Option<&'a str>) -> Self {
        self.role = role;
        self
    }

    pub fn with_options(mut self, options: &'a HashMap<String, Vec<OptionItem>>) -> Self {
        self.options = Some(options);
        self
    }

    pub fn with_errors(mut self, errors: &'a ValidationErrors) -> Self {
        self.errors = Some(errors);
        self
    }
}

pub struct FormEngine<'a> {
    registry: &'a WidgetRegistry,
    props: HashMap<String, Value>,
}

impl<'a> FormEngine<'a> {
    pub fn new(registry: &'a WidgetRegistry) -> Self {
        Self {
            registry,
            props: HashMap::new(),
        }
    }

    /// Extra renderer properties (theme values and the like).
    pub fn with_props(mut self, props: HashMap<String, Value>) -> Self {
        self.props = props;
        self
    }

    /// Fields a step renders, in layout order, each with its state. Fields
    /// inside a hidden group are left out along with the group's own
    /// children; hidden top-level fields are kept with `visible == false`.
    pub fn resolve_step<'s>(&self, step: &'s Step, values: &Value, role: Option<&str>) -> Vec<ResolvedField<'s>> {
        let mut resolved = Vec::new();
        tree::walk(NodeRef::Step(step), &mut |node| match node.as_field() {
            Some(field) => {
                let state = field_state(field, values, role);
                resolved.push(ResolvedField { field, state });
                field.kind() == FieldKind::Group && state.visible
            }
            None => node.is_layout(),
        });
        resolved
    }

    pub fn render_step(&self, step: &Step, view: &FormView) -> Result<String> {
        let mut output = self.render_fields(&step.fields, view)?;
        for section in &step.sections {
            output.push_str(&self.render_container("form-section", section, view)?);
        }
        for tab in &step.tabs {
            output.push_str(&self.render_container("form-tab", tab, view)?);
        }
        Ok(format!(r#"<div class="form-step" id="{}">{}</div>"#, escape(&step.id), output))
    }

    fn render_container(&self, class: &str, container: &Container, view: &FormView) -> Result<String> {
        let mut inner = String::new();
        if let Some(title) = &container.title {
            inner.push_str(&format!("<h3>{}</h3>", escape(title)));
        }
        inner.push_str(&self.render_fields(&container.fields, view)?);
        for section in &container.sections {
            inner.push_str(&self.render_container("form-section", section, view)?);
        }
        for tab in &container.tabs {
            inner.push_str(&self.render_container("form-tab", tab, view)?);
        }
        let id = match &container.id {
            Some(id) => format!(r#" id="{}""#, escape(id)),
            None => String::new(),
        };
        Ok(format!(r#"<div class="{}"{}>{}</div>"#, class, id, inner))
    }

    pub fn render_fields(&self, fields: &[Field], view: &FormView) -> Result<String> {
        let mut output = String::new();
        for field in fields {
            output.push_str(&self.render_field(field, view)?);
        }
        Ok(output)
    }

    /// Renders one field through the registry. Hidden fields render as an
    /// empty string; unregistered types render a placeholder.
    pub fn render_field(&self, field: &Field, view: &FormView) -> Result<String> {
        let state = field_state(field, view.values, view.role);
        if !state.visible {
            return Ok(String::new());
        }

        let kind = field.kind();
        let children = if kind == FieldKind::Group {
            field
                .fields
                .iter()
                .map(|child| self.render_field(child, view))
                .filter(|rendered| !matches!(rendered, Ok(s) if s.is_empty()))
                .collect::<Result<Vec<_>>>()?
        } else {
            Vec::new()
        };

        let Some(renderer) = self.registry.resolve(&kind) else {
            if kind == FieldKind::Group {
                return Ok(children.join(""));
            }
            warn!("Unknown field type '{}' for field '{}'", field.field_type, field.name);
            return Ok(unknown_field_placeholder(&field.field_type));
        };

        let fallback = static_options(field);
        let options = view
            .options
            .and_then(|loaded| loaded.get(&field.name))
            .map(Vec::as_slice)
            .or_else(|| (!fallback.is_empty()).then_some(fallback.as_slice()));

        let ctx = RenderContext {
            values: view.values,
            state,
            options,
            error: view.errors.and_then(|e| e.message_for(&field.name)),
            children: &children,
            props: &self.props,
        };

        renderer
            .render(field, &ctx)
            .with_context(|| format!("Failed to render field '{}'", field.name))
    }
}
