use ox_forms::expr::display_value;
use ox_forms::path;
use ox_forms::registry::WidgetRegistry;
use ox_forms::render::escape;
use ox_forms::schema::{Field, FieldKind};
use ox_forms::traits::{ElementRenderer, OptionItem, RenderContext};
use anyhow::{Result, Error};
use log::debug;
use serde_json::Value;
use std::sync::Arc;

/// Text form of a value for an input's `value` attribute; absent and null
/// are empty.
fn input_value(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => display_value(other),
    }
}

fn current_value<'a>(field: &Field, ctx: &RenderContext<'a>) -> Option<&'a Value> {
    path::get(ctx.values, &field.name)
}

fn state_attributes(ctx: &RenderContext) -> String {
    let mut attrs = String::new();
    if !ctx.state.enabled {
        attrs.push_str(" disabled");
    }
    if ctx.state.required {
        attrs.push_str(" required");
    }
    attrs
}

/// Wraps a control with its label and, when present, its error message.
fn form_group(field: &Field, ctx: &RenderContext, control: &str) -> String {
    let name = escape(&field.name);
    let label = escape(field.display_label());
    let error = ctx
        .error
        .map(|e| format!(r#"<div class="form-error">{}</div>"#, escape(e)))
        .unwrap_or_default();
    format!(r#"<div class="form-group"><label for="{name}">{label}</label>{control}{error}</div>"#)
}

fn placeholder_attribute(field: &Field) -> String {
    field
        .placeholder
        .as_deref()
        .map(|p| format!(r#" placeholder="{}""#, escape(p)))
        .unwrap_or_default()
}

pub struct TextInputRenderer;

impl ElementRenderer for TextInputRenderer {
    fn handled_types(&self) -> Vec<FieldKind> {
        vec![FieldKind::Text]
    }

    fn render(&self, field: &Field, ctx: &RenderContext) -> Result<String, Error> {
        let name = escape(&field.name);
        let control = format!(
            r#"<input type="text" id="{name}" name="{name}" class="form-control" value="{}"{}{} />"#,
            escape(&input_value(current_value(field, ctx))),
            placeholder_attribute(field),
            state_attributes(ctx)
        );
        Ok(form_group(field, ctx, &control))
    }
}

/// `textarea` and `richtext`; rich text is emitted as a marked textarea.
pub struct TextAreaRenderer;

impl ElementRenderer for TextAreaRenderer {
    fn handled_types(&self) -> Vec<FieldKind> {
        vec![FieldKind::Textarea, FieldKind::RichText]
    }

    fn render(&self, field: &Field, ctx: &RenderContext) -> Result<String, Error> {
        let name = escape(&field.name);
        let class = if field.kind() == FieldKind::RichText {
            "form-control rich-text"
        } else {
            "form-control"
        };
        let control = format!(
            r#"<textarea id="{name}" name="{name}" class="{class}"{}{}>{}</textarea>"#,
            placeholder_attribute(field),
            state_attributes(ctx),
            escape(&input_value(current_value(field, ctx)))
        );
        Ok(form_group(field, ctx, &control))
    }
}

pub struct NumberInputRenderer;

impl ElementRenderer for NumberInputRenderer {
    fn handled_types(&self) -> Vec<FieldKind> {
        vec![FieldKind::Number, FieldKind::Slider]
    }

    fn render(&self, field: &Field, ctx: &RenderContext) -> Result<String, Error> {
        let name = escape(&field.name);
        let input_type = if field.kind() == FieldKind::Slider { "range" } else { "number" };
        let mut bounds = String::new();
        if let Some(validation) = &field.validation {
            if let Some(min) = validation.min.as_ref().filter(|v| v.is_number()) {
                bounds.push_str(&format!(r#" min="{}""#, min));
            }
            if let Some(max) = validation.max.as_ref().filter(|v| v.is_number()) {
                bounds.push_str(&format!(r#" max="{}""#, max));
            }
        }
        let control = format!(
            r#"<input type="{input_type}" id="{name}" name="{name}" class="form-control" value="{}"{bounds}{} />"#,
            escape(&input_value(current_value(field, ctx))),
            state_attributes(ctx)
        );
        Ok(form_group(field, ctx, &control))
    }
}

fn is_selected(current: Option<&Value>, option: &OptionItem) -> bool {
    match current {
        Some(Value::Array(items)) => items.contains(&option.value),
        Some(value) => *value == option.value,
        None => false,
    }
}

/// `select`, `radio` and option-backed `checkbox` groups. A checkbox with
/// no options is a single boolean box.
pub struct ChoiceRenderer;

impl ElementRenderer for ChoiceRenderer {
    fn handled_types(&self) -> Vec<FieldKind> {
        vec![FieldKind::Select, FieldKind::Radio, FieldKind::Checkbox]
    }

    fn render(&self, field: &Field, ctx: &RenderContext) -> Result<String, Error> {
        let name = escape(&field.name);
        let current = current_value(field, ctx);
        let options = ctx.options.unwrap_or_default();
        let attrs = state_attributes(ctx);

        let control = match field.kind() {
            FieldKind::Select => {
                let items: String = options
                    .iter()
                    .map(|o| {
                        format!(
                            r#"<option value="{}"{}>{}</option>"#,
                            escape(&input_value(Some(&o.value))),
                            if is_selected(current, o) { " selected" } else { "" },
                            escape(&o.label)
                        )
                    })
                    .collect();
                format!(r#"<select id="{name}" name="{name}" class="form-control"{attrs}>{items}</select>"#)
            }
            FieldKind::Checkbox if options.is_empty() => {
                let checked = if current.and_then(Value::as_bool).unwrap_or(false) { " checked" } else { "" };
                format!(r#"<input type="checkbox" id="{name}" name="{name}"{checked}{attrs} />"#)
            }
            kind => {
                let input_type = if kind == FieldKind::Radio { "radio" } else { "checkbox" };
                options
                    .iter()
                    .map(|o| {
                        format!(
                            r#"<label><input type="{input_type}" name="{name}" value="{}"{}{attrs} /> {}</label>"#,
                            escape(&input_value(Some(&o.value))),
                            if is_selected(current, o) { " checked" } else { "" },
                            escape(&o.label)
                        )
                    })
                    .collect()
            }
        };
        Ok(form_group(field, ctx, &control))
    }
}

pub struct SwitchRenderer;

impl ElementRenderer for SwitchRenderer {
    fn handled_types(&self) -> Vec<FieldKind> {
        vec![FieldKind::Switch]
    }

    fn render(&self, field: &Field, ctx: &RenderContext) -> Result<String, Error> {
        let name = escape(&field.name);
        let checked = if current_value(field, ctx).and_then(Value::as_bool).unwrap_or(false) {
            " checked"
        } else {
            ""
        };
        let control = format!(
            r#"<input type="checkbox" role="switch" id="{name}" name="{name}" class="form-switch"{checked}{} />"#,
            state_attributes(ctx)
        );
        Ok(form_group(field, ctx, &control))
    }
}

pub struct DateTimeRenderer;

impl ElementRenderer for DateTimeRenderer {
    fn handled_types(&self) -> Vec<FieldKind> {
        vec![FieldKind::Date, FieldKind::Time, FieldKind::DateTime]
    }

    fn render(&self, field: &Field, ctx: &RenderContext) -> Result<String, Error> {
        let name = escape(&field.name);
        let input_type = match field.kind() {
            FieldKind::Time => "time",
            FieldKind::DateTime => "datetime-local",
            _ => "date",
        };
        let control = format!(
            r#"<input type="{input_type}" id="{name}" name="{name}" class="form-control" value="{}"{} />"#,
            escape(&input_value(current_value(field, ctx))),
            state_attributes(ctx)
        );
        Ok(form_group(field, ctx, &control))
    }
}

/// `color` pickers and `upload` inputs.
pub struct SpecialInputRenderer;

impl ElementRenderer for SpecialInputRenderer {
    fn handled_types(&self) -> Vec<FieldKind> {
        vec![FieldKind::Color, FieldKind::Upload]
    }

    fn render(&self, field: &Field, ctx: &RenderContext) -> Result<String, Error> {
        let name = escape(&field.name);
        let control = if field.kind() == FieldKind::Upload {
            format!(r#"<input type="file" id="{name}" name="{name}"{} />"#, state_attributes(ctx))
        } else {
            format!(
                r#"<input type="color" id="{name}" name="{name}" value="{}"{} />"#,
                escape(&input_value(current_value(field, ctx))),
                state_attributes(ctx)
            )
        };
        Ok(form_group(field, ctx, &control))
    }
}

/// Repeating rows described by `itemSchema`, one input per item field.
pub struct ArrayRenderer;

impl ElementRenderer for ArrayRenderer {
    fn handled_types(&self) -> Vec<FieldKind> {
        vec![FieldKind::Array]
    }

    fn render(&self, field: &Field, ctx: &RenderContext) -> Result<String, Error> {
        let rows = current_value(field, ctx)
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        let item_fields = field
            .item_schema
            .as_ref()
            .map(|schema| schema.fields.as_slice())
            .unwrap_or_default();
        debug!("Rendering array field '{}' with {} row(s)", field.name, rows.len());

        let mut body = String::new();
        for (index, row) in rows.iter().enumerate() {
            body.push_str(r#"<div class="form-array-item">"#);
            for item in item_fields {
                let input_name = escape(&format!("{}.{}.{}", field.name, index, item.name));
                body.push_str(&format!(
                    r#"<input type="text" name="{input_name}" placeholder="{}" value="{}"{} />"#,
                    escape(item.display_label()),
                    escape(&input_value(path::get(row, &item.name))),
                    state_attributes(ctx)
                ));
            }
            body.push_str("</div>");
        }
        let control = format!(r#"<div class="form-array" id="{}">{body}</div>"#, escape(&field.name));
        Ok(form_group(field, ctx, &control))
    }
}

pub struct TableRenderer;

impl ElementRenderer for TableRenderer {
    fn handled_types(&self) -> Vec<FieldKind> {
        vec![FieldKind::Table]
    }

    fn render(&self, field: &Field, ctx: &RenderContext) -> Result<String, Error> {
        let head: String = field
            .columns
            .iter()
            .map(|c| format!("<th>{}</th>", escape(c.title.as_deref().unwrap_or(&c.key))))
            .collect();
        let rows = current_value(field, ctx)
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        let body: String = rows
            .iter()
            .map(|row| {
                let cells: String = field
                    .columns
                    .iter()
                    .map(|c| format!("<td>{}</td>", escape(&input_value(row.get(&c.key)))))
                    .collect();
                format!("<tr>{cells}</tr>")
            })
            .collect();
        let control = format!(
            r#"<table class="form-table" id="{}"><thead><tr>{head}</tr></thead><tbody>{body}</tbody></table>"#,
            escape(&field.name)
        );
        Ok(form_group(field, ctx, &control))
    }
}

/// Wraps the already rendered members of a `group`.
pub struct GroupRenderer;

impl ElementRenderer for GroupRenderer {
    fn handled_types(&self) -> Vec<FieldKind> {
        vec![FieldKind::Group]
    }

    fn render(&self, field: &Field, ctx: &RenderContext) -> Result<String, Error> {
        let legend = field
            .label
            .as_deref()
            .map(|l| format!("<legend>{}</legend>", escape(l)))
            .unwrap_or_default();
        Ok(format!(r#"<fieldset class="form-group-fields">{legend}{}</fieldset>"#, ctx.children.join("")))
    }
}

/// Registers a renderer for every built-in field type.
pub fn register_standard_renderers(registry: &mut WidgetRegistry) {
    let renderers: Vec<Arc<dyn ElementRenderer>> = vec![
        Arc::new(TextInputRenderer),
        Arc::new(TextAreaRenderer),
        Arc::new(NumberInputRenderer),
        Arc::new(ChoiceRenderer),
        Arc::new(SwitchRenderer),
        Arc::new(DateTimeRenderer),
        Arc::new(SpecialInputRenderer),
        Arc::new(ArrayRenderer),
        Arc::new(TableRenderer),
        Arc::new(GroupRenderer),
    ];
    for renderer in renderers {
        registry.register_renderer(renderer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ox_forms::render::{FormEngine, FormView};
    use serde_json::json;

    fn registry() -> WidgetRegistry {
        let mut registry = WidgetRegistry::new();
        register_standard_renderers(&mut registry);
        registry
    }

    fn field(value: Value) -> Field {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn every_built_in_type_is_covered() {
        let registry = registry();
        for kind in FieldKind::BUILT_IN.iter() {
            assert!(registry.is_registered(kind), "{kind}");
        }
        assert!(!registry.is_registered(&FieldKind::from("signature")));
    }

    #[test]
    fn text_input_escapes_and_reflects_state() {
        let registry = registry();
        let engine = FormEngine::new(&registry);
        let values = json!({"name": "<Ada>", "locked": true});
        let f = field(json!({"name": "name", "label": "Full name", "required": true,
            "enabledWhen": [{"op": "falsy", "left": "locked"}]}));
        let html = engine.render_field(&f, &FormView::new(&values)).unwrap();
        assert!(html.contains(r#"<label for="name">Full name</label>"#));
        assert!(html.contains(r#"value="&lt;Ada&gt;""#));
        assert!(html.contains(" disabled required"));
    }

    #[test]
    fn select_marks_current_option() {
        let registry = registry();
        let engine = FormEngine::new(&registry);
        let values = json!({"size": "M"});
        let f = field(json!({"name": "size", "type": "select", "options": {"static": [
            {"label": "Small", "value": "S"}, {"label": "Medium", "value": "M"}]}}));
        let html = engine.render_field(&f, &FormView::new(&values)).unwrap();
        assert!(html.contains(r#"<option value="M" selected>Medium</option>"#));
        assert!(html.contains(r#"<option value="S">Small</option>"#));
    }

    #[test]
    fn single_checkbox_and_switch_follow_booleans() {
        let registry = registry();
        let engine = FormEngine::new(&registry);
        let values = json!({"agree": true, "news": false});
        let agree = engine.render_field(&Field::new("agree", "checkbox"), &FormView::new(&values)).unwrap();
        assert!(agree.contains(r#"<input type="checkbox" id="agree" name="agree" checked />"#));
        let news = engine.render_field(&Field::new("news", "switch"), &FormView::new(&values)).unwrap();
        assert!(!news.contains("checked"));
    }

    #[test]
    fn table_renders_rows_by_column_key() {
        let registry = registry();
        let engine = FormEngine::new(&registry);
        let values = json!({"items": [{"sku": "A1", "qty": 2}]});
        let f = field(json!({"name": "items", "type": "table",
            "columns": [{"key": "sku", "title": "SKU"}, {"key": "qty"}]}));
        let html = engine.render_field(&f, &FormView::new(&values)).unwrap();
        assert!(html.contains("<th>SKU</th><th>qty</th>"));
        assert!(html.contains("<tr><td>A1</td><td>2</td></tr>"));
    }

    #[test]
    fn array_rows_use_item_schema() {
        let registry = registry();
        let engine = FormEngine::new(&registry);
        let values = json!({"people": [{"first": "Ada"}, {}]});
        let f = field(json!({"name": "people", "type": "array",
            "itemSchema": {"fields": [{"name": "first", "label": "First"}]}}));
        let html = engine.render_field(&f, &FormView::new(&values)).unwrap();
        assert!(html.contains(r#"name="people.0.first" placeholder="First" value="Ada""#));
        assert!(html.contains(r#"name="people.1.first" placeholder="First" value="""#));
    }

    #[test]
    fn group_wraps_visible_children() {
        let registry = registry();
        let engine = FormEngine::new(&registry);
        let values = json!({});
        let f = field(json!({"name": "addr", "type": "group", "label": "Address", "fields": [
            {"name": "addr.city"},
            {"name": "addr.zip", "visibleWhen": [{"op": "truthy", "left": "addr.city"}]}
        ]}));
        let html = engine.render_field(&f, &FormView::new(&values)).unwrap();
        assert!(html.starts_with(r#"<fieldset class="form-group-fields"><legend>Address</legend>"#));
        assert!(html.contains(r#"id="addr.city""#));
        assert!(!html.contains("addr.zip"));
    }
}
