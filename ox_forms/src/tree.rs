//! Uniform view over the configuration tree.
//!
//! Steps, tabs, sections, fields and table columns nest in several ways
//! (`fields`, `sections`, `tabs`, `itemSchema.fields`, `columns`). Every
//! traversal (flattening, role pruning, dependency collection) goes through
//! [`NodeRef::children`] or [`TreeNode::retain_children`] so the nesting rules
//! live in one place.

use crate::schema::{Column, Container, Field, FormConfig, RoleRules, Step};

#[derive(Debug, Clone, Copy)]
pub enum NodeRef<'a> {
    Step(&'a Step),
    Tab(&'a Container),
    Section(&'a Container),
    Field(&'a Field),
    Column(&'a Column),
}

impl<'a> NodeRef<'a> {
    pub fn role_rules(&self) -> &'a RoleRules {
        match *self {
            NodeRef::Step(step) => &step.roles,
            NodeRef::Tab(c) | NodeRef::Section(c) => &c.roles,
            NodeRef::Field(field) => &field.roles,
            NodeRef::Column(column) => &column.roles,
        }
    }

    /// Steps, tabs and sections: nodes that only arrange fields.
    pub fn is_layout(&self) -> bool {
        matches!(self, NodeRef::Step(_) | NodeRef::Tab(_) | NodeRef::Section(_))
    }

    pub fn as_field(&self) -> Option<&'a Field> {
        match *self {
            NodeRef::Field(field) => Some(field),
            _ => None,
        }
    }

    /// Direct children in document order: `fields`, then `sections`, then
    /// `tabs` for layout nodes; `fields`, `itemSchema.fields`, then
    /// `columns` for fields.
    pub fn children(&self) -> Vec<NodeRef<'a>> {
        match *self {
            NodeRef::Step(step) => layout_children(&step.fields, &step.sections, &step.tabs),
            NodeRef::Tab(c) | NodeRef::Section(c) => layout_children(&c.fields, &c.sections, &c.tabs),
            NodeRef::Field(field) => {
                let mut children: Vec<NodeRef<'a>> = field.fields.iter().map(NodeRef::Field).collect();
                if let Some(item_schema) = &field.item_schema {
                    children.extend(item_schema.fields.iter().map(NodeRef::Field));
                }
                children.extend(field.columns.iter().map(NodeRef::Column));
                children
            }
            NodeRef::Column(_) => Vec::new(),
        }
    }
}

fn layout_children<'a>(fields: &'a [Field], sections: &'a [Container], tabs: &'a [Container]) -> Vec<NodeRef<'a>> {
    fields
        .iter()
        .map(NodeRef::Field)
        .chain(sections.iter().map(NodeRef::Section))
        .chain(tabs.iter().map(NodeRef::Tab))
        .collect()
}

/// Depth-first pre-order walk. `visit` returns whether to descend into the
/// node it was given.
pub fn walk<'a, F>(node: NodeRef<'a>, visit: &mut F)
where
    F: FnMut(NodeRef<'a>) -> bool,
{
    if visit(node) {
        for child in node.children() {
            walk(child, visit);
        }
    }
}

/// Every field reachable from `node` through sections and tabs. Fields
/// nested inside groups, arrays or tables are not included.
pub fn flatten_fields<'a>(node: NodeRef<'a>) -> Vec<&'a Field> {
    let mut fields = Vec::new();
    walk(node, &mut |n| match n.as_field() {
        Some(field) => {
            fields.push(field);
            false
        }
        None => n.is_layout(),
    });
    fields
}

pub fn flatten_step_fields(step: &Step) -> Vec<&Field> {
    flatten_fields(NodeRef::Step(step))
}

/// A configuration node whose children can be pruned in place.
pub trait TreeNode {
    fn node(&self) -> NodeRef<'_>;

    /// Drops children rejected by `keep`, then recurses into the survivors.
    fn retain_children(&mut self, keep: &mut dyn FnMut(NodeRef<'_>) -> bool);
}

fn retain_list<T: TreeNode>(list: &mut Vec<T>, keep: &mut dyn FnMut(NodeRef<'_>) -> bool) {
    list.retain(|item| keep(item.node()));
    for item in list.iter_mut() {
        item.retain_children(keep);
    }
}

impl TreeNode for Step {
    fn node(&self) -> NodeRef<'_> {
        NodeRef::Step(self)
    }

    fn retain_children(&mut self, keep: &mut dyn FnMut(NodeRef<'_>) -> bool) {
        retain_list(&mut self.fields, keep);
        retain_list(&mut self.sections, keep);
        retain_list(&mut self.tabs, keep);
    }
}

// Sections and tabs share a struct; the node kind is not recoverable from
// the value alone, so containers report themselves as sections.
impl TreeNode for Container {
    fn node(&self) -> NodeRef<'_> {
        NodeRef::Section(self)
    }

    fn retain_children(&mut self, keep: &mut dyn FnMut(NodeRef<'_>) -> bool) {
        retain_list(&mut self.fields, keep);
        retain_list(&mut self.sections, keep);
        retain_list(&mut self.tabs, keep);
    }
}

impl TreeNode for Field {
    fn node(&self) -> NodeRef<'_> {
        NodeRef::Field(self)
    }

    fn retain_children(&mut self, keep: &mut dyn FnMut(NodeRef<'_>) -> bool) {
        retain_list(&mut self.fields, keep);
        if let Some(item_schema) = &mut self.item_schema {
            retain_list(&mut item_schema.fields, keep);
        }
        retain_list(&mut self.columns, keep);
    }
}

impl TreeNode for Column {
    fn node(&self) -> NodeRef<'_> {
        NodeRef::Column(self)
    }

    fn retain_children(&mut self, _keep: &mut dyn FnMut(NodeRef<'_>) -> bool) {}
}

/// Prunes the whole configuration, steps included.
pub fn retain_config(config: &mut FormConfig, keep: &mut dyn FnMut(NodeRef<'_>) -> bool) {
    retain_list(&mut config.steps, keep);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn step() -> Step {
        serde_json::from_value(json!({
            "id": "s1",
            "fields": [{"name": "top"}],
            "sections": [{"fields": [
                {"name": "inSection"},
                {"name": "group", "type": "group", "fields": [{"name": "group.child"}]}
            ]}],
            "tabs": [{"sections": [{"fields": [{"name": "deep"}]}], "fields": [{"name": "inTab"}]}]
        }))
        .unwrap()
    }

    #[test]
    fn flatten_follows_layout_containers_only() {
        let step = step();
        let names: Vec<&str> = flatten_step_fields(&step).iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["top", "inSection", "group", "inTab", "deep"]);
    }

    #[test]
    fn walk_reaches_nested_fields_and_columns() {
        let field: Field = serde_json::from_value(json!({
            "name": "orders", "type": "table",
            "columns": [{"key": "sku"}, {"key": "qty"}],
            "itemSchema": {"fields": [{"name": "sku"}]}
        }))
        .unwrap();
        let mut count = 0;
        walk(NodeRef::Field(&field), &mut |_| {
            count += 1;
            true
        });
        assert_eq!(count, 4);
    }

    #[test]
    fn retain_prunes_at_every_level() {
        let mut config = FormConfig {
            steps: vec![step()],
            ..Default::default()
        };
        retain_config(&mut config, &mut |node| {
            node.as_field().map_or(true, |f| !f.name.contains("in") && f.name != "group.child")
        });
        let names: Vec<&str> = flatten_step_fields(&config.steps[0]).iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["top", "group", "deep"]);
        assert!(flatten_step_fields(&config.steps[0])[1].fields.is_empty());
    }
}
