use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::schema::FieldKind;
use crate::traits::ElementRenderer;

/// Maps extra type names onto an existing field type, e.g. `email` → `text`.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct TypeMappingConfig {
    pub mappings: HashMap<String, String>,
}

/// Grouping of field types for palette-style listings.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FieldCategory {
    Text,
    Numeric,
    Selection,
    DateTime,
    Boolean,
    Complex,
    Special,
}

impl FieldCategory {
    pub const ALL: [FieldCategory; 7] = [
        FieldCategory::Text,
        FieldCategory::Numeric,
        FieldCategory::Selection,
        FieldCategory::DateTime,
        FieldCategory::Boolean,
        FieldCategory::Complex,
        FieldCategory::Special,
    ];

    /// Member types. `checkbox` is listed under both selection and boolean.
    pub fn kinds(self) -> Vec<FieldKind> {
        let names: &[&str] = match self {
            FieldCategory::Text => &["text", "textarea", "richtext"],
            FieldCategory::Numeric => &["number", "slider"],
            FieldCategory::Selection => &["select", "radio", "checkbox"],
            FieldCategory::DateTime => &["date", "time", "datetime"],
            FieldCategory::Boolean => &["switch", "checkbox"],
            FieldCategory::Complex => &["array", "table", "group"],
            FieldCategory::Special => &["color", "upload"],
        };
        names.iter().map(|n| FieldKind::from(*n)).collect()
    }
}

impl FieldKind {
    /// First category listing this type; custom types have none.
    pub fn category(&self) -> Option<FieldCategory> {
        FieldCategory::ALL
            .into_iter()
            .find(|category| category.kinds().contains(self))
    }
}

/// Field type to renderer lookup, built once and handed to the engine.
#[derive(Default)]
pub struct WidgetRegistry {
    /// Extra type names resolved through another type's renderer
    aliases: HashMap<String, FieldKind>,
    renderers: HashMap<FieldKind, Arc<dyn ElementRenderer>>,
}

impl fmt::Debug for WidgetRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WidgetRegistry")
            .field("aliases", &self.aliases)
            .field("types", &self.registered_types())
            .finish()
    }
}

impl WidgetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load_from_config(&mut self, config: TypeMappingConfig) {
        self.aliases.extend(
            config
                .mappings
                .into_iter()
                .map(|(name, target)| (name, FieldKind::from(target.as_str()))),
        );
    }

    /// Registers `renderer` for one type, replacing any earlier entry.
    pub fn register(&mut self, kind: FieldKind, renderer: Arc<dyn ElementRenderer>) {
        self.renderers.insert(kind, renderer);
    }

    /// Registers `renderer` for every type it reports handling.
    pub fn register_renderer(&mut self, renderer: Arc<dyn ElementRenderer>) {
        for kind in renderer.handled_types() {
            self.register(kind, renderer.clone());
        }
    }

    pub fn unregister(&mut self, kind: &FieldKind) -> Option<Arc<dyn ElementRenderer>> {
        self.renderers.remove(kind)
    }

    pub fn resolve(&self, kind: &FieldKind) -> Option<Arc<dyn ElementRenderer>> {
        if let Some(renderer) = self.renderers.get(kind) {
            return Some(renderer.clone());
        }
        self.aliases
            .get(kind.as_str())
            .and_then(|target| self.renderers.get(target))
            .cloned()
    }

    pub fn is_registered(&self, kind: &FieldKind) -> bool {
        self.resolve(kind).is_some()
    }

    pub fn registered_types(&self) -> Vec<FieldKind> {
        let mut kinds: Vec<FieldKind> = self.renderers.keys().cloned().collect();
        kinds.sort();
        kinds
    }
}
