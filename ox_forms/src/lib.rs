pub mod actions;
pub mod api;
pub mod computed;
pub mod conditions;
pub mod config;
pub mod error;
pub mod expr;
pub mod path;
pub mod registry;
pub mod render;
pub mod roles;
pub mod schema;
pub mod session;
pub mod traits;
pub mod tree;
pub mod validation;
pub mod wizard;

pub use error::*;
pub use registry::*;
pub use schema::*;
pub use traits::*;

pub use actions::visible_actions;
pub use api::{ApiClient, ApiRequest, ApiSpec, MockApiClient};
pub use computed::{evaluate_computed, fields_needing_recalculation, DependencyMap};
pub use conditions::{evaluate_condition, evaluate_conditions, is_enabled, is_required, is_visible};
pub use config::load_form_config;
pub use expr::Expression;
pub use render::{FormEngine, FormView};
pub use roles::{filter_config_by_role, has_role_access, is_role_visible, Role};
pub use session::{FormSession, Notification, NotificationKind, SubmitOutcome};
pub use validation::{build_field_schema, build_schema, build_step_schema, ValidationSchema};
pub use wizard::{Direction, StepStatus, StepWizard, Transition};

#[cfg(test)]
mod tests;
