//! One user's pass through a form: values, step state, option lists,
//! notifications and the single in-flight operation guard.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, info, warn};
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::actions::visible_actions;
use crate::api::{ApiClient, ApiSpec};
use crate::computed::{collect_computed, dependency_map, evaluate_computed, fields_needing_recalculation, DependencyMap};
use crate::conditions::strict_equals;
use crate::error::{ApiError, ConfigError, SessionError, ValidationErrors};
use crate::path;
use crate::render::{field_state, static_options};
use crate::roles::filter_config_by_role;
use crate::schema::{Action, ActionKind, ComputedSpec, Field, FieldKind, FormConfig, Step};
use crate::traits::{FieldState, OptionItem};
use crate::tree::{self, flatten_step_fields, NodeRef};
use crate::validation::build_step_schema;
use crate::wizard::{Direction, StepStatus, StepWizard, Transition};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Success,
    Info,
    Error,
}

/// User-facing message queued by the session for the caller to display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub message: String,
    pub description: String,
}

impl Notification {
    fn new(kind: NotificationKind, message: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            description: description.into(),
        }
    }
}

/// Clears the session's in-flight flag when dropped.
#[derive(Debug)]
struct InFlightGuard(Arc<AtomicBool>);

impl InFlightGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag.clone()))
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Ticket for a submission in progress. Holds the session busy until it is
/// completed or dropped.
#[derive(Debug)]
pub struct PendingOperation {
    session: Uuid,
    generation: u64,
    action: Option<Action>,
    values: Value,
    _guard: InFlightGuard,
}

impl PendingOperation {
    /// Submit action in effect when the operation started.
    pub fn action(&self) -> Option<&Action> {
        self.action.as_ref()
    }

    pub fn api(&self) -> Option<&ApiSpec> {
        self.action.as_ref().and_then(|a| a.api.as_ref())
    }

    /// Snapshot of the values being submitted.
    pub fn values(&self) -> &Value {
        &self.values
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    Submitted { values: Value, response: Option<Value> },
    /// The current step did not validate; nothing was sent.
    Invalid(ValidationErrors),
    Failed(String),
    /// The session was reset or disposed while the operation was pending.
    Discarded,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ActionOutcome {
    Navigated(Transition),
    Submitted(SubmitOutcome),
    Reset,
    Completed(Value),
    Failed(String),
    Ignored,
}

pub struct FormSession {
    id: Uuid,
    config: FormConfig,
    role: Option<String>,
    initial_values: Value,
    values: Value,
    computed: BTreeMap<String, ComputedSpec>,
    dependencies: DependencyMap,
    wizard: StepWizard,
    options: HashMap<String, Vec<OptionItem>>,
    notifications: Vec<Notification>,
    in_flight: Arc<AtomicBool>,
    generation: u64,
    disposed: bool,
}

impl FormSession {
    /// Filters `config` for `role`, seeds values from `initialValues` and
    /// computed fields, and starts on the first step. A configuration left
    /// without steps is refused; other configuration issues are logged.
    pub fn new(config: &FormConfig, role: Option<&str>) -> Result<Self, SessionError> {
        if let Err(ConfigError::Invalid(issues)) = config.check() {
            for issue in &issues {
                warn!("Form configuration: {}", issue);
            }
        }

        let config = filter_config_by_role(config, role);
        if config.steps.is_empty() {
            return Err(ConfigError::Invalid(vec!["configuration has no steps".to_string()]).into());
        }

        let computed = collect_computed(&config);
        let dependencies = dependency_map(&computed);
        let mut session = Self {
            id: Uuid::new_v4(),
            role: role.filter(|r| !r.is_empty()).map(str::to_string),
            initial_values: Value::Null,
            values: Value::Null,
            computed,
            dependencies,
            wizard: StepWizard::new(),
            options: HashMap::new(),
            notifications: Vec::new(),
            in_flight: Arc::new(AtomicBool::new(false)),
            generation: 0,
            disposed: false,
            config,
        };
        session.initial_values = session.seed_values();
        session.values = session.initial_values.clone();
        debug!("Form session {} started with {} step(s)", session.id, session.config.steps.len());
        Ok(session)
    }

    fn seed_values(&self) -> Value {
        let mut values = match &self.config.initial_values {
            Value::Object(map) => Value::Object(map.clone()),
            _ => Value::Object(Map::new()),
        };
        let before = values.clone();
        for (name, spec) in &self.computed {
            if let Some(result) = evaluate_computed(spec, &values) {
                path::set(&mut values, name, result);
            }
        }
        self.settle(&mut values, before);
        values
    }

    /// Recalculates computed fields until no declared dependency changes.
    /// Returns the paths written.
    fn settle(&self, values: &mut Value, mut prev: Value) -> Vec<String> {
        let bound = self.computed.len() + 1;
        let mut updated: Vec<String> = Vec::new();

        for _ in 0..bound {
            let stale = fields_needing_recalculation(&prev, values, &self.dependencies);
            if stale.is_empty() {
                return updated;
            }
            prev = values.clone();

            let mut changed = false;
            for name in stale {
                let Some(spec) = self.computed.get(&name) else { continue };
                let Some(result) = evaluate_computed(spec, values) else { continue };
                if strict_equals(path::get(values, &name), Some(&result)) {
                    continue;
                }
                debug!("Recalculated computed field '{}' = {}", name, result);
                path::set(values, &name, result);
                changed = true;
                if !updated.contains(&name) {
                    updated.push(name);
                }
            }
            if !changed {
                return updated;
            }
        }

        warn!("Computed fields still changing after {} passes; check for cyclic deps", bound);
        updated
    }

    fn ensure_live(&self) -> Result<(), SessionError> {
        if self.disposed {
            Err(SessionError::Disposed)
        } else {
            Ok(())
        }
    }

    fn ensure_idle(&self) -> Result<(), SessionError> {
        self.ensure_live()?;
        if self.is_busy() {
            return Err(SessionError::Busy);
        }
        Ok(())
    }

    fn notify(&mut self, kind: NotificationKind, message: impl Into<String>, description: impl Into<String>) {
        self.notifications.push(Notification::new(kind, message, description));
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Role-filtered configuration this session runs on.
    pub fn config(&self) -> &FormConfig {
        &self.config
    }

    pub fn role(&self) -> Option<&str> {
        self.role.as_deref()
    }

    pub fn values(&self) -> &Value {
        &self.values
    }

    pub fn value(&self, path: &str) -> Option<&Value> {
        path::get(&self.values, path)
    }

    pub fn steps(&self) -> &[Step] {
        &self.config.steps
    }

    pub fn current_step(&self) -> usize {
        self.wizard.current()
    }

    pub fn current(&self) -> Option<&Step> {
        self.config.steps.get(self.wizard.current())
    }

    pub fn wizard(&self) -> &StepWizard {
        &self.wizard
    }

    pub fn step_statuses(&self) -> Vec<StepStatus> {
        self.wizard.statuses(self.config.steps.len())
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    pub fn dependencies(&self) -> &DependencyMap {
        &self.dependencies
    }

    /// Drains queued notifications, oldest first.
    pub fn take_notifications(&mut self) -> Vec<Notification> {
        std::mem::take(&mut self.notifications)
    }

    /// Writes `value` at `path`, then recalculates computed fields whose
    /// declared dependencies changed. Returns the computed paths updated.
    pub fn set_value(&mut self, path: &str, value: Value) -> Result<Vec<String>, SessionError> {
        self.ensure_live()?;
        let prev = self.values.clone();
        let mut values = std::mem::take(&mut self.values);
        path::set(&mut values, path, value);
        let updated = self.settle(&mut values, prev);
        self.values = values;
        Ok(updated)
    }

    pub fn touch(&mut self, path: &str) {
        self.wizard.touch(path);
    }

    pub fn field_state(&self, field: &Field) -> FieldState {
        field_state(field, &self.values, self.role.as_deref())
    }

    /// Finds a field by name in any step, including group members.
    pub fn find_field(&self, name: &str) -> Option<&Field> {
        let mut found = None;
        for step in &self.config.steps {
            tree::walk(NodeRef::Step(step), &mut |node| {
                if found.is_some() {
                    return false;
                }
                match node.as_field() {
                    Some(field) => {
                        if field.name == name {
                            found = Some(field);
                        }
                        field.kind() == FieldKind::Group
                    }
                    None => node.is_layout(),
                }
            });
            if found.is_some() {
                break;
            }
        }
        found
    }

    pub fn validate_current_step(&self) -> Result<(), ValidationErrors> {
        match self.current() {
            Some(step) => build_step_schema(step, &self.values).validate(&self.values),
            None => Ok(()),
        }
    }

    /// Errors of the current step restricted to touched fields.
    pub fn visible_errors(&self) -> ValidationErrors {
        match self.validate_current_step() {
            Ok(()) => ValidationErrors::default(),
            Err(errors) => ValidationErrors {
                errors: errors
                    .errors
                    .into_iter()
                    .filter(|e| self.wizard.is_touched(&e.path))
                    .collect(),
            },
        }
    }

    pub fn actions(&self) -> Vec<&Action> {
        visible_actions(
            self.config.actions_for_step(self.wizard.current()),
            self.wizard.current(),
            self.config.steps.len(),
        )
    }

    pub fn go_to(&mut self, target: usize, direction: Direction) -> Result<Transition, SessionError> {
        self.ensure_idle()?;
        self.wizard.go_to(target, direction, &self.config.steps, &self.values)
    }

    pub fn next(&mut self) -> Result<Transition, SessionError> {
        self.go_to(self.wizard.current() + 1, Direction::Next)
    }

    /// On the first step this stays put.
    pub fn prev(&mut self) -> Result<Transition, SessionError> {
        self.go_to(self.wizard.current().saturating_sub(1), Direction::Prev)
    }

    /// Marks the session busy and snapshots what is to be submitted: the
    /// current step's submit action (falling back to the global actions) and
    /// the values.
    pub fn begin_submit(&mut self) -> Result<PendingOperation, SessionError> {
        self.ensure_live()?;
        let guard = InFlightGuard::acquire(&self.in_flight).ok_or(SessionError::Busy)?;
        let action = self
            .config
            .actions_for_step(self.wizard.current())
            .iter()
            .chain(self.config.actions.iter())
            .find(|a| a.kind() == ActionKind::Submit)
            .cloned();
        Ok(PendingOperation {
            session: self.id,
            generation: self.generation,
            action,
            values: self.values.clone(),
            _guard: guard,
        })
    }

    /// Applies the result of a pending submission. `Ok(None)` means no API
    /// was configured. Results for a disposed, reset or foreign session are
    /// discarded.
    pub fn complete_submit(&mut self, ticket: PendingOperation, result: Result<Option<Value>, ApiError>) -> SubmitOutcome {
        if self.disposed || ticket.session != self.id || ticket.generation != self.generation {
            debug!("Discarding submission result for session {}", ticket.session);
            return SubmitOutcome::Discarded;
        }

        match result {
            Ok(response) => {
                let description = match (&response, ticket.action()) {
                    (Some(_), Some(action)) => action
                        .success_message
                        .clone()
                        .unwrap_or_else(|| "Form submitted successfully".to_string()),
                    _ => {
                        info!("Form submitted: {}", ticket.values);
                        "Form submitted (no API configured)".to_string()
                    }
                };
                self.notify(NotificationKind::Success, "Form Submitted", description);
                SubmitOutcome::Submitted {
                    values: ticket.values.clone(),
                    response,
                }
            }
            Err(e) => {
                warn!("Submission failed: {}", e);
                self.notify(NotificationKind::Error, "Submission Failed", e.to_string());
                SubmitOutcome::Failed(e.to_string())
            }
        }
    }

    /// Validates the current step, then submits through `client` when the
    /// submit action carries an API spec.
    pub async fn submit(&mut self, client: &dyn ApiClient) -> Result<SubmitOutcome, SessionError> {
        self.ensure_idle()?;
        if let Err(errors) = self.validate_current_step() {
            if let Some(step) = self.current() {
                let names: Vec<String> = flatten_step_fields(step).iter().map(|f| f.name.clone()).collect();
                for name in names.iter().filter(|n| !n.is_empty()) {
                    self.wizard.touch(name);
                }
            }
            return Ok(SubmitOutcome::Invalid(errors));
        }

        let ticket = self.begin_submit()?;
        let result = match ticket.api() {
            Some(spec) => client.execute_action(spec, ticket.values()).await.map(Some),
            None => Ok(None),
        };
        Ok(self.complete_submit(ticket, result))
    }

    /// Restores the seeded values and clears touched state. The step position
    /// is kept; any pending operation result will be discarded.
    pub fn reset(&mut self) -> Result<(), SessionError> {
        self.ensure_live()?;
        self.values = self.initial_values.clone();
        self.wizard.clear_touched();
        self.generation += 1;
        self.notify(NotificationKind::Info, "Form Reset", "Form has been reset to initial values");
        Ok(())
    }

    pub fn dispose(&mut self) {
        if !self.disposed {
            debug!("Disposing form session {}", self.id);
        }
        self.disposed = true;
        self.generation += 1;
    }

    async fn run_custom(&mut self, action: &Action, client: &dyn ApiClient) -> Result<ActionOutcome, SessionError> {
        let (Some("apiCall"), Some(spec)) = (action.action.as_deref(), action.api.as_ref()) else {
            warn!("Custom action {:?} has no handler", action.id);
            return Ok(ActionOutcome::Ignored);
        };

        self.ensure_live()?;
        let guard = InFlightGuard::acquire(&self.in_flight).ok_or(SessionError::Busy)?;
        let generation = self.generation;
        let result = client.execute_action(spec, &self.values).await;
        drop(guard);

        if self.disposed || generation != self.generation {
            debug!("Discarding custom action result for session {}", self.id);
            return Ok(ActionOutcome::Ignored);
        }

        match result {
            Ok(response) => {
                self.notify(
                    NotificationKind::Success,
                    action.success_message.as_deref().unwrap_or("Action Completed"),
                    action
                        .success_description
                        .as_deref()
                        .unwrap_or("Action executed successfully"),
                );
                Ok(ActionOutcome::Completed(response))
            }
            Err(e) => {
                warn!("Action {:?} failed: {}", action.id, e);
                let description = action.error_description.clone().unwrap_or_else(|| e.to_string());
                self.notify(
                    NotificationKind::Error,
                    action.error_message.as_deref().unwrap_or("Action Failed"),
                    description,
                );
                Ok(ActionOutcome::Failed(e.to_string()))
            }
        }
    }

    /// Dispatches an action bar button.
    pub async fn run_action(&mut self, action: &Action, client: &dyn ApiClient) -> Result<ActionOutcome, SessionError> {
        match action.kind() {
            ActionKind::Prev => self.prev().map(ActionOutcome::Navigated),
            ActionKind::Next => {
                if self.wizard.current() + 1 >= self.config.steps.len() {
                    return Ok(ActionOutcome::Ignored);
                }
                self.next().map(ActionOutcome::Navigated)
            }
            ActionKind::Submit => self.submit(client).await.map(ActionOutcome::Submitted),
            ActionKind::Reset => self.reset().map(|_| ActionOutcome::Reset),
            ActionKind::Custom => self.run_custom(action, client).await,
            ActionKind::Unknown => {
                warn!("Unknown action type: {}", action.action_type);
                Ok(ActionOutcome::Ignored)
            }
        }
    }

    /// Option list most recently loaded for `field`.
    pub fn options(&self, field: &str) -> Option<&[OptionItem]> {
        self.options.get(field).map(Vec::as_slice)
    }

    pub fn loaded_options(&self) -> &HashMap<String, Vec<OptionItem>> {
        &self.options
    }

    /// Resolves the option list of a selection field from its static list or
    /// its API spec. API failures leave an empty list and queue an error
    /// notification.
    pub async fn load_options(&mut self, field_name: &str, client: &dyn ApiClient) -> Result<Vec<OptionItem>, SessionError> {
        self.ensure_live()?;
        let field = self
            .find_field(field_name)
            .ok_or_else(|| SessionError::UnknownField(field_name.to_string()))?;
        let Some(source) = field.options.as_ref() else {
            return Ok(Vec::new());
        };

        let kind = source
            .source
            .clone()
            .unwrap_or_else(|| if source.api.is_some() { "api" } else { "static" }.to_string());
        let api = source.api.clone();
        let inline = static_options(field);

        let items = match (kind.as_str(), api) {
            ("api", Some(spec)) => {
                let generation = self.generation;
                match client.load_options(&spec, &self.values).await {
                    Ok(items) => items,
                    Err(e) => {
                        warn!("Failed to load options for '{}': {}", field_name, e);
                        if !self.disposed && generation == self.generation {
                            self.notify(NotificationKind::Error, "Failed to load options", e.to_string());
                        }
                        Vec::new()
                    }
                }
            }
            ("static", _) => inline,
            _ => Vec::new(),
        };

        if self.disposed {
            return Ok(items);
        }
        self.options.insert(field_name.to_string(), items.clone());
        Ok(items)
    }
}
