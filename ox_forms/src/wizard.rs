//! Step navigation: current index, completed steps and validation-gated
//! forward moves.

use std::collections::BTreeSet;

use log::debug;
use serde::Serialize;
use serde_json::Value;

use crate::error::{SessionError, ValidationErrors};
use crate::schema::Step;
use crate::tree::flatten_step_fields;
use crate::validation::build_step_schema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Next,
    Prev,
}

/// Display status of a step relative to the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Finish,
    Error,
    Process,
    Wait,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Moved { from: usize, to: usize },
    /// Validation of the current step failed; nothing moved and the listed
    /// fields are now touched.
    Rejected {
        errors: ValidationErrors,
        touched: Vec<String>,
    },
}

impl Transition {
    pub fn is_moved(&self) -> bool {
        matches!(self, Transition::Moved { .. })
    }
}

#[derive(Debug, Clone, Default)]
pub struct StepWizard {
    current: usize,
    completed: BTreeSet<usize>,
    touched: BTreeSet<String>,
}

impl StepWizard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> usize {
        self.current
    }

    pub fn completed(&self) -> &BTreeSet<usize> {
        &self.completed
    }

    pub fn is_completed(&self, index: usize) -> bool {
        self.completed.contains(&index)
    }

    pub fn touched(&self) -> &BTreeSet<String> {
        &self.touched
    }

    pub fn is_touched(&self, path: &str) -> bool {
        self.touched.contains(path)
    }

    pub fn touch(&mut self, path: &str) {
        self.touched.insert(path.to_string());
    }

    pub fn clear_touched(&mut self) {
        self.touched.clear();
    }

    /// Moves to `target`. Backward moves (or any move with
    /// [`Direction::Prev`]) are unconditional; forward moves first validate
    /// the current step against `values`.
    pub fn go_to(
        &mut self,
        target: usize,
        direction: Direction,
        steps: &[Step],
        values: &Value,
    ) -> Result<Transition, SessionError> {
        if target >= steps.len() {
            return Err(SessionError::StepOutOfRange {
                target,
                count: steps.len(),
            });
        }

        let from = self.current;
        if direction == Direction::Next && target > from {
            let Some(step) = steps.get(from) else {
                return Err(SessionError::StepOutOfRange {
                    target: from,
                    count: steps.len(),
                });
            };
            if let Err(errors) = build_step_schema(step, values).validate(values) {
                let touched: Vec<String> = flatten_step_fields(step)
                    .into_iter()
                    .filter(|f| !f.name.is_empty())
                    .map(|f| f.name.clone())
                    .collect();
                self.touched.extend(touched.iter().cloned());
                debug!("Step {} failed validation with {} error(s)", step.id, errors.len());
                return Ok(Transition::Rejected { errors, touched });
            }
            self.completed.insert(from);
        }

        self.current = target;
        Ok(Transition::Moved { from, to: target })
    }

    pub fn status(&self, index: usize) -> StepStatus {
        if index < self.current {
            if self.is_completed(index) {
                StepStatus::Finish
            } else {
                StepStatus::Error
            }
        } else if index == self.current {
            StepStatus::Process
        } else {
            StepStatus::Wait
        }
    }

    pub fn statuses(&self, count: usize) -> Vec<StepStatus> {
        (0..count).map(|i| self.status(i)).collect()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn steps() -> Vec<Step> {
        serde_json::from_value(json!([
            {"id": "one", "fields": [{"name": "name", "type": "text", "required": true}]},
            {"id": "two", "fields": [{"name": "age", "type": "number"}]},
            {"id": "three"}
        ]))
        .unwrap()
    }

    #[test]
    fn forward_move_is_gated_by_validation() {
        let steps = steps();
        let mut wizard = StepWizard::new();

        let rejected = wizard.go_to(1, Direction::Next, &steps, &json!({})).unwrap();
        match rejected {
            Transition::Rejected { errors, touched } => {
                assert_eq!(errors.message_for("name"), Some("name is required"));
                assert_eq!(touched, ["name"]);
            }
            other => panic!("expected rejection, got {other:?}"),
        }
        assert_eq!(wizard.current(), 0);
        assert!(wizard.is_touched("name"));
        assert!(!wizard.is_completed(0));

        let moved = wizard.go_to(1, Direction::Next, &steps, &json!({"name": "Ada"})).unwrap();
        assert_eq!(moved, Transition::Moved { from: 0, to: 1 });
        assert!(wizard.is_completed(0));
    }

    #[test]
    fn backward_moves_skip_validation() {
        let steps = steps();
        let mut wizard = StepWizard::new();
        wizard.go_to(1, Direction::Next, &steps, &json!({"name": "Ada"})).unwrap();
        assert!(wizard.go_to(0, Direction::Prev, &steps, &json!({})).unwrap().is_moved());
        assert!(wizard.go_to(2, Direction::Prev, &steps, &json!({})).unwrap().is_moved());
        assert_eq!(wizard.current(), 2);
        assert_eq!(wizard.statuses(3), [StepStatus::Finish, StepStatus::Error, StepStatus::Process]);
    }

    #[test]
    fn out_of_range_target_is_an_error() {
        let steps = steps();
        let mut wizard = StepWizard::new();
        assert!(matches!(
            wizard.go_to(5, Direction::Next, &steps, &json!({})),
            Err(SessionError::StepOutOfRange { target: 5, count: 3 })
        ));
        assert_eq!(wizard.status(1), StepStatus::Wait);
    }
}
