//! Which actions the bar shows on a given step, and in what order.

use crate::schema::{Action, ActionKind};

/// Sort position in the bar; unknown kinds sit with custom actions.
pub fn action_priority(kind: ActionKind) -> u8 {
    match kind {
        ActionKind::Prev => 1,
        ActionKind::Reset => 2,
        ActionKind::Custom | ActionKind::Unknown => 3,
        ActionKind::Next => 4,
        ActionKind::Submit => 5,
    }
}

/// `prev` is hidden on the first step and `next` is hidden on the last step
/// when the bar carries a `submit`. The sort is stable, so actions of equal
/// priority keep their configured order.
pub fn visible_actions(actions: &[Action], current_step: usize, total_steps: usize) -> Vec<&Action> {
    let is_first = current_step == 0;
    let is_last = current_step + 1 >= total_steps;
    let has_submit = actions.iter().any(|a| a.kind() == ActionKind::Submit);

    let mut visible: Vec<&Action> = actions
        .iter()
        .filter(|action| match action.kind() {
            ActionKind::Prev => !is_first,
            ActionKind::Next => !(is_last && has_submit),
            _ => true,
        })
        .collect();
    visible.sort_by_key(|action| action_priority(action.kind()));
    visible
}
