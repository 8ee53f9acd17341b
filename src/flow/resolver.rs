use flowly_channel::EventContent;

use crate::flow::FlowDefinition;

/// Free text that always returns the user to the default state.
pub const MENU_KEYWORD: &str = "menu";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub next_state: String,
    /// False when the event matched no rule and the user was sent back to the
    /// default state.
    pub handled: bool,
}

impl Transition {
    fn to(state: &str) -> Self {
        Self {
            next_state: state.to_string(),
            handled: true,
        }
    }

    fn fallback(default_state: &str) -> Self {
        Self {
            next_state: default_state.to_string(),
            handled: false,
        }
    }
}

/// Picks the next state for `event` received while in `current`.
///
/// Pure and total: any event that cannot be matched, including selections
/// that point at undeclared states, lands on `default_state`.
pub fn resolve(
    flow: &FlowDefinition,
    default_state: &str,
    current: &str,
    event: &EventContent,
) -> Transition {
    let Some(state) = flow.state(current) else {
        return Transition::fallback(default_state);
    };

    let target = match event {
        EventContent::Text { body } => {
            if body.trim().eq_ignore_ascii_case(MENU_KEYWORD) {
                return Transition::to(default_state);
            }
            state.on_text_next.as_deref()
        }
        EventContent::ListReply { id, .. } | EventContent::ButtonReply { id, .. } => {
            state.on_select_next.get(id).map(String::as_str)
        }
        EventContent::Unsupported => None,
    };

    match target {
        Some(next) if flow.contains(next) => Transition::to(next),
        _ => Transition::fallback(default_state),
    }
}
