//! Named side effects a flow can attach to a state.
//!
//! Flow documents refer to actions by string; those strings are parsed into the
//! closed [`ActionId`] set and checked against the registry when a flow is
//! loaded, so a typo is a load-time defect rather than a silent skip.

use std::{collections::HashMap, fmt, sync::Arc};

use async_trait::async_trait;
use chrono::FixedOffset;
use strum::IntoEnumIterator;
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};
use thiserror::Error;

use crate::flow::{FlowDefinition, Variables, session::Session, validate::FlowDefect};

pub mod calendar;
pub mod crm;

use calendar::{CalendarBackend, CalendarError, GetCalendarSlots, ScheduleAppointment};
use crm::MockCrmLookup;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, EnumString, AsRefStr, Display, EnumIter,
)]
#[strum(serialize_all = "snake_case")]
pub enum ActionId {
    MockCrmLookup,
    GetCalendarSlots,
    ScheduleAppointment,
}

#[derive(Debug, Error)]
pub enum ActionError {
    #[error("no option has been selected yet")]
    NoSelection,
    #[error("no slot stored for selection `{0}`; it may have expired")]
    UnknownSlot(String),
    #[error("stored slot `{0}` is not an RFC 3339 timestamp")]
    InvalidSlot(String),
    #[error("calendar: {0}")]
    Calendar(#[from] CalendarError),
    #[error("{0}")]
    Failed(String),
}

/// Runs one action for one conversation and returns the variables it
/// produced. Handlers may do network I/O and are expected to bound it
/// themselves.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn run(
        &self,
        tenant: &str,
        user: &str,
        session: &Session,
    ) -> Result<Variables, ActionError>;
}

/// Process-wide action table, built once at startup.
#[derive(Default, Clone)]
pub struct ActionRegistry {
    handlers: HashMap<ActionId, Arc<dyn ActionHandler>>,
}

impl fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<_> = self.handlers.keys().collect();
        ids.sort();
        f.debug_struct("ActionRegistry").field("actions", &ids).finish()
    }
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every built-in action, wired to the given calendar.
    pub fn builtin(calendar: Arc<dyn CalendarBackend>, utc_offset: FixedOffset) -> Self {
        let mut registry = Self::new();
        registry.register(ActionId::MockCrmLookup, Arc::new(MockCrmLookup));
        registry.register(
            ActionId::GetCalendarSlots,
            Arc::new(GetCalendarSlots::new(calendar.clone(), utc_offset)),
        );
        registry.register(
            ActionId::ScheduleAppointment,
            Arc::new(ScheduleAppointment::new(calendar)),
        );
        registry
    }

    pub fn register(&mut self, id: ActionId, handler: Arc<dyn ActionHandler>) {
        self.handlers.insert(id, handler);
    }

    pub fn get(&self, id: ActionId) -> Option<Arc<dyn ActionHandler>> {
        self.handlers.get(&id).cloned()
    }

    /// Looks up a handler by the name used in flow documents.
    pub fn lookup(&self, name: &str) -> Option<(ActionId, Arc<dyn ActionHandler>)> {
        let id: ActionId = name.trim().parse().ok()?;
        self.get(id).map(|h| (id, h))
    }

    pub fn ids(&self) -> Vec<ActionId> {
        ActionId::iter().filter(|id| self.handlers.contains_key(id)).collect()
    }

    /// Defects for every state whose action this registry cannot run.
    pub fn check_flow(&self, flow: &FlowDefinition) -> Vec<FlowDefect> {
        let mut defects = Vec::new();
        for (name, state) in &flow.states {
            let Some(action) = state.action_name() else {
                continue;
            };
            let message = match action.parse::<ActionId>() {
                Err(_) => format!("unknown action {action:?}"),
                Ok(id) if !self.handlers.contains_key(&id) => {
                    format!("action {action:?} is not registered in this process")
                }
                Ok(_) => continue,
            };
            defects.push(FlowDefect {
                state: Some(name.clone()),
                field: "action".to_string(),
                message,
            });
        }
        defects
    }
}
