use std::{fmt, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::flow::Variables;

/// Variable name under which the last interactive selection is exposed.
pub const LAST_SELECTED_ID: &str = "last_selected_id";
/// Template key for the contact's display name; stored in
/// [`SessionData::contact_name`].
pub const CONTACT_NAME: &str = "name";

/// Identifies one conversation: a user talking to one tenant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionKey {
    pub tenant: String,
    pub user: String,
}

impl SessionKey {
    pub fn new(tenant: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            tenant: tenant.into(),
            user: user.into(),
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.tenant, self.user)
    }
}

/// Durable per-user data. The keys the engine itself reads are typed fields;
/// everything actions return lands in `vars`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionData {
    pub last_selected_id: Option<String>,
    pub contact_name: Option<String>,
    #[serde(default)]
    pub vars: Variables,
}

impl SessionData {
    /// Looks up a key, typed fields first.
    pub fn get(&self, key: &str) -> Option<&str> {
        match key {
            LAST_SELECTED_ID => self.last_selected_id.as_deref(),
            CONTACT_NAME => self.contact_name.as_deref(),
            _ => self.vars.get(key).map(String::as_str),
        }
    }

    /// Stores a key, routing the engine's own keys to their typed fields.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match key.as_str() {
            LAST_SELECTED_ID => self.last_selected_id = Some(value),
            CONTACT_NAME => self.contact_name = Some(value),
            _ => {
                self.vars.insert(key, value);
            }
        }
    }

    pub fn merge(&mut self, vars: &Variables) {
        for (k, v) in vars {
            self.insert(k.clone(), v.clone());
        }
    }

    /// Flattens everything into template variables.
    pub fn to_variables(&self) -> Variables {
        let mut out = self.vars.clone();
        if let Some(id) = &self.last_selected_id {
            out.insert(LAST_SELECTED_ID.to_string(), id.clone());
        }
        if let Some(name) = &self.contact_name {
            out.insert(CONTACT_NAME.to_string(), name.clone());
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub state: String,
    pub updated_at: DateTime<Utc>,
    pub data: SessionData,
}

impl Session {
    /// A fresh conversation parked on `state` with no data.
    pub fn new(state: impl Into<String>) -> Self {
        Self {
            state: state.into(),
            updated_at: Utc::now(),
            data: SessionData::default(),
        }
    }

    pub fn advance(&mut self, state: impl Into<String>) {
        self.state = state.into();
        self.updated_at = Utc::now();
    }
}

pub type SessionStore = Arc<dyn SessionStoreType>;

/// Per-conversation session records.
///
/// Callers read, modify their own copy and write the whole record back; there
/// is no partial merge. Two events for the same user racing through
/// read-modify-write can lose one update.
#[async_trait]
pub trait SessionStoreType: Send + Sync + fmt::Debug {
    async fn get(&self, key: &SessionKey) -> Option<Session>;

    /// Replaces the whole record.
    async fn set(&self, key: SessionKey, session: Session);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Sessions held in a sharded in-memory map for the life of the process.
/// No expiry, no bound on growth.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: DashMap<SessionKey, Session>,
}

impl InMemorySessionStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl SessionStoreType for InMemorySessionStore {
    async fn get(&self, key: &SessionKey) -> Option<Session> {
        self.sessions.get(key).map(|s| s.value().clone())
    }

    async fn set(&self, key: SessionKey, session: Session) {
        self.sessions.insert(key, session);
    }

    fn len(&self) -> usize {
        self.sessions.len()
    }
}
