// src/flow.rs

use std::{
    collections::BTreeMap,
    fmt,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::flow::validate::FlowDefect;

pub mod cache;
pub mod render;
pub mod resolver;
pub mod session;
pub mod validate;

/// Template variables and session data: key → rendered string.
///
/// Ordered so that anything derived from it (logs, rendered output) is stable.
pub type Variables = BTreeMap<String, String>;

/// A tenant's declarative conversation graph, as authored in `flow.json`.
///
/// Immutable once loaded; a reload replaces the whole definition.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct FlowDefinition {
    #[serde(default)]
    pub version: String,

    /// state name → state definition
    pub states: BTreeMap<String, StateDefinition>,
}

impl FlowDefinition {
    pub fn from_json(tenant: &str, raw: &str) -> Result<Self, FlowError> {
        serde_json::from_str(raw).map_err(|source| FlowError::Parse {
            tenant: tenant.to_string(),
            source,
        })
    }

    pub fn state(&self, name: &str) -> Option<&StateDefinition> {
        self.states.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.states.contains_key(name)
    }

    /// Transition targets that do not name a state of this flow, as
    /// `(from_state, target)` pairs.
    pub fn dangling_targets(&self) -> Vec<(String, String)> {
        let mut out = Vec::new();
        for (name, state) in &self.states {
            let targets = state
                .on_text_next
                .iter()
                .chain(state.on_select_next.values());
            for target in targets {
                if !self.contains(target) {
                    out.push((name.clone(), target.clone()));
                }
            }
        }
        out
    }

    /// True when some state serves its header image from the tenant's asset
    /// namespace, which requires a public base URL at runtime.
    pub fn uses_local_media(&self) -> bool {
        self.states.values().any(|s| {
            s.header_media
                .as_ref()
                .is_some_and(|m| m.local_path().is_some() && m.remote_url().is_none())
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct StateDefinition {
    #[serde(rename = "type")]
    #[schemars(with = "String")]
    pub kind: StateKind,

    /// Message body; supports `{{key}}` placeholders.
    #[serde(default)]
    pub body: String,

    /// Name of the action to run before this state is rendered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header_media: Option<HeaderMedia>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list: Option<ListPayload>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buttons: Option<ButtonsPayload>,

    /// Where any free text (other than the menu keyword) leads.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_text_next: Option<String>,

    /// option id → next state
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub on_select_next: BTreeMap<String, String>,
}

impl StateDefinition {
    /// The declared action name, if it is non-blank.
    pub fn action_name(&self) -> Option<&str> {
        self.action
            .as_deref()
            .map(str::trim)
            .filter(|a| !a.is_empty())
    }
}

/// The UI shape of a state. Documents use `text`, `interactive_list` and
/// `interactive_buttons` (`list`/`buttons` are accepted too); anything else is
/// kept verbatim so the validator can name it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum StateKind {
    Text,
    List,
    Buttons,
    Unsupported(String),
}

impl From<String> for StateKind {
    fn from(raw: String) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "text" => StateKind::Text,
            "interactive_list" | "list" => StateKind::List,
            "interactive_buttons" | "buttons" => StateKind::Buttons,
            _ => StateKind::Unsupported(raw),
        }
    }
}

impl From<StateKind> for String {
    fn from(kind: StateKind) -> Self {
        match kind {
            StateKind::Text => "text".to_string(),
            StateKind::List => "interactive_list".to_string(),
            StateKind::Buttons => "interactive_buttons".to_string(),
            StateKind::Unsupported(raw) => raw,
        }
    }
}

impl fmt::Display for StateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateKind::Text => f.write_str("text"),
            StateKind::List => f.write_str("interactive_list"),
            StateKind::Buttons => f.write_str("interactive_buttons"),
            StateKind::Unsupported(raw) => write!(f, "{raw}"),
        }
    }
}

/// Optional image shown above an interactive message.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct HeaderMedia {
    /// Only `image` is supported.
    #[serde(rename = "type", default)]
    pub kind: String,
    /// Relative to the tenant's asset directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Absolute `https://` URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl HeaderMedia {
    pub fn remote_url(&self) -> Option<&str> {
        non_blank(self.url.as_deref())
    }

    pub fn local_path(&self) -> Option<&str> {
        non_blank(self.path.as_deref())
    }

    pub fn is_image(&self) -> bool {
        self.kind.trim().eq_ignore_ascii_case("image")
    }
}

fn non_blank(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct ListPayload {
    #[serde(default)]
    pub header: String,
    #[serde(default)]
    pub footer: String,
    /// Label of the button that opens the list.
    #[serde(default)]
    pub button_text: String,
    #[serde(default)]
    pub sections: Vec<ListSection>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct ListSection {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub rows: Vec<ListRow>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct ListRow {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct ButtonsPayload {
    #[serde(default)]
    pub header: String,
    #[serde(default)]
    pub footer: String,
    #[serde(default)]
    pub buttons: Vec<Button>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct Button {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub title: String,
}

#[derive(Debug, Error)]
pub enum FlowError {
    #[error("tenant name `{0}` is not a valid directory name")]
    InvalidTenant(String),
    #[error("no flow configured for tenant `{0}`")]
    NotFound(String),
    #[error("could not read flow for tenant `{tenant}` at {}: {source}", .path.display())]
    Read {
        tenant: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid JSON in flow for tenant `{tenant}`: {source}")]
    Parse {
        tenant: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("flow for tenant `{tenant}` is invalid:\n- {}", join_defects(.defects))]
    Invalid {
        tenant: String,
        defects: Vec<FlowDefect>,
    },
}

fn join_defects(defects: &[FlowDefect]) -> String {
    defects
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n- ")
}

/// Where flow documents come from.
#[async_trait]
pub trait FlowSource: Send + Sync {
    async fn load(&self, tenant: &str) -> Result<FlowDefinition, FlowError>;
}

/// Reads `<root>/<tenant>/flow.json`.
#[derive(Debug, Clone)]
pub struct FileFlowSource {
    root: PathBuf,
}

impl FileFlowSource {
    pub const FILE_NAME: &'static str = "flow.json";

    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, tenant: &str) -> Result<PathBuf, FlowError> {
        let valid = !tenant.is_empty()
            && tenant != "."
            && tenant != ".."
            && !tenant.contains(['/', '\\']);
        if !valid {
            return Err(FlowError::InvalidTenant(tenant.to_string()));
        }
        Ok(self.root.join(tenant).join(Self::FILE_NAME))
    }

    /// Every tenant directory under the root that carries a flow document.
    pub fn tenants(&self) -> std::io::Result<Vec<String>> {
        let mut tenants = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.path().join(Self::FILE_NAME).is_file() {
                if let Some(name) = entry.file_name().to_str() {
                    tenants.push(name.to_string());
                }
            }
        }
        tenants.sort();
        Ok(tenants)
    }
}

#[async_trait]
impl FlowSource for FileFlowSource {
    async fn load(&self, tenant: &str) -> Result<FlowDefinition, FlowError> {
        let path = self.path_for(tenant)?;
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(FlowError::NotFound(tenant.to_string()));
            }
            Err(source) => {
                return Err(FlowError::Read {
                    tenant: tenant.to_string(),
                    path,
                    source,
                });
            }
        };
        debug!(tenant, path = %path.display(), "flow document read");
        FlowDefinition::from_json(tenant, &raw)
    }
}
