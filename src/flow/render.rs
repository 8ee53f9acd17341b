use flowly_channel::{
    ButtonOption, MessageHeader, OptionRow, OptionSection, OutgoingKind, OutgoingMessage,
    OutgoingOptions,
};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use thiserror::Error;

use crate::{
    assets::{AssetError, AssetResolver},
    flow::{FlowDefinition, HeaderMedia, StateKind, Variables},
};

/// Body used for interactive states that leave theirs blank.
pub const DEFAULT_PROMPT: &str = "Choose an option:";

/// `{{key}}` with any key text; surrounding whitespace is ignored on lookup.
pub(crate) static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{(.*?)\}\}").expect("placeholder pattern is valid"));

/// Replaces `{{key}}` with the matching variable. Unknown keys stay verbatim,
/// and substituted values are not expanded again.
pub fn substitute(template: &str, vars: &Variables) -> String {
    if !template.contains("{{") {
        return template.to_string();
    }
    PLACEHOLDER
        .replace_all(template, |caps: &Captures| match vars.get(caps[1].trim()) {
            Some(value) => value.clone(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("state `{0}` does not exist")]
    UnknownState(String),
    #[error("state `{state}` has unsupported type `{kind}`")]
    UnsupportedKind { state: String, kind: String },
    #[error("state `{state}` is {kind} but has no {kind} payload")]
    MissingPayload { state: String, kind: StateKind },
    #[error("state `{state}` header media: {source}")]
    Asset {
        state: String,
        #[source]
        source: AssetError,
    },
}

/// Resolves flow states into channel-agnostic outgoing messages.
///
/// Rendering is deterministic: the same flow, state and variables always give
/// an identical message.
#[derive(Debug, Clone, Default)]
pub struct Renderer {
    assets: AssetResolver,
}

impl Renderer {
    pub fn new(assets: AssetResolver) -> Self {
        Self { assets }
    }

    pub fn render(
        &self,
        tenant: &str,
        flow: &FlowDefinition,
        state_name: &str,
        vars: &Variables,
    ) -> Result<OutgoingMessage, RenderError> {
        let state = flow
            .state(state_name)
            .ok_or_else(|| RenderError::UnknownState(state_name.to_string()))?;
        let missing = || RenderError::MissingPayload {
            state: state_name.to_string(),
            kind: state.kind.clone(),
        };

        match &state.kind {
            StateKind::Text => Ok(OutgoingMessage::text(substitute(&state.body, vars))),

            StateKind::List => {
                let list = state.list.as_ref().ok_or_else(missing)?;
                let sections = list
                    .sections
                    .iter()
                    .map(|s| OptionSection {
                        title: substitute(&s.title, vars),
                        rows: s
                            .rows
                            .iter()
                            .map(|r| OptionRow {
                                id: r.id.clone(),
                                title: substitute(&r.title, vars),
                                description: non_blank(substitute(&r.description, vars)),
                            })
                            .collect(),
                    })
                    .collect();

                Ok(OutgoingMessage {
                    kind: OutgoingKind::List,
                    body: interactive_body(&state.body, vars),
                    header: self.header(
                        tenant,
                        state_name,
                        state.header_media.as_ref(),
                        &list.header,
                        vars,
                    )?,
                    footer: non_blank(substitute(&list.footer, vars)),
                    options: Some(OutgoingOptions::List {
                        button_text: substitute(&list.button_text, vars),
                        sections,
                    }),
                })
            }

            StateKind::Buttons => {
                let buttons = state.buttons.as_ref().ok_or_else(missing)?;
                Ok(OutgoingMessage {
                    kind: OutgoingKind::Buttons,
                    body: interactive_body(&state.body, vars),
                    header: self.header(
                        tenant,
                        state_name,
                        state.header_media.as_ref(),
                        &buttons.header,
                        vars,
                    )?,
                    footer: non_blank(substitute(&buttons.footer, vars)),
                    options: Some(OutgoingOptions::Buttons {
                        buttons: buttons
                            .buttons
                            .iter()
                            .map(|b| ButtonOption {
                                id: b.id.clone(),
                                title: substitute(&b.title, vars),
                            })
                            .collect(),
                    }),
                })
            }

            StateKind::Unsupported(raw) => Err(RenderError::UnsupportedKind {
                state: state_name.to_string(),
                kind: raw.clone(),
            }),
        }
    }

    /// An image header replaces the text header when one is configured.
    fn header(
        &self,
        tenant: &str,
        state_name: &str,
        media: Option<&HeaderMedia>,
        text: &str,
        vars: &Variables,
    ) -> Result<Option<MessageHeader>, RenderError> {
        if let Some(media) = media.filter(|m| m.is_image()) {
            if let Some(url) = media.remote_url() {
                return Ok(Some(MessageHeader::Image { url: url.to_string() }));
            }
            if let Some(path) = media.local_path() {
                let url = self
                    .assets
                    .public_url(tenant, &substitute(path, vars))
                    .map_err(|source| RenderError::Asset {
                        state: state_name.to_string(),
                        source,
                    })?;
                return Ok(Some(MessageHeader::Image { url }));
            }
        }
        Ok(non_blank(substitute(text, vars)).map(|text| MessageHeader::Text { text }))
    }
}

fn interactive_body(body: &str, vars: &Variables) -> String {
    let body = body.trim();
    substitute(if body.is_empty() { DEFAULT_PROMPT } else { body }, vars)
}

fn non_blank(s: String) -> Option<String> {
    if s.trim().is_empty() { None } else { Some(s) }
}
