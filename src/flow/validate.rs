//! Structural checks run on every flow before it is trusted.
//!
//! The channel silently drops or mangles interactive payloads that exceed its
//! UI limits, so they are rejected here at load time instead. All lengths are
//! counted in Unicode code points.

use std::{collections::HashSet, fmt, sync::Arc};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::{
    action::ActionRegistry,
    assets,
    flow::{
        ButtonsPayload, FlowDefinition, FlowError, HeaderMedia, ListPayload, StateKind, render,
    },
};

pub const MAX_HEADER: usize = 60;
pub const MAX_FOOTER: usize = 60;
pub const MAX_BUTTON_LABEL: usize = 20;
pub const MAX_SECTION_TITLE: usize = 24;
pub const MAX_ROW_TITLE: usize = 24;
pub const MAX_ROW_DESCRIPTION: usize = 72;
pub const MAX_BUTTONS: usize = 3;

/// One problem found in a flow document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowDefect {
    /// `None` for problems with the document as a whole.
    pub state: Option<String>,
    pub field: String,
    pub message: String,
}

impl FlowDefect {
    fn new(state: &str, field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            state: Some(state.to_string()),
            field: field.into(),
            message: message.into(),
        }
    }

    fn document(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            state: None,
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FlowDefect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.state {
            Some(state) => write!(f, "state={state} {}: {}", self.field, self.message),
            None => write!(f, "{}: {}", self.field, self.message),
        }
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

#[derive(Clone)]
pub struct FlowValidator {
    default_state: String,
    actions: Option<Arc<ActionRegistry>>,
}

impl FlowValidator {
    pub fn new(default_state: impl Into<String>) -> Self {
        Self {
            default_state: default_state.into(),
            actions: None,
        }
    }

    /// Also reject flows that reference actions the registry cannot run.
    pub fn with_actions(mut self, actions: Arc<ActionRegistry>) -> Self {
        self.actions = Some(actions);
        self
    }

    pub fn default_state(&self) -> &str {
        &self.default_state
    }

    /// Fails closed: any defect rejects the whole flow.
    pub fn validate(&self, tenant: &str, flow: &FlowDefinition) -> Result<(), FlowError> {
        let defects = self.defects(flow);
        if defects.is_empty() {
            Ok(())
        } else {
            Err(FlowError::Invalid {
                tenant: tenant.to_string(),
                defects,
            })
        }
    }

    /// Every defect, ordered by state name then by position in the state.
    pub fn defects(&self, flow: &FlowDefinition) -> Vec<FlowDefect> {
        let mut defects = Vec::new();

        if flow.states.is_empty() {
            defects.push(FlowDefect::document("states", "flow declares no states"));
            return defects;
        }
        if !flow.contains(&self.default_state) {
            defects.push(FlowDefect::document(
                "states",
                format!("default state `{}` is not declared", self.default_state),
            ));
        }

        for (name, state) in &flow.states {
            if let Some(media) = &state.header_media {
                check_media(name, media, &mut defects);
            }

            match &state.kind {
                StateKind::Text => {}
                StateKind::List => match &state.list {
                    Some(list) => check_list(name, list, &mut defects),
                    None => defects.push(FlowDefect::new(
                        name,
                        "list",
                        "state is interactive_list but declares no list",
                    )),
                },
                StateKind::Buttons => match &state.buttons {
                    Some(buttons) => check_buttons(name, buttons, &mut defects),
                    None => defects.push(FlowDefect::new(
                        name,
                        "buttons",
                        "state is interactive_buttons but declares no buttons",
                    )),
                },
                StateKind::Unsupported(raw) => defects.push(FlowDefect::new(
                    name,
                    "type",
                    format!("unsupported state type {raw:?}"),
                )),
            }
        }

        if let Some(actions) = &self.actions {
            defects.extend(actions.check_flow(flow));
        }
        defects
    }
}

fn check_media(state: &str, media: &HeaderMedia, defects: &mut Vec<FlowDefect>) {
    let kind = media.kind.trim();
    if kind.is_empty() {
        defects.push(FlowDefect::new(state, "header_media.type", "is empty"));
    } else if !media.is_image() {
        defects.push(FlowDefect::new(
            state,
            "header_media.type",
            format!("unsupported media type {kind:?}"),
        ));
    }

    match (media.remote_url(), media.local_path()) {
        (None, None) => defects.push(FlowDefect::new(
            state,
            "header_media",
            "requires either url or path",
        )),
        (Some(_), Some(_)) => defects.push(FlowDefect::new(
            state,
            "header_media",
            "declares both url and path; use exactly one",
        )),
        (Some(url), None) => {
            let scheme = Url::parse(url).map(|u| u.scheme().to_string());
            if !matches!(scheme.as_deref(), Ok("http" | "https")) {
                defects.push(FlowDefect::new(
                    state,
                    "header_media.url",
                    format!("{url:?} is not an absolute http(s) URL"),
                ));
            }
        }
        (None, Some(path)) => {
            // placeholders are filled per message; only the literal parts are checked here
            let literal = render::PLACEHOLDER.replace_all(path, "_");
            if let Err(e) = assets::normalize(&literal) {
                defects.push(FlowDefect::new(state, "header_media.path", e.to_string()));
            }
        }
    }
}

fn check_len(
    state: &str,
    field: &str,
    value: &str,
    max: usize,
    defects: &mut Vec<FlowDefect>,
) {
    let len = char_len(value);
    if len > max {
        defects.push(FlowDefect::new(
            state,
            field,
            format!("{len} characters exceeds {max}: {value:?}"),
        ));
    }
}

fn check_list(state: &str, list: &ListPayload, defects: &mut Vec<FlowDefect>) {
    check_len(state, "list.header", &list.header, MAX_HEADER, defects);
    check_len(state, "list.footer", &list.footer, MAX_FOOTER, defects);
    check_len(state, "list.button_text", &list.button_text, MAX_BUTTON_LABEL, defects);

    let mut seen = HashSet::new();
    for (s, section) in list.sections.iter().enumerate() {
        check_len(
            state,
            &format!("list.sections[{s}].title"),
            &section.title,
            MAX_SECTION_TITLE,
            defects,
        );
        for (r, row) in section.rows.iter().enumerate() {
            let field = format!("list.sections[{s}].rows[{r}]");
            let id = row.id.trim();
            if id.is_empty() {
                defects.push(FlowDefect::new(
                    state,
                    format!("{field}.id"),
                    format!("is empty (title={:?})", row.title),
                ));
            } else if !seen.insert(id) {
                defects.push(FlowDefect::new(
                    state,
                    format!("{field}.id"),
                    format!("duplicate row id {id:?}"),
                ));
            }
            check_len(state, &format!("{field}.title"), &row.title, MAX_ROW_TITLE, defects);
            check_len(
                state,
                &format!("{field}.description"),
                &row.description,
                MAX_ROW_DESCRIPTION,
                defects,
            );
        }
    }
}

fn check_buttons(state: &str, buttons: &ButtonsPayload, defects: &mut Vec<FlowDefect>) {
    check_len(state, "buttons.header", &buttons.header, MAX_HEADER, defects);
    check_len(state, "buttons.footer", &buttons.footer, MAX_FOOTER, defects);

    let count = buttons.buttons.len();
    if count == 0 {
        defects.push(FlowDefect::new(
            state,
            "buttons.buttons",
            format!("has no buttons (must have 1 to {MAX_BUTTONS})"),
        ));
        return;
    }
    if count > MAX_BUTTONS {
        defects.push(FlowDefect::new(
            state,
            "buttons.buttons",
            format!("has {count} buttons (more than {MAX_BUTTONS})"),
        ));
    }

    let mut seen = HashSet::new();
    for (i, button) in buttons.buttons.iter().enumerate() {
        let field = format!("buttons.buttons[{i}]");
        let id = button.id.trim();
        if id.is_empty() {
            defects.push(FlowDefect::new(
                state,
                format!("{field}.id"),
                format!("is empty (title={:?})", button.title),
            ));
        } else if !seen.insert(id) {
            defects.push(FlowDefect::new(
                state,
                format!("{field}.id"),
                format!("duplicate button id {id:?}"),
            ));
        }
        check_len(state, &format!("{field}.title"), &button.title, MAX_BUTTON_LABEL, defects);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn flow(states: Value) -> FlowDefinition {
        serde_json::from_value(json!({ "version": "1", "states": states })).unwrap()
    }

    fn menu_list(list: Value) -> FlowDefinition {
        flow(json!({ "MENU": { "type": "interactive_list", "body": "Pick", "list": list } }))
    }

    fn validator() -> FlowValidator {
        FlowValidator::new("MENU")
    }

    #[test]
    fn accepts_a_well_formed_flow() {
        let f = flow(json!({
            "MENU": {
                "type": "interactive_list",
                "header_media": { "type": "image", "path": "menu.png" },
                "list": {
                    "header": "Broker", "footer": "Reply anytime", "button_text": "See options",
                    "sections": [{ "title": "Main", "rows": [
                        { "id": "A", "title": "Pricing", "description": "What it costs" },
                        { "id": "B", "title": "Contact" }
                    ]}]
                },
                "on_select_next": { "A": "PRICING", "B": "CONTACT" }
            },
            "PRICING": { "type": "text", "body": "Our price is {{price}}" },
            "CONTACT": {
                "type": "interactive_buttons",
                "buttons": { "buttons": [{ "id": "CALL", "title": "Call me" }] }
            }
        }));
        assert!(validator().validate("broker", &f).is_ok());
    }

    #[test]
    fn names_state_and_field_for_each_list_limit() {
        let f = menu_list(json!({
            "header": "h".repeat(61),
            "footer": "f".repeat(61),
            "button_text": "b".repeat(21),
            "sections": [{ "title": "s".repeat(25), "rows": [
                { "id": "A", "title": "t".repeat(25), "description": "d".repeat(73) }
            ]}]
        }));
        let defects = validator().defects(&f);
        let fields: Vec<_> = defects.iter().map(|d| d.field.as_str()).collect();
        assert_eq!(
            fields,
            vec![
                "list.header",
                "list.footer",
                "list.button_text",
                "list.sections[0].title",
                "list.sections[0].rows[0].title",
                "list.sections[0].rows[0].description",
            ]
        );
        assert!(defects.iter().all(|d| d.state.as_deref() == Some("MENU")));
    }

    #[test]
    fn limits_count_code_points_not_bytes() {
        // 60 two-byte characters: 120 bytes but within the limit
        let f = menu_list(json!({ "header": "ñ".repeat(60), "sections": [] }));
        assert!(validator().defects(&f).is_empty());

        let f = menu_list(json!({ "header": "ñ".repeat(61), "sections": [] }));
        let defects = validator().defects(&f);
        assert_eq!(defects.len(), 1);
        assert!(defects[0].message.starts_with("61 characters"));
    }

    #[test]
    fn row_ids_must_be_present_and_unique() {
        let f = menu_list(json!({ "sections": [
            { "title": "One", "rows": [{ "id": " ", "title": "Blank" }, { "id": "A", "title": "a" }] },
            { "title": "Two", "rows": [{ "id": "A", "title": "again" }] }
        ]}));
        let defects = validator().defects(&f);
        assert_eq!(defects.len(), 2);
        assert_eq!(defects[0].field, "list.sections[0].rows[0].id");
        assert_eq!(defects[1].field, "list.sections[1].rows[0].id");
        assert!(defects[1].message.contains("duplicate"));
    }

    #[test]
    fn button_count_and_labels_are_bounded() {
        let none = flow(json!({
            "MENU": { "type": "interactive_buttons", "buttons": { "buttons": [] } }
        }));
        assert_eq!(validator().defects(&none)[0].field, "buttons.buttons");

        let many = flow(json!({
            "MENU": { "type": "interactive_buttons", "buttons": { "buttons": [
                { "id": "1", "title": "one" }, { "id": "2", "title": "two" },
                { "id": "3", "title": "three" }, { "id": "", "title": "x".repeat(21) }
            ]}}
        }));
        let fields: Vec<_> = validator()
            .defects(&many)
            .into_iter()
            .map(|d| d.field)
            .collect();
        assert_eq!(
            fields,
            vec!["buttons.buttons", "buttons.buttons[3].id", "buttons.buttons[3].title"]
        );
    }

    #[test]
    fn header_media_needs_supported_kind_and_one_source() {
        let f = flow(json!({
            "MENU": { "type": "text", "header_media": { "type": "video" } },
            "OTHER": { "type": "text", "header_media": {
                "type": "image", "url": "https://x/y.png", "path": "y.png"
            }}
        }));
        let defects = validator().defects(&f);
        let rendered: Vec<_> = defects.iter().map(ToString::to_string).collect();
        assert_eq!(rendered.len(), 3);
        assert!(rendered[0].starts_with("state=MENU header_media.type"));
        assert_eq!(rendered[1], "state=MENU header_media: requires either url or path");
        assert!(rendered[2].starts_with("state=OTHER header_media:"));
    }

    #[test]
    fn header_media_sources_are_checked_at_load() {
        let f = flow(json!({
            "MENU": { "type": "text", "header_media": {
                "type": "image", "path": "../../secret/x.png"
            }},
            "PROMO": { "type": "text", "header_media": {
                "type": "image", "url": "not a url"
            }},
            "FTP": { "type": "text", "header_media": {
                "type": "image", "url": "ftp://files.example.com/a.png"
            }},
            "SNEAKY": { "type": "text", "header_media": {
                "type": "image", "path": "{{season}}/../../x.png"
            }}
        }));
        let mut fields: Vec<_> = validator()
            .defects(&f)
            .into_iter()
            .map(|d| (d.state.unwrap(), d.field))
            .collect();
        fields.sort();
        assert_eq!(
            fields,
            vec![
                ("FTP".to_string(), "header_media.url".to_string()),
                ("MENU".to_string(), "header_media.path".to_string()),
                ("PROMO".to_string(), "header_media.url".to_string()),
                ("SNEAKY".to_string(), "header_media.path".to_string()),
            ]
        );

        let ok = flow(json!({
            "MENU": { "type": "text", "header_media": {
                "type": "image", "path": "banners/{{season}}.png"
            }},
            "PROMO": { "type": "text", "header_media": {
                "type": "image", "url": "https://cdn.example.com/promo.png"
            }}
        }));
        assert!(validator().defects(&ok).is_empty());
    }

    #[test]
    fn missing_payloads_and_unknown_kinds_are_defects() {
        let f = flow(json!({
            "MENU": { "type": "interactive_list" },
            "PROMO": { "type": "carousel" }
        }));
        let fields: Vec<_> = validator()
            .defects(&f)
            .into_iter()
            .map(|d| (d.state.unwrap(), d.field))
            .collect();
        assert_eq!(
            fields,
            vec![
                ("MENU".to_string(), "list".to_string()),
                ("PROMO".to_string(), "type".to_string()),
            ]
        );
    }

    #[test]
    fn empty_flows_and_missing_default_state_fail_closed() {
        let err = validator().validate("broker", &flow(json!({}))).unwrap_err();
        assert!(matches!(err, FlowError::Invalid { ref defects, .. } if defects.len() == 1));

        let f = flow(json!({ "START": { "type": "text", "body": "hi" } }));
        let err = validator().validate("broker", &f).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("tenant `broker`"), "{msg}");
        assert!(msg.contains("default state `MENU`"), "{msg}");
    }
}
