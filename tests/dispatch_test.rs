use std::{collections::BTreeMap, fs, path::Path, sync::Arc};

use async_trait::async_trait;
use flowly::{
    ActionOutcome, DeliveryOutcome, DispatchError, Dispatcher, Variables,
    action::{ActionError, ActionHandler, ActionId, ActionRegistry},
    assets::AssetResolver,
    config::{AppConfig, MapConfigManager},
    dispatcher::{FLOW_UNAVAILABLE_APOLOGY, RENDER_APOLOGY},
    flow::{
        FileFlowSource,
        cache::ConfigCache,
        render::Renderer,
        session::{InMemorySessionStore, Session, SessionKey},
        validate::FlowValidator,
    },
    tenant::TenantResolver,
};
use flowly_channel::{
    EventContent, InboundEvent, OutgoingKind, OutgoingMessage, Participant,
    test_util::MemoryChannel,
};
use serde_json::json;
use tempfile::TempDir;

/// Answers with a fixed set of variables, or fails when `vars` is `None`.
struct FixedAction {
    vars: Option<Variables>,
}

#[async_trait]
impl ActionHandler for FixedAction {
    async fn run(&self, _: &str, _: &str, _: &Session) -> Result<Variables, ActionError> {
        self.vars
            .clone()
            .ok_or_else(|| ActionError::Failed("price service timed out".into()))
    }
}

fn write_flow(root: &Path, tenant: &str, flow: serde_json::Value) {
    let dir = root.join(tenant);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("flow.json"), flow.to_string()).unwrap();
}

fn broker_flow() -> serde_json::Value {
    json!({
        "version": "1",
        "states": {
            "MENU": {
                "type": "interactive_list",
                "body": "Hi {{name}}, how can we help?",
                "list": {
                    "button_text": "Options",
                    "sections": [{ "title": "Main", "rows": [
                        { "id": "A", "title": "Pricing" },
                        { "id": "B", "title": "Contact" }
                    ]}]
                },
                "on_select_next": { "A": "PRICING", "B": "CONTACT" }
            },
            "PRICING": {
                "type": "text",
                "body": "Our price is {{price}}",
                "action": "mock_crm_lookup",
                "on_text_next": "CONTACT"
            },
            "CONTACT": { "type": "text", "body": "Call us, {{name}}." }
        }
    })
}

struct Harness {
    dir: TempDir,
    dispatcher: Dispatcher,
    channel: MemoryChannel,
}

fn harness(action: FixedAction) -> Harness {
    let dir = TempDir::new().unwrap();
    write_flow(dir.path(), "broker", broker_flow());

    let mut registry = ActionRegistry::new();
    registry.register(ActionId::MockCrmLookup, Arc::new(action));
    let registry = Arc::new(registry);

    let channel = MemoryChannel::new();
    let cache = ConfigCache::new(
        Arc::new(FileFlowSource::new(dir.path())),
        FlowValidator::new("MENU").with_actions(registry.clone()),
    );
    let dispatcher = Dispatcher::new(
        TenantResolver::new(BTreeMap::new(), "broker"),
        cache,
        InMemorySessionStore::new(),
        registry,
        Renderer::new(AssetResolver::new(None)),
        Arc::new(channel.clone()),
        "MENU",
    );
    Harness {
        dir,
        dispatcher,
        channel,
    }
}

fn priced() -> FixedAction {
    FixedAction {
        vars: Some(Variables::from([("price".to_string(), "100".to_string())])),
    }
}

fn event(user: &str, content: EventContent) -> InboundEvent {
    InboundEvent::new("", Participant::new(user, Some("Ana".into())), content)
}

fn select(user: &str, id: &str) -> InboundEvent {
    event(
        user,
        EventContent::ListReply {
            id: id.into(),
            title: String::new(),
            description: String::new(),
        },
    )
}

fn text(user: &str, body: &str) -> InboundEvent {
    event(user, EventContent::Text { body: body.into() })
}

async fn session(h: &Harness, user: &str) -> Session {
    h.dispatcher
        .sessions()
        .get(&SessionKey::new("broker", user))
        .await
        .unwrap()
}

#[tokio::test]
async fn first_contact_shows_the_menu_with_the_contact_name() {
    let h = harness(priced());
    let outcome = h.dispatcher.handle(&text("u1", "hello")).await.unwrap();

    assert_eq!(outcome.tenant, "broker");
    assert_eq!(outcome.previous_state, "MENU");
    assert_eq!(outcome.next_state, "MENU");
    assert!(!outcome.handled);
    assert_eq!(outcome.delivery, DeliveryOutcome::Delivered);

    let sent = h.channel.sent_to("u1").await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].kind, OutgoingKind::List);
    assert_eq!(sent[0].body, "Hi Ana, how can we help?");
}

#[tokio::test]
async fn selecting_pricing_runs_the_action_and_renders_its_output() {
    let h = harness(priced());
    let outcome = h.dispatcher.handle(&select("u1", "A")).await.unwrap();

    assert_eq!(outcome.next_state, "PRICING");
    assert!(outcome.handled);
    assert_eq!(
        outcome.action,
        ActionOutcome::Succeeded {
            action: ActionId::MockCrmLookup,
            variables: 1
        }
    );
    assert_eq!(
        h.channel.sent_to("u1").await,
        vec![OutgoingMessage::text("Our price is 100")]
    );

    let stored = session(&h, "u1").await;
    assert_eq!(stored.state, "PRICING");
    assert_eq!(stored.data.get("price"), Some("100"));
    assert_eq!(stored.data.last_selected_id.as_deref(), Some("A"));
}

#[tokio::test]
async fn menu_keyword_overrides_on_text_next() {
    let h = harness(priced());
    h.dispatcher.handle(&select("u1", "A")).await.unwrap();

    let outcome = h.dispatcher.handle(&text("u1", "  MENU ")).await.unwrap();
    assert_eq!(outcome.previous_state, "PRICING");
    assert_eq!(outcome.next_state, "MENU");
    assert!(outcome.handled);

    let outcome = h.dispatcher.handle(&select("u1", "A")).await.unwrap();
    assert_eq!(outcome.next_state, "PRICING");
    let outcome = h.dispatcher.handle(&text("u1", "thanks")).await.unwrap();
    assert_eq!(outcome.next_state, "CONTACT");
}

#[tokio::test]
async fn failed_action_still_advances_and_leaves_placeholders() {
    let h = harness(FixedAction { vars: None });
    let outcome = h.dispatcher.handle(&select("u1", "A")).await.unwrap();

    assert_eq!(outcome.next_state, "PRICING");
    assert!(matches!(outcome.action, ActionOutcome::Failed { .. }));
    assert_eq!(outcome.delivery, DeliveryOutcome::Delivered);
    assert_eq!(
        h.channel.sent_to("u1").await,
        vec![OutgoingMessage::text("Our price is {{price}}")]
    );

    let stored = session(&h, "u1").await;
    assert_eq!(stored.state, "PRICING");
    assert_eq!(stored.data.get("price"), None);
}

#[tokio::test]
async fn unknown_selection_falls_back_to_the_menu() {
    let h = harness(priced());
    let outcome = h.dispatcher.handle(&select("u1", "Z")).await.unwrap();
    assert_eq!(outcome.next_state, "MENU");
    assert!(!outcome.handled);
    assert_eq!(outcome.action, ActionOutcome::None);
}

#[tokio::test]
async fn concurrent_users_keep_separate_sessions() {
    let h = Arc::new(harness(priced()));
    let mut tasks = tokio::task::JoinSet::new();
    for i in 0..32 {
        let h = h.clone();
        tasks.spawn(async move {
            let user = format!("user-{i}");
            let choice = if i % 2 == 0 { "A" } else { "B" };
            h.dispatcher.handle(&select(&user, choice)).await.unwrap()
        });
    }
    while let Some(done) = tasks.join_next().await {
        done.unwrap();
    }

    assert_eq!(h.dispatcher.sessions().len(), 32);
    for i in 0..32 {
        let user = format!("user-{i}");
        let stored = session(&h, &user).await;
        let sent = h.channel.sent_to(&user).await;
        assert_eq!(sent.len(), 1);
        if i % 2 == 0 {
            assert_eq!(stored.state, "PRICING");
            assert_eq!(stored.data.last_selected_id.as_deref(), Some("A"));
            assert_eq!(sent[0].body, "Our price is 100");
        } else {
            assert_eq!(stored.state, "CONTACT");
            assert_eq!(stored.data.last_selected_id.as_deref(), Some("B"));
            assert_eq!(stored.data.get("price"), None);
        }
    }
}

#[tokio::test]
async fn delivery_failure_is_reported_but_the_session_moves_on() {
    let h = harness(priced());
    h.channel.set_failing(true);

    let outcome = h.dispatcher.handle(&select("u1", "A")).await.unwrap();
    assert!(matches!(outcome.delivery, DeliveryOutcome::Failed { .. }));
    assert_eq!(session(&h, "u1").await.state, "PRICING");
}

#[tokio::test]
async fn render_failure_sends_the_apology() {
    let h = harness(priced());
    // a local header image cannot be resolved without a public base URL
    let mut flow = broker_flow();
    flow["states"]["CONTACT"]["type"] = json!("interactive_buttons");
    flow["states"]["CONTACT"]["header_media"] = json!({ "type": "image", "path": "logo.png" });
    flow["states"]["CONTACT"]["buttons"] = json!({ "buttons": [{ "id": "M", "title": "Menu" }] });
    write_flow(h.dir.path(), "broker", flow);
    h.dispatcher.cache().invalidate("broker");

    let outcome = h.dispatcher.handle(&select("u1", "B")).await.unwrap();
    assert_eq!(outcome.next_state, "CONTACT");
    assert!(matches!(outcome.delivery, DeliveryOutcome::Apologized { .. }));
    assert_eq!(
        h.channel.sent_to("u1").await,
        vec![OutgoingMessage::text(RENDER_APOLOGY)]
    );
}

#[tokio::test]
async fn missing_flow_apologizes_and_is_not_cached() {
    let h = harness(priced());
    fs::remove_file(h.dir.path().join("broker/flow.json")).unwrap();
    h.dispatcher.cache().invalidate("broker");

    let err = h.dispatcher.handle(&text("u1", "hi")).await.unwrap_err();
    assert!(matches!(err, DispatchError::FlowUnavailable { ref tenant, .. } if tenant == "broker"));
    assert_eq!(
        h.channel.sent_to("u1").await,
        vec![OutgoingMessage::text(FLOW_UNAVAILABLE_APOLOGY)]
    );
    assert!(!h.dispatcher.cache().is_cached("broker"));

    write_flow(h.dir.path(), "broker", broker_flow());
    let outcome = h.dispatcher.handle(&text("u1", "hi")).await.unwrap();
    assert_eq!(outcome.next_state, "MENU");
}

#[tokio::test]
async fn invalid_flow_is_rejected_at_load() {
    let h = harness(priced());
    let mut flow = broker_flow();
    flow["states"]["MENU"]["list"]["sections"][0]["rows"][0]["title"] =
        json!("A row title that is far too long for the list");
    write_flow(h.dir.path(), "broker", flow);

    let err = h.dispatcher.handle(&text("u1", "hi")).await.unwrap_err();
    let DispatchError::FlowUnavailable { source, .. } = err else {
        panic!("expected a flow error");
    };
    assert!(source.to_string().contains("state=MENU"));
}

#[tokio::test]
async fn routing_keys_pick_the_tenant() {
    let dir = TempDir::new().unwrap();
    write_flow(dir.path(), "broker", broker_flow());
    write_flow(
        dir.path(),
        "clinic",
        json!({ "states": { "MENU": { "type": "text", "body": "Clinic here, {{name}}" } } }),
    );

    let config = AppConfig::from_manager(
        &MapConfigManager::new()
            .with("CONFIG_ROOT", &dir.path().display().to_string())
            .with("TENANT_BY_PHONE_NUMBER_ID", "555:clinic"),
    )
    .await
    .unwrap();
    let channel = MemoryChannel::new();
    let offset = config.utc_offset;
    let actions = ActionRegistry::builtin(
        Arc::new(flowly::action::calendar::InMemoryCalendar::new()),
        offset,
    );
    let dispatcher = Dispatcher::from_config(&config, Arc::new(actions), Arc::new(channel.clone()));

    let to_clinic = InboundEvent::new(
        "555",
        Participant::new("u1", None),
        EventContent::Text { body: "hi".into() },
    );
    let outcome = dispatcher.handle(&to_clinic).await.unwrap();
    assert_eq!(outcome.tenant, "clinic");
    assert_eq!(
        channel.sent_to("u1").await,
        vec![OutgoingMessage::text("Clinic here, there")]
    );

    let unmapped = InboundEvent::new(
        "999",
        Participant::new("u1", None),
        EventContent::Text { body: "hi".into() },
    );
    assert_eq!(dispatcher.handle(&unmapped).await.unwrap().tenant, "broker");
}
