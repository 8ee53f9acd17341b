//! Per-event orchestration: tenant, flow, transition, action, session, render,
//! delivery.

use std::sync::Arc;

use flowly_channel::{ChannelClient, InboundEvent, OutgoingMessage};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
    action::{ActionId, ActionRegistry},
    assets::AssetResolver,
    config::AppConfig,
    flow::{
        FileFlowSource, FlowDefinition, FlowError,
        cache::ConfigCache,
        render::Renderer,
        resolver::resolve,
        session::{InMemorySessionStore, Session, SessionKey, SessionStore},
        validate::FlowValidator,
    },
    tenant::TenantResolver,
};

/// Sent when the tenant's flow cannot be loaded.
pub const FLOW_UNAVAILABLE_APOLOGY: &str = "Sorry, something went wrong. Please try again.";
/// Sent when the next state cannot be rendered or delivered.
pub const RENDER_APOLOGY: &str = "Sorry, there was a problem showing the menu.";
/// Exposed as `name` when the channel shares no display name.
pub const FALLBACK_CONTACT_NAME: &str = "there";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    /// The target state declares no action.
    None,
    Succeeded { action: ActionId, variables: usize },
    /// The state advanced anyway and rendered without the action's variables.
    Failed { action: ActionId, error: String },
    /// Declared in the flow but not runnable in this process; skipped.
    Skipped(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    /// The rendered message could not be produced or sent; the user got the
    /// plain-text apology instead.
    Apologized { reason: String },
    /// Neither the message nor the apology reached the user.
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub tenant: String,
    pub user: String,
    pub previous_state: String,
    pub next_state: String,
    pub handled: bool,
    pub action: ActionOutcome,
    pub delivery: DeliveryOutcome,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("event `{0}` has no sender id")]
    MissingSender(String),
    #[error("tenant `{tenant}` has no usable flow: {source}")]
    FlowUnavailable {
        tenant: String,
        #[source]
        source: FlowError,
    },
}

/// Runs inbound events through a tenant's flow.
///
/// Events are independent: any number may be in flight at once. Events for
/// the same user are not ordered against each other, and the later session
/// write wins when two of them overlap.
pub struct Dispatcher {
    tenants: TenantResolver,
    cache: Arc<ConfigCache>,
    sessions: SessionStore,
    actions: Arc<ActionRegistry>,
    renderer: Renderer,
    channel: Arc<dyn ChannelClient>,
    default_state: String,
}

impl Dispatcher {
    pub fn new(
        tenants: TenantResolver,
        cache: Arc<ConfigCache>,
        sessions: SessionStore,
        actions: Arc<ActionRegistry>,
        renderer: Renderer,
        channel: Arc<dyn ChannelClient>,
        default_state: impl Into<String>,
    ) -> Self {
        Self {
            tenants,
            cache,
            sessions,
            actions,
            renderer,
            channel,
            default_state: default_state.into(),
        }
    }

    /// File-backed flows under the config root, in-memory sessions.
    pub fn from_config(
        config: &AppConfig,
        actions: Arc<ActionRegistry>,
        channel: Arc<dyn ChannelClient>,
    ) -> Self {
        let validator = FlowValidator::new(&config.default_state).with_actions(actions.clone());
        let cache = ConfigCache::new(
            Arc::new(FileFlowSource::new(&config.config_root)),
            validator,
        );
        Self::new(
            TenantResolver::new(
                config.tenant_by_routing_key.clone(),
                &config.default_tenant,
            ),
            cache,
            InMemorySessionStore::new(),
            actions,
            Renderer::new(AssetResolver::new(config.public_base_url.clone())),
            channel,
            &config.default_state,
        )
    }

    pub fn cache(&self) -> &Arc<ConfigCache> {
        &self.cache
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    #[tracing::instrument(
        name = "dispatch",
        skip(self, event),
        fields(event_id = %event.id, kind = event.content.kind())
    )]
    pub async fn handle(&self, event: &InboundEvent) -> Result<DispatchOutcome, DispatchError> {
        let user = event.from.id.trim();
        if user.is_empty() {
            return Err(DispatchError::MissingSender(event.id.clone()));
        }
        let tenant = self.tenants.resolve(&event.routing_key).to_string();

        let flow = match self.cache.get(&tenant).await {
            Ok(flow) => flow,
            Err(source) => {
                error!(%tenant, user, error = %source, "flow unavailable");
                self.apologize(event, user, FLOW_UNAVAILABLE_APOLOGY, source.to_string())
                    .await;
                return Err(DispatchError::FlowUnavailable { tenant, source });
            }
        };

        // the store is only touched for this read and the write below; the
        // action runs on an owned copy
        let key = SessionKey::new(&tenant, user);
        let mut session = self
            .sessions
            .get(&key)
            .await
            .unwrap_or_else(|| Session::new(&self.default_state));
        let previous_state = session.state.clone();

        if let Some(id) = event.content.selected_option() {
            session.data.last_selected_id = Some(id.to_string());
        }
        let name = event
            .from
            .display_name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(FALLBACK_CONTACT_NAME);
        session.data.contact_name = Some(name.to_string());

        let transition = resolve(&flow, &self.default_state, &previous_state, &event.content);
        debug!(%tenant, user, from = %previous_state, to = %transition.next_state, handled = transition.handled, "resolved");
        session.advance(&transition.next_state);

        let action = self.run_action(&tenant, user, &flow, &mut session).await;
        let vars = session.data.to_variables();
        self.sessions.set(key, session).await;

        let delivery = match self
            .renderer
            .render(&tenant, &flow, &transition.next_state, &vars)
        {
            Ok(message) => match self.channel.send(&event.routing_key, user, &message).await {
                Ok(()) => DeliveryOutcome::Delivered,
                Err(e) => {
                    error!(%tenant, user, channel = self.channel.name(), error = %e, "delivery failed");
                    self.apologize(event, user, RENDER_APOLOGY, e.to_string()).await
                }
            },
            Err(e) => {
                error!(%tenant, user, state = %transition.next_state, error = %e, "render failed");
                self.apologize(event, user, RENDER_APOLOGY, e.to_string()).await
            }
        };

        let outcome = DispatchOutcome {
            tenant,
            user: user.to_string(),
            previous_state,
            next_state: transition.next_state,
            handled: transition.handled,
            action,
            delivery,
        };
        info!(
            target: "request",
            tenant = %outcome.tenant,
            user = %outcome.user,
            from = %outcome.previous_state,
            to = %outcome.next_state,
            handled = outcome.handled,
            action = ?outcome.action,
            delivery = ?outcome.delivery,
            "dispatched"
        );
        Ok(outcome)
    }

    async fn run_action(
        &self,
        tenant: &str,
        user: &str,
        flow: &FlowDefinition,
        session: &mut Session,
    ) -> ActionOutcome {
        let Some(name) = flow.state(&session.state).and_then(|s| s.action_name()) else {
            return ActionOutcome::None;
        };
        let Some((id, handler)) = self.actions.lookup(name) else {
            warn!(tenant, state = %session.state, action = name, "action is not registered; skipping");
            return ActionOutcome::Skipped(name.to_string());
        };

        match handler.run(tenant, user, session).await {
            Ok(vars) => {
                debug!(tenant, user, action = %id, variables = vars.len(), "action succeeded");
                session.data.merge(&vars);
                ActionOutcome::Succeeded {
                    action: id,
                    variables: vars.len(),
                }
            }
            Err(e) => {
                warn!(tenant, user, action = %id, error = %e, "action failed; rendering without its output");
                ActionOutcome::Failed {
                    action: id,
                    error: e.to_string(),
                }
            }
        }
    }

    /// Best effort plain-text fallback.
    async fn apologize(
        &self,
        event: &InboundEvent,
        user: &str,
        text: &str,
        reason: String,
    ) -> DeliveryOutcome {
        match self
            .channel
            .send(&event.routing_key, user, &OutgoingMessage::text(text))
            .await
        {
            Ok(()) => DeliveryOutcome::Apologized { reason },
            Err(e) => {
                error!(user, error = %e, "apology could not be delivered either");
                DeliveryOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }
}
