use std::sync::Arc;

use dashmap::DashMap;
use tracing::{info, warn};

use crate::flow::{FlowDefinition, FlowError, FlowSource, validate::FlowValidator};

/// One validated flow per tenant, loaded on first use.
///
/// Failed loads are never cached, so the next request for that tenant retries.
/// Two concurrent misses for the same tenant may both load; the last insert
/// wins, which is harmless since loading has no side effects.
pub struct ConfigCache {
    source: Arc<dyn FlowSource>,
    validator: FlowValidator,
    flows: DashMap<String, Arc<FlowDefinition>>,
}

impl ConfigCache {
    pub fn new(source: Arc<dyn FlowSource>, validator: FlowValidator) -> Arc<Self> {
        Arc::new(Self {
            source,
            validator,
            flows: DashMap::new(),
        })
    }

    pub async fn get(&self, tenant: &str) -> Result<Arc<FlowDefinition>, FlowError> {
        // clone out of the map so no shard lock is held across the load below
        if let Some(flow) = self.flows.get(tenant).map(|f| f.value().clone()) {
            return Ok(flow);
        }

        let flow = self.source.load(tenant).await?;
        self.validator.validate(tenant, &flow)?;

        for (from, target) in flow.dangling_targets() {
            warn!(
                tenant,
                state = %from,
                %target,
                "transition target is not a declared state; it will fall back to the default state"
            );
        }

        let flow = Arc::new(flow);
        self.flows.insert(tenant.to_string(), flow.clone());
        info!(tenant, version = %flow.version, states = flow.states.len(), "flow loaded");
        Ok(flow)
    }

    /// Drop a tenant's flow so the next `get` reloads it from the source.
    pub fn invalidate(&self, tenant: &str) -> bool {
        self.flows.remove(tenant).is_some()
    }

    pub fn is_cached(&self, tenant: &str) -> bool {
        self.flows.contains_key(tenant)
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }
}
