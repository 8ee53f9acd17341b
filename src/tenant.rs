use std::collections::BTreeMap;

use tracing::debug;

/// Maps the channel routing key (the business phone-number id) to a tenant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantResolver {
    by_routing_key: BTreeMap<String, String>,
    default_tenant: String,
}

impl TenantResolver {
    pub fn new(by_routing_key: BTreeMap<String, String>, default_tenant: impl Into<String>) -> Self {
        Self {
            by_routing_key,
            default_tenant: default_tenant.into(),
        }
    }

    pub fn default_tenant(&self) -> &str {
        &self.default_tenant
    }

    /// Empty or unmapped keys fall back to the default tenant.
    pub fn resolve(&self, routing_key: &str) -> &str {
        let key = routing_key.trim();
        if key.is_empty() {
            return &self.default_tenant;
        }
        match self.by_routing_key.get(key) {
            Some(tenant) => tenant,
            None => {
                debug!(routing_key = key, "no tenant mapped, using default");
                &self.default_tenant
            }
        }
    }
}
