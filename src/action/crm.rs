use async_trait::async_trait;
use tracing::info;

use crate::{
    action::{ActionError, ActionHandler},
    flow::{Variables, session::Session},
};

/// Stand-in for a CRM lookup: users whose id ends in an even digit are
/// existing clients, everyone else is a visitor.
#[derive(Debug, Clone, Copy, Default)]
pub struct MockCrmLookup;

#[async_trait]
impl ActionHandler for MockCrmLookup {
    async fn run(
        &self,
        tenant: &str,
        user: &str,
        _session: &Session,
    ) -> Result<Variables, ActionError> {
        info!(tenant, user, "looking up user in mock CRM");

        let is_client = user.bytes().last().is_some_and(|b| b % 2 == 0);
        let mut vars = Variables::new();
        vars.insert("is_client".into(), is_client.to_string());
        if is_client {
            vars.insert("client_name".into(), "Carlos (VIP client)".into());
            vars.insert("last_visit".into(), "February 15".into());
        } else {
            vars.insert("client_name".into(), "Visitor".into());
        }
        Ok(vars)
    }
}
