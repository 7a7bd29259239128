//! Optional built-in traffic: keeps a fixed set of users present on this node
//! until shutdown, then removes them.
//!
//! Enabled by `HERALD_DEMO_USERS` (comma-separated user IDs) under
//! `HERALD_DEMO_TENANT` (default `demo`).

use std::sync::Arc;
use std::time::Duration;

use herald_core::Location;
use herald_presence::PresenceService;
use tokio_util::sync::CancellationToken;

const DEFAULT_TENANT: &str = "demo";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DemoUsers {
    pub tenant_id: String,
    pub user_ids: Vec<String>,
}

impl DemoUsers {
    pub fn from_env() -> Option<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// `None` when no demo users are configured.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let user_ids: Vec<String> = lookup("HERALD_DEMO_USERS")?
            .split(',')
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .collect();
        if user_ids.is_empty() {
            return None;
        }
        let tenant_id = lookup("HERALD_DEMO_TENANT")
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| DEFAULT_TENANT.to_string());
        Some(Self {
            tenant_id,
            user_ids,
        })
    }
}

fn region() -> Location {
    Location::new().with("app", "herald-node")
}

fn location() -> Location {
    region().with("page", "home")
}

/// Renew every demo user's presence each `renew_every` until cancelled.
pub async fn run_demo(
    service: Arc<PresenceService>,
    demo: DemoUsers,
    renew_every: Duration,
    cancel: CancellationToken,
) {
    let (region, location) = (region(), location());
    tracing::info!(
        tenant_id = %demo.tenant_id,
        users = demo.user_ids.len(),
        "Demo presence driver started"
    );

    loop {
        for user_id in &demo.user_ids {
            if let Err(e) = service
                .set_user_presence(user_id, &demo.tenant_id, &location, &region)
                .await
            {
                tracing::warn!(error = %e, user_id = %user_id, "Demo user rejected");
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(renew_every) => {}
        }
    }

    for user_id in &demo.user_ids {
        if let Err(e) = service
            .remove_user_presence(user_id, &demo.tenant_id, &location, &region)
            .await
        {
            tracing::warn!(error = %e, user_id = %user_id, "Demo user rejected");
        }
    }
    tracing::info!("Demo presence driver stopped");
}
