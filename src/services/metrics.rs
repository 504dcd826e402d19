use std::collections::HashMap;

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_gauge_vec, Counter, CounterVec, GaugeVec,
};
use tracing::warn;

use crate::models::user::UserRole;
use crate::services::profiles::ProfileService;

lazy_static! {
    // ── Event counters ──────────────────────────────────────────────────────
    pub static ref LOGINS_COUNTER: CounterVec = register_counter_vec!(
        "portal_logins_total",
        "Tentativas de login por status",
        &["status"]
    ).unwrap();

    pub static ref SIGNUPS_COUNTER: CounterVec = register_counter_vec!(
        "portal_signups_total",
        "Cadastros por status",
        &["status"]
    ).unwrap();

    pub static ref ANNOUNCEMENTS_COUNTER: Counter = register_counter!(
        "portal_announcements_created_total",
        "Comunicados publicados"
    ).unwrap();

    pub static ref VIEWS_COUNTER: Counter = register_counter!(
        "portal_announcement_views_total",
        "Visualizações de comunicados registradas"
    ).unwrap();

    pub static ref ACCESS_CHANGES_COUNTER: CounterVec = register_counter_vec!(
        "portal_access_changes_total",
        "Alterações de acesso feitas por administradores",
        &["state"]
    ).unwrap();

    pub static ref ASSISTANT_COUNTER: CounterVec = register_counter_vec!(
        "portal_assistant_requests_total",
        "Chamadas ao assistente por tipo e status",
        &["kind", "status"]
    ).unwrap();

    // ── Business metrics ────────────────────────────────────────────────────
    pub static ref USERS_GAUGE: GaugeVec = register_gauge_vec!(
        "portal_users_total",
        "Usuários por papel",
        &["role"]
    ).unwrap();
}

/// Spawn the background metrics collector (refreshes every 5 minutes).
pub fn start(profiles: ProfileService) {
    tokio::spawn(async move {
        loop {
            if let Err(e) = collect(&profiles).await {
                warn!("Metrics: collection failed: {}", e);
            }
            tokio::time::sleep(tokio::time::Duration::from_secs(300)).await;
        }
    });
}

async fn collect(profiles: &ProfileService) -> anyhow::Result<()> {
    let records = profiles.store().list().await?;

    let mut by_role: HashMap<UserRole, f64> = HashMap::new();
    for role in [UserRole::User, UserRole::Admin, UserRole::Pendente] {
        by_role.insert(role, 0.0);
    }
    for (_, record) in records {
        if record.is_active == Some(false) {
            continue;
        }
        *by_role.entry(record.role.unwrap_or_default()).or_default() += 1.0;
    }

    for (role, count) in by_role {
        USERS_GAUGE.with_label_values(&[&role.to_string()]).set(count);
    }
    Ok(())
}
