//! Reconciliation logic for Memcached databases and their offshoots

pub mod dormant;
pub mod ensure;
pub mod memcached;
pub mod monitoring;
pub mod rbac;
pub mod retry;
pub mod status;
pub mod validation;

use kube::Resource;

use crate::adapters::events::Severity;
use crate::controllers::Context;
use crate::crd::Memcached;

/// Mirror a condition as an event on the database
pub(crate) async fn record_event(
    ctx: &Context,
    db: &Memcached,
    severity: Severity,
    reason: &str,
    message: String,
) {
    ctx.events
        .publish(&db.object_ref(&()), severity, reason, message)
        .await;
}
