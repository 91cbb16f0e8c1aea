//! Exporter scrape endpoint and monitoring agent wiring
//!
//! Monitoring never blocks the database lifecycle: every failure here is
//! logged, mirrored as a warning event and reported back as `false`.

use k8s_openapi::api::core::v1::Service;
use kube::ResourceExt;
use tracing::{info, warn};

use crate::adapters::events::{reasons, Severity};
use crate::adapters::service_builder::build_stats_service;
use crate::controllers::Context;
use crate::crd::{Memcached, MonitorSpec};
use crate::reconcilers::ensure::create_or_patch;
use crate::reconcilers::record_event;
use crate::Result;

/// Whether monitoring has to be reconfigured between two monitor blocks
pub fn monitor_changed(observed: Option<&MonitorSpec>, desired: Option<&MonitorSpec>) -> bool {
    observed != desired
}

/// Provision the stats Service and the agent for `db.spec.monitor`
pub async fn ensure_monitoring(ctx: &Context, db: &Memcached) -> bool {
    let Some(monitor) = db.spec.monitor.as_ref() else {
        return true;
    };
    match try_ensure(ctx, db, monitor).await {
        Ok(()) => {
            info!(name = %db.name_any(), agent = %monitor.agent, "Monitoring configured");
            true
        }
        Err(e) => {
            warn!(name = %db.name_any(), error = %e, "Failed to add monitoring system");
            record_event(
                ctx,
                db,
                Severity::Warning,
                reasons::FAILED_TO_CREATE,
                format!("Failed to add monitoring system. Reason: {}", e),
            )
            .await;
            false
        }
    }
}

async fn try_ensure(ctx: &Context, db: &Memcached, monitor: &MonitorSpec) -> Result<()> {
    create_or_patch::<Service, _>(
        ctx.services.as_ref(),
        db,
        &db.stats_service_name(),
        &ctx.retry,
        |current| Ok(build_stats_service(current, db)),
    )
    .await?;
    ctx.monitor_agent.ensure(db, monitor).await
}

/// Tear down the agent configuration and stats Service described by
/// `monitor`
pub async fn remove_monitoring(ctx: &Context, db: &Memcached, monitor: &MonitorSpec) -> bool {
    match try_remove(ctx, db, monitor).await {
        Ok(()) => {
            info!(name = %db.name_any(), agent = %monitor.agent, "Monitoring removed");
            true
        }
        Err(e) => {
            warn!(name = %db.name_any(), error = %e, "Failed to delete monitoring system");
            record_event(
                ctx,
                db,
                Severity::Warning,
                reasons::FAILED_TO_DELETE,
                format!("Failed to delete monitoring system. Reason: {}", e),
            )
            .await;
            false
        }
    }
}

async fn try_remove(ctx: &Context, db: &Memcached, monitor: &MonitorSpec) -> Result<()> {
    ctx.monitor_agent.remove(db, monitor).await?;
    ctx.services
        .delete(&db.namespace().unwrap_or_default(), &db.stats_service_name())
        .await?;
    Ok(())
}

/// Move monitoring from the `observed` block to the one in `db.spec`
pub async fn update_monitoring(
    ctx: &Context,
    db: &Memcached,
    observed: Option<&MonitorSpec>,
) -> bool {
    match (observed, db.spec.monitor.as_ref()) {
        (None, None) => true,
        (Some(old), None) => remove_monitoring(ctx, db, old).await,
        (None, Some(_)) => ensure_monitoring(ctx, db).await,
        (Some(old), Some(new)) => {
            if old.agent != new.agent && !remove_monitoring(ctx, db, old).await {
                return false;
            }
            ensure_monitoring(ctx, db).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::fixtures::prometheus_monitor;
    use crate::crd::AgentKind;

    #[test]
    fn change_detection_looks_only_at_monitor_block() {
        let a = prometheus_monitor(AgentKind::PrometheusBuiltin);
        let mut b = a.clone();
        assert!(!monitor_changed(Some(&a), Some(&b)));
        assert!(!monitor_changed(None, None));
        assert!(monitor_changed(None, Some(&a)));
        assert!(monitor_changed(Some(&a), None));

        if let Some(p) = b.prometheus.as_mut() {
            p.interval = Some("30s".to_string());
        }
        assert!(monitor_changed(Some(&a), Some(&b)));
    }
}
