//! Phase state machine for Memcached databases
//!
//! ```text
//! Empty -> Creating -> Running <-> Paused
//!   any -> Terminating
//! ```
//!
//! All durable state lives in the database status and in the DormantDatabase
//! record; nothing is carried between invocations.

use chrono::Utc;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::Service;
use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::{debug, info, instrument, warn};

use crate::adapters::events::{reasons, Severity};
use crate::adapters::kube_api::object_key;
use crate::adapters::service_builder::build_service;
use crate::adapters::statefulset_builder::build_statefulset;
use crate::controllers::Context;
use crate::crd::{DatabasePhase, Memcached, TerminationPolicy};
use crate::reconcilers::dormant::{self, PauseOutcome};
use crate::reconcilers::ensure::{create_or_patch, Verb};
use crate::reconcilers::monitoring::{
    ensure_monitoring, monitor_changed, remove_monitoring, update_monitoring,
};
use crate::reconcilers::rbac::{delete_rbac, ensure_rbac};
use crate::reconcilers::record_event;
use crate::reconcilers::status::{set_phase, update_status};
use crate::{Error, Result};

/// Drive `db` one step towards its declared state.
///
/// Terminal user errors (invalid spec, dormant mismatch, inconsistent halt
/// request) are reported as warning events and end the cycle successfully;
/// everything else is returned for the controller to retry.
#[instrument(skip(ctx, db), fields(name = %db.name_any(), namespace = db.namespace().unwrap_or_default()))]
pub async fn reconcile(ctx: &Context, db: &Memcached) -> Result<Action> {
    match advance(ctx, db).await {
        Err(e) if e.is_terminal() => {
            warn!(error = %e, "Reconciliation stopped on a terminal error");
            record_event(ctx, db, Severity::Warning, terminal_reason(&e), e.to_string()).await;
            Ok(Action::await_change())
        }
        other => other,
    }
}

fn terminal_reason(err: &Error) -> &'static str {
    match err {
        Error::ConfigError(_) => reasons::FAILED_TO_PAUSE,
        Error::ValidationError(_)
        | Error::DormantKindMismatch(_)
        | Error::DormantSpecMismatch(_) => reasons::INVALID,
        _ => reasons::FAILED_TO_CREATE,
    }
}

async fn advance(ctx: &Context, db: &Memcached) -> Result<Action> {
    match db.phase() {
        DatabasePhase::Empty => {
            if dormant::check_resume(ctx, db).await? {
                return Ok(Action::await_change());
            }
            create(ctx, db).await
        }
        DatabasePhase::Creating => create(ctx, db).await,
        DatabasePhase::Running if db.spec.halted => halt(ctx, db).await,
        DatabasePhase::Running => update(ctx, db).await,
        DatabasePhase::Paused if db.spec.halted => Ok(Action::await_change()),
        DatabasePhase::Paused => resume_in_place(ctx, db).await,
        DatabasePhase::Terminating => Ok(Action::await_change()),
    }
}

/// First provisioning of a database
pub async fn create(ctx: &Context, db: &Memcached) -> Result<Action> {
    ctx.validator.validate(&db.spec)?;

    let db = update_status(ctx, db, |status| {
        status.phase = DatabasePhase::Creating;
        if status.creation_time.is_none() {
            status.creation_time = Some(Utc::now());
        }
    })
    .await?;

    provision(ctx, &db).await?;
    Ok(Action::requeue(ctx.config.resync_interval()))
}

/// Bring a Paused database back after `halted` was cleared
async fn resume_in_place(ctx: &Context, db: &Memcached) -> Result<Action> {
    ctx.validator.validate(&db.spec)?;
    provision(ctx, db).await?;
    dormant::release_dormant(ctx, db).await?;
    info!("Database resumed in place");
    Ok(Action::requeue(ctx.config.resync_interval()))
}

/// Converge sub-resources, mark the database Running and attach monitoring
async fn provision(ctx: &Context, db: &Memcached) -> Result<()> {
    let (service, statefulset) = converge(ctx, db).await?;
    report_converged(ctx, db, service, statefulset).await;

    let generation = db.metadata.generation;
    let db = update_status(ctx, db, move |status| {
        status.phase = DatabasePhase::Running;
        status.observed_generation = generation;
        status.reason = None;
    })
    .await?;

    if ensure_monitoring(ctx, &db).await {
        let monitor = db.spec.monitor.clone();
        update_status(ctx, &db, move |status| {
            status.observed_monitor = monitor.clone()
        })
        .await?;
    }

    ctx.app_binding.ensure(&db).await?;
    Ok(())
}

/// Reconcile spec changes of a Running database
pub async fn update(ctx: &Context, db: &Memcached) -> Result<Action> {
    ctx.validator.validate(&db.spec)?;
    let (service, statefulset) = converge(ctx, db).await?;
    report_converged(ctx, db, service, statefulset).await;

    let generation = db.metadata.generation;
    let db = update_status(ctx, db, move |status| {
        status.observed_generation = generation;
    })
    .await?;

    let observed = db.observed_monitor().cloned();
    if monitor_changed(observed.as_ref(), db.spec.monitor.as_ref()) {
        debug!("Monitor block changed");
        if update_monitoring(ctx, &db, observed.as_ref()).await {
            let monitor = db.spec.monitor.clone();
            update_status(ctx, &db, move |status| {
                status.observed_monitor = monitor.clone()
            })
            .await?;
        }
    }

    ctx.app_binding.ensure(&db).await?;
    Ok(Action::requeue(ctx.config.resync_interval()))
}

/// Ensure RBAC (when enabled), the Service and the StatefulSet
async fn converge(ctx: &Context, db: &Memcached) -> Result<(Verb, Verb)> {
    if ctx.config.enable_rbac {
        if let Err(e) = ensure_rbac(ctx, db).await {
            report_failure(ctx, db, "RBAC", &e).await;
            return Err(e);
        }
    }

    let service = ensure_service(ctx, db).await?;
    let statefulset = ensure_statefulset(ctx, db).await?;
    Ok((service, statefulset))
}

/// Summary event once the Service and the StatefulSet converged
async fn report_converged(ctx: &Context, db: &Memcached, service: Verb, statefulset: Verb) {
    if let Some(message) = summary_message(service, statefulset) {
        record_event(ctx, db, Severity::Normal, reasons::SUCCESSFUL, message.to_string()).await;
    }
}

fn summary_message(service: Verb, statefulset: Verb) -> Option<&'static str> {
    match (service, statefulset) {
        (Verb::Created, Verb::Created) => Some("Successfully created Memcached"),
        (Verb::Patched, _) | (_, Verb::Patched) => Some("Successfully patched Memcached"),
        _ => None,
    }
}

async fn ensure_service(ctx: &Context, db: &Memcached) -> Result<Verb> {
    let result = create_or_patch::<Service, _>(
        ctx.services.as_ref(),
        db,
        &db.offshoot_name(),
        &ctx.retry,
        |current| Ok(build_service(current, db)),
    )
    .await;
    report_ensure(ctx, db, "Service", result).await
}

async fn ensure_statefulset(ctx: &Context, db: &Memcached) -> Result<Verb> {
    let result = create_or_patch::<StatefulSet, _>(
        ctx.statefulsets.as_ref(),
        db,
        &db.offshoot_name(),
        &ctx.retry,
        |current| build_statefulset(current, db, &ctx.config),
    )
    .await;
    report_ensure(ctx, db, "StatefulSet", result).await
}

async fn report_ensure<K>(
    ctx: &Context,
    db: &Memcached,
    kind: &str,
    result: Result<(K, Verb)>,
) -> Result<Verb> {
    match result {
        Ok((_, verb)) => {
            if verb != Verb::Unchanged {
                info!(kind, %verb, "Converged sub-resource");
                record_event(
                    ctx,
                    db,
                    Severity::Normal,
                    reasons::SUCCESSFUL,
                    format!("Successfully {} {}", verb, kind),
                )
                .await;
            }
            Ok(verb)
        }
        Err(e) => {
            report_failure(ctx, db, kind, &e).await;
            Err(e)
        }
    }
}

async fn report_failure(ctx: &Context, db: &Memcached, kind: &str, err: &Error) {
    warn!(kind, error = %err, "Failed to ensure sub-resource");
    record_event(
        ctx,
        db,
        Severity::Warning,
        reasons::FAILED_TO_CREATE,
        format!("Failed to create {}. Reason: {}", kind, err),
    )
    .await;
}

/// Pause a Running database whose `halted` flag is set.
///
/// The database keeps its phase unless the workload is confirmed gone.
#[instrument(skip(ctx, db), fields(name = %db.name_any(), namespace = db.namespace().unwrap_or_default()))]
pub async fn halt(ctx: &Context, db: &Memcached) -> Result<Action> {
    if db.spec.termination_policy != TerminationPolicy::Halt {
        return Err(Error::ConfigError(format!(
            "Memcached {} is halted but terminationPolicy is {}, not Halt",
            object_key(db),
            db.spec.termination_policy
        )));
    }

    if matches!(dormant::pause(ctx, db).await?, PauseOutcome::Refused) {
        return Ok(Action::await_change());
    }

    let namespace = db.namespace().unwrap_or_default();
    ctx.statefulsets
        .delete(&namespace, &db.offshoot_name())
        .await?;

    if let Err(e) = dormant::wait_until_paused(ctx, db).await {
        warn!(error = %e, "Workload did not go away in time");
        record_event(
            ctx,
            db,
            Severity::Warning,
            reasons::FAILED_TO_PAUSE,
            format!("Failed to pause Memcached. Reason: {}", e),
        )
        .await;
        return Err(e);
    }

    let generation = db.metadata.generation;
    update_status(ctx, db, move |status| {
        status.phase = DatabasePhase::Paused;
        status.observed_generation = generation;
        status.observed_monitor = None;
    })
    .await?;

    info!("Database paused");
    record_event(
        ctx,
        db,
        Severity::Normal,
        reasons::PAUSED,
        "Successfully paused Memcached".to_string(),
    )
    .await;
    Ok(Action::await_change())
}

/// Release what a deleted database leaves behind.
///
/// Failures are logged and reported; deletion always proceeds.
#[instrument(skip(ctx, db), fields(name = %db.name_any(), namespace = db.namespace().unwrap_or_default()))]
pub async fn terminate(ctx: &Context, db: &Memcached) -> Result<Action> {
    if db.phase() == DatabasePhase::Empty {
        debug!("Database was never provisioned, nothing to clean up");
        return Ok(Action::await_change());
    }

    if let Err(e) = set_phase(ctx, db, DatabasePhase::Terminating).await {
        warn!(error = %e, "Failed to mark database Terminating");
    }

    if db.spec.termination_policy == TerminationPolicy::WipeOut {
        if let Err(e) = ctx.reclaimer.wipe_out(db).await {
            report_cleanup_failure(ctx, db, "data", &e).await;
        }
        if let Err(e) = delete_rbac(ctx, db).await {
            report_cleanup_failure(ctx, db, "RBAC", &e).await;
        }
    }

    if let Some(monitor) = db.observed_monitor().or(db.spec.monitor.as_ref()) {
        remove_monitoring(ctx, db, monitor).await;
    }

    info!(policy = %db.spec.termination_policy, "Database terminated");
    Ok(Action::await_change())
}

async fn report_cleanup_failure(ctx: &Context, db: &Memcached, what: &str, err: &Error) {
    warn!(what, error = %err, "Cleanup failed");
    record_event(
        ctx,
        db,
        Severity::Warning,
        reasons::FAILED_TO_DELETE,
        format!("Failed to delete {}. Reason: {}", what, err),
    )
    .await;
}
