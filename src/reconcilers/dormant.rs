//! Pause, resume and spec-match protocol around DormantDatabase records
//!
//! A DormantDatabase shares the identity of the database it archives and
//! holds its spec with `halted` cleared. A new declaration for an identity
//! that has a dormant record is only accepted when its spec matches the
//! archived one; the declaration is then handed over to the resume process
//! by setting `resume` and removing the declaration itself.

use std::time::Duration;

use kube::api::ObjectMeta;
use kube::ResourceExt;
use tracing::{debug, info, instrument, trace, warn};

use crate::adapters::events::{reasons, Severity};
use crate::adapters::kube_api::object_key;
use crate::controllers::Context;
use crate::crd::{DormantDatabase, Memcached};
use crate::reconcilers::monitoring::remove_monitoring;
use crate::reconcilers::record_event;
use crate::reconcilers::retry::retry_on_conflict;
use crate::{Error, Result};

/// Result of a pause request
#[derive(Clone, Debug, PartialEq)]
pub enum PauseOutcome {
    /// The database is archived in this record; the workload may go
    Archived(Box<DormantDatabase>),
    /// The doNotPause lock refused the request; nothing was archived
    Refused,
}

/// Archive `db` ahead of halting it, unless it is locked against pausing
#[instrument(skip(ctx, db), fields(name = %db.name_any(), namespace = db.namespace().unwrap_or_default()))]
pub async fn pause(ctx: &Context, db: &Memcached) -> Result<PauseOutcome> {
    if db.spec.do_not_pause {
        reaffirm(ctx, db).await?;
        warn!("Pause refused, database is locked by doNotPause");
        record_event(
            ctx,
            db,
            Severity::Warning,
            reasons::PAUSE_REFUSED,
            format!(
                "Memcached {} is locked against pausing; unset spec.doNotPause first",
                db.name_any()
            ),
        )
        .await;
        return Ok(PauseOutcome::Refused);
    }

    let dormant = archive(ctx, db).await?;

    if let Some(monitor) = db.observed_monitor().or(db.spec.monitor.as_ref()) {
        remove_monitoring(ctx, db, monitor).await;
    }

    Ok(PauseOutcome::Archived(Box::new(dormant)))
}

/// Re-declare `db` as it is, creating it again if it went away
async fn reaffirm(ctx: &Context, db: &Memcached) -> Result<()> {
    let namespace = db.namespace().unwrap_or_default();
    if ctx.memcacheds.get(&namespace, &db.name_any()).await?.is_some() {
        return Ok(());
    }

    let declared = Memcached {
        metadata: ObjectMeta {
            name: db.metadata.name.clone(),
            namespace: db.metadata.namespace.clone(),
            labels: db.metadata.labels.clone(),
            annotations: db.metadata.annotations.clone(),
            ..Default::default()
        },
        spec: db.spec.clone(),
        status: None,
    };
    match ctx.memcacheds.create(&declared).await {
        Ok(_) | Err(Error::AlreadyExists { .. }) => {
            info!("Re-declared locked database");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Create the dormant record for `db`, reusing an existing one that
/// archives the same spec
async fn archive(ctx: &Context, db: &Memcached) -> Result<DormantDatabase> {
    let namespace = db.namespace().unwrap_or_default();
    let name = db.name_any();
    let (ns, n) = (namespace.as_str(), name.as_str());

    retry_on_conflict(&ctx.retry, "archive database", move || async move {
        if let Some(existing) = ctx.dormant_databases.get(ns, n).await? {
            check_archived_spec(&existing, db)?;
            debug!("Reusing existing DormantDatabase");
            return Ok(existing);
        }

        let created = ctx
            .dormant_databases
            .create(&DormantDatabase::archive(db))
            .await?;
        info!("Created DormantDatabase");
        Ok(created)
    })
    .await
}

/// Reject `db` unless `dormant` archives a Memcached with an identical spec
fn check_archived_spec(dormant: &DormantDatabase, db: &Memcached) -> Result<()> {
    let archived = dormant
        .archived_memcached()
        .ok_or_else(|| Error::DormantKindMismatch(object_key(dormant)))?;
    if !db.spec.matches_archived(archived) {
        return Err(Error::DormantSpecMismatch(object_key(db)));
    }
    Ok(())
}

/// Check a new declaration against the dormant record of its identity.
///
/// Returns `false` when there is no record and the declaration should be
/// created normally. Returns `true` once a matching declaration has been
/// handed over to the resume process; the caller must stop there.
#[instrument(skip(ctx, db), fields(name = %db.name_any(), namespace = db.namespace().unwrap_or_default()))]
pub async fn check_resume(ctx: &Context, db: &Memcached) -> Result<bool> {
    let namespace = db.namespace().unwrap_or_default();
    let name = db.name_any();

    let Some(dormant) = ctx.dormant_databases.get(&namespace, &name).await? else {
        return Ok(false);
    };
    check_archived_spec(&dormant, db)?;

    request_resume(ctx, &namespace, &name).await?;
    ctx.memcacheds.delete(&namespace, &name).await?;

    info!("Declaration matches DormantDatabase, handed over for resume");
    record_event(
        ctx,
        db,
        Severity::Normal,
        reasons::RESUMING,
        format!(
            "Memcached {} matches DormantDatabase {}; resume requested",
            name,
            object_key(&dormant)
        ),
    )
    .await;
    Ok(true)
}

/// Set `resume` on the dormant record
async fn request_resume(ctx: &Context, namespace: &str, name: &str) -> Result<()> {
    retry_on_conflict(&ctx.retry, "request resume", move || async move {
        // Deleted since it was matched; let the next reconciliation start over
        let Some(mut dormant) = ctx.dormant_databases.get(namespace, name).await? else {
            return Err(Error::Conflict {
                kind: "DormantDatabase".to_string(),
                name: name.to_string(),
            });
        };
        if dormant.spec.resume {
            return Ok(());
        }
        dormant.spec.resume = true;
        ctx.dormant_databases.replace(&dormant).await?;
        Ok(())
    })
    .await
}

/// Drop the dormant record of a database resumed in place
pub async fn release_dormant(ctx: &Context, db: &Memcached) -> Result<()> {
    let namespace = db.namespace().unwrap_or_default();
    let Some(dormant) = ctx.dormant_databases.get(&namespace, &db.name_any()).await? else {
        return Ok(());
    };
    if dormant.archived_memcached().is_none() {
        return Ok(());
    }
    ctx.dormant_databases.delete(&namespace, &db.name_any()).await?;
    debug!(name = %db.name_any(), "Deleted DormantDatabase of resumed database");
    Ok(())
}

/// Wait until the workload of `db` is gone, bounded by the pause timeout
pub async fn wait_until_paused(ctx: &Context, db: &Memcached) -> Result<()> {
    let namespace = db.namespace().unwrap_or_default();
    let name = db.offshoot_name();
    let interval = ctx.config.pause_poll_interval();

    let poll = async {
        loop {
            match ctx.statefulsets.get(&namespace, &name).await {
                Ok(None) => return,
                Ok(Some(_)) => trace!("StatefulSet still present"),
                Err(e) => trace!(error = %e, "Polling StatefulSet failed, retrying"),
            }
            tokio::time::sleep(interval.max(Duration::from_millis(1))).await;
        }
    };

    tokio::time::timeout(ctx.config.pause_timeout(), poll)
        .await
        .map_err(|_| Error::PauseTimeout(object_key(db)))
}
