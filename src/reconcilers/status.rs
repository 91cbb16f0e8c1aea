//! Read-modify-write of the Memcached status subresource
//!
//! Status lives on the same versioned object as the spec, so every write
//! starts from a fresh read and is retried on conflict. Phase changes must
//! respect [`DatabasePhase::can_transition_to`] and the observed generation
//! never moves backwards.

use kube::ResourceExt;
use tracing::{debug, info};

use crate::controllers::Context;
use crate::crd::{DatabasePhase, Memcached, MemcachedStatus};
use crate::metrics::PHASE_TRANSITIONS;
use crate::reconcilers::retry::retry_on_conflict;
use crate::{Error, Result};

/// Apply `update` to the latest status of `db` and persist it.
///
/// Returns the object as stored afterwards. A database that disappeared in
/// the meantime is returned unchanged.
pub async fn update_status<F>(ctx: &Context, db: &Memcached, update: F) -> Result<Memcached>
where
    F: Fn(&mut MemcachedStatus) + Send + Sync,
{
    let namespace = db.namespace().unwrap_or_default();
    let name = db.name_any();
    let operation = format!("update status {}/{}", namespace, name);
    let (namespace, name, update) = (namespace.as_str(), name.as_str(), &update);

    retry_on_conflict(&ctx.retry, &operation, move || async move {
        let Some(mut current) = ctx.memcacheds.get(namespace, name).await? else {
            debug!(namespace, name, "Database gone, skipping status update");
            return Ok(db.clone());
        };

        let before = current.status.clone().unwrap_or_default();
        let after = next_status(&before, update)?;
        if after == before {
            return Ok(current);
        }

        current.status = Some(after.clone());
        let stored = ctx.memcacheds.replace_status(&current).await?;

        if before.phase != after.phase {
            let (from, to) = (before.phase.to_string(), after.phase.to_string());
            PHASE_TRANSITIONS
                .with_label_values(&[from.as_str(), to.as_str()])
                .inc();
            info!(
                namespace,
                name,
                from = %before.phase,
                to = %after.phase,
                "Database phase changed"
            );
        }
        Ok(stored)
    })
    .await
}

/// Compute the status that `update` produces from `before`, enforcing
/// phase monotonicity and a non-decreasing observed generation
pub fn next_status<F>(before: &MemcachedStatus, update: &F) -> Result<MemcachedStatus>
where
    F: Fn(&mut MemcachedStatus),
{
    let mut after = before.clone();
    update(&mut after);

    if !before.phase.can_transition_to(after.phase) {
        return Err(Error::InvalidTransition {
            from: before.phase,
            to: after.phase,
        });
    }
    after.observed_generation = match (before.observed_generation, after.observed_generation) {
        (Some(old), Some(new)) => Some(old.max(new)),
        (old, new) => new.or(old),
    };
    Ok(after)
}

/// Set only the phase
pub async fn set_phase(ctx: &Context, db: &Memcached, phase: DatabasePhase) -> Result<Memcached> {
    update_status(ctx, db, move |status| status.phase = phase).await
}
