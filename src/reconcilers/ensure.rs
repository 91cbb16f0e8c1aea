//! Idempotent create-or-patch of owned sub-resources
//!
//! The desired object is always derived by applying a mutation to the
//! current object (or to an empty one), so fields the operator does not
//! own survive. Objects at the expected name that do not carry the
//! database's ownership labels are never touched.

use std::fmt;

use kube::Resource;
use tracing::debug;

use crate::adapters::kube_api::ObjectApi;
use crate::adapters::ownership::is_owned_by;
use crate::crd::Memcached;
use crate::reconcilers::retry::{retry_on_conflict, RetryConfig};
use crate::{Error, Result};

/// What an ensure call did to the cluster
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verb {
    Created,
    Patched,
    Unchanged,
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verb::Created => write!(f, "created"),
            Verb::Patched => write!(f, "patched"),
            Verb::Unchanged => write!(f, "unchanged"),
        }
    }
}

/// Converge the object `namespace/name` onto `mutate(current)`.
///
/// Write races (stale version token, concurrent create) are retried with a
/// fresh read; callers only see the final outcome.
pub async fn create_or_patch<K, F>(
    api: &dyn ObjectApi<K>,
    db: &Memcached,
    name: &str,
    retry: &RetryConfig,
    mutate: F,
) -> Result<(K, Verb)>
where
    K: Resource<DynamicType = ()> + Clone + Default + PartialEq + Send + Sync + 'static,
    F: Fn(K) -> Result<K> + Send + Sync,
{
    let namespace = db.meta().namespace.clone().unwrap_or_default();
    let operation = format!("ensure {} {}/{}", K::kind(&()), namespace, name);
    let namespace = namespace.as_str();
    let mutate = &mutate;

    retry_on_conflict(retry, &operation, move || {
        ensure_once(api, db, namespace, name, mutate)
    })
    .await
}

async fn ensure_once<K, F>(
    api: &dyn ObjectApi<K>,
    db: &Memcached,
    namespace: &str,
    name: &str,
    mutate: &F,
) -> Result<(K, Verb)>
where
    K: Resource<DynamicType = ()> + Clone + Default + PartialEq + Send + Sync + 'static,
    F: Fn(K) -> Result<K> + Send + Sync,
{
    let Some(current) = api.get(namespace, name).await? else {
        let mut fresh = K::default();
        fresh.meta_mut().name = Some(name.to_string());
        fresh.meta_mut().namespace = Some(namespace.to_string());
        let created = api.create(&mutate(fresh)?).await?;
        debug!(kind = %K::kind(&()), namespace, name, "Created sub-resource");
        return Ok((created, Verb::Created));
    };

    if !is_owned_by(current.meta(), db) {
        return Err(Error::OwnershipError {
            kind: K::kind(&()).to_string(),
            name: name.to_string(),
        });
    }

    let desired = mutate(current.clone())?;
    if desired == current {
        return Ok((current, Verb::Unchanged));
    }

    let patched = api.replace(&desired).await?;
    debug!(kind = %K::kind(&()), namespace, name, "Patched sub-resource");
    Ok((patched, Verb::Patched))
}

/// Create an object whose body never changes, treating "already exists" as
/// success
pub async fn create_if_missing<K>(api: &dyn ObjectApi<K>, obj: &K) -> Result<Verb>
where
    K: Resource<DynamicType = ()> + Send + Sync + 'static,
{
    match api.create(obj).await {
        Ok(_) => Ok(Verb::Created),
        Err(Error::AlreadyExists { .. }) => Ok(Verb::Unchanged),
        Err(e) => Err(e),
    }
}
