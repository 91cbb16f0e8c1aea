//! Instance-scoped identity for database pods
//!
//! The Role is deleted and recreated on every call so that rules from an
//! earlier version of the operator can never linger. ServiceAccount and
//! RoleBinding bodies are static; an existing object counts as success.

use kube::ResourceExt;
use tracing::{debug, instrument};

use crate::adapters::rbac_builder::{build_role, build_role_binding, build_service_account};
use crate::controllers::Context;
use crate::crd::Memcached;
use crate::reconcilers::ensure::create_if_missing;
use crate::reconcilers::retry::retry_on_conflict;
use crate::Result;

/// Ensure the Role, ServiceAccount and RoleBinding of `db`
#[instrument(skip(ctx, db), fields(name = %db.name_any(), namespace = db.namespace().unwrap_or_default()))]
pub async fn ensure_rbac(ctx: &Context, db: &Memcached) -> Result<()> {
    let namespace = db.namespace().unwrap_or_default();
    let name = db.offshoot_name();
    let role = build_role(db);

    // A Role deleted in the background may still be terminating when the
    // create lands; that surfaces as AlreadyExists and is retried.
    let (ns, n, role) = (namespace.as_str(), name.as_str(), &role);
    retry_on_conflict(&ctx.retry, "recreate role", move || async move {
        ctx.roles.delete(ns, n).await?;
        ctx.roles.create(role).await
    })
    .await?;
    debug!("Recreated Role");

    create_if_missing(ctx.service_accounts.as_ref(), &build_service_account(db)).await?;
    create_if_missing(ctx.role_bindings.as_ref(), &build_role_binding(db)).await?;
    debug!("Ensured ServiceAccount and RoleBinding");

    Ok(())
}

/// Remove the Role, ServiceAccount and RoleBinding of `db`; missing objects
/// are fine
#[instrument(skip(ctx, db), fields(name = %db.name_any(), namespace = db.namespace().unwrap_or_default()))]
pub async fn delete_rbac(ctx: &Context, db: &Memcached) -> Result<()> {
    let namespace = db.namespace().unwrap_or_default();
    let name = db.offshoot_name();

    ctx.role_bindings.delete(&namespace, &name).await?;
    ctx.service_accounts.delete(&namespace, &name).await?;
    ctx.roles.delete(&namespace, &name).await?;
    debug!("Deleted RBAC objects");
    Ok(())
}
