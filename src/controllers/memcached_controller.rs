//! Controller for Memcached resources

use futures::StreamExt;
use kube::{
    runtime::{
        controller::{Action, Controller},
        finalizer::{finalizer, Event},
        watcher::Config,
    },
    Api, Client, ResourceExt,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument};

use crate::controllers::Context;
use crate::crd::{Memcached, RESOURCE_KIND_MEMCACHED};
use crate::metrics::prometheus::{
    set_ready, MANAGED_DATABASES, RECONCILE_DURATION, RECONCILIATIONS, RECONCILIATION_ERRORS,
};
use crate::reconcilers::memcached;
use crate::Error;

/// Finalizer holding deleted databases until termination ran
pub const FINALIZER: &str = "kubedb.com";

/// Shared state of a running controller
struct ControllerState {
    ctx: Arc<Context>,
    client: Client,
}

/// Run the Memcached controller
pub async fn run(client: Client, ctx: Arc<Context>) {
    let memcacheds: Api<Memcached> = Api::all(client.clone());

    info!("Starting Memcached controller");

    let controller = Controller::new(memcacheds, Config::default().any_semantic());
    let store = controller.store();
    let state = Arc::new(ControllerState { ctx, client });
    set_ready(true);

    controller
        .shutdown_on_signal()
        .run(reconcile, error_policy, state)
        .for_each(|res| {
            MANAGED_DATABASES
                .with_label_values(&[RESOURCE_KIND_MEMCACHED])
                .set(store.state().len() as f64);
            async move {
                match res {
                    Ok(o) => info!("Reconciled {:?}", o),
                    Err(e) => error!("Reconcile failed: {:?}", e),
                }
            }
        })
        .await;

    set_ready(false);
    info!("Memcached controller stopped");
}

/// Reconcile a Memcached resource
#[instrument(skip(db, state), fields(name = %db.name_any(), namespace = db.namespace().unwrap_or_default()))]
async fn reconcile(db: Arc<Memcached>, state: Arc<ControllerState>) -> Result<Action, Error> {
    let start = std::time::Instant::now();
    let ns = db.namespace().unwrap_or_default();
    let name = db.name_any();

    RECONCILIATIONS
        .with_label_values(&[RESOURCE_KIND_MEMCACHED])
        .inc();

    let memcacheds: Api<Memcached> = Api::namespaced(state.client.clone(), &ns);
    let ctx = &state.ctx;

    let result = finalizer(&memcacheds, FINALIZER, db, |event| async {
        match event {
            Event::Apply(db) => memcached::reconcile(ctx, &db).await,
            Event::Cleanup(db) => memcached::terminate(ctx, &db).await,
        }
    })
    .await;

    let duration = start.elapsed().as_secs_f64();
    RECONCILE_DURATION
        .with_label_values(&[RESOURCE_KIND_MEMCACHED])
        .observe(duration);

    match &result {
        Ok(_) => info!("Successfully reconciled {}/{} in {:.2}s", ns, name, duration),
        Err(e) => error!("Failed to reconcile {}/{}: {:?}", ns, name, e),
    }

    Ok(result?)
}

/// Error policy for the controller
fn error_policy(db: Arc<Memcached>, err: &Error, _state: Arc<ControllerState>) -> Action {
    let ns = db.namespace().unwrap_or_default();
    let name = db.name_any();
    let retryable = err.is_retryable();

    RECONCILIATION_ERRORS
        .with_label_values(&[RESOURCE_KIND_MEMCACHED, if retryable { "true" } else { "false" }])
        .inc();
    error!("Reconciliation error for {}/{}: {:?}", ns, name, err);

    requeue_after(err)
}

/// Requeue delay for a failed reconciliation
pub fn requeue_after(err: &Error) -> Action {
    if err.is_retryable() {
        Action::requeue(Duration::from_secs(30))
    } else {
        Action::requeue(Duration::from_secs(300))
    }
}
