//! Reclaiming data-bearing resources of a wiped-out database

use async_trait::async_trait;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use kube::api::{Api, DeleteParams, ListParams};
use kube::{Client, ResourceExt};
#[cfg(test)]
use mockall::automock;
use tracing::info;

use crate::crd::Memcached;
use crate::Result;

/// Removes whatever persistent state a database left behind
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DataReclaimer: Send + Sync {
    async fn wipe_out(&self, db: &Memcached) -> Result<()>;
}

/// [`DataReclaimer`] deleting the database's labelled PVCs
pub struct PvcReclaimer {
    client: Client,
}

impl PvcReclaimer {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

/// Label selector matching every offshoot of `db`
pub fn offshoot_label_selector(db: &Memcached) -> String {
    db.offshoot_selectors()
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

#[async_trait]
impl DataReclaimer for PvcReclaimer {
    async fn wipe_out(&self, db: &Memcached) -> Result<()> {
        let namespace = db.namespace().unwrap_or_default();
        let api: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), &namespace);
        let selector = offshoot_label_selector(db);
        api.delete_collection(
            &DeleteParams::background(),
            &ListParams::default().labels(&selector),
        )
        .await?;
        info!(%namespace, %selector, "Deleted persistent volume claims");
        Ok(())
    }
}
