//! AppBinding descriptor that lets catalog tooling discover a database

use async_trait::async_trait;
use kube::api::{Api, Patch, PatchParams};
use kube::core::{ApiResource, DynamicObject, GroupVersionKind};
use kube::{Client, ResourceExt};
#[cfg(test)]
use mockall::automock;
use serde_json::json;

use crate::adapters::monitor_agent::FIELD_MANAGER;
use crate::adapters::ownership::owner_reference;
use crate::crd::{Memcached, MEMCACHED_PORT};
use crate::Result;

/// Idempotent ensure of the AppBinding for a database
#[cfg_attr(test, automock)]
#[async_trait]
pub trait AppBindingEnsurer: Send + Sync {
    async fn ensure(&self, db: &Memcached) -> Result<()>;
}

/// [`AppBindingEnsurer`] applying `appcatalog.appscode.com/v1alpha1` objects
pub struct KubeAppBinding {
    client: Client,
    resource: ApiResource,
}

impl KubeAppBinding {
    pub fn new(client: Client) -> Self {
        let gvk = GroupVersionKind::gvk("appcatalog.appscode.com", "v1alpha1", "AppBinding");
        Self {
            client,
            resource: ApiResource::from_gvk(&gvk),
        }
    }
}

/// Body of the AppBinding pointing at the database Service
pub fn build_app_binding(db: &Memcached, resource: &ApiResource) -> DynamicObject {
    let mut obj = DynamicObject::new(&db.offshoot_name(), resource)
        .within(&db.namespace().unwrap_or_default())
        .data(json!({
            "spec": {
                "type": "kubedb.com/memcached",
                "version": db.spec.version,
                "clientConfig": {
                    "service": {
                        "name": db.offshoot_name(),
                        "port": MEMCACHED_PORT,
                        "scheme": "memcached",
                    }
                },
            }
        }));
    obj.metadata.labels = Some(db.offshoot_labels());
    obj.metadata.owner_references = Some(vec![owner_reference(db)]);
    obj
}

#[async_trait]
impl AppBindingEnsurer for KubeAppBinding {
    async fn ensure(&self, db: &Memcached) -> Result<()> {
        let api: Api<DynamicObject> = Api::namespaced_with(
            self.client.clone(),
            &db.namespace().unwrap_or_default(),
            &self.resource,
        );
        api.patch(
            &db.offshoot_name(),
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(&build_app_binding(db, &self.resource)),
        )
        .await?;
        Ok(())
    }
}
