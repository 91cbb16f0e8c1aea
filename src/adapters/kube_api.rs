//! Narrow, per-kind access to the Kubernetes API
//!
//! Reconcilers only talk to the cluster through [`ObjectApi`], so tests can
//! substitute an in-memory cluster. Writes carry the object's
//! `resourceVersion`; a stale version comes back as [`Error::Conflict`].

use std::fmt::Debug;
use std::marker::PhantomData;

use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{DeleteParams, PostParams, PropagationPolicy};
use kube::{Api, Client, Resource};
#[cfg(test)]
use mockall::automock;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::{Error, Result};

/// CRUD over one namespaced kind
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ObjectApi<K: Send + Sync + 'static>: Send + Sync {
    /// Fetch an object; `None` when it does not exist
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>>;

    /// Create an object; [`Error::AlreadyExists`] when the name is taken
    async fn create(&self, obj: &K) -> Result<K>;

    /// Replace an object; [`Error::Conflict`] when its version token is stale
    async fn replace(&self, obj: &K) -> Result<K>;

    /// Replace the status subresource; [`Error::Conflict`] when stale
    async fn replace_status(&self, obj: &K) -> Result<K>;

    /// Delete an object; `false` when it was already gone
    async fn delete(&self, namespace: &str, name: &str) -> Result<bool>;
}

/// [`ObjectApi`] backed by the Kubernetes API server
pub struct KubeObjectApi<K> {
    client: Client,
    _kind: PhantomData<fn() -> K>,
}

impl<K> KubeObjectApi<K> {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            _kind: PhantomData,
        }
    }
}

impl<K> Clone for KubeObjectApi<K> {
    fn clone(&self) -> Self {
        Self::new(self.client.clone())
    }
}

fn kind_of<K: Resource<DynamicType = ()>>() -> String {
    K::kind(&()).to_string()
}

fn object_name<K: Resource>(obj: &K) -> Result<&str> {
    obj.meta()
        .name
        .as_deref()
        .ok_or(Error::MissingObjectKey(".metadata.name"))
}

fn object_namespace<K: Resource>(obj: &K) -> Result<&str> {
    obj.meta()
        .namespace
        .as_deref()
        .ok_or(Error::MissingObjectKey(".metadata.namespace"))
}

/// Map 409 responses onto the operator's conflict taxonomy
fn map_write_error<K: Resource<DynamicType = ()>>(err: kube::Error, name: &str) -> Error {
    match err {
        kube::Error::Api(resp) if resp.code == 409 && resp.reason == "AlreadyExists" => {
            Error::AlreadyExists {
                kind: kind_of::<K>(),
                name: name.to_string(),
            }
        }
        kube::Error::Api(resp) if resp.code == 409 => Error::Conflict {
            kind: kind_of::<K>(),
            name: name.to_string(),
        },
        other => Error::KubeError(other),
    }
}

#[async_trait]
impl<K> ObjectApi<K> for KubeObjectApi<K>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + Clone
        + Debug
        + DeserializeOwned
        + Serialize
        + Send
        + Sync
        + 'static,
{
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>> {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn create(&self, obj: &K) -> Result<K> {
        let name = object_name(obj)?;
        let api: Api<K> = Api::namespaced(self.client.clone(), object_namespace(obj)?);
        api.create(&PostParams::default(), obj)
            .await
            .map_err(|e| map_write_error::<K>(e, name))
    }

    async fn replace(&self, obj: &K) -> Result<K> {
        let name = object_name(obj)?;
        let api: Api<K> = Api::namespaced(self.client.clone(), object_namespace(obj)?);
        api.replace(name, &PostParams::default(), obj)
            .await
            .map_err(|e| map_write_error::<K>(e, name))
    }

    async fn replace_status(&self, obj: &K) -> Result<K> {
        let name = object_name(obj)?;
        let api: Api<K> = Api::namespaced(self.client.clone(), object_namespace(obj)?);
        let data = serde_json::to_vec(obj)?;
        api.replace_status(name, &PostParams::default(), data)
            .await
            .map_err(|e| map_write_error::<K>(e, name))
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<bool> {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        let params = DeleteParams {
            propagation_policy: Some(PropagationPolicy::Background),
            ..Default::default()
        };
        match api.delete(name, &params).await {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(false),
            Err(e) => Err(Error::KubeError(e)),
        }
    }
}

/// Identity of an object for log and error messages
pub fn object_key<K: Resource>(obj: &K) -> String {
    format!(
        "{}/{}",
        obj.meta().namespace.as_deref().unwrap_or_default(),
        obj.meta().name.as_deref().unwrap_or_default()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::Service;

    fn api_error(code: u16, reason: &str) -> kube::Error {
        kube::Error::Api(kube::error::ErrorResponse {
            status: "Failure".to_string(),
            message: "conflict".to_string(),
            reason: reason.to_string(),
            code,
        })
    }

    #[test]
    fn already_exists_is_distinguished_from_stale_version() {
        assert!(matches!(
            map_write_error::<Service>(api_error(409, "AlreadyExists"), "db"),
            Error::AlreadyExists { .. }
        ));
        assert!(matches!(
            map_write_error::<Service>(api_error(409, "Conflict"), "db"),
            Error::Conflict { .. }
        ));
        assert!(matches!(
            map_write_error::<Service>(api_error(500, "InternalError"), "db"),
            Error::KubeError(_)
        ));
    }
}
