//! DormantDatabase Custom Resource Definition
//!
//! A DormantDatabase archives a paused database: its spec, labels and
//! annotations. It shares the (namespace, name) identity of the database it
//! archives. Setting `resume` hands the actual restore over to the lifecycle
//! process that watches dormant records.

use chrono::{DateTime, Utc};
use kube::{CustomResource, ResourceExt};
use kube::api::ObjectMeta;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::memcached::{Memcached, MemcachedSpec, LABEL_DATABASE_KIND, RESOURCE_KIND_MEMCACHED};

/// DormantDatabase resource specification
#[derive(CustomResource, Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "kubedb.com",
    version = "v1alpha1",
    kind = "DormantDatabase",
    plural = "dormantdatabases",
    singular = "dormantdatabase",
    shortname = "drmn",
    namespaced,
    derive = "PartialEq",
    status = "DormantDatabaseStatus",
    printcolumn = r#"{"name": "Status", "type": "string", "jsonPath": ".status.phase"}"#,
    printcolumn = r#"{"name": "Resume", "type": "boolean", "jsonPath": ".spec.resume"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct DormantDatabaseSpec {
    /// The archived database
    pub origin: Origin,

    /// Request to resume the archived database
    #[serde(default)]
    pub resume: bool,

    /// Request to wipe out everything the archived database left behind
    #[serde(default)]
    pub wipe_out: bool,
}

/// Archived database: metadata and spec
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Origin {
    pub metadata: OriginMeta,
    pub spec: OriginSpec,
}

/// Archived metadata of the origin database
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OriginMeta {
    pub name: String,
    pub namespace: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

/// Archived spec, one slot per database kind
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OriginSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memcached: Option<MemcachedSpec>,
}

/// Phase of a dormant record
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum DormantDatabasePhase {
    Pausing,
    Paused,
    Resuming,
    WipingOut,
    WipedOut,
    Failed,
}

/// DormantDatabase status
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DormantDatabaseStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<DormantDatabasePhase>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub pausing_time: Option<DateTime<Utc>>,
}

impl DormantDatabase {
    /// Build the dormant record archiving `db`
    pub fn archive(db: &Memcached) -> DormantDatabase {
        let name = db.name_any();
        let namespace = db.namespace().unwrap_or_default();

        DormantDatabase {
            metadata: ObjectMeta {
                name: Some(name.clone()),
                namespace: Some(namespace.clone()),
                labels: Some(BTreeMap::from([(
                    LABEL_DATABASE_KIND.to_string(),
                    RESOURCE_KIND_MEMCACHED.to_string(),
                )])),
                ..Default::default()
            },
            spec: DormantDatabaseSpec {
                origin: Origin {
                    metadata: OriginMeta {
                        name,
                        namespace,
                        labels: db.labels().clone(),
                        annotations: db.annotations().clone(),
                    },
                    spec: OriginSpec {
                        memcached: Some(db.spec.archived()),
                    },
                },
                resume: false,
                wipe_out: false,
            },
            status: None,
        }
    }

    /// Kind recorded on the dormant record
    pub fn database_kind(&self) -> Option<&str> {
        self.labels().get(LABEL_DATABASE_KIND).map(String::as_str)
    }

    /// The archived Memcached spec, if this record archives a Memcached
    pub fn archived_memcached(&self) -> Option<&MemcachedSpec> {
        if self.database_kind() != Some(RESOURCE_KIND_MEMCACHED) {
            return None;
        }
        self.spec.origin.spec.memcached.as_ref()
    }
}
