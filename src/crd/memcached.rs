//! Memcached Custom Resource Definition

use chrono::{DateTime, Utc};
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Label carrying the database kind discriminator
pub const LABEL_DATABASE_KIND: &str = "kubedb.com/kind";

/// Label carrying the owning database name
pub const LABEL_DATABASE_NAME: &str = "kubedb.com/name";

/// Kind value used in [`LABEL_DATABASE_KIND`]
pub const RESOURCE_KIND_MEMCACHED: &str = "Memcached";

/// Plural resource name, used in RBAC rules
pub const RESOURCE_PLURAL_MEMCACHED: &str = "memcacheds";

/// API group shared by Memcached and DormantDatabase
pub const API_GROUP: &str = "kubedb.com";

/// API version of both CRDs
pub const API_VERSION: &str = "kubedb.com/v1alpha1";

/// Well-known memcached port, exposed as the "db" port
pub const MEMCACHED_PORT: i32 = 11211;

/// Name of the database port on Service and container
pub const DATABASE_PORT_NAME: &str = "db";

/// Name of the exporter port on Service and sidecar
pub const PROMETHEUS_EXPORTER_PORT_NAME: &str = "prom-http";

/// Default exporter port when the monitor block does not set one
pub const PROMETHEUS_EXPORTER_PORT: i32 = 56790;

/// Memcached resource specification
#[derive(CustomResource, Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "kubedb.com",
    version = "v1alpha1",
    kind = "Memcached",
    plural = "memcacheds",
    singular = "memcached",
    shortname = "mc",
    namespaced,
    derive = "PartialEq",
    status = "MemcachedStatus",
    printcolumn = r#"{"name": "Version", "type": "string", "jsonPath": ".spec.version"}"#,
    printcolumn = r#"{"name": "Status", "type": "string", "jsonPath": ".status.phase"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct MemcachedSpec {
    /// Memcached version tag, used as the image tag
    pub version: String,

    /// Number of memcached pods
    #[serde(default = "default_replicas")]
    pub replicas: i32,

    /// Compute resources of the memcached container
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirementsSpec>,

    /// Node selector for the database pods
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,

    /// Affinity rules (JSON/YAML format matching k8s affinity)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub affinity: Option<serde_json::Value>,

    /// Tolerations for the database pods
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tolerations: Vec<TolerationSpec>,

    /// Scheduler that places the database pods
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduler_name: Option<String>,

    /// Monitoring configuration; absent means no exporter
    #[serde(skip_serializing_if = "Option::is_none")]
    pub monitor: Option<MonitorSpec>,

    /// Overrides applied to the database Service
    #[serde(default)]
    pub service_template: ServiceTemplateSpec,

    /// What happens to persistent resources when the database is deleted
    #[serde(default)]
    pub termination_policy: TerminationPolicy,

    /// Request to pause the database
    #[serde(default)]
    pub halted: bool,

    /// Lock that refuses pausing the database
    #[serde(default)]
    pub do_not_pause: bool,
}

fn default_replicas() -> i32 {
    1
}

impl MemcachedSpec {
    /// The spec as recorded in a DormantDatabase.
    ///
    /// `halted` is the pause request itself and never part of the archived
    /// configuration. Two specs describe the same database iff their
    /// archived forms are equal.
    pub fn archived(&self) -> MemcachedSpec {
        MemcachedSpec {
            halted: false,
            ..self.clone()
        }
    }

    /// Structural comparison used by the resume check.
    ///
    /// Every field except `halted` takes part; a declaration that only
    /// differs in `halted` matches its archive.
    pub fn matches_archived(&self, archived: &MemcachedSpec) -> bool {
        self.archived() == archived.archived()
    }

    /// Exporter port when the monitor block asks for a prometheus exporter
    pub fn exporter_port(&self) -> Option<i32> {
        let monitor = self.monitor.as_ref()?;
        Some(
            monitor
                .prometheus
                .as_ref()
                .map(|p| p.port)
                .unwrap_or(PROMETHEUS_EXPORTER_PORT),
        )
    }
}

/// Termination policy for a Memcached database
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum TerminationPolicy {
    /// Deletion is allowed but nothing is reclaimed
    DoNotTerminate,
    /// Keep everything; the database may be paused
    #[default]
    Halt,
    /// Delete the database, keep data-bearing resources
    Delete,
    /// Delete the database and every data-bearing resource
    WipeOut,
}

impl fmt::Display for TerminationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationPolicy::DoNotTerminate => write!(f, "DoNotTerminate"),
            TerminationPolicy::Halt => write!(f, "Halt"),
            TerminationPolicy::Delete => write!(f, "Delete"),
            TerminationPolicy::WipeOut => write!(f, "WipeOut"),
        }
    }
}

/// Monitoring configuration
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MonitorSpec {
    /// Monitoring agent that scrapes the exporter
    pub agent: AgentKind,

    /// Prometheus exporter settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prometheus: Option<PrometheusSpec>,
}

/// Supported monitoring agents
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum AgentKind {
    /// Prometheus operator; a ServiceMonitor is created for the stats service
    #[serde(rename = "prometheus.io/operator")]
    PrometheusOperator,
    /// Plain Prometheus; the stats service carries scrape annotations
    #[serde(rename = "prometheus.io/builtin")]
    PrometheusBuiltin,
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentKind::PrometheusOperator => write!(f, "prometheus.io/operator"),
            AgentKind::PrometheusBuiltin => write!(f, "prometheus.io/builtin"),
        }
    }
}

/// Prometheus exporter settings
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PrometheusSpec {
    /// Exporter port
    #[serde(default = "default_exporter_port")]
    pub port: i32,

    /// Namespace of the ServiceMonitor (prometheus operator only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Labels of the ServiceMonitor, matched by the Prometheus selector
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    /// Scrape interval, e.g. "10s"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
}

fn default_exporter_port() -> i32 {
    PROMETHEUS_EXPORTER_PORT
}

/// Overrides applied to the database Service
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServiceTemplateSpec {
    /// Service annotations (for cloud load balancer configuration)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,

    /// Service type (ClusterIP, LoadBalancer, NodePort)
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,

    /// Requested cluster IP
    #[serde(rename = "clusterIP", skip_serializing_if = "Option::is_none")]
    pub cluster_ip: Option<String>,

    /// External IPs
    #[serde(rename = "externalIPs", default, skip_serializing_if = "Vec::is_empty")]
    pub external_ips: Vec<String>,

    /// LoadBalancer IP (if applicable)
    #[serde(rename = "loadBalancerIP", skip_serializing_if = "Option::is_none")]
    pub load_balancer_ip: Option<String>,

    /// Allowed client ranges for a LoadBalancer
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub load_balancer_source_ranges: Vec<String>,

    /// External traffic policy (Cluster, Local)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_traffic_policy: Option<String>,

    /// Health check node port for Local traffic policy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health_check_node_port: Option<i32>,
}

/// Toleration specification
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TolerationSpec {
    /// Toleration key
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,

    /// Toleration operator (Exists, Equal)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operator: Option<String>,

    /// Toleration value
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,

    /// Toleration effect (NoSchedule, PreferNoSchedule, NoExecute)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effect: Option<String>,

    /// Toleration seconds (for NoExecute)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub toleration_seconds: Option<i64>,
}

/// Resource requirements specification
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRequirementsSpec {
    /// Resource limits (cpu, memory)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub limits: BTreeMap<String, String>,

    /// Resource requests (cpu, memory)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub requests: BTreeMap<String, String>,
}

/// Coarse lifecycle state of a database
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum DatabasePhase {
    /// Never reconciled
    #[default]
    #[serde(rename = "")]
    Empty,
    Creating,
    Running,
    Paused,
    Terminating,
}

impl DatabasePhase {
    /// Whether moving from `self` to `next` keeps the phase monotonic.
    ///
    /// The only backwards edge is Paused -> Running.
    pub fn can_transition_to(self, next: DatabasePhase) -> bool {
        use DatabasePhase::*;
        if self == next {
            return true;
        }
        matches!(
            (self, next),
            (Empty, Creating)
                | (Creating, Running)
                | (Running, Paused)
                | (Paused, Running)
                | (_, Terminating)
        ) && self != Terminating
    }
}

impl fmt::Display for DatabasePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatabasePhase::Empty => write!(f, ""),
            DatabasePhase::Creating => write!(f, "Creating"),
            DatabasePhase::Running => write!(f, "Running"),
            DatabasePhase::Paused => write!(f, "Paused"),
            DatabasePhase::Terminating => write!(f, "Terminating"),
        }
    }
}

/// Memcached status
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MemcachedStatus {
    /// Current phase
    #[serde(default)]
    pub phase: DatabasePhase,

    /// When the database first entered the Creating phase
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creation_time: Option<DateTime<Utc>>,

    /// Last spec generation successfully reconciled
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Human-readable reason for the current phase
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Monitor block last applied to the monitoring agent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_monitor: Option<MonitorSpec>,
}

impl Memcached {
    /// Name of every owned sub-resource
    pub fn offshoot_name(&self) -> String {
        self.name_any()
    }

    /// Name of the metrics Service scraped by the monitoring agent
    pub fn stats_service_name(&self) -> String {
        format!("{}-stats", self.offshoot_name())
    }

    /// Labels identifying sub-resources of this database
    pub fn offshoot_selectors(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (
                LABEL_DATABASE_KIND.to_string(),
                RESOURCE_KIND_MEMCACHED.to_string(),
            ),
            (LABEL_DATABASE_NAME.to_string(), self.offshoot_name()),
        ])
    }

    /// The database's own labels with the selectors layered on top
    pub fn offshoot_labels(&self) -> BTreeMap<String, String> {
        let mut labels = self.labels().clone();
        labels.extend(self.offshoot_selectors());
        labels
    }

    /// Current phase, `Empty` when no status was ever written
    pub fn phase(&self) -> DatabasePhase {
        self.status
            .as_ref()
            .map(|s| s.phase)
            .unwrap_or_default()
    }

    /// Monitor block last applied, if any
    pub fn observed_monitor(&self) -> Option<&MonitorSpec> {
        self.status.as_ref().and_then(|s| s.observed_monitor.as_ref())
    }

    /// Whether the current generation has already been reconciled
    pub fn generation_observed(&self) -> bool {
        let observed = self.status.as_ref().and_then(|s| s.observed_generation);
        match (self.metadata.generation, observed) {
            (Some(generation), Some(observed)) => observed >= generation,
            (None, _) => true,
            _ => false,
        }
    }
}
