//! Controller implementations for watching and reconciling resources

pub mod memcached_controller;

use std::sync::Arc;

use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{Service, ServiceAccount};
use k8s_openapi::api::rbac::v1::{Role, RoleBinding};
use kube::Client;

use crate::adapters::app_binding::{AppBindingEnsurer, KubeAppBinding};
use crate::adapters::data_reclaimer::{DataReclaimer, PvcReclaimer};
use crate::adapters::events::{EventPublisher, KubeEventPublisher};
use crate::adapters::kube_api::{KubeObjectApi, ObjectApi};
use crate::adapters::monitor_agent::{MonitorAgent, PrometheusAgent};
use crate::config::OperatorConfig;
use crate::crd::{DormantDatabase, Memcached};
use crate::reconcilers::retry::RetryConfig;
use crate::reconcilers::validation::{DefaultValidator, SpecValidator};

/// Controller name reported on events
pub const CONTROLLER_NAME: &str = "memcached-operator";

/// Shared context for controllers
///
/// Every cluster interaction goes through one of these narrow capabilities,
/// so tests can swap any of them for an in-memory fake.
pub struct Context {
    pub memcacheds: Arc<dyn ObjectApi<Memcached>>,
    pub dormant_databases: Arc<dyn ObjectApi<DormantDatabase>>,
    pub services: Arc<dyn ObjectApi<Service>>,
    pub statefulsets: Arc<dyn ObjectApi<StatefulSet>>,
    pub service_accounts: Arc<dyn ObjectApi<ServiceAccount>>,
    pub roles: Arc<dyn ObjectApi<Role>>,
    pub role_bindings: Arc<dyn ObjectApi<RoleBinding>>,

    /// Event sink for user-visible conditions
    pub events: Arc<dyn EventPublisher>,
    pub validator: Arc<dyn SpecValidator>,
    pub monitor_agent: Arc<dyn MonitorAgent>,
    pub app_binding: Arc<dyn AppBindingEnsurer>,
    pub reclaimer: Arc<dyn DataReclaimer>,

    pub config: OperatorConfig,
    /// Backoff for optimistic-concurrency retries
    pub retry: RetryConfig,
}

impl Context {
    /// Create a context backed by the Kubernetes API server
    pub fn new(client: Client, config: OperatorConfig) -> Arc<Self> {
        Arc::new(Self {
            memcacheds: Arc::new(KubeObjectApi::new(client.clone())),
            dormant_databases: Arc::new(KubeObjectApi::new(client.clone())),
            services: Arc::new(KubeObjectApi::new(client.clone())),
            statefulsets: Arc::new(KubeObjectApi::new(client.clone())),
            service_accounts: Arc::new(KubeObjectApi::new(client.clone())),
            roles: Arc::new(KubeObjectApi::new(client.clone())),
            role_bindings: Arc::new(KubeObjectApi::new(client.clone())),
            events: Arc::new(KubeEventPublisher::new(
                client.clone(),
                CONTROLLER_NAME,
                config.pod_name.clone(),
            )),
            validator: Arc::new(DefaultValidator),
            monitor_agent: Arc::new(PrometheusAgent::new(client.clone())),
            app_binding: Arc::new(KubeAppBinding::new(client.clone())),
            reclaimer: Arc::new(PvcReclaimer::new(client)),
            config,
            retry: RetryConfig::default(),
        })
    }
}
