//! Monitoring agents that scrape the exporter sidecar
//!
//! The prometheus operator agent is driven through a `ServiceMonitor`; the
//! builtin agent relies on scrape annotations on the stats Service and needs
//! no extra object.

use async_trait::async_trait;
use kube::api::{Api, DeleteParams, Patch, PatchParams};
use kube::core::{ApiResource, DynamicObject, GroupVersionKind};
use kube::{Client, ResourceExt};
#[cfg(test)]
use mockall::automock;
use serde_json::json;
use std::collections::BTreeMap;
use tracing::debug;

use crate::crd::{AgentKind, Memcached, MonitorSpec, PROMETHEUS_EXPORTER_PORT_NAME};
use crate::{Error, Result};

/// Field manager used for server-side apply
pub const FIELD_MANAGER: &str = "memcached-operator";

/// Label on the stats Service naming the agent that scrapes it
pub const LABEL_MONITORING_AGENT: &str = "monitoring.appscode.com/agent";

/// Idempotent ensure/remove of the agent-side scrape configuration
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MonitorAgent: Send + Sync {
    /// Make the agent scrape `db` as described by `monitor`
    async fn ensure(&self, db: &Memcached, monitor: &MonitorSpec) -> Result<()>;

    /// Stop the agent scraping `db`; succeeds when nothing is configured
    async fn remove(&self, db: &Memcached, monitor: &MonitorSpec) -> Result<()>;
}

/// [`MonitorAgent`] for both prometheus flavours
pub struct PrometheusAgent {
    client: Client,
    resource: ApiResource,
}

impl PrometheusAgent {
    pub fn new(client: Client) -> Self {
        let gvk = GroupVersionKind::gvk("monitoring.coreos.com", "v1", "ServiceMonitor");
        Self {
            client,
            resource: ApiResource::from_gvk(&gvk),
        }
    }

    fn api(&self, db: &Memcached, monitor: &MonitorSpec) -> Api<DynamicObject> {
        let namespace = service_monitor_namespace(db, monitor);
        Api::namespaced_with(self.client.clone(), &namespace, &self.resource)
    }
}

fn service_monitor_namespace(db: &Memcached, monitor: &MonitorSpec) -> String {
    monitor
        .prometheus
        .as_ref()
        .and_then(|p| p.namespace.clone())
        .unwrap_or_else(|| db.namespace().unwrap_or_default())
}

/// Name of the ServiceMonitor; prefixed since it may live in another namespace
pub fn service_monitor_name(db: &Memcached) -> String {
    format!(
        "kubedb-{}-{}",
        db.namespace().unwrap_or_default(),
        db.name_any()
    )
}

/// Body of the ServiceMonitor selecting the stats Service of `db`
pub fn build_service_monitor(
    db: &Memcached,
    monitor: &MonitorSpec,
    resource: &ApiResource,
) -> DynamicObject {
    let mut selector = db.offshoot_selectors();
    selector.insert(LABEL_MONITORING_AGENT.to_string(), monitor.agent.to_string());

    let mut endpoint = json!({ "port": PROMETHEUS_EXPORTER_PORT_NAME });
    if let Some(interval) = monitor.prometheus.as_ref().and_then(|p| p.interval.clone()) {
        endpoint["interval"] = json!(interval);
    }

    let labels: BTreeMap<String, String> = monitor
        .prometheus
        .as_ref()
        .map(|p| p.labels.clone())
        .unwrap_or_default();

    let mut obj = DynamicObject::new(&service_monitor_name(db), resource)
        .within(&service_monitor_namespace(db, monitor))
        .data(json!({
            "spec": {
                "selector": { "matchLabels": selector },
                "namespaceSelector": { "matchNames": [db.namespace().unwrap_or_default()] },
                "endpoints": [endpoint],
            }
        }));
    obj.metadata.labels = Some(labels);
    obj
}

#[async_trait]
impl MonitorAgent for PrometheusAgent {
    async fn ensure(&self, db: &Memcached, monitor: &MonitorSpec) -> Result<()> {
        if monitor.agent != AgentKind::PrometheusOperator {
            return Ok(());
        }
        let body = build_service_monitor(db, monitor, &self.resource);
        self.api(db, monitor)
            .patch(
                &service_monitor_name(db),
                &PatchParams::apply(FIELD_MANAGER).force(),
                &Patch::Apply(&body),
            )
            .await
            .map_err(|e| Error::MonitoringError(format!("failed to apply ServiceMonitor: {}", e)))?;
        debug!(name = %service_monitor_name(db), "Applied ServiceMonitor");
        Ok(())
    }

    async fn remove(&self, db: &Memcached, monitor: &MonitorSpec) -> Result<()> {
        if monitor.agent != AgentKind::PrometheusOperator {
            return Ok(());
        }
        match self
            .api(db, monitor)
            .delete(&service_monitor_name(db), &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(()),
            Err(e) => Err(Error::MonitoringError(format!(
                "failed to delete ServiceMonitor: {}",
                e
            ))),
        }
    }
}
