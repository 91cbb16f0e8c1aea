//! Kubernetes Service builders for database and stats access
//!
//! Builders apply the desired state on top of the current object so that
//! cluster-assigned fields (cluster IP, node ports, foreign annotations)
//! survive every reconciliation.

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;

use crate::adapters::monitor_agent::LABEL_MONITORING_AGENT;
use crate::adapters::ownership::{ensure_offshoot_labels, ensure_owner_reference, owner_reference};
use crate::crd::{
    AgentKind, Memcached, DATABASE_PORT_NAME, MEMCACHED_PORT, PROMETHEUS_EXPORTER_PORT_NAME,
};

/// Apply the desired database Service onto `current`
pub fn build_service(mut current: Service, db: &Memcached) -> Service {
    let template = &db.spec.service_template;

    current.metadata.name = Some(db.offshoot_name());
    current.metadata.namespace = db.namespace();
    ensure_owner_reference(&mut current.metadata, owner_reference(db));
    ensure_offshoot_labels(&mut current.metadata, db);
    if !template.annotations.is_empty() {
        current
            .metadata
            .annotations
            .get_or_insert_with(Default::default)
            .extend(template.annotations.clone());
    }

    let spec = current.spec.get_or_insert_with(ServiceSpec::default);
    spec.selector = Some(db.offshoot_selectors());
    spec.ports = Some(merge_service_ports(
        spec.ports.as_deref().unwrap_or_default(),
        &desired_ports(db),
    ));

    if let Some(ref cluster_ip) = template.cluster_ip {
        spec.cluster_ip = Some(cluster_ip.clone());
    }
    if let Some(ref type_) = template.type_ {
        spec.type_ = Some(type_.clone());
    }
    spec.external_ips = non_empty(&template.external_ips);
    spec.load_balancer_ip = template.load_balancer_ip.clone();
    spec.load_balancer_source_ranges = non_empty(&template.load_balancer_source_ranges);
    // Defaulted to Cluster by the API server for NodePort and LoadBalancer
    if let Some(ref policy) = template.external_traffic_policy {
        spec.external_traffic_policy = Some(policy.clone());
    }
    if let Some(port) = template.health_check_node_port.filter(|p| *p > 0) {
        spec.health_check_node_port = Some(port);
    }

    current
}

/// Ports the database Service must expose
pub fn desired_ports(db: &Memcached) -> Vec<ServicePort> {
    let mut ports = vec![ServicePort {
        name: Some(DATABASE_PORT_NAME.to_string()),
        port: MEMCACHED_PORT,
        target_port: Some(IntOrString::String(DATABASE_PORT_NAME.to_string())),
        protocol: Some("TCP".to_string()),
        ..Default::default()
    }];
    if let Some(port) = db.spec.exporter_port() {
        ports.push(exporter_port(port));
    }
    ports
}

fn exporter_port(port: i32) -> ServicePort {
    ServicePort {
        name: Some(PROMETHEUS_EXPORTER_PORT_NAME.to_string()),
        port,
        target_port: Some(IntOrString::String(
            PROMETHEUS_EXPORTER_PORT_NAME.to_string(),
        )),
        protocol: Some("TCP".to_string()),
        ..Default::default()
    }
}

/// Merge desired ports into the current list by name.
///
/// A current port with the same name is updated in place (its node port is
/// kept), new names are appended, and no current port is ever dropped.
pub fn merge_service_ports(current: &[ServicePort], desired: &[ServicePort]) -> Vec<ServicePort> {
    let mut merged = current.to_vec();
    for want in desired {
        match merged.iter_mut().find(|p| p.name == want.name) {
            Some(have) => {
                have.port = want.port;
                have.protocol = want.protocol.clone();
                have.target_port = want.target_port.clone();
            }
            None => merged.push(want.clone()),
        }
    }
    merged
}

/// Apply the desired stats Service onto `current`.
///
/// The stats Service selects the database pods and exposes only the exporter
/// port; callers only build it when a monitor block is configured.
pub fn build_stats_service(mut current: Service, db: &Memcached) -> Service {
    current.metadata.name = Some(db.stats_service_name());
    current.metadata.namespace = db.namespace();
    ensure_owner_reference(&mut current.metadata, owner_reference(db));
    ensure_offshoot_labels(&mut current.metadata, db);

    let port = db.spec.exporter_port().unwrap_or_default();
    if let Some(monitor) = db.spec.monitor.as_ref() {
        let labels = current.metadata.labels.get_or_insert_with(Default::default);
        labels.insert(LABEL_MONITORING_AGENT.to_string(), monitor.agent.to_string());

        if monitor.agent == AgentKind::PrometheusBuiltin {
            let annotations = current
                .metadata
                .annotations
                .get_or_insert_with(Default::default);
            annotations.insert("prometheus.io/scrape".to_string(), "true".to_string());
            annotations.insert("prometheus.io/port".to_string(), port.to_string());
            annotations.insert("prometheus.io/path".to_string(), "/metrics".to_string());
        }
    }

    let spec = current.spec.get_or_insert_with(ServiceSpec::default);
    spec.selector = Some(db.offshoot_selectors());
    spec.ports = Some(merge_service_ports(
        spec.ports.as_deref().unwrap_or_default(),
        &[exporter_port(port)],
    ));

    current
}

/// In-cluster endpoint of the database Service
pub fn service_endpoint(service: &Service) -> Option<String> {
    let name = service.metadata.name.as_ref()?;
    let namespace = service.metadata.namespace.as_ref()?;
    let port = service
        .spec
        .as_ref()?
        .ports
        .as_ref()?
        .iter()
        .find(|p| p.name.as_deref() == Some(DATABASE_PORT_NAME))?
        .port;
    Some(format!("{}.{}.svc:{}", name, namespace, port))
}

fn non_empty(values: &[String]) -> Option<Vec<String>> {
    if values.is_empty() {
        None
    } else {
        Some(values.to_vec())
    }
}
