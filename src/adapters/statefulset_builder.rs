//! Kubernetes StatefulSet builder for memcached pods

use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{
    Affinity, Container, ContainerPort, PodSpec, ResourceRequirements, Toleration,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use kube::ResourceExt;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::adapters::ownership::{ensure_offshoot_labels, ensure_owner_reference, owner_reference};
use crate::config::OperatorConfig;
use crate::crd::{
    Memcached, ResourceRequirementsSpec, DATABASE_PORT_NAME, MEMCACHED_PORT,
    PROMETHEUS_EXPORTER_PORT_NAME,
};
use crate::{Error, Result};

/// Name of the memcached container
pub const MEMCACHED_CONTAINER: &str = "memcached";

/// Name of the exporter sidecar container
pub const EXPORTER_CONTAINER: &str = "exporter";

/// Pod template annotation carrying the rendered pod spec checksum
pub const POD_SPEC_HASH_ANNOTATION: &str = "kubedb.com/pod-spec-hash";

/// Apply the desired StatefulSet onto `current`.
///
/// Only the fields the operator owns are written; anything the API server
/// or other controllers filled in is left untouched.
pub fn build_statefulset(
    mut current: StatefulSet,
    db: &Memcached,
    config: &OperatorConfig,
) -> Result<StatefulSet> {
    current.metadata.name = Some(db.offshoot_name());
    current.metadata.namespace = db.namespace();
    ensure_owner_reference(&mut current.metadata, owner_reference(db));
    ensure_offshoot_labels(&mut current.metadata, db);

    let containers = desired_containers(db, config);
    let affinity = parse_affinity(db)?;
    let tolerations = build_tolerations(db);
    let hash = pod_spec_hash(&containers, &affinity, &tolerations, db)?;

    let spec = current.spec.get_or_insert_with(StatefulSetSpec::default);
    spec.replicas = Some(db.spec.replicas);
    spec.service_name = config.governing_service.clone();
    // The selector is immutable once created
    if spec.selector.match_labels.is_none() {
        spec.selector = LabelSelector {
            match_labels: Some(db.offshoot_selectors()),
            ..Default::default()
        };
    }

    let template = &mut spec.template;
    let meta = template.metadata.get_or_insert_with(ObjectMeta::default);
    meta.labels
        .get_or_insert_with(Default::default)
        .extend(db.offshoot_labels());
    meta.annotations
        .get_or_insert_with(Default::default)
        .insert(POD_SPEC_HASH_ANNOTATION.to_string(), hash);

    let pod = template.spec.get_or_insert_with(PodSpec::default);
    merge_containers(&mut pod.containers, containers);
    pod.node_selector = if db.spec.node_selector.is_empty() {
        None
    } else {
        Some(db.spec.node_selector.clone())
    };
    pod.affinity = affinity;
    pod.tolerations = tolerations;
    // Defaulted by the API server when unset
    if let Some(ref scheduler_name) = db.spec.scheduler_name {
        pod.scheduler_name = Some(scheduler_name.clone());
    }
    if config.enable_rbac {
        pod.service_account_name = Some(db.offshoot_name());
    }

    Ok(current)
}

fn desired_containers(db: &Memcached, config: &OperatorConfig) -> Vec<Container> {
    let mut containers = vec![Container {
        name: MEMCACHED_CONTAINER.to_string(),
        image: Some(config.memcached_image(&db.spec.version)),
        ports: Some(vec![ContainerPort {
            name: Some(DATABASE_PORT_NAME.to_string()),
            container_port: MEMCACHED_PORT,
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
        // Stored as `{}` when empty, so never leave it unset
        resources: Some(
            db.spec
                .resources
                .as_ref()
                .map(build_resources)
                .unwrap_or_default(),
        ),
        ..Default::default()
    }];

    if let Some(port) = db.spec.exporter_port() {
        containers.push(Container {
            name: EXPORTER_CONTAINER.to_string(),
            image: Some(config.exporter_image()),
            args: Some(vec![
                "export".to_string(),
                format!("--address=:{}", port),
                "--v=3".to_string(),
            ]),
            ports: Some(vec![ContainerPort {
                name: Some(PROMETHEUS_EXPORTER_PORT_NAME.to_string()),
                container_port: port,
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        });
    }

    containers
}

/// Upsert the operator's containers by name.
///
/// Foreign containers are kept. The exporter is dropped when monitoring
/// was switched off.
fn merge_containers(current: &mut Vec<Container>, desired: Vec<Container>) {
    let wants_exporter = desired.iter().any(|c| c.name == EXPORTER_CONTAINER);
    if !wants_exporter {
        current.retain(|c| c.name != EXPORTER_CONTAINER);
    }

    for want in desired {
        match current.iter_mut().find(|c| c.name == want.name) {
            Some(have) => {
                have.image = want.image;
                have.args = want.args;
                have.ports = want.ports;
                have.resources = want.resources;
            }
            None => current.push(want),
        }
    }
}

fn build_resources(resources: &ResourceRequirementsSpec) -> ResourceRequirements {
    ResourceRequirements {
        limits: quantities(&resources.limits),
        requests: quantities(&resources.requests),
        ..Default::default()
    }
}

fn quantities(values: &BTreeMap<String, String>) -> Option<BTreeMap<String, Quantity>> {
    if values.is_empty() {
        return None;
    }
    Some(
        values
            .iter()
            .map(|(k, v)| (k.clone(), Quantity(v.clone())))
            .collect(),
    )
}

fn parse_affinity(db: &Memcached) -> Result<Option<Affinity>> {
    db.spec
        .affinity
        .clone()
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| Error::ValidationError(format!("spec.affinity is not a valid affinity: {}", e)))
}

fn build_tolerations(db: &Memcached) -> Option<Vec<Toleration>> {
    if db.spec.tolerations.is_empty() {
        return None;
    }
    Some(
        db.spec
            .tolerations
            .iter()
            .map(|t| Toleration {
                key: t.key.clone(),
                operator: t.operator.clone(),
                value: t.value.clone(),
                effect: t.effect.clone(),
                toleration_seconds: t.toleration_seconds,
            })
            .collect(),
    )
}

fn pod_spec_hash(
    containers: &[Container],
    affinity: &Option<Affinity>,
    tolerations: &Option<Vec<Toleration>>,
    db: &Memcached,
) -> Result<String> {
    let rendered = serde_json::to_vec(&serde_json::json!({
        "containers": containers,
        "affinity": affinity,
        "tolerations": tolerations,
        "nodeSelector": db.spec.node_selector,
        "schedulerName": db.spec.scheduler_name,
    }))?;
    let mut hasher = Sha256::new();
    hasher.update(&rendered);
    Ok(format!("{:x}", hasher.finalize())[..16].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::ownership::is_owned_by;
    use crate::crd::fixtures::{memcached, prometheus_monitor};
    use crate::crd::{AgentKind, TolerationSpec};

    fn pod(sts: &StatefulSet) -> &PodSpec {
        sts.spec.as_ref().unwrap().template.spec.as_ref().unwrap()
    }

    fn container_names(sts: &StatefulSet) -> Vec<&str> {
        pod(sts).containers.iter().map(|c| c.name.as_str()).collect()
    }

    #[test]
    fn statefulset_runs_memcached_under_governing_service() {
        let db = memcached("db1");
        let config = OperatorConfig::default();
        let sts = build_statefulset(StatefulSet::default(), &db, &config).unwrap();

        let spec = sts.spec.as_ref().unwrap();
        assert_eq!(spec.replicas, Some(1));
        assert_eq!(spec.service_name, "kubedb");
        assert_eq!(spec.selector.match_labels, Some(db.offshoot_selectors()));
        assert!(is_owned_by(&sts.metadata, &db));

        let container = &pod(&sts).containers[0];
        assert_eq!(container.name, MEMCACHED_CONTAINER);
        assert_eq!(container.image.as_deref(), Some("kubedb/memcached:1.5.4"));
        assert_eq!(
            container.ports.as_ref().unwrap()[0].container_port,
            MEMCACHED_PORT
        );
        assert_eq!(pod(&sts).service_account_name.as_deref(), Some("db1"));
    }

    #[test]
    fn rbac_disabled_keeps_default_service_account() {
        let db = memcached("db1");
        let config = OperatorConfig {
            enable_rbac: false,
            ..Default::default()
        };
        let sts = build_statefulset(StatefulSet::default(), &db, &config).unwrap();
        assert_eq!(pod(&sts).service_account_name, None);
    }

    #[test]
    fn monitor_adds_and_removes_exporter_sidecar() {
        let mut db = memcached("db1");
        let config = OperatorConfig::default();
        db.spec.monitor = Some(prometheus_monitor(AgentKind::PrometheusOperator));

        let sts = build_statefulset(StatefulSet::default(), &db, &config).unwrap();
        assert_eq!(container_names(&sts), vec![MEMCACHED_CONTAINER, EXPORTER_CONTAINER]);
        let exporter = &pod(&sts).containers[1];
        assert_eq!(exporter.image.as_deref(), Some("kubedb/operator:0.9.0"));
        assert_eq!(
            exporter.args.as_ref().unwrap()[1],
            "--address=:56790".to_string()
        );

        db.spec.monitor = None;
        let sts = build_statefulset(sts, &db, &config).unwrap();
        assert_eq!(container_names(&sts), vec![MEMCACHED_CONTAINER]);
    }

    #[test]
    fn rebuilding_is_a_fixed_point() {
        let mut db = memcached("db1");
        db.spec.tolerations = vec![TolerationSpec {
            key: Some("dedicated".to_string()),
            operator: Some("Equal".to_string()),
            value: Some("cache".to_string()),
            effect: Some("NoSchedule".to_string()),
            toleration_seconds: None,
        }];
        db.spec.affinity = Some(serde_json::json!({
            "nodeAffinity": {
                "requiredDuringSchedulingIgnoredDuringExecution": {
                    "nodeSelectorTerms": [{"matchExpressions": [
                        {"key": "zone", "operator": "In", "values": ["a"]}
                    ]}]
                }
            }
        }));
        let config = OperatorConfig::default();

        let once = build_statefulset(StatefulSet::default(), &db, &config).unwrap();
        let twice = build_statefulset(once.clone(), &db, &config).unwrap();
        assert_eq!(once, twice);
        assert!(pod(&once).affinity.is_some());
    }

    #[test]
    fn rebuilding_keeps_server_defaults() {
        let db = memcached("db1");
        let config = OperatorConfig::default();

        let mut stored = build_statefulset(StatefulSet::default(), &db, &config).unwrap();
        let template = stored.spec.as_mut().unwrap().template.spec.as_mut().unwrap();
        template.scheduler_name = Some("default-scheduler".to_string());
        template.containers[0].resources = Some(ResourceRequirements::default());

        let rebuilt = build_statefulset(stored.clone(), &db, &config).unwrap();
        assert_eq!(stored, rebuilt);
    }

    #[test]
    fn declared_scheduler_replaces_default() {
        let mut db = memcached("db1");
        let config = OperatorConfig::default();
        let mut stored = build_statefulset(StatefulSet::default(), &db, &config).unwrap();
        stored.spec.as_mut().unwrap().template.spec.as_mut().unwrap().scheduler_name =
            Some("default-scheduler".to_string());

        db.spec.scheduler_name = Some("stork".to_string());
        let rebuilt = build_statefulset(stored, &db, &config).unwrap();
        assert_eq!(pod(&rebuilt).scheduler_name.as_deref(), Some("stork"));
    }

    #[test]
    fn hash_changes_with_version() {
        let mut db = memcached("db1");
        let config = OperatorConfig::default();
        let hash = |sts: &StatefulSet| {
            sts.spec.as_ref().unwrap().template.metadata.as_ref().unwrap()
                .annotations.as_ref().unwrap()[POD_SPEC_HASH_ANNOTATION]
                .clone()
        };

        let before = build_statefulset(StatefulSet::default(), &db, &config).unwrap();
        db.spec.version = "1.6.0".to_string();
        let after = build_statefulset(before.clone(), &db, &config).unwrap();
        assert_ne!(hash(&before), hash(&after));
    }

    #[test]
    fn invalid_affinity_is_a_validation_error() {
        let mut db = memcached("db1");
        db.spec.affinity = Some(serde_json::json!({"nodeAffinity": 3}));
        let err = build_statefulset(StatefulSet::default(), &db, &OperatorConfig::default())
            .unwrap_err();
        assert!(matches!(err, Error::ValidationError(_)));
    }
}
