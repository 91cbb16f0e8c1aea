//! Custom Resource Definitions for the Memcached Operator

mod dormant_database;
mod memcached;

pub use dormant_database::*;
pub use memcached::*;

use kube::CustomResourceExt;

/// Generate CRD YAML manifests for all custom resources
pub fn generate_crds() -> Vec<String> {
    vec![
        serde_yaml::to_string(&Memcached::crd()).unwrap(),
        serde_yaml::to_string(&DormantDatabase::crd()).unwrap(),
    ]
}
