//! CRD YAML Generator
//!
//! This binary generates Kubernetes CRD manifests for all custom resources
//! defined by the memcached-operator.
//!
//! Usage: cargo run --bin crdgen > deploy/crds/all.yaml

use memcached_operator::crd::generate_crds;

fn main() {
    for crd in generate_crds() {
        println!("---");
        print!("{}", crd);
    }
}
