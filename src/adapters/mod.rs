//! Adapters between the reconcilers and the cluster: API access, events,
//! sub-resource builders and external collaborators

pub mod app_binding;
pub mod data_reclaimer;
pub mod events;
pub mod kube_api;
pub mod monitor_agent;
pub mod ownership;
pub mod rbac_builder;
pub mod service_builder;
pub mod statefulset_builder;
