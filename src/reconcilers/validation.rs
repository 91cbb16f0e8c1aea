//! Spec validation

#[cfg(test)]
use mockall::automock;

use crate::crd::MemcachedSpec;
use crate::{Error, Result};

/// Pure check of a database spec; `Err(ValidationError)` names the rejection
#[cfg_attr(test, automock)]
pub trait SpecValidator: Send + Sync {
    fn validate(&self, spec: &MemcachedSpec) -> Result<()>;
}

/// Built-in rules every Memcached spec must satisfy
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultValidator;

impl SpecValidator for DefaultValidator {
    fn validate(&self, spec: &MemcachedSpec) -> Result<()> {
        if spec.version.trim().is_empty() {
            return Err(Error::ValidationError(
                "spec.version cannot be empty".to_string(),
            ));
        }

        if spec.replicas < 1 {
            return Err(Error::ValidationError(
                "spec.replicas must be >= 1".to_string(),
            ));
        }

        if let Some(prometheus) = spec.monitor.as_ref().and_then(|m| m.prometheus.as_ref()) {
            if !(1..=65535).contains(&prometheus.port) {
                return Err(Error::ValidationError(format!(
                    "spec.monitor.prometheus.port {} is out of range",
                    prometheus.port
                )));
            }
        }

        if let Some(port) = spec.service_template.health_check_node_port {
            if port < 0 {
                return Err(Error::ValidationError(
                    "spec.serviceTemplate.healthCheckNodePort must be >= 0".to_string(),
                ));
            }
        }

        Ok(())
    }
}
