//! Operator configuration
//!
//! Every option is a command line flag that can also be supplied through the
//! environment, so the operator can be configured from a Deployment manifest.

use std::time::Duration;

use clap::{Parser, ValueEnum};

/// Log output format
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Json,
    Text,
}

/// Memcached Operator configuration
#[derive(Parser, Clone, Debug)]
#[command(name = "memcached-operator", version, about = "Kubernetes operator for Memcached databases")]
pub struct OperatorConfig {
    /// Headless governing Service used as the StatefulSet serviceName
    #[arg(long, env = "GOVERNING_SERVICE", default_value = "kubedb")]
    pub governing_service: String,

    /// Registry prefix of the memcached and exporter images
    #[arg(long, env = "DOCKER_REGISTRY", default_value = "kubedb")]
    pub docker_registry: String,

    /// Tag of the exporter sidecar image
    #[arg(long, env = "EXPORTER_TAG", default_value = "0.9.0")]
    pub exporter_tag: String,

    /// Run database pods under an instance-scoped ServiceAccount
    #[arg(long, env = "ENABLE_RBAC", default_value_t = true, action = clap::ArgAction::Set)]
    pub enable_rbac: bool,

    /// Port of the operator metrics and health server
    #[arg(long, env = "METRICS_PORT", default_value_t = 8080)]
    pub metrics_port: u16,

    /// Upper bound on waiting for a halted workload to disappear
    #[arg(long, env = "PAUSE_TIMEOUT_SECS", default_value_t = 1800)]
    pub pause_timeout_secs: u64,

    /// Interval between checks while waiting for a workload to disappear
    #[arg(long, env = "PAUSE_POLL_INTERVAL_SECS", default_value_t = 10)]
    pub pause_poll_interval_secs: u64,

    /// Requeue interval for converged databases
    #[arg(long, env = "RESYNC_SECS", default_value_t = 300)]
    pub resync_secs: u64,

    /// Name of the operator pod, reported on events
    #[arg(long, env = "POD_NAME")]
    pub pod_name: Option<String>,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Json)]
    pub log_format: LogFormat,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            governing_service: "kubedb".to_string(),
            docker_registry: "kubedb".to_string(),
            exporter_tag: "0.9.0".to_string(),
            enable_rbac: true,
            metrics_port: 8080,
            pause_timeout_secs: 1800,
            pause_poll_interval_secs: 10,
            resync_secs: 300,
            pod_name: None,
            log_format: LogFormat::Json,
        }
    }
}

impl OperatorConfig {
    pub fn pause_timeout(&self) -> Duration {
        Duration::from_secs(self.pause_timeout_secs)
    }

    pub fn pause_poll_interval(&self) -> Duration {
        Duration::from_secs(self.pause_poll_interval_secs)
    }

    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_secs)
    }

    /// Image of the memcached container for a version tag
    pub fn memcached_image(&self, version: &str) -> String {
        format!("{}/memcached:{}", self.docker_registry, version)
    }

    /// Image of the exporter sidecar
    pub fn exporter_image(&self) -> String {
        format!("{}/operator:{}", self.docker_registry, self.exporter_tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_parsed_defaults() {
        let parsed = OperatorConfig::parse_from(["memcached-operator"]);
        let default = OperatorConfig::default();
        assert_eq!(parsed.governing_service, default.governing_service);
        assert_eq!(parsed.enable_rbac, default.enable_rbac);
        assert_eq!(parsed.pause_timeout(), Duration::from_secs(30 * 60));
        assert_eq!(parsed.log_format, LogFormat::Json);
    }

    #[test]
    fn flags_override_defaults() {
        let parsed = OperatorConfig::parse_from([
            "memcached-operator",
            "--enable-rbac",
            "false",
            "--docker-registry",
            "example",
            "--log-format",
            "text",
        ]);
        assert!(!parsed.enable_rbac);
        assert_eq!(parsed.memcached_image("1.5.4"), "example/memcached:1.5.4");
        assert_eq!(parsed.exporter_image(), "example/operator:0.9.0");
        assert_eq!(parsed.log_format, LogFormat::Text);
    }
}
