//! Deployer configuration
//!
//! Read once at startup and immutable afterwards: what to watch, what to
//! deploy it to, how to roll it out and how to scale the service.

use shipyard_core::domain::scaling::ScalingPolicy;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

/// Which collaborator implementations to wire up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// In-process simulated registry, cluster and metrics
    Memory,
    /// Registry v2, cluster control plane and metrics over HTTP
    Http,
}

impl FromStr for BackendKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(BackendKind::Memory),
            "http" => Ok(BackendKind::Http),
            other => anyhow::bail!("unknown backend '{}' (expected memory or http)", other),
        }
    }
}

/// Deployer configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Service the pipeline deploys to and the autoscaler scales
    pub service_id: String,

    /// Watched registry repository (e.g., "eniro/tegola")
    pub repository: String,

    /// Watched image tag
    pub image_tag: String,

    /// Registry host prefixed to image URIs; empty for none
    pub registry_host: String,

    /// Container name in the service's task template
    pub container_name: String,

    pub backend: BackendKind,
    pub registry_url: String,
    pub cluster_url: String,
    pub metrics_url: String,

    /// How often the HTTP registry is polled for digest changes
    pub registry_poll_interval: Duration,

    /// Longest a single HTTP collaborator request may take
    pub request_timeout: Duration,

    /// Status API bind address
    pub bind_addr: String,

    pub scaling: ScalingPolicy,

    /// Autoscaler evaluation interval
    pub scale_interval: Duration,

    /// Longest the autoscaler waits behind an in-progress deploy
    pub scale_gate_timeout: Duration,

    pub minimum_healthy_percent: u32,
    pub maximum_percent: u32,

    /// Failed new instances that trip the deploy circuit breaker
    pub rollback_threshold: u32,

    pub health_check_timeout: Duration,
    pub health_check_interval: Duration,

    pub source_timeout: Duration,
    pub build_timeout: Duration,
    pub deploy_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_id: "tegola-service".to_string(),
            repository: "eniro/tegola".to_string(),
            image_tag: "latest".to_string(),
            registry_host: String::new(),
            container_name: "tegolaServiceWeb".to_string(),
            backend: BackendKind::Memory,
            registry_url: "http://localhost:5000".to_string(),
            cluster_url: "http://localhost:9000".to_string(),
            metrics_url: "http://localhost:9100".to_string(),
            registry_poll_interval: Duration::from_secs(30),
            request_timeout: Duration::from_secs(30),
            bind_addr: "0.0.0.0:8080".to_string(),
            scaling: ScalingPolicy::default(),
            scale_interval: Duration::from_secs(60),
            scale_gate_timeout: Duration::from_secs(60),
            minimum_healthy_percent: 100,
            maximum_percent: 200,
            rollback_threshold: 2,
            health_check_timeout: Duration::from_secs(60),
            health_check_interval: Duration::from_secs(2),
            source_timeout: Duration::from_secs(60),
            build_timeout: Duration::from_secs(30),
            deploy_timeout: Duration::from_secs(1800),
        }
    }
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Parses the value of `key`, naming the variable on failure
fn parse_var<T>(key: &str, value: &str) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    value
        .trim()
        .parse::<T>()
        .map_err(|e| anyhow::anyhow!("invalid {}='{}': {}", key, value, e))
}

/// Unset variables take `default`; set but unparsable ones are an error
fn env_parse<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match std::env::var(key) {
        Ok(value) => parse_var(key, &value),
        Err(_) => Ok(default),
    }
}

fn env_secs(key: &str, default: Duration) -> anyhow::Result<Duration> {
    match std::env::var(key) {
        Ok(value) => parse_var::<u64>(key, &value).map(Duration::from_secs),
        Err(_) => Ok(default),
    }
}

impl Config {
    /// Creates configuration from environment variables
    ///
    /// Every variable is optional and falls back to [`Config::default`].
    /// A variable that is set but cannot be parsed fails the whole load:
    /// - SHIPYARD_SERVICE_ID, SHIPYARD_REPOSITORY, SHIPYARD_IMAGE_TAG
    /// - SHIPYARD_REGISTRY_HOST, SHIPYARD_CONTAINER_NAME
    /// - SHIPYARD_BACKEND (memory | http)
    /// - SHIPYARD_REGISTRY_URL, SHIPYARD_CLUSTER_URL, SHIPYARD_METRICS_URL
    /// - SHIPYARD_REGISTRY_POLL_INTERVAL, SHIPYARD_REQUEST_TIMEOUT (seconds)
    /// - SHIPYARD_BIND_ADDR
    /// - SHIPYARD_MIN_CAPACITY, SHIPYARD_MAX_CAPACITY
    /// - SHIPYARD_TARGET_CPU, SHIPYARD_TARGET_MEM (percent)
    /// - SHIPYARD_SCALE_IN_MARGIN (percent)
    /// - SHIPYARD_SCALE_OUT_COOLDOWN, SHIPYARD_SCALE_IN_COOLDOWN (seconds)
    /// - SHIPYARD_SCALE_INTERVAL, SHIPYARD_SCALE_GATE_TIMEOUT (seconds)
    /// - SHIPYARD_MIN_HEALTHY_PERCENT, SHIPYARD_MAX_PERCENT
    /// - SHIPYARD_ROLLBACK_THRESHOLD
    /// - SHIPYARD_HEALTH_CHECK_TIMEOUT, SHIPYARD_HEALTH_CHECK_INTERVAL (seconds)
    /// - SHIPYARD_SOURCE_TIMEOUT, SHIPYARD_BUILD_TIMEOUT, SHIPYARD_DEPLOY_TIMEOUT (seconds)
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Config::default();

        let backend = env_parse("SHIPYARD_BACKEND", defaults.backend)?;

        let scaling = ScalingPolicy {
            min_capacity: env_parse("SHIPYARD_MIN_CAPACITY", defaults.scaling.min_capacity)?,
            max_capacity: env_parse("SHIPYARD_MAX_CAPACITY", defaults.scaling.max_capacity)?,
            target_cpu_percent: env_parse("SHIPYARD_TARGET_CPU", defaults.scaling.target_cpu_percent)?,
            target_mem_percent: env_parse("SHIPYARD_TARGET_MEM", defaults.scaling.target_mem_percent)?,
            scale_in_margin_percent: env_parse(
                "SHIPYARD_SCALE_IN_MARGIN",
                defaults.scaling.scale_in_margin_percent,
            )?,
            scale_out_cooldown: env_secs(
                "SHIPYARD_SCALE_OUT_COOLDOWN",
                defaults.scaling.scale_out_cooldown,
            )?,
            scale_in_cooldown: env_secs(
                "SHIPYARD_SCALE_IN_COOLDOWN",
                defaults.scaling.scale_in_cooldown,
            )?,
        };

        Ok(Self {
            service_id: env_string("SHIPYARD_SERVICE_ID", &defaults.service_id),
            repository: env_string("SHIPYARD_REPOSITORY", &defaults.repository),
            image_tag: env_string("SHIPYARD_IMAGE_TAG", &defaults.image_tag),
            registry_host: env_string("SHIPYARD_REGISTRY_HOST", &defaults.registry_host),
            container_name: env_string("SHIPYARD_CONTAINER_NAME", &defaults.container_name),
            backend,
            registry_url: env_string("SHIPYARD_REGISTRY_URL", &defaults.registry_url),
            cluster_url: env_string("SHIPYARD_CLUSTER_URL", &defaults.cluster_url),
            metrics_url: env_string("SHIPYARD_METRICS_URL", &defaults.metrics_url),
            registry_poll_interval: env_secs(
                "SHIPYARD_REGISTRY_POLL_INTERVAL",
                defaults.registry_poll_interval,
            )?,
            request_timeout: env_secs("SHIPYARD_REQUEST_TIMEOUT", defaults.request_timeout)?,
            bind_addr: env_string("SHIPYARD_BIND_ADDR", &defaults.bind_addr),
            scaling,
            scale_interval: env_secs("SHIPYARD_SCALE_INTERVAL", defaults.scale_interval)?,
            scale_gate_timeout: env_secs("SHIPYARD_SCALE_GATE_TIMEOUT", defaults.scale_gate_timeout)?,
            minimum_healthy_percent: env_parse(
                "SHIPYARD_MIN_HEALTHY_PERCENT",
                defaults.minimum_healthy_percent,
            )?,
            maximum_percent: env_parse("SHIPYARD_MAX_PERCENT", defaults.maximum_percent)?,
            rollback_threshold: env_parse("SHIPYARD_ROLLBACK_THRESHOLD", defaults.rollback_threshold)?,
            health_check_timeout: env_secs(
                "SHIPYARD_HEALTH_CHECK_TIMEOUT",
                defaults.health_check_timeout,
            )?,
            health_check_interval: env_secs(
                "SHIPYARD_HEALTH_CHECK_INTERVAL",
                defaults.health_check_interval,
            )?,
            source_timeout: env_secs("SHIPYARD_SOURCE_TIMEOUT", defaults.source_timeout)?,
            build_timeout: env_secs("SHIPYARD_BUILD_TIMEOUT", defaults.build_timeout)?,
            deploy_timeout: env_secs("SHIPYARD_DEPLOY_TIMEOUT", defaults.deploy_timeout)?,
        })
    }

    /// Registry host as an option, for image URI rendering
    pub fn registry_host(&self) -> Option<&str> {
        Some(self.registry_host.as_str()).filter(|h| !h.is_empty())
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.service_id.is_empty() {
            anyhow::bail!("service_id cannot be empty");
        }

        if self.repository.is_empty() || self.image_tag.is_empty() {
            anyhow::bail!("repository and image_tag cannot be empty");
        }

        if self.container_name.is_empty() {
            anyhow::bail!("container_name cannot be empty");
        }

        if self.backend == BackendKind::Http {
            for url in [&self.registry_url, &self.cluster_url, &self.metrics_url] {
                if !url.starts_with("http://") && !url.starts_with("https://") {
                    anyhow::bail!("collaborator URL '{}' must start with http:// or https://", url);
                }
            }
        }

        self.scaling.validate().map_err(|e| anyhow::anyhow!(e))?;

        if self.minimum_healthy_percent > 100 {
            anyhow::bail!("minimum_healthy_percent cannot exceed 100");
        }

        if self.maximum_percent <= self.minimum_healthy_percent {
            anyhow::bail!("maximum_percent must be greater than minimum_healthy_percent");
        }

        if self.rollback_threshold == 0 {
            anyhow::bail!("rollback_threshold must be greater than 0");
        }

        if self.request_timeout.is_zero() {
            anyhow::bail!("request_timeout must be greater than 0");
        }

        if self.scale_interval.is_zero()
            || self.health_check_interval.is_zero()
            || self.registry_poll_interval.is_zero()
        {
            anyhow::bail!("intervals must be greater than 0");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.scale_interval, Duration::from_secs(60));
        assert_eq!(config.scaling.min_capacity, 1);
        assert_eq!(config.scaling.max_capacity, 5);
        assert_eq!(config.rollback_threshold, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();

        config.container_name = String::new();
        assert!(config.validate().is_err());
        config.container_name = "web".to_string();

        config.maximum_percent = 100;
        assert!(config.validate().is_err());
        config.maximum_percent = 200;

        config.scaling.min_capacity = 10;
        assert!(config.validate().is_err());
        config.scaling.min_capacity = 1;

        config.backend = BackendKind::Http;
        config.cluster_url = "cluster.local".to_string();
        assert!(config.validate().is_err());

        config.cluster_url = "http://cluster.local".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_backend_parsing() {
        assert_eq!("memory".parse::<BackendKind>().unwrap(), BackendKind::Memory);
        assert_eq!("HTTP".parse::<BackendKind>().unwrap(), BackendKind::Http);
        assert!("k8s".parse::<BackendKind>().is_err());
    }

    #[test]
    fn test_unparsable_values_are_rejected() {
        let err = parse_var::<f64>("SHIPYARD_TARGET_CPU", "seventy").unwrap_err();
        assert!(err.to_string().contains("SHIPYARD_TARGET_CPU"));

        let err = parse_var::<BackendKind>("SHIPYARD_BACKEND", "kubernetes").unwrap_err();
        assert!(err.to_string().contains("kubernetes"));

        assert!(parse_var::<u64>("SHIPYARD_SCALE_INTERVAL", "-5").is_err());
        assert_eq!(parse_var::<u32>("SHIPYARD_MAX_PERCENT", " 150 ").unwrap(), 150);
    }

    #[test]
    fn test_unset_variables_take_defaults() {
        let key = "SHIPYARD_TEST_VARIABLE_NEVER_SET";
        assert_eq!(env_parse(key, 7u32).unwrap(), 7);
        assert_eq!(
            env_secs(key, Duration::from_secs(3)).unwrap(),
            Duration::from_secs(3)
        );
    }

    #[test]
    fn test_registry_host() {
        let mut config = Config::default();
        assert_eq!(config.registry_host(), None);

        config.registry_host = "123456789012.dkr.ecr.eu-west-1.amazonaws.com".to_string();
        assert_eq!(
            config.registry_host(),
            Some("123456789012.dkr.ecr.eu-west-1.amazonaws.com")
        );
    }
}
