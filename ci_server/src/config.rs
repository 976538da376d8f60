//! CI engine configuration — loaded from environment variables.

use std::collections::BTreeMap;

/// Canonical CI template name in executor events.
pub const CI_WORKFLOW_NAME: &str = "ci";
/// Error code a CI stage exits with when the upper layer will re-trigger.
pub const CI_STAGE_FAIL_CODE: i64 = 2;
/// User id recorded for system-initiated actions.
pub const SYSTEM_USER_ID: i64 = 1;
/// Path suffix appended to the host URL for external CI webhooks.
pub const EXTERNAL_CI_WEBHOOK_PATH: &str = "orchestrator/webhook/ext-ci";

/// Execution defaults handed to the workflow executor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecutionDefaults {
    pub image: String,
    pub timeout_secs: u64,
    pub namespace: String,
    pub cpu_limit: String,
    pub mem_limit: String,
}

#[derive(Clone, Debug)]
pub struct CiConfig {
    /// MAC secret used to derive external CI access keys.
    pub external_ci_api_secret: String,
    /// Public webhook URL stem. Empty means derive from the host URL attribute.
    pub external_ci_web_hook_url: String,
    pub defaults: ExecutionDefaults,
    /// `BLOB_STORAGE_*` variables, passed through untouched.
    pub blob_storage: BTreeMap<String, String>,
    pub git_sensor_url: String,
    pub notifier_url: String,
    pub dispatcher_url: String,
    pub executor_url: String,
    /// Force image scanning on every pipeline regardless of request.
    pub force_security_scanning: bool,
    /// Number of artifacts handed to the dispatcher concurrently.
    pub ci_auto_trigger_batch_size: usize,
    /// Minutes after which a Starting/Running run with no executor workflow is failed.
    pub run_failure_timeout_mins: i64,
    pub sweep_interval_secs: u64,
}

impl Default for CiConfig {
    fn default() -> Self {
        Self {
            external_ci_api_secret: String::new(),
            external_ci_web_hook_url: String::new(),
            defaults: ExecutionDefaults {
                image: "quay.io/devtron/ci-runner:latest".to_string(),
                timeout_secs: 3600,
                namespace: "devtron-ci".to_string(),
                cpu_limit: "0.5".to_string(),
                mem_limit: "3G".to_string(),
            },
            blob_storage: BTreeMap::new(),
            git_sensor_url: "http://localhost:9999".to_string(),
            notifier_url: "http://localhost:3000".to_string(),
            dispatcher_url: "http://localhost:8090".to_string(),
            executor_url: "http://localhost:2746".to_string(),
            force_security_scanning: false,
            ci_auto_trigger_batch_size: 1,
            run_failure_timeout_mins: 10,
            sweep_interval_secs: 300,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

impl CiConfig {
    pub fn from_env() -> Self {
        let base = Self::default();

        let external_ci_api_secret = std::env::var("EXTERNAL_CI_API_SECRET").unwrap_or_default();
        let external_ci_web_hook_url =
            std::env::var("EXTERNAL_CI_WEB_HOOK_URL").unwrap_or_default();

        let defaults = ExecutionDefaults {
            image: std::env::var("CI_DEFAULT_IMAGE").unwrap_or(base.defaults.image),
            timeout_secs: env_parse("CI_DEFAULT_TIMEOUT_SECS")
                .unwrap_or(base.defaults.timeout_secs),
            namespace: std::env::var("CI_DEFAULT_NAMESPACE").unwrap_or(base.defaults.namespace),
            cpu_limit: std::env::var("CI_DEFAULT_CPU_LIMIT").unwrap_or(base.defaults.cpu_limit),
            mem_limit: std::env::var("CI_DEFAULT_MEM_LIMIT").unwrap_or(base.defaults.mem_limit),
        };

        let blob_storage = collect_prefixed(std::env::vars(), "BLOB_STORAGE_");

        let ci_auto_trigger_batch_size = env_parse::<usize>("CI_AUTO_TRIGGER_BATCH_SIZE")
            .filter(|n| *n > 0)
            .unwrap_or(base.ci_auto_trigger_batch_size);

        if external_ci_api_secret.is_empty() {
            tracing::warn!(
                "EXTERNAL_CI_API_SECRET not set -- external CI access keys are derived from an empty secret"
            );
        }

        Self {
            external_ci_api_secret,
            external_ci_web_hook_url,
            defaults,
            blob_storage,
            git_sensor_url: std::env::var("GIT_SENSOR_URL").unwrap_or(base.git_sensor_url),
            notifier_url: std::env::var("NOTIFIER_URL").unwrap_or(base.notifier_url),
            dispatcher_url: std::env::var("DEPLOYMENT_DISPATCHER_URL")
                .unwrap_or(base.dispatcher_url),
            executor_url: std::env::var("WORKFLOW_EXECUTOR_URL").unwrap_or(base.executor_url),
            force_security_scanning: env_parse("FORCE_SECURITY_SCANNING")
                .unwrap_or(base.force_security_scanning),
            ci_auto_trigger_batch_size,
            run_failure_timeout_mins: env_parse("CI_RUN_FAILURE_TIMEOUT_MINS")
                .unwrap_or(base.run_failure_timeout_mins),
            sweep_interval_secs: env_parse("CI_SWEEP_INTERVAL_SECS")
                .unwrap_or(base.sweep_interval_secs),
        }
    }
}

fn collect_prefixed(
    vars: impl Iterator<Item = (String, String)>,
    prefix: &str,
) -> BTreeMap<String, String> {
    vars.filter(|(k, _)| k.starts_with(prefix)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_storage_keys_are_kept_verbatim() {
        let vars = vec![
            ("BLOB_STORAGE_PROVIDER".to_string(), "S3".to_string()),
            ("BLOB_STORAGE_S3_BUCKET".to_string(), "logs".to_string()),
            ("CI_DEFAULT_IMAGE".to_string(), "runner".to_string()),
        ];
        let map = collect_prefixed(vars.into_iter(), "BLOB_STORAGE_");
        assert_eq!(map.len(), 2);
        assert_eq!(map["BLOB_STORAGE_S3_BUCKET"], "logs");
    }

    #[test]
    fn default_batch_size_is_positive() {
        assert!(CiConfig::default().ci_auto_trigger_batch_size > 0);
    }
}
