//! Cron trigger definitions and the read-only snapshot the engine consumes.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};

use crate::error::{CoreError, Result};

/// Retry / timeout / tolerance settings shared by cron triggers and one-off events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConf {
    #[serde(default)]
    pub num_retries: u32,
    #[serde(default = "default_retry_interval")]
    pub retry_interval_seconds: u64,
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
    /// Maximum delay between the scheduled time and processing before the event is dead.
    #[serde(default = "default_tolerance")]
    pub tolerance_seconds: u64,
}

fn default_retry_interval() -> u64 { 10 }
fn default_timeout() -> u64 { 60 }
fn default_tolerance() -> u64 { 21600 }

/// Upper bound for every `RetryConf` duration: ten years.
pub const MAX_RETRY_CONF_SECONDS: u64 = 10 * 365 * 24 * 3600;

impl RetryConf {
    /// Rejects durations beyond [`MAX_RETRY_CONF_SECONDS`].
    pub fn validate(&self) -> std::result::Result<(), String> {
        for (field, value) in [
            ("retry_interval_seconds", self.retry_interval_seconds),
            ("timeout_seconds", self.timeout_seconds),
            ("tolerance_seconds", self.tolerance_seconds),
        ] {
            if value > MAX_RETRY_CONF_SECONDS {
                return Err(format!("{field} must be at most {MAX_RETRY_CONF_SECONDS}, got {value}"));
            }
        }
        Ok(())
    }
}

impl Default for RetryConf {
    fn default() -> Self {
        Self {
            num_retries: 0,
            retry_interval_seconds: default_retry_interval(),
            timeout_seconds: default_timeout(),
            tolerance_seconds: default_tolerance(),
        }
    }
}

/// Webhook target: a literal URL (optionally containing `{{VAR}}` templates)
/// or the name of an environment variable holding the URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WebhookRef {
    FromEnv { from_env: String },
    Url(String),
}

impl std::fmt::Display for WebhookRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WebhookRef::Url(url) => write!(f, "{url}"),
            WebhookRef::FromEnv { from_env } => write!(f, "env:{from_env}"),
        }
    }
}

/// A request header, either literal or read from the environment at dispatch time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HeaderConf {
    FromEnv { name: String, value_from_env: String },
    Static { name: String, value: String },
}

impl HeaderConf {
    pub fn name(&self) -> &str {
        match self {
            HeaderConf::FromEnv { name, .. } | HeaderConf::Static { name, .. } => name,
        }
    }
}

/// A recurring trigger definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CronTrigger {
    pub name: String,
    /// Five-field cron expression (or an `@daily`-style macro), evaluated in UTC.
    pub schedule: String,
    pub webhook: WebhookRef,
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
    #[serde(default)]
    pub headers: Vec<HeaderConf>,
    #[serde(default)]
    pub retry_conf: RetryConf,
    #[serde(default)]
    pub comment: Option<String>,
    /// Whether bulk metadata replacement may drop or overwrite this trigger.
    #[serde(default = "bool_true")]
    pub include_in_metadata: bool,
}

fn bool_true() -> bool { true }

/// Point-in-time view of all cron triggers, keyed by name.
pub type TriggerSnapshot = HashMap<String, CronTrigger>;

/// Supplies the current trigger snapshot. Implementations are refreshed by
/// their owner; the engine never mutates what it receives.
pub trait TriggerSource: Send + Sync {
    fn snapshot(&self) -> Arc<TriggerSnapshot>;
}

/// Swap-on-refresh trigger snapshot shared between the owner and the engine.
#[derive(Debug, Default)]
pub struct SharedTriggers {
    current: RwLock<Arc<TriggerSnapshot>>,
}

impl SharedTriggers {
    pub fn new(triggers: Vec<CronTrigger>) -> Self {
        let shared = Self::default();
        shared.replace(triggers);
        shared
    }

    /// Install a new snapshot, returning the previous one.
    pub fn replace(&self, triggers: Vec<CronTrigger>) -> Arc<TriggerSnapshot> {
        let next: TriggerSnapshot = triggers.into_iter().map(|t| (t.name.clone(), t)).collect();
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        std::mem::replace(&mut *guard, Arc::new(next))
    }
}

impl TriggerSource for SharedTriggers {
    fn snapshot(&self) -> Arc<TriggerSnapshot> {
        self.current.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

/// On-disk trigger definitions (`triggers.toml`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TriggerFile {
    #[serde(default)]
    pub cron_triggers: Vec<CronTrigger>,
}

impl TriggerFile {
    /// Load and validate a trigger file. A missing file is an empty set.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("No trigger file at {}", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let file: Self = toml::from_str(content)?;
        file.validate()?;
        Ok(file)
    }

    fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for trigger in &self.cron_triggers {
            if trigger.name.trim().is_empty() {
                return Err(CoreError::InvalidTrigger {
                    name: trigger.name.clone(),
                    reason: "name must not be empty".into(),
                });
            }
            if trigger.schedule.trim().is_empty() {
                return Err(CoreError::InvalidTrigger {
                    name: trigger.name.clone(),
                    reason: "schedule must not be empty".into(),
                });
            }
            if let Err(reason) = trigger.retry_conf.validate() {
                return Err(CoreError::InvalidTrigger {
                    name: trigger.name.clone(),
                    reason,
                });
            }
            if !seen.insert(trigger.name.as_str()) {
                return Err(CoreError::InvalidTrigger {
                    name: trigger.name.clone(),
                    reason: "duplicate trigger name".into(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [[cron_triggers]]
        name = "hourly"
        schedule = "0 * * * *"
        webhook = "https://example.com/hook"
        payload = { kind = "ping", n = 1 }
        headers = [
            { name = "X-Static", value = "abc" },
            { name = "X-Token", value_from_env = "HOOK_TOKEN" },
        ]
        retry_conf = { num_retries = 3, tolerance_seconds = 600 }

        [[cron_triggers]]
        name = "nightly"
        schedule = "@daily"
        webhook = { from_env = "NIGHTLY_URL" }
        comment = "cleanup"
        include_in_metadata = false
    "#;

    #[test]
    fn test_parse_trigger_file() {
        let file = TriggerFile::parse(SAMPLE).unwrap();
        assert_eq!(file.cron_triggers.len(), 2);

        let hourly = &file.cron_triggers[0];
        assert_eq!(hourly.webhook, WebhookRef::Url("https://example.com/hook".into()));
        assert_eq!(hourly.payload.as_ref().unwrap()["kind"], "ping");
        assert_eq!(hourly.retry_conf.num_retries, 3);
        assert_eq!(hourly.retry_conf.retry_interval_seconds, 10);
        assert_eq!(hourly.retry_conf.timeout_seconds, 60);
        assert_eq!(hourly.retry_conf.tolerance_seconds, 600);
        assert_eq!(
            hourly.headers[1],
            HeaderConf::FromEnv {
                name: "X-Token".into(),
                value_from_env: "HOOK_TOKEN".into()
            }
        );
        assert!(hourly.include_in_metadata);

        let nightly = &file.cron_triggers[1];
        assert_eq!(nightly.webhook, WebhookRef::FromEnv { from_env: "NIGHTLY_URL".into() });
        assert_eq!(nightly.retry_conf, RetryConf::default());
        assert!(!nightly.include_in_metadata);
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let toml_str = r#"
            [[cron_triggers]]
            name = "a"
            schedule = "* * * * *"
            webhook = "http://x"

            [[cron_triggers]]
            name = "a"
            schedule = "0 * * * *"
            webhook = "http://y"
        "#;
        let err = TriggerFile::parse(toml_str).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_oversized_retry_conf_rejected() {
        let toml_str = r#"
            [[cron_triggers]]
            name = "forever"
            schedule = "* * * * *"
            webhook = "http://x"
            retry_conf = { tolerance_seconds = 9223372036854775807 }
        "#;
        let err = TriggerFile::parse(toml_str).unwrap_err();
        assert!(err.to_string().contains("tolerance_seconds"));

        let conf = RetryConf { timeout_seconds: MAX_RETRY_CONF_SECONDS, ..Default::default() };
        assert!(conf.validate().is_ok());
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let file = TriggerFile::load(&dir.path().join("nope.toml")).unwrap();
        assert!(file.cron_triggers.is_empty());
    }

    #[test]
    fn test_shared_triggers_swap() {
        let file = TriggerFile::parse(SAMPLE).unwrap();
        let shared = SharedTriggers::new(file.cron_triggers.clone());
        let before = shared.snapshot();
        assert_eq!(before.len(), 2);

        let previous = shared.replace(vec![file.cron_triggers[0].clone()]);
        assert_eq!(previous.len(), 2);
        // Snapshots already handed out are not affected by the swap.
        assert_eq!(before.len(), 2);
        assert_eq!(shared.snapshot().len(), 1);
        assert!(shared.snapshot().contains_key("hourly"));
    }
}
