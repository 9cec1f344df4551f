use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::common::error::HookError;
use crate::engine::EngineKind;

pub const DEFAULT_SCRIPT_PATH: &str = "/etc/ctld/job_submit.lua";

pub const ENV_SCRIPT: &str = "JOBSUBMIT_SCRIPT";
pub const ENV_ENGINE: &str = "JOBSUBMIT_ENGINE";
pub const ENV_CALL_TIMEOUT_MS: &str = "JOBSUBMIT_CALL_TIMEOUT_MS";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HookConfig {
    /// Path of the policy script.
    pub script: PathBuf,
    pub engine: EngineKind,
    /// Maximum wall time of a single script execution. `None` disables the limit.
    #[serde(deserialize_with = "deserialize_human_duration_opt")]
    pub call_timeout: Option<Duration>,
}

impl Default for HookConfig {
    fn default() -> Self {
        Self {
            script: PathBuf::from(DEFAULT_SCRIPT_PATH),
            engine: EngineKind::default(),
            call_timeout: None,
        }
    }
}

fn deserialize_human_duration_opt<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    let buf = Option::<String>::deserialize(deserializer)?;

    if let Some(b) = buf {
        humantime::parse_duration(&b)
            .map(Some)
            .map_err(serde::de::Error::custom)
    } else {
        Ok(None)
    }
}

fn get_duration_from_env(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> crate::Result<Option<Duration>> {
    match lookup(key) {
        Some(value) => value
            .parse::<u64>()
            .map(|ms| Some(Duration::from_millis(ms)))
            .map_err(|_| HookError::ConfigError(format!("Invalid value of {key}: {value}"))),
        None => Ok(None),
    }
}

impl HookConfig {
    pub fn parse(text: &str) -> crate::Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: &Path) -> crate::Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            HookError::ConfigError(format!("Cannot read {}: {e}", path.display()))
        })?;
        Self::parse(&text)
    }

    /// Applies `JOBSUBMIT_*` overrides from the process environment.
    pub fn with_env_overrides(self) -> crate::Result<Self> {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    pub fn with_overrides_from(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> crate::Result<Self> {
        if let Some(script) = lookup(ENV_SCRIPT) {
            self.script = PathBuf::from(script);
        }
        if let Some(engine) = lookup(ENV_ENGINE) {
            self.engine = engine.parse()?;
        }
        if let Some(timeout) = get_duration_from_env(&lookup, ENV_CALL_TIMEOUT_MS)? {
            // Zero switches the limit off
            self.call_timeout = (!timeout.is_zero()).then_some(timeout);
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::time::Duration;

    use crate::common::config::{DEFAULT_SCRIPT_PATH, HookConfig};
    use crate::common::error::HookError;
    use crate::engine::EngineKind;

    #[test]
    fn test_defaults() {
        let config = HookConfig::parse("").unwrap();
        assert_eq!(config.script, PathBuf::from(DEFAULT_SCRIPT_PATH));
        assert_eq!(config.engine, EngineKind::Lua);
        assert_eq!(config.call_timeout, None);
    }

    #[test]
    fn test_parse_full() {
        let config = HookConfig::parse(
            r#"
script = "/opt/policy.lua"
engine = "none"
call_timeout = "1s 500ms"
"#,
        )
        .unwrap();
        assert_eq!(config.script, PathBuf::from("/opt/policy.lua"));
        assert_eq!(config.engine, EngineKind::None);
        assert_eq!(config.call_timeout, Some(Duration::from_millis(1500)));
    }

    #[test]
    fn test_parse_invalid_duration() {
        assert!(matches!(
            HookConfig::parse("call_timeout = \"soon\""),
            Err(HookError::ConfigError(_))
        ));
    }

    #[test]
    fn test_unknown_key() {
        assert!(HookConfig::parse("scrpt = \"x\"").is_err());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("JOBSUBMIT_SCRIPT", "/tmp/a.lua"),
            ("JOBSUBMIT_ENGINE", "NONE"),
            ("JOBSUBMIT_CALL_TIMEOUT_MS", "250"),
        ]
        .into_iter()
        .collect();
        let config = HookConfig::default()
            .with_overrides_from(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.script, PathBuf::from("/tmp/a.lua"));
        assert_eq!(config.engine, EngineKind::None);
        assert_eq!(config.call_timeout, Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_env_zero_timeout_disables_limit() {
        let config = HookConfig {
            call_timeout: Some(Duration::from_secs(1)),
            ..Default::default()
        }
        .with_overrides_from(|key| (key == "JOBSUBMIT_CALL_TIMEOUT_MS").then(|| "0".to_string()))
        .unwrap();
        assert_eq!(config.call_timeout, None);
    }

    #[test]
    fn test_env_invalid_timeout() {
        let result = HookConfig::default()
            .with_overrides_from(|key| (key == "JOBSUBMIT_CALL_TIMEOUT_MS").then(|| "x".into()));
        assert!(result.is_err());
    }
}
