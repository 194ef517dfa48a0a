//! cutover.toml configuration parser.
//!
//! Every section is optional; missing keys fall back to defaults that
//! reproduce a plain `java -jar` blue-green setup on ports 8080..9000.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CutoverConfig {
    pub server: ServerConfig,
    pub launch: LaunchConfig,
    pub ports: PortRangeConfig,
    pub health: HealthConfig,
    pub paths: PathsConfig,
    pub lifecycle: LifecycleConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: SocketAddr,
    /// Path prefix for the control API; everything else is proxied.
    pub control_prefix: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 8082)),
            control_prefix: "/_cutover".to_string(),
        }
    }
}

/// Command template used to launch an artifact.
///
/// `{artifact}` and `{port}` are substituted in `program` and every
/// argument.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LaunchConfig {
    pub program: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            program: "java".to_string(),
            args: vec![
                "-jar".to_string(),
                "{artifact}".to_string(),
                "--server.port={port}".to_string(),
            ],
            env: HashMap::new(),
        }
    }
}

/// Half-open range `[start, end)` of ports handed to candidates.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct PortRangeConfig {
    pub start: u16,
    pub end: u16,
}

impl Default for PortRangeConfig {
    fn default() -> Self {
        Self {
            start: 8080,
            end: 9000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeKind {
    /// TCP connect succeeds.
    Tcp,
    /// `GET {endpoint}` returns 2xx.
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub kind: ProbeKind,
    /// HTTP path to probe when `kind = "http"`.
    pub endpoint: String,
    #[serde(with = "duration_str")]
    pub interval: Duration,
    /// Per-probe timeout.
    #[serde(with = "duration_str")]
    pub timeout: Duration,
    /// Hard deadline for the whole health gate.
    #[serde(with = "duration_str")]
    pub deadline: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            kind: ProbeKind::Tcp,
            endpoint: "/actuator/health".to_string(),
            interval: Duration::from_secs(5),
            timeout: Duration::from_secs(2),
            deadline: Duration::from_secs(5 * 60),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub log_dir: PathBuf,
    pub backup_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("./logs"),
            backup_dir: PathBuf::from("./bak"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// How long to wait for a retired process to exit before its
    /// artifact is moved to the backup directory.
    #[serde(with = "duration_str")]
    pub retire_grace: Duration,
    /// Wake-up interval of log tail subscribers.
    #[serde(with = "duration_str")]
    pub tail_poll: Duration,
    pub stop_on_shutdown: bool,
    pub rescan_backups: bool,
    pub initial_artifact: Option<PathBuf>,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            retire_grace: Duration::from_secs(10),
            tail_poll: Duration::from_millis(500),
            stop_on_shutdown: true,
            rescan_backups: false,
            initial_artifact: None,
        }
    }
}

impl CutoverConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: CutoverConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ports.start >= self.ports.end {
            return Err(ConfigError::Invalid(format!(
                "empty port range {}..{}",
                self.ports.start, self.ports.end
            )));
        }
        if self.health.interval.is_zero() {
            return Err(ConfigError::Invalid("health.interval must be > 0".into()));
        }
        if self.health.deadline < self.health.interval {
            return Err(ConfigError::Invalid(
                "health.deadline must be at least one interval".into(),
            ));
        }
        if self.lifecycle.tail_poll.is_zero() {
            return Err(ConfigError::Invalid("lifecycle.tail_poll must be > 0".into()));
        }
        let prefix = &self.server.control_prefix;
        if !prefix.starts_with('/') || prefix.ends_with('/') {
            return Err(ConfigError::Invalid(
                "server.control_prefix must be a non-root path without a trailing slash".into(),
            ));
        }
        Ok(())
    }
}

/// Parse a duration string like "5s", "500ms", "2m".
///
/// A bare number is read as seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.trim().parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.trim().parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.trim().parse::<u64>().ok().map(|m| Duration::from_secs(m * 60))
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

mod duration_str {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        if d.subsec_millis() != 0 {
            s.serialize_str(&format!("{}ms", d.as_millis()))
        } else {
            s.serialize_str(&format!("{}s", d.as_secs()))
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(d)?;
        super::parse_duration(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid duration {raw:?}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = CutoverConfig::default();
        config.validate().unwrap();
        assert_eq!(config.ports.start, 8080);
        assert_eq!(config.health.kind, ProbeKind::Tcp);
        assert_eq!(config.launch.program, "java");
    }

    #[test]
    fn parse_empty_uses_defaults() {
        let config = CutoverConfig::from_toml("").unwrap();
        assert_eq!(config.health.deadline, Duration::from_secs(300));
        assert_eq!(config.server.control_prefix, "/_cutover");
    }

    #[test]
    fn parse_full() {
        let config = CutoverConfig::from_toml(
            r#"
[server]
listen = "127.0.0.1:9999"

[launch]
program = "{artifact}"
args = ["--port", "{port}"]
env = { RUST_LOG = "info" }

[ports]
start = 10000
end = 10010

[health]
kind = "http"
endpoint = "/healthz"
interval = "250ms"
deadline = "30s"

[paths]
log_dir = "/var/log/cutover"

[lifecycle]
initial_artifact = "/srv/app/current"
"#,
        )
        .unwrap();

        assert_eq!(config.server.listen.port(), 9999);
        assert_eq!(config.launch.args, vec!["--port", "{port}"]);
        assert_eq!(config.launch.env["RUST_LOG"], "info");
        assert_eq!(config.ports.end, 10010);
        assert_eq!(config.health.kind, ProbeKind::Http);
        assert_eq!(config.health.interval, Duration::from_millis(250));
        assert_eq!(config.health.timeout, Duration::from_secs(2));
        assert_eq!(config.paths.log_dir, PathBuf::from("/var/log/cutover"));
        assert_eq!(config.paths.backup_dir, PathBuf::from("./bak"));
        assert_eq!(
            config.lifecycle.initial_artifact,
            Some(PathBuf::from("/srv/app/current"))
        );
    }

    #[test]
    fn rejects_bad_duration() {
        let err = CutoverConfig::from_toml("[health]\ninterval = \"soon\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn rejects_empty_port_range() {
        let err = CutoverConfig::from_toml("[ports]\nstart = 9000\nend = 9000\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_deadline_shorter_than_interval() {
        let err = CutoverConfig::from_toml("[health]\ninterval = \"10s\"\ndeadline = \"1s\"\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_root_or_slash_terminated_prefix() {
        for prefix in ["/", "/ops/", "ops"] {
            let text = format!("[server]\ncontrol_prefix = \"{prefix}\"\n");
            let err = CutoverConfig::from_toml(&text).unwrap_err();
            assert!(matches!(err, ConfigError::Invalid(_)), "{prefix}");
        }
        assert!(CutoverConfig::from_toml("[server]\ncontrol_prefix = \"/ops\"\n").is_ok());
    }

    #[test]
    fn duration_round_trips_through_toml() {
        let config = CutoverConfig::default();
        let text = toml::to_string(&config).unwrap();
        let back = CutoverConfig::from_toml(&text).unwrap();
        assert_eq!(back.lifecycle.tail_poll, Duration::from_millis(500));
        assert_eq!(back.health.deadline, config.health.deadline);
    }

    #[test]
    fn parse_duration_forms() {
        assert_eq!(parse_duration("5s"), Some(Duration::from_secs(5)));
        assert_eq!(parse_duration("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse_duration("2m"), Some(Duration::from_secs(120)));
        assert_eq!(parse_duration("10"), Some(Duration::from_secs(10)));
        assert_eq!(parse_duration("fast"), None);
    }
}
