use std::{fs, path::Path, time::Duration};

use anyhow::{Context as _, Result};
use nnn_core::{FaceId, ForwarderConfig, Name};
use serde::{Deserialize, Serialize};

/// Node description read from a TOML file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub node: NodeConfig,
    pub forwarder: ForwarderConfig,
    pub logging: LoggingConfig,
    pub routes: Vec<RouteConfig>,
    pub leases: Vec<LeaseConfig>,
    pub pending: Vec<PendingConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub name: Name,
    /// Faces brought up before routes are installed, in addition to the
    /// faces named by routes.
    pub faces: Vec<FaceId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteConfig {
    pub prefix: Name,
    pub face: FaceId,
    #[serde(default)]
    pub metric: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaseConfig {
    pub old: Name,
    pub new: Name,
    pub lease_secs: u64,
    pub renew_secs: Option<u64>,
}

/// A data object injected on the local face once the tables are populated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingConfig {
    pub destination: Name,
    #[serde(default)]
    pub payload: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: Name::from_uri("/nnn/node"),
            faces: Vec::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl LeaseConfig {
    pub fn lease_expiry(&self) -> Duration {
        Duration::from_secs(self.lease_secs)
    }

    pub fn renew_at(&self) -> Option<Duration> {
        self.renew_secs.map(Duration::from_secs)
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        config
            .forwarder
            .validate()
            .with_context(|| format!("Invalid [forwarder] section in {}", path.display()))?;
        Ok(config)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Every face the node should bring up, ascending and without repeats.
    pub fn faces(&self) -> Vec<FaceId> {
        let mut faces: Vec<FaceId> = self
            .node
            .faces
            .iter()
            .copied()
            .chain(self.routes.iter().map(|route| route.face))
            .collect();
        faces.sort();
        faces.dedup();
        faces
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nnn_core::PolicyKind;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SAMPLE: &str = r#"
[node]
name = "/campus/router1"
faces = [9]

[forwarder]
fib_capacity = 128
fib_policy = "lru"

[logging]
level = "debug"

[[routes]]
prefix = "/campus/lab"
face = 2
metric = 10

[[routes]]
prefix = "1.2"
face = 3

[[leases]]
old = "/campus/lab/laptop"
new = "/campus/dorm/laptop"
lease_secs = 300
renew_secs = 240

[[pending]]
destination = "/campus/lab/printer"
payload = "job-1"
"#;

    fn write_config(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let config = Config::load("/nonexistent/nnnd.toml").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.logging.level, "info");
        assert!(config.routes.is_empty());
    }

    #[test]
    fn test_load_full_config() {
        let file = write_config(SAMPLE);
        let config = Config::load(file.path()).unwrap();

        assert_eq!(config.node.name, Name::from_uri("/campus/router1"));
        assert_eq!(config.forwarder.fib_capacity, Some(128));
        assert_eq!(config.forwarder.fib_policy, PolicyKind::Lru);
        assert_eq!(config.forwarder.max_queue_len, 64);
        assert_eq!(config.logging.level, "debug");

        assert_eq!(config.routes.len(), 2);
        assert_eq!(config.routes[1].prefix, Name::from_uri("/1/2"));
        assert_eq!(config.routes[1].metric, 0);

        let lease = &config.leases[0];
        assert_eq!(lease.lease_expiry(), Duration::from_secs(300));
        assert_eq!(lease.renew_at(), Some(Duration::from_secs(240)));
        assert_eq!(config.pending[0].payload, "job-1");

        assert_eq!(config.faces(), vec![FaceId(2), FaceId(3), FaceId(9)]);
    }

    #[test]
    fn test_invalid_forwarder_section_rejected() {
        let file = write_config("[forwarder]\nmax_queue_len = 0\n");
        let err = Config::load(file.path()).unwrap_err();
        assert!(format!("{err:#}").contains("max_queue_len"));
    }

    #[test]
    fn test_malformed_name_rejected() {
        let file = write_config("[[routes]]\nprefix = \"1..2\"\nface = 1\n");
        assert!(Config::load(file.path()).is_err());
    }

    #[test]
    fn test_save_and_reload() {
        let file = write_config(SAMPLE);
        let config = Config::load(file.path()).unwrap();

        let out = NamedTempFile::new().unwrap();
        config.save(out.path()).unwrap();
        assert_eq!(Config::load(out.path()).unwrap(), config);
    }
}
