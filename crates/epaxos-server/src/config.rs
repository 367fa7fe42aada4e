//! Layered configuration loading for a replica: built-in defaults,
//! then the first config file found in the well-known locations, then
//! `EPAXOS_`-prefixed environment variables.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use epaxos_types::ReplicaId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One cluster member as named in configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerConfig {
    pub name: String,
    pub pid: ReplicaId,
    pub address: SocketAddr,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicaConfig {
    /// This replica's own peer name; must match one entry of `peers`.
    pub name: String,
    /// All cluster members, including self.
    pub peers: Vec<PeerConfig>,
    /// Connect timeout for a peer's transport.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Whether `Commit` is broadcast to all peers regardless of the
    /// thrifty fanout (the source's `Config.Aggregate` flag).
    pub aggregate: bool,
    pub thrifty: bool,
    pub log_level: String,
    /// Optional run duration after which the replica shuts itself down;
    /// absent means run until signalled.
    #[serde(with = "humantime_serde::option", default)]
    pub uptime: Option<Duration>,
    /// Optional path to write periodic metrics to.
    pub metrics: Option<PathBuf>,
    /// Optional RNG seed, for reproducible runs in tests.
    pub seed: Option<u64>,
}

impl Default for ReplicaConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            peers: Vec::new(),
            timeout: Duration::from_secs(5),
            aggregate: false,
            thrifty: false,
            log_level: "info".to_string(),
            uptime: None,
            metrics: None,
            seed: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file at {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl ReplicaConfig {
    /// This replica's own peer id. Panics only if `validate` was skipped;
    /// `load` always validates before returning.
    pub fn pid(&self) -> ReplicaId {
        self.peers
            .iter()
            .find(|p| p.name == self.name)
            .map(|p| p.pid)
            .expect("validate() guarantees self.name names a peer")
    }

    /// All peer ids other than this replica's own, sorted.
    pub fn remotes(&self) -> Vec<ReplicaId> {
        let pid = self.pid();
        let mut ids: Vec<ReplicaId> = self
            .peers
            .iter()
            .map(|p| p.pid)
            .filter(|&id| id != pid)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Classic majority quorum over the full peer set (remotes + self).
    pub fn quorum(&self) -> usize {
        epaxos_core::quorum(self.peers.len())
    }

    /// The thrifty fanout for this replica, or empty when thrifty
    /// broadcast is disabled.
    pub fn thrifty_peers(&self) -> Vec<ReplicaId> {
        if !self.thrifty {
            return Vec::new();
        }
        let mut ids: Vec<ReplicaId> = self.peers.iter().map(|p| p.pid).collect();
        ids.sort_unstable();
        epaxos_core::thrifty_peers(&ids, self.pid())
    }

    /// Maps each remote peer id to its dial address.
    pub fn addresses(&self) -> BTreeMap<ReplicaId, SocketAddr> {
        self.peers.iter().map(|p| (p.pid, p.address)).collect()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.peers.is_empty() {
            return Err(ConfigError::Invalid("peer list is empty".to_string()));
        }
        if !self.peers.iter().any(|p| p.name == self.name) {
            return Err(ConfigError::Invalid(format!(
                "local name {:?} is not present in the peer list",
                self.name
            )));
        }
        Ok(())
    }
}

/// Loads configuration from built-in defaults, then the first config
/// file found among `./epaxos.{toml,json,yaml}`, `$HOME/.epaxos.*`,
/// `/etc/epaxos.*`, then `EPAXOS_`-prefixed environment variables.
pub struct ConfigLoader {
    search_dirs: Vec<PathBuf>,
    env_prefix: String,
}

impl ConfigLoader {
    pub fn new() -> Self {
        let mut search_dirs = vec![PathBuf::from(".")];
        if let Some(home) = directories::UserDirs::new() {
            search_dirs.push(home.home_dir().to_path_buf());
        }
        search_dirs.push(PathBuf::from("/etc"));
        Self {
            search_dirs,
            env_prefix: "EPAXOS".to_string(),
        }
    }

    #[cfg(test)]
    pub fn with_search_dirs(mut self, dirs: Vec<PathBuf>) -> Self {
        self.search_dirs = dirs;
        self
    }

    pub fn load(self) -> Result<ReplicaConfig, ConfigError> {
        let mut builder = config::Config::builder();
        builder = builder.add_source(config::Config::try_from(&ReplicaConfig::default())?);

        if let Some(file) = self.find_config_file() {
            builder = builder.add_source(config::File::from(file).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix(&self.env_prefix)
                .separator("_")
                .try_parsing(true),
        );

        let built = builder.build()?;
        let loaded: ReplicaConfig = built.try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    fn find_config_file(&self) -> Option<PathBuf> {
        for dir in &self.search_dirs {
            for stem in ["epaxos", ".epaxos"] {
                for ext in ["toml", "json", "yaml"] {
                    let candidate = dir.join(format!("{stem}.{ext}"));
                    if candidate.exists() {
                        return Some(candidate);
                    }
                }
            }
        }
        None
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn peer(name: &str, pid: ReplicaId, port: u16) -> PeerConfig {
        PeerConfig {
            name: name.to_string(),
            pid,
            address: SocketAddr::from(([127, 0, 0, 1], port)),
        }
    }

    #[test]
    fn validate_rejects_empty_peer_list() {
        let config = ReplicaConfig {
            name: "a".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_unknown_local_name() {
        let config = ReplicaConfig {
            name: "ghost".to_string(),
            peers: vec![peer("a", 1, 9001)],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn pid_and_remotes_derive_from_peer_list() {
        let config = ReplicaConfig {
            name: "b".to_string(),
            peers: vec![peer("a", 1, 9001), peer("b", 2, 9002), peer("c", 3, 9003)],
            ..Default::default()
        };
        assert_eq!(config.pid(), 2);
        assert_eq!(config.remotes(), vec![1, 3]);
        assert_eq!(config.quorum(), 2);
    }

    #[test]
    fn load_reads_a_toml_file_from_the_search_path() {
        let dir = tempdir().expect("tempdir");
        fs::write(
            dir.path().join("epaxos.toml"),
            r#"
name = "b"
thrifty = true

[[peers]]
name = "a"
pid = 1
address = "127.0.0.1:9001"

[[peers]]
name = "b"
pid = 2
address = "127.0.0.1:9002"
"#,
        )
        .expect("write config");

        let config = ConfigLoader::new()
            .with_search_dirs(vec![dir.path().to_path_buf()])
            .load()
            .expect("load");

        assert_eq!(config.name, "b");
        assert!(config.thrifty);
        assert_eq!(config.pid(), 2);
    }

    #[test]
    fn load_rejects_a_config_missing_the_local_peer() {
        let dir = tempdir().expect("tempdir");
        fs::write(
            dir.path().join("epaxos.toml"),
            r#"
name = "ghost"

[[peers]]
name = "a"
pid = 1
address = "127.0.0.1:9001"
"#,
        )
        .expect("write config");

        let result = ConfigLoader::new()
            .with_search_dirs(vec![dir.path().to_path_buf()])
            .load();
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }
}
