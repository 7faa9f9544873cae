//! Service configuration
//!
//! Resolution order for each setting:
//! 1. Command-line arguments / environment (`LYRE_PORT`, `LYRE_CONFIG`)
//! 2. TOML configuration file
//! 3. Built-in defaults

use crate::error::Result;
use lyre_common::config::{LoggingConfig, StreamingConfig, TomlConfig};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;

/// Resolved configuration for one service run
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub streaming: StreamingConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Merge CLI overrides onto the TOML file (or defaults)
    pub fn resolve(config_path: Option<&Path>, port: Option<u16>) -> Result<Self> {
        let toml = TomlConfig::load_or_default(config_path)?;
        Ok(Self::from_toml(toml, port))
    }

    pub fn from_toml(toml: TomlConfig, port: Option<u16>) -> Self {
        let port = port.unwrap_or(toml.port);
        Self {
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port),
            streaming: toml.streaming,
            logging: toml.logging,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lyre_common::config::DEFAULT_PORT;
    use std::io::Write;

    #[test]
    fn test_cli_port_wins() {
        let config = Config::from_toml(TomlConfig::default(), Some(9000));
        assert_eq!(config.bind_addr.port(), 9000);

        let config = Config::from_toml(TomlConfig::default(), None);
        assert_eq!(config.bind_addr.port(), DEFAULT_PORT);
    }

    #[test]
    fn test_resolve_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "port = 6001\n[streaming]\nmixer_enabled = false").unwrap();

        let config = Config::resolve(Some(file.path()), None).unwrap();
        assert_eq!(config.bind_addr.port(), 6001);
        assert!(!config.streaming.mixer_enabled);
        assert!(config.streaming.enabled);
    }

    #[test]
    fn test_explicit_missing_file_is_an_error() {
        assert!(Config::resolve(Some(Path::new("/no/such/lyre.toml")), None).is_err());
    }
}
