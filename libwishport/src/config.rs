use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Port-specific configuration of the bridge.
///
/// Every field has a default, so a configuration file only needs to name the values it overrides.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// The port at which the core accepts incoming connections. Reported to the core on request.
    pub server_port: u16,
    /// Size of the receive ring buffer of each connection, in bytes.
    pub rx_buffer_size: usize,
    /// Number of relay control connections that may be active at the same time.
    pub max_relays: usize,
    /// Examine core-to-app RPC frames for the fatal error code.
    pub detect_fatal_rpc_errors: bool,
    /// The RPC error code that signifies a general failure of the core.
    pub fatal_rpc_error_code: i32,
    /// The longest file name the file adapters will pass to the host.
    pub max_filename_len: usize,
    /// Period of the core's timebase, in milliseconds.
    pub timebase_interval_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            server_port: 37010,
            rx_buffer_size: 32 * 1024,
            max_relays: 1,
            detect_fatal_rpc_errors: true,
            fatal_rpc_error_code: 63,
            max_filename_len: 32,
            timebase_interval_ms: 1000,
        }
    }
}

impl BridgeConfig {
    pub fn load<P: AsRef<Path>>(path: Option<P>) -> Result<Self, ConfigError> {
        let path = path.map(|p| p.as_ref().to_path_buf()).unwrap_or_else(default_config_path);
        let file = std::fs::File::open(path)?;
        let reader = std::io::BufReader::new(file);
        let config: BridgeConfig = serde_yml::from_reader(reader)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::File::create(path)?;
        let writer = std::io::BufWriter::new(file);
        serde_yml::to_writer(writer, self)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_relays == 0 {
            return Err(ConfigError::InvalidValue("max_relays must be at least 1".into()));
        }
        if self.rx_buffer_size == 0 {
            return Err(ConfigError::InvalidValue("rx_buffer_size must be non-zero".into()));
        }
        if self.timebase_interval_ms == 0 {
            return Err(ConfigError::InvalidValue("timebase_interval_ms must be non-zero".into()));
        }
        Ok(())
    }

    pub fn timebase_interval(&self) -> Duration {
        Duration::from_millis(self.timebase_interval_ms)
    }
}

pub fn default_config_path() -> PathBuf {
    let mut home = std::env::home_dir().unwrap_or_else(|| PathBuf::from("."));
    home.push(".wish");
    home.push("bridge.yml");
    home
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("bridge.yml");
        std::fs::write(&path, "server_port: 4000\nmax_relays: 2\n").expect("write config");
        let config = BridgeConfig::load(Some(&path)).expect("config to load");
        assert_eq!(config.server_port, 4000);
        assert_eq!(config.max_relays, 2);
        assert_eq!(config.fatal_rpc_error_code, 63);
        assert_eq!(config.rx_buffer_size, 32 * 1024);
    }

    #[test]
    fn save_and_load() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("nested").join("bridge.yml");
        let config = BridgeConfig { detect_fatal_rpc_errors: false, ..Default::default() };
        config.save(&path).expect("config to save");
        let loaded = BridgeConfig::load(Some(&path)).expect("config to load");
        assert_eq!(loaded, config);
    }

    #[test]
    fn zero_relays_is_rejected() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("bridge.yml");
        std::fs::write(&path, "max_relays: 0\n").expect("write config");
        let err = BridgeConfig::load(Some(&path)).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(_)));
    }

    #[test]
    fn timebase_period_comes_from_the_file() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("bridge.yml");
        std::fs::write(&path, "timebase_interval_ms: 250\n").expect("write config");
        let config = BridgeConfig::load(Some(&path)).expect("config to load");
        assert_eq!(config.timebase_interval(), Duration::from_millis(250));
        assert_eq!(BridgeConfig::default().timebase_interval(), Duration::from_secs(1));

        std::fs::write(&path, "timebase_interval_ms: 0\n").expect("write config");
        assert!(matches!(BridgeConfig::load(Some(&path)), Err(ConfigError::InvalidValue(_))));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = BridgeConfig::load(Some("/definitely/not/here/bridge.yml")).unwrap_err();
        assert!(matches!(err, ConfigError::IoError(_)));
    }
}
