//! Bench configuration files.
//!
//! [`BenchConfig`] is the JSON description of a complete bench. [`KeyValueConfig`]
//! reads the plain `key value` files older bench setups were written in.

use std::collections::HashMap;
use std::path::Path;

use thiserror::Error;
use tracing::debug;

#[cfg(feature = "bench")]
use crate::sequence::DispenseScan;
#[cfg(feature = "bench")]
use crate::transport::{IpAddress, Link, SerialConfig};

/// Errors from loading or querying configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Missing key '{0}'")]
    MissingKey(String),

    #[error("Invalid value for '{key}': {value}")]
    InvalidValue { key: String, value: String },
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Addresses of the bench devices and the scan to run.
#[cfg(feature = "bench")]
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct BenchConfig {
    pub axis: Link,
    pub sensor: IpAddress,
    pub dispenser: SerialConfig,
    pub scan: DispenseScan,
}

#[cfg(feature = "bench")]
impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            axis: Link::Tcp(IpAddress::new("192.168.2.100", crate::xenax::DEFAULT_PORT)),
            sensor: IpAddress::new("192.168.2.250", crate::modbus::DEFAULT_PORT),
            dispenser: SerialConfig::new("/dev/ttyUSB0", 38400),
            scan: DispenseScan::default(),
        }
    }
}

#[cfg(feature = "bench")]
impl BenchConfig {
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let json = std::fs::read_to_string(path)?;
        let config = serde_json::from_str(&json)?;
        debug!("Loaded bench config from {}", path.display());
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// Whitespace separated `key value` pairs, one per line.
///
/// Lines whose first non-blank character is `#` are comments. The value is
/// everything after the first run of whitespace following the key, so it may
/// itself contain spaces. When a key repeats, its first value is kept.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyValueConfig {
    values: HashMap<String, String>,
}

impl KeyValueConfig {
    pub fn parse(text: &str) -> Self {
        let mut values = HashMap::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = match line.split_once(char::is_whitespace) {
                Some((key, value)) => (key, value.trim_start()),
                None => (line, ""),
            };
            values
                .entry(key.to_string())
                .or_insert_with(|| value.to_string());
        }
        Self { values }
    }

    pub fn load(path: &Path) -> ConfigResult<Self> {
        let config = Self::parse(&std::fs::read_to_string(path)?);
        debug!("Loaded {} keys from {}", config.len(), path.display());
        Ok(config)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// `TRUE` or `FALSE`, case sensitive.
    pub fn get_bool(&self, key: &str) -> ConfigResult<bool> {
        match self.require(key)? {
            "TRUE" => Ok(true),
            "FALSE" => Ok(false),
            other => Err(invalid(key, other)),
        }
    }

    pub fn get_int(&self, key: &str) -> ConfigResult<i64> {
        let value = self.require(key)?;
        value.parse().map_err(|_| invalid(key, value))
    }

    pub fn get_float(&self, key: &str) -> ConfigResult<f64> {
        let value = self.require(key)?;
        value.parse().map_err(|_| invalid(key, value))
    }

    fn require(&self, key: &str) -> ConfigResult<&str> {
        self.get_string(key)
            .ok_or_else(|| ConfigError::MissingKey(key.to_string()))
    }
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use tempfile::TempDir;

    const SAMPLE: &str = "\
# bench setup
axis_ip      192.168.2.100

   # indented comment
name  left dispenser head
reference_on_start TRUE
dry_run FALSE
speed 25000
gain -0.25
flag
";

    #[test]
    fn test_parse_key_values() {
        let config = KeyValueConfig::parse(SAMPLE);
        assert_eq!(config.len(), 7);
        assert_eq!(config.get_string("axis_ip"), Some("192.168.2.100"));
        assert_eq!(config.get_string("name"), Some("left dispenser head"));
        assert_eq!(config.get_string("flag"), Some(""));
        assert_eq!(config.get_string("#"), None);
        assert!(!config.contains("bench"));
    }

    #[test]
    fn test_typed_getters() {
        let config = KeyValueConfig::parse(SAMPLE);
        assert!(config.get_bool("reference_on_start").unwrap());
        assert!(!config.get_bool("dry_run").unwrap());
        assert_eq!(config.get_int("speed").unwrap(), 25_000);
        assert_relative_eq!(config.get_float("gain").unwrap(), -0.25);
    }

    #[test]
    fn test_getter_errors() {
        let config = KeyValueConfig::parse(SAMPLE);
        assert!(matches!(
            config.get_int("missing"),
            Err(ConfigError::MissingKey(key)) if key == "missing"
        ));
        assert!(matches!(
            config.get_bool("speed"),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(config.get_int("name").is_err());
        assert!(config.get_bool("flag").is_err());
    }

    #[test]
    fn test_first_key_wins() {
        let config = KeyValueConfig::parse("speed 100\nspeed 200\n");
        assert_eq!(config.get_string("speed"), Some("100"));
        assert_eq!(config.len(), 1);
    }

    #[test]
    fn test_load_key_value_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bench.cfg");
        std::fs::write(&path, SAMPLE).unwrap();

        let config = KeyValueConfig::load(&path).unwrap();
        assert_eq!(config, KeyValueConfig::parse(SAMPLE));
        assert!(matches!(
            KeyValueConfig::load(&dir.path().join("missing.cfg")),
            Err(ConfigError::Io(_))
        ));
    }

    #[cfg(feature = "bench")]
    #[test]
    fn test_bench_config_defaults() {
        let config = BenchConfig::default();
        assert_eq!(config.axis.to_string(), "tcp://192.168.2.100:10001");
        assert_eq!(config.sensor.port, 502);
        assert_eq!(config.dispenser.baud, 38400);
        assert!(config.dispenser.is_8n1());
    }

    #[cfg(feature = "bench")]
    #[test]
    fn test_bench_config_save_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bench.json");

        let mut config = BenchConfig::default();
        config.axis = Link::Serial(SerialConfig::new("/dev/ttyUSB1", 115_200));
        config.scan.speed = 5000;
        config.save(&path).unwrap();

        assert_eq!(BenchConfig::load(&path).unwrap(), config);
    }

    #[cfg(feature = "bench")]
    #[test]
    fn test_bench_config_partial_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bench.json");
        std::fs::write(&path, r#"{"scan": {"scan_target": 120000}}"#).unwrap();

        let config = BenchConfig::load(&path).unwrap();
        assert_eq!(config.scan.scan_target, 120_000);
        assert_eq!(config.scan.speed, 25_000);
        assert_eq!(config.sensor, BenchConfig::default().sensor);
    }

    #[cfg(feature = "bench")]
    #[test]
    fn test_bench_config_bad_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bench.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(BenchConfig::load(&path), Err(ConfigError::Json(_))));
    }
}
