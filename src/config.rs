use std::{fs, path::Path, path::PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::GpioError;

pub const DEFAULT_GPIO_ROOT: &str = "/sys/class/gpio";
pub const DEFAULT_READ_RETRIES: u32 = 16;

fn default_root() -> PathBuf {
    PathBuf::from(DEFAULT_GPIO_ROOT)
}

fn default_read_retries() -> u32 {
    DEFAULT_READ_RETRIES
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct SysfsConfig {
    /// Directory holding `export`, `unexport` and the `gpio<N>/` entries.
    #[serde(default = "default_root")]
    pub root: PathBuf,
    /// How many zero-length reads of a value attribute are tolerated before giving up.
    #[serde(default = "default_read_retries")]
    pub read_retries: u32,
}

impl Default for SysfsConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            read_retries: default_read_retries(),
        }
    }
}

impl SysfsConfig {
    pub fn with_root<P: Into<PathBuf>>(root: P) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, GpioError> {
        let contents = fs::read_to_string(&path)
            .map_err(|e| GpioError::Config(format!("Failed to read config: {e}")))?;
        serde_json::from_str(&contents)
            .map_err(|e| GpioError::Config(format!("Invalid config json: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let cfg: SysfsConfig = serde_json::from_str(r#"{ "read_retries": 3 }"#).unwrap();
        assert_eq!(cfg.root, PathBuf::from(DEFAULT_GPIO_ROOT));
        assert_eq!(cfg.read_retries, 3);

        let cfg: SysfsConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg, SysfsConfig::default());
    }

    #[test]
    fn unreadable_file_is_a_config_error() {
        let err = SysfsConfig::load_from_file("/nonexistent/sysgpio.json").unwrap_err();
        assert!(matches!(err, GpioError::Config(_)));
    }
}
