//! INI loading for [`BatchLoggerBuilder`].
//!
//! ```ini
//! [femtobatch]
//! access_token = abc123
//! dataspace = my-space
//! flush_interval_secs = 10
//!
//! [femtobatch.tags]
//! service = checkout
//! ```
//!
//! Unknown keys are ignored with a warning. Values that fail to parse are
//! reported as [`ConfigError::InvalidConfig`] naming the offending key.

use std::{fs, io::ErrorKind, path::Path, str::FromStr, time::Duration};

use ini::{Ini, Properties};
use log::warn;

use super::{BatchLoggerBuilder, ConfigError};

/// Section holding logger settings.
pub const INI_SECTION: &str = "femtobatch";
/// Section whose entries become batch tags.
pub const INI_TAGS_SECTION: &str = "femtobatch.tags";

impl BatchLoggerBuilder {
    /// Create a builder from INI text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Ini`] for malformed text, or
    /// [`ConfigError::InvalidConfig`] when the `[femtobatch]` section is
    /// missing or a value cannot be parsed.
    pub fn from_ini_str(text: &str) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_str(text).map_err(|err| ConfigError::Ini(err.to_string()))?;
        Self::new().apply_ini(&ini)
    }

    /// Create a builder from an INI file.
    pub fn from_ini_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        if text.trim().is_empty() {
            return Err(ConfigError::Io {
                path: path.to_path_buf(),
                source: ErrorKind::UnexpectedEof.into(),
            });
        }
        Self::from_ini_str(&text)
    }

    /// Overlay the settings found in `ini` onto this builder.
    pub fn apply_ini(mut self, ini: &Ini) -> Result<Self, ConfigError> {
        let section = ini.section(Some(INI_SECTION)).ok_or_else(|| {
            ConfigError::InvalidConfig(format!("missing [{INI_SECTION}] section"))
        })?;

        for (key, value) in section.iter() {
            let value = value.trim();
            self = match key {
                "access_token" => self.with_access_token(value),
                "dataspace" => self.with_dataspace(value),
                "endpoint" => self.with_endpoint(value),
                "ingest_base" => self.with_ingest_base(value),
                "storage_dir" => self.with_storage_dir(value),
                "session_identifier" => self.with_session_identifier(value),
                "flush_interval_secs" => {
                    self.with_flush_interval(Duration::from_secs(parse_value(key, value)?))
                }
                "max_batch_age_secs" => {
                    self.with_max_batch_age(Duration::from_secs(parse_value(key, value)?))
                }
                "connect_timeout_ms" => {
                    self.with_connect_timeout(Duration::from_millis(parse_value(key, value)?))
                }
                "request_timeout_ms" => {
                    self.with_request_timeout(Duration::from_millis(parse_value(key, value)?))
                }
                "allow_metered_network" => self.with_allow_metered_network(parse_bool(key, value)?),
                "strip_backslashes" => self.with_strip_backslashes(parse_bool(key, value)?),
                other => {
                    warn!("BatchLoggerBuilder: ignoring unknown key {other:?} in [{INI_SECTION}]");
                    self
                }
            };
        }

        if let Some(tags) = ini.section(Some(INI_TAGS_SECTION)) {
            self = self.with_tags(collect_entries(tags));
        }
        Ok(self)
    }
}

fn collect_entries(props: &Properties) -> std::collections::BTreeMap<String, String> {
    props
        .iter()
        .map(|(key, value)| (key.to_string(), value.trim().to_string()))
        .collect()
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::InvalidConfig(format!("{key}: cannot parse {value:?}")))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidConfig(format!(
            "{key}: expected a boolean, got {value:?}"
        ))),
    }
}
