//! Builder for [`FemtoBatchLogger`](crate::pipeline::FemtoBatchLogger).
//!
//! Collects credentials, destination, timing and retention settings plus the
//! host collaborators (transport, clock, network monitor, platform tags and
//! formatter). `build()` validates everything, creates the storage directory
//! and starts the pipeline worker.

use std::{collections::BTreeMap, fmt, fs, path::PathBuf, sync::Arc, time::Duration};

use super::{ConfigError, DEFAULT_INGEST_BASE, LoggerConfig, dataspace_endpoint};
use crate::{
    clock::{Clock, SystemClock},
    formatter::{EventFormatter, KeyValueFormatter},
    network::{NetworkMonitor, NetworkStatus},
    pipeline::{Collaborators, FemtoBatchLogger},
    platform::{HostPlatform, PlatformInfo},
    upload::{Transport, UreqTransport},
};

macro_rules! ensure_positive {
    ($value:expr, $field:expr) => {{
        if $value.is_zero() {
            Err(ConfigError::InvalidConfig(format!(
                "{} must be greater than zero",
                $field
            )))
        } else {
            Ok($value)
        }
    }};
}

macro_rules! option_setter {
    ($(#[$meta:meta])* $fn_name:ident, $field:ident, $ty:ty) => {
        $(#[$meta])*
        pub fn $fn_name(mut self, value: $ty) -> Self {
            self.$field = Some(value);
            self
        }
    };
}

/// Builder for constructing [`FemtoBatchLogger`] instances.
#[derive(Clone, Default)]
pub struct BatchLoggerBuilder {
    access_token: Option<String>,
    dataspace: Option<String>,
    endpoint: Option<String>,
    ingest_base: Option<String>,
    storage_dir: Option<PathBuf>,
    flush_interval: Option<Duration>,
    max_batch_age: Option<Duration>,
    allow_metered_network: Option<bool>,
    strip_backslashes: Option<bool>,
    connect_timeout: Option<Duration>,
    request_timeout: Option<Duration>,
    shutdown_timeout: Option<Duration>,
    tags: BTreeMap<String, String>,
    attributes: BTreeMap<String, String>,
    session_identifier: Option<String>,
    transport: Option<Arc<dyn Transport>>,
    clock: Option<Arc<dyn Clock>>,
    network: Option<Arc<dyn NetworkMonitor>>,
    platform: Option<Arc<dyn PlatformInfo>>,
    formatter: Option<Arc<dyn EventFormatter>>,
}

impl BatchLoggerBuilder {
    /// Create a builder with no credentials or destination configured.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the ingest token sent as a bearer credential (required).
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    /// Derive the ingest endpoint from a dataspace name.
    pub fn with_dataspace(mut self, dataspace: impl Into<String>) -> Self {
        self.dataspace = Some(dataspace.into());
        self
    }

    /// Post to `endpoint` verbatim, ignoring any dataspace.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Host used when deriving the endpoint from a dataspace.
    pub fn with_ingest_base(mut self, base: impl Into<String>) -> Self {
        self.ingest_base = Some(base.into());
        self
    }

    pub fn with_storage_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.storage_dir = Some(dir.into());
        self
    }

    option_setter!(
        #[doc = "Set how often buffered events are written to a batch."]
        with_flush_interval,
        flush_interval,
        Duration
    );
    option_setter!(
        #[doc = "Set the age at which undelivered batches are discarded."]
        with_max_batch_age,
        max_batch_age,
        Duration
    );
    option_setter!(
        #[doc = "Allow or defer uploads while the network is metered."]
        with_allow_metered_network,
        allow_metered_network,
        bool
    );
    option_setter!(
        #[doc = "Remove backslashes from every recorded line."]
        with_strip_backslashes,
        strip_backslashes,
        bool
    );
    option_setter!(
        #[doc = "Set the TCP connect timeout for uploads."]
        with_connect_timeout,
        connect_timeout,
        Duration
    );
    option_setter!(
        #[doc = "Set the overall timeout of one upload request."]
        with_request_timeout,
        request_timeout,
        Duration
    );
    option_setter!(
        #[doc = "Bound how long flush and termination wait for the worker."]
        with_shutdown_timeout,
        shutdown_timeout,
        Duration
    );

    /// Add a batch-level tag. Explicit tags override platform tags.
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn with_tags(mut self, tags: BTreeMap<String, String>) -> Self {
        self.tags.extend(tags);
        self
    }

    /// Add an attribute merged into every event.
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn with_session_identifier(mut self, id: impl Into<String>) -> Self {
        self.session_identifier = Some(id.into());
        self
    }

    /// Replace the HTTP transport, e.g. with an in-memory double.
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_network_monitor(mut self, network: Arc<dyn NetworkMonitor>) -> Self {
        self.network = Some(network);
        self
    }

    pub fn with_platform(mut self, platform: Arc<dyn PlatformInfo>) -> Self {
        self.platform = Some(platform);
        self
    }

    pub fn with_formatter(mut self, formatter: Arc<dyn EventFormatter>) -> Self {
        self.formatter = Some(formatter);
        self
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.validate_token()?;
        self.validate_destination()?;
        self.validate_durations()?;
        self.validate_session()?;
        Ok(())
    }

    fn validate_token(&self) -> Result<(), ConfigError> {
        match &self.access_token {
            Some(token) if !token.trim().is_empty() => Ok(()),
            _ => Err(ConfigError::MissingToken),
        }
    }

    fn validate_destination(&self) -> Result<(), ConfigError> {
        if let Some(endpoint) = &self.endpoint {
            let endpoint = endpoint.trim();
            if endpoint.is_empty() {
                return Err(ConfigError::InvalidConfig(
                    "endpoint must not be empty".into(),
                ));
            }
            if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
                return Err(ConfigError::InvalidConfig(format!(
                    "endpoint {endpoint} must use http or https"
                )));
            }
            return Ok(());
        }
        match &self.dataspace {
            Some(dataspace) if !dataspace.trim().is_empty() => Ok(()),
            Some(_) => Err(ConfigError::InvalidConfig(
                "dataspace must not be empty".into(),
            )),
            None => Err(ConfigError::MissingEndpoint),
        }
    }

    fn validate_durations(&self) -> Result<(), ConfigError> {
        let checks = [
            (self.flush_interval, "flush_interval"),
            (self.max_batch_age, "max_batch_age"),
            (self.connect_timeout, "connect_timeout"),
            (self.request_timeout, "request_timeout"),
            (self.shutdown_timeout, "shutdown_timeout"),
        ];
        for (value, field) in checks {
            if let Some(value) = value {
                ensure_positive!(value, field)?;
            }
        }
        Ok(())
    }

    fn validate_session(&self) -> Result<(), ConfigError> {
        match &self.session_identifier {
            Some(id) if id.trim().is_empty() => Err(ConfigError::InvalidConfig(
                "session identifier must not be empty".into(),
            )),
            _ => Ok(()),
        }
    }

    fn resolve_endpoint(&self) -> String {
        if let Some(endpoint) = &self.endpoint {
            return endpoint.trim().to_string();
        }
        let base = self.ingest_base.as_deref().unwrap_or(DEFAULT_INGEST_BASE);
        dataspace_endpoint(base, self.dataspace.as_deref().unwrap_or_default().trim())
    }

    /// Validate the settings and produce the configuration the worker uses.
    pub fn build_config(&self) -> Result<LoggerConfig, ConfigError> {
        self.validate()?;

        let defaults = LoggerConfig::default();
        let mut tags = self
            .platform
            .as_ref()
            .map_or_else(|| HostPlatform::new().tags(), |platform| platform.tags());
        tags.extend(self.tags.clone());

        Ok(LoggerConfig {
            endpoint: self.resolve_endpoint(),
            access_token: self.access_token.clone().unwrap_or_default(),
            storage_dir: self.storage_dir.clone().unwrap_or(defaults.storage_dir),
            flush_interval: self.flush_interval.unwrap_or(defaults.flush_interval),
            max_batch_age: self.max_batch_age.unwrap_or(defaults.max_batch_age),
            allow_metered_network: self
                .allow_metered_network
                .unwrap_or(defaults.allow_metered_network),
            strip_backslashes: self.strip_backslashes.unwrap_or(defaults.strip_backslashes),
            connect_timeout: self.connect_timeout.unwrap_or(defaults.connect_timeout),
            request_timeout: self.request_timeout.unwrap_or(defaults.request_timeout),
            shutdown_timeout: self.shutdown_timeout.unwrap_or(defaults.shutdown_timeout),
            tags,
            attributes: self.attributes.clone(),
            session_identifier: self
                .session_identifier
                .clone()
                .unwrap_or(defaults.session_identifier),
        })
    }

    /// Build the logger and start its worker.
    ///
    /// Pending batches left by a previous run are resubmitted as soon as the
    /// worker starts.
    pub fn build(&self) -> Result<FemtoBatchLogger, ConfigError> {
        let config = self.build_config()?;
        fs::create_dir_all(&config.storage_dir).map_err(|source| ConfigError::Storage {
            path: config.storage_dir.clone(),
            source,
        })?;

        let transport: Arc<dyn Transport> = match &self.transport {
            Some(transport) => Arc::clone(transport),
            None => Arc::new(UreqTransport::new(
                config.endpoint.clone(),
                &config.access_token,
                config.connect_timeout,
                config.request_timeout,
            )?),
        };
        let collaborators = Collaborators {
            transport,
            clock: self.clock.clone().unwrap_or_else(|| Arc::new(SystemClock)),
            network: self
                .network
                .clone()
                .unwrap_or_else(|| Arc::new(NetworkStatus::default())),
            formatter: self
                .formatter
                .clone()
                .unwrap_or_else(|| Arc::new(KeyValueFormatter)),
        };
        FemtoBatchLogger::start(config, collaborators)
    }
}

impl fmt::Debug for BatchLoggerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchLoggerBuilder")
            .field("dataspace", &self.dataspace)
            .field("endpoint", &self.endpoint)
            .field("storage_dir", &self.storage_dir)
            .field("flush_interval", &self.flush_interval)
            .field("max_batch_age", &self.max_batch_age)
            .field("allow_metered_network", &self.allow_metered_network)
            .field("strip_backslashes", &self.strip_backslashes)
            .field("tags", &self.tags)
            .field("attributes", &self.attributes)
            .field("session_identifier", &self.session_identifier)
            .finish_non_exhaustive()
    }
}
