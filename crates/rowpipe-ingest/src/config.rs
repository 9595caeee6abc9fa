//! Run configuration
//!
//! Loaded from a TOML file with `ROWPIPE_`-prefixed environment variables layered on
//! top (`__` separates nested keys, e.g. `ROWPIPE_SINK_CONNECTION__URL`). A plain
//! `DATABASE_URL` is used when no connection URL is configured.

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use rowpipe_common::{Result, RowpipeError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::batch::DEFAULT_BATCH_CAPACITY;
use crate::orchestrator::JobSpec;
use crate::schema::{ColumnSpec, Resource, ResourceSchema};
use crate::source::{CsvFileSource, CsvOptions};

/// Default failure log location
pub const DEFAULT_FAILURE_LOG: &str = "./rowpipe-failures.jsonl";

/// Default pool size; one session keeps transactions strictly sequential
pub const DEFAULT_MAX_CONNECTIONS: u32 = 1;

/// Default connection timeout in seconds
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Prefix for environment overrides
pub const ENV_PREFIX: &str = "ROWPIPE_";

/// Destination database connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkConnection {
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl Default for SinkConnection {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
        }
    }
}

impl SinkConnection {
    /// URL with any password replaced, safe to print or log
    pub fn redacted_url(&self) -> String {
        let Some((scheme, rest)) = self.url.split_once("://") else {
            return self.url.clone();
        };
        let Some((userinfo, host)) = rest.rsplit_once('@') else {
            return self.url.clone();
        };
        match userinfo.split_once(':') {
            Some((user, _)) => format!("{scheme}://{user}:***@{host}"),
            None => self.url.clone(),
        }
    }
}

/// One resource as declared in the configuration file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceConfig {
    pub name: String,
    /// Destination table, defaults to the resource name
    #[serde(default)]
    pub table: Option<String>,
    pub source: PathBuf,
    #[serde(default)]
    pub columns: Vec<ColumnSpec>,
    #[serde(default)]
    pub csv: CsvOptions,
}

impl ResourceConfig {
    pub fn table(&self) -> &str {
        self.table.as_deref().unwrap_or(&self.name)
    }

    pub fn to_resource(&self) -> Resource {
        Resource::new(
            &self.name,
            ResourceSchema::new(self.table(), self.columns.clone()),
        )
    }

    pub fn to_job(&self) -> JobSpec {
        JobSpec::new(self.to_resource(), CsvFileSource::new(&self.source, self.csv))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default = "default_batch_capacity")]
    pub batch_capacity: usize,
    #[serde(default)]
    pub resources: Vec<ResourceConfig>,
    #[serde(default)]
    pub sink_connection: SinkConnection,
    #[serde(default = "default_failure_log")]
    pub failure_log: PathBuf,
}

fn default_batch_capacity() -> usize {
    DEFAULT_BATCH_CAPACITY
}

fn default_max_connections() -> u32 {
    DEFAULT_MAX_CONNECTIONS
}

fn default_connect_timeout_secs() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_SECS
}

fn default_failure_log() -> PathBuf {
    PathBuf::from(DEFAULT_FAILURE_LOG)
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            batch_capacity: DEFAULT_BATCH_CAPACITY,
            resources: Vec::new(),
            sink_connection: SinkConnection::default(),
            failure_log: default_failure_log(),
        }
    }
}

impl RunConfig {
    /// Load from an optional TOML file plus environment overrides
    ///
    /// Relative source paths in the file resolve against the file's directory.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            if !path.is_file() {
                return Err(RowpipeError::config(format!(
                    "config file '{}' does not exist",
                    path.display()
                )));
            }
            info!(path = %path.display(), "Loading run configuration");
        }

        let mut config = Self::from_figment(&Self::figment(path))?;
        if let Some(base) = path.and_then(Path::parent) {
            config.resolve_sources(base);
        }
        if config.sink_connection.url.is_empty() {
            if let Ok(url) = std::env::var("DATABASE_URL") {
                debug!("Using DATABASE_URL for the sink connection");
                config.sink_connection.url = url;
            }
        }
        Ok(config)
    }

    /// Defaults, then the TOML file, then `ROWPIPE_*` variables
    ///
    /// `ROWPIPE_LOG_*` belongs to the logging layer and is left out, in any case.
    pub fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(RunConfig::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        figment.merge(
            Env::prefixed(ENV_PREFIX)
                .filter(|key| !key.starts_with("log_"))
                .split("__"),
        )
    }

    pub fn from_figment(figment: &Figment) -> Result<Self> {
        figment
            .extract()
            .map_err(|e| RowpipeError::config(format!("invalid run configuration: {e}")))
    }

    /// Parse TOML text without consulting the environment
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        Self::from_figment(&Figment::from(Serialized::defaults(RunConfig::default())).merge(Toml::string(toml)))
    }

    fn resolve_sources(&mut self, base: &Path) {
        for resource in &mut self.resources {
            if resource.source.is_relative() {
                resource.source = base.join(&resource.source);
            }
        }
    }

    /// Check everything a run needs; `require_sink` is false for dry runs
    pub fn validate(&self, require_sink: bool) -> Result<()> {
        self.capacity()?;

        if self.resources.is_empty() {
            return Err(RowpipeError::config("no resources configured"));
        }

        let mut names = HashSet::new();
        for resource in &self.resources {
            if resource.name.trim().is_empty() {
                return Err(RowpipeError::config("resource with an empty name"));
            }
            if !names.insert(resource.name.as_str()) {
                return Err(RowpipeError::config(format!(
                    "duplicate resource name '{}'",
                    resource.name
                )));
            }
            if resource.columns.is_empty() {
                return Err(RowpipeError::config(format!(
                    "resource '{}' declares no columns",
                    resource.name
                )));
            }
            let mut columns = HashSet::new();
            if let Some(dup) = resource
                .columns
                .iter()
                .find(|c| !columns.insert(c.name.as_str()))
            {
                return Err(RowpipeError::config(format!(
                    "resource '{}' declares column '{}' twice",
                    resource.name, dup.name
                )));
            }
            if resource.csv.as_bytes().is_none() {
                return Err(RowpipeError::config(format!(
                    "resource '{}' needs an ASCII delimiter and quote",
                    resource.name
                )));
            }
        }

        if require_sink {
            if self.sink_connection.url.trim().is_empty() {
                return Err(RowpipeError::config(
                    "sink_connection.url is empty (set it in the config, ROWPIPE_SINK_CONNECTION__URL or DATABASE_URL)",
                ));
            }
            if self.sink_connection.max_connections == 0 {
                return Err(RowpipeError::config("sink_connection.max_connections must be at least 1"));
            }
        }

        Ok(())
    }

    pub fn capacity(&self) -> Result<NonZeroUsize> {
        NonZeroUsize::new(self.batch_capacity)
            .ok_or_else(|| RowpipeError::config("batch_capacity must be a positive integer"))
    }

    pub fn resources(&self) -> Vec<Resource> {
        self.resources.iter().map(ResourceConfig::to_resource).collect()
    }

    /// Jobs in configuration order, restricted to `only` when it is non-empty
    pub fn jobs(&self, only: &[String]) -> Result<Vec<JobSpec>> {
        if let Some(unknown) = only
            .iter()
            .find(|name| !self.resources.iter().any(|r| &r.name == *name))
        {
            return Err(RowpipeError::UnknownResource(unknown.clone()));
        }

        Ok(self
            .resources
            .iter()
            .filter(|r| only.is_empty() || only.contains(&r.name))
            .map(ResourceConfig::to_job)
            .collect())
    }
}
