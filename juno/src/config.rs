//! Module configuration.

use std::collections::BTreeMap;
use std::time::Duration;

use juno_proto::DEFAULT_SOCKET;

use crate::connection::Endpoint;
use crate::error::{Error, Result};

/// Environment variable naming the host endpoint.
pub const ENV_SOCKET: &str = "JUNO_SOCKET";

/// Everything needed to connect a module to the host and initialize it.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct ModuleConfig {
    /// Name the module registers under.
    pub module_id: String,
    /// Module version.
    pub version: String,
    /// Required modules mapped to version requirements.
    pub dependencies: BTreeMap<String, String>,
    /// Host endpoint.
    pub endpoint: Endpoint,
    /// Deadline applied by callers that use [`Module::wait_for`].
    ///
    /// [`Module::wait_for`]: crate::Module::wait_for
    pub request_timeout: Option<Duration>,
}

impl ModuleConfig {
    /// Returns a builder with no module id, version, or endpoint set.
    pub fn builder() -> ModuleConfigBuilder {
        ModuleConfigBuilder::default()
    }

    /// Resolves the endpoint from [`ENV_SOCKET`], falling back to
    /// `../juno.sock`.
    pub fn endpoint_from_env() -> Result<Endpoint> {
        std::env::var(ENV_SOCKET)
            .ok()
            .filter(|s| !s.trim().is_empty())
            .as_deref()
            .unwrap_or(DEFAULT_SOCKET)
            .parse()
    }
}

/// Builder for [`ModuleConfig`].
///
/// # Example
///
/// ```
/// use std::time::Duration;
///
/// let config = juno::ModuleConfig::builder()
///     .module_id("math")
///     .version("1.0.0")
///     .dependency("juno", "^0.1")
///     .endpoint("/run/juno.sock")
///     .request_timeout(Duration::from_secs(5))
///     .build()
///     .expect("invalid module config");
/// assert_eq!(config.module_id, "math");
/// ```
#[derive(Debug, Default)]
#[must_use = "a ModuleConfigBuilder does nothing until .build() is called"]
pub struct ModuleConfigBuilder {
    /// Module name.
    module_id: Option<String>,
    /// Module version.
    version: Option<String>,
    /// Accumulated dependencies.
    dependencies: BTreeMap<String, String>,
    /// Raw endpoint string; parsed in [`Self::build`].
    endpoint: Option<String>,
    /// Optional reply deadline.
    request_timeout: Option<Duration>,
}

impl ModuleConfigBuilder {
    /// Sets the module name.
    pub fn module_id(mut self, id: impl Into<String>) -> Self {
        self.module_id = Some(id.into());
        self
    }

    /// Sets the module version.
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Adds a dependency on `module` at `version`. Repeating a module
    /// replaces its version.
    pub fn dependency(mut self, module: impl Into<String>, version: impl Into<String>) -> Self {
        self.dependencies.insert(module.into(), version.into());
        self
    }

    /// Sets the host endpoint (`unix:<path>`, `tcp:<host:port>`, or bare).
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Sets the reply deadline.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Validates and builds the configuration.
    ///
    /// Without an explicit endpoint, [`ModuleConfig::endpoint_from_env`]
    /// decides.
    pub fn build(self) -> Result<ModuleConfig> {
        let module_id = self
            .module_id
            .filter(|s| !s.is_empty())
            .ok_or(Error::Config("module id must not be empty"))?;
        let version = self
            .version
            .filter(|s| !s.is_empty())
            .ok_or(Error::Config("version must not be empty"))?;
        let endpoint = match self.endpoint {
            Some(s) => s.parse()?,
            None => ModuleConfig::endpoint_from_env()?,
        };
        if self.request_timeout.is_some_and(|t| t.is_zero()) {
            return Err(Error::Config("request timeout must be positive"));
        }
        Ok(ModuleConfig {
            module_id,
            version,
            dependencies: self.dependencies,
            endpoint,
            request_timeout: self.request_timeout,
        })
    }
}
