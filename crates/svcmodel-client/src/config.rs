//! Client configuration files.
//!
//! A configuration names endpoints; each entry ties a contract name to an
//! address and a binding:
//!
//! ```toml
//! [timeouts]
//! send_secs = 30
//!
//! [endpoints.inventory]
//! contract = "IInventory"
//! address = "net.tcp://warehouse:808/inventory"
//! binding = { kind = "netTcp", security = "None" }
//! ```
//!
//! Environment variables prefixed with `SVCMODEL__` override file values,
//! with `__` separating nested keys (`SVCMODEL__TIMEOUTS__SEND_SECS=5`).

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use svcmodel_channels::{
    BasicHttpBinding, BasicHttpSecurityMode, Binding, BindingElement, CustomBinding,
    HttpClientCredentialType, MemoryTransportBindingElement, MessageCredentialType,
    MessageEncodingBindingElement, NetTcpBinding, SecurityMode, TcpClientCredentialType,
    TransportBindingElement,
};
use svcmodel_core::{EndpointAddress, Error, MessageVersion, Timeouts};

use crate::description::ContractDescription;
use crate::endpoint::ServiceEndpoint;
use crate::logging::LoggingConfig;

/// Prefix of environment variables overriding file settings
pub const ENV_PREFIX: &str = "SVCMODEL";

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file not found
    #[error("configuration file not found: {0}")]
    FileNotFound(PathBuf),

    /// Unsupported file format (use .toml, .yaml, .yml or .json)
    #[error("unsupported configuration format (use .toml, .yaml, .yml, or .json)")]
    UnsupportedFormat,

    /// Parse error
    #[error("failed to parse configuration: {0}")]
    ParseError(#[from] config::ConfigError),

    /// IO error
    #[error("failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),
}

/// Timeouts in whole seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutsConfig {
    /// Open timeout
    pub open_secs: u64,
    /// Close timeout
    pub close_secs: u64,
    /// Send and request/reply timeout
    pub send_secs: u64,
    /// Receive timeout
    pub receive_secs: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Timeouts::default().into()
    }
}

impl From<Timeouts> for TimeoutsConfig {
    fn from(t: Timeouts) -> Self {
        Self {
            open_secs: t.open.as_secs(),
            close_secs: t.close.as_secs(),
            send_secs: t.send.as_secs(),
            receive_secs: t.receive.as_secs(),
        }
    }
}

impl From<TimeoutsConfig> for Timeouts {
    fn from(t: TimeoutsConfig) -> Self {
        Self {
            open: Duration::from_secs(t.open_secs),
            close: Duration::from_secs(t.close_secs),
            send: Duration::from_secs(t.send_secs),
            receive: Duration::from_secs(t.receive_secs),
        }
    }
}

/// Standard binding selected by `kind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum BindingConfig {
    /// [`BasicHttpBinding`]
    BasicHttp {
        /// Security mode
        #[serde(default)]
        security: BasicHttpSecurityMode,
        /// Transport credential
        #[serde(default)]
        credential: HttpClientCredentialType,
    },
    /// [`NetTcpBinding`]
    NetTcp {
        /// Security mode
        #[serde(default)]
        security: SecurityMode,
        /// Transport credential
        #[serde(default)]
        credential: TcpClientCredentialType,
        /// Message credential
        #[serde(default)]
        message_credential: MessageCredentialType,
    },
    /// In-process transport with binary SOAP 1.2 envelopes
    Memory,
}

impl BindingConfig {
    /// Build the binding with `timeouts`
    pub fn create_binding(&self, timeouts: Timeouts) -> Arc<dyn Binding> {
        match *self {
            Self::BasicHttp {
                security,
                credential,
            } => {
                let mut binding =
                    BasicHttpBinding::new(security).with_transport_credential(credential);
                binding.timeouts = timeouts;
                Arc::new(binding)
            }
            Self::NetTcp {
                security,
                credential,
                message_credential,
            } => {
                let mut binding = NetTcpBinding::new(security);
                binding.security.transport_credential = credential;
                binding.security.message_credential = message_credential;
                binding.timeouts = timeouts;
                Arc::new(binding)
            }
            Self::Memory => Arc::new(
                CustomBinding::new(vec![
                    BindingElement::Encoding(MessageEncodingBindingElement::binary(
                        MessageVersion::SOAP12_WSADDRESSING10,
                    )),
                    BindingElement::Transport(TransportBindingElement::Memory(
                        MemoryTransportBindingElement::default(),
                    )),
                ])
                .with_timeouts(timeouts),
            ),
        }
    }
}

/// One configured endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Contract name
    pub contract: String,
    /// Endpoint address
    pub address: String,
    /// Binding
    pub binding: BindingConfig,
    /// Timeouts for this endpoint instead of the global ones
    #[serde(default)]
    pub timeouts: Option<TimeoutsConfig>,
    /// How often a duplex receive loop wakes while idle, in milliseconds
    #[serde(default)]
    pub receive_poll_millis: Option<u64>,
}

/// Client configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Timeouts for endpoints without their own
    pub timeouts: TimeoutsConfig,
    /// Logging
    pub logging: LoggingConfig,
    /// Endpoints by name
    pub endpoints: BTreeMap<String, EndpointConfig>,
}

impl ClientConfig {
    /// Load a configuration file, with environment overrides.
    ///
    /// The format follows the extension: `.toml`, `.yaml`, `.yml` or `.json`.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        Self::from_file_with_prefix(path, ENV_PREFIX)
    }

    /// Load a configuration file, with overrides from variables prefixed `env_prefix`
    pub fn from_file_with_prefix(
        path: impl AsRef<std::path::Path>,
        env_prefix: &str,
    ) -> Result<Self, ConfigError> {
        use config::{Config, File, FileFormat};

        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }

        let format = match path.extension().and_then(|s| s.to_str()) {
            Some("toml") => FileFormat::Toml,
            Some("yaml") | Some("yml") => FileFormat::Yaml,
            Some("json") => FileFormat::Json,
            _ => return Err(ConfigError::UnsupportedFormat),
        };

        let config = Config::builder()
            .add_source(File::new(
                path.to_str().ok_or(ConfigError::UnsupportedFormat)?,
                format,
            ))
            .add_source(
                config::Environment::with_prefix(env_prefix)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Parse TOML text, without environment overrides
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        use config::{Config, File, FileFormat};

        let config = Config::builder()
            .add_source(File::from_str(text, FileFormat::Toml))
            .build()?;
        Ok(config.try_deserialize()?)
    }

    /// Endpoint for `contract`.
    ///
    /// With `name`, the entry of that name, which must be for `contract`.
    /// Otherwise the single entry for `contract`.
    pub fn endpoint_for(
        &self,
        contract: Arc<ContractDescription>,
        name: Option<&str>,
    ) -> svcmodel_core::Result<ServiceEndpoint> {
        let (name, entry) = match name {
            Some(name) => {
                let entry = self.endpoints.get(name).ok_or_else(|| {
                    Error::invalid_operation(format!("no endpoint named '{}' is configured", name))
                })?;
                if entry.contract != contract.name {
                    return Err(Error::invalid_operation(format!(
                        "endpoint '{}' is configured for contract {}, not {}",
                        name, entry.contract, contract.name
                    )));
                }
                (name, entry)
            }
            None => {
                let mut matches = self
                    .endpoints
                    .iter()
                    .filter(|(_, entry)| entry.contract == contract.name);
                let Some((name, entry)) = matches.next() else {
                    return Err(Error::invalid_operation(format!(
                        "no endpoint is configured for contract {}",
                        contract.name
                    )));
                };
                if matches.next().is_some() {
                    return Err(Error::invalid_operation(format!(
                        "more than one endpoint is configured for contract {}; pass an endpoint name",
                        contract.name
                    )));
                }
                (name.as_str(), entry)
            }
        };

        let timeouts = entry.timeouts.unwrap_or(self.timeouts).into();
        let address = EndpointAddress::parse(&entry.address)?;
        tracing::debug!(endpoint = name, contract = %contract.name, address = %address.uri(), "endpoint configured");
        let mut endpoint = ServiceEndpoint::new(contract)
            .with_name(name)
            .with_binding(entry.binding.create_binding(timeouts))
            .with_address(address);
        if let Some(millis) = entry.receive_poll_millis {
            if millis == 0 {
                return Err(Error::invalid_operation(format!(
                    "endpoint '{}' sets receive_poll_millis to zero",
                    name
                )));
            }
            endpoint = endpoint.with_receive_poll_interval(Duration::from_millis(millis));
        }
        Ok(endpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::description::OperationDescription;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    const SAMPLE: &str = r#"
[timeouts]
send_secs = 30

[logging]
level = "debug"

[endpoints.primary]
contract = "IInventory"
address = "net.tcp://warehouse:808/inventory"
binding = { kind = "netTcp", security = "None" }

[endpoints.legacy]
contract = "IInventory"
address = "http://warehouse/inventory.svc"
binding = { kind = "basicHttp" }
timeouts = { send_secs = 90 }

[endpoints.local]
contract = "IPricing"
address = "memory://local/pricing"
binding = { kind = "memory" }
receive_poll_millis = 50
"#;

    fn contract(name: &str) -> Arc<ContractDescription> {
        Arc::new(
            ContractDescription::builder(name)
                .operation(OperationDescription::new("Ping"))
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn parses_endpoints_and_bindings() {
        let config = ClientConfig::from_toml(SAMPLE).unwrap();
        assert_eq!(config.timeouts.send_secs, 30);
        assert_eq!(config.timeouts.open_secs, 60);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.endpoints.len(), 3);
        assert_eq!(
            config.endpoints["primary"].binding,
            BindingConfig::NetTcp {
                security: SecurityMode::None,
                credential: TcpClientCredentialType::Windows,
                message_credential: MessageCredentialType::Windows,
            }
        );
        assert_eq!(config.endpoints["local"].binding, BindingConfig::Memory);
    }

    #[test]
    fn single_endpoint_is_found_by_contract() {
        let config = ClientConfig::from_toml(SAMPLE).unwrap();
        let endpoint = config.endpoint_for(contract("IPricing"), None).unwrap();
        assert_eq!(endpoint.name.as_deref(), Some("local"));
        let (binding, address) = endpoint.validate().unwrap();
        assert_eq!(binding.scheme(), "memory");
        assert_eq!(address.uri().as_str(), "memory://local/pricing");
        assert_eq!(binding.timeouts().send, Duration::from_secs(30));
        assert_eq!(endpoint.receive_poll_interval, Some(Duration::from_millis(50)));
    }

    #[test]
    fn zero_receive_poll_is_rejected() {
        let config = ClientConfig::from_toml(
            r#"
[endpoints.x]
contract = "IPricing"
address = "memory://local/pricing"
binding = { kind = "memory" }
receive_poll_millis = 0
"#,
        )
        .unwrap();
        assert!(matches!(
            config.endpoint_for(contract("IPricing"), Some("x")),
            Err(Error::InvalidOperation(_))
        ));
    }

    #[test]
    fn ambiguous_contract_needs_a_name() {
        let config = ClientConfig::from_toml(SAMPLE).unwrap();
        let err = config.endpoint_for(contract("IInventory"), None).unwrap_err();
        assert!(matches!(err, Error::InvalidOperation(_)));

        let endpoint = config
            .endpoint_for(contract("IInventory"), Some("legacy"))
            .unwrap();
        let binding = endpoint.binding.unwrap();
        assert_eq!(binding.scheme(), "http");
        assert_eq!(binding.timeouts().send, Duration::from_secs(90));
    }

    #[test]
    fn named_endpoint_must_match_contract() {
        let config = ClientConfig::from_toml(SAMPLE).unwrap();
        assert!(config.endpoint_for(contract("IPricing"), Some("primary")).is_err());
        assert!(config.endpoint_for(contract("IPricing"), Some("missing")).is_err());
        assert!(config.endpoint_for(contract("IAudit"), None).is_err());
    }

    #[test]
    fn loads_files_by_extension() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let config = ClientConfig::from_file_with_prefix(file.path(), "SVCMODEL_CONFIG_TEST").unwrap();
        assert_eq!(config.endpoints.len(), 3);

        let other = tempfile::Builder::new().suffix(".ini").tempfile().unwrap();
        assert!(matches!(
            ClientConfig::from_file(other.path()),
            Err(ConfigError::UnsupportedFormat)
        ));
        assert!(matches!(
            ClientConfig::from_file("/nonexistent/client.toml"),
            Err(ConfigError::FileNotFound(_))
        ));
    }

    #[test]
    fn invalid_binding_kind_is_a_parse_error() {
        let text = r#"
[endpoints.x]
contract = "IX"
address = "http://x"
binding = { kind = "carrierPigeon" }
"#;
        assert!(matches!(
            ClientConfig::from_toml(text),
            Err(ConfigError::ParseError(_))
        ));
    }
}
