//! Endpoint addresses.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Error, Result};

/// A header that must accompany every message sent to an address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddressHeader {
    /// Local name
    pub name: String,
    /// Namespace
    pub namespace: String,
    /// Header content
    pub value: serde_json::Value,
}

/// Expected identity of the remote endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EndpointIdentity {
    /// DNS name
    Dns(String),
    /// User principal name
    Upn(String),
    /// Service principal name
    Spn(String),
}

/// The address of a remote endpoint: a URI plus optional reference headers and identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointAddress {
    uri: Url,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    headers: Vec<AddressHeader>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    identity: Option<EndpointIdentity>,
}

impl EndpointAddress {
    /// Address for `uri`
    pub fn new(uri: Url) -> Self {
        Self {
            uri,
            headers: Vec::new(),
            identity: None,
        }
    }

    /// Parse an absolute URI
    pub fn parse(uri: &str) -> Result<Self> {
        Ok(Self::new(Url::parse(uri)?))
    }

    /// The URI
    pub fn uri(&self) -> &Url {
        &self.uri
    }

    /// URI scheme, e.g. `http` or `net.tcp`
    pub fn scheme(&self) -> &str {
        self.uri.scheme()
    }

    /// Reference headers
    pub fn headers(&self) -> &[AddressHeader] {
        &self.headers
    }

    /// Expected identity
    pub fn identity(&self) -> Option<&EndpointIdentity> {
        self.identity.as_ref()
    }

    /// Add a reference header
    pub fn with_header(mut self, header: AddressHeader) -> Self {
        self.headers.push(header);
        self
    }

    /// Set the expected identity
    pub fn with_identity(mut self, identity: EndpointIdentity) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Fail unless the scheme is one of `schemes`
    pub fn ensure_scheme(&self, schemes: &[&str]) -> Result<()> {
        if schemes.contains(&self.scheme()) {
            Ok(())
        } else {
            Err(Error::invalid_operation(format!(
                "the provided URI scheme '{}' is invalid; expected one of {:?}",
                self.scheme(),
                schemes
            )))
        }
    }
}

impl FromStr for EndpointAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for EndpointAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.uri.as_str())
    }
}
