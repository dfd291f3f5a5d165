//! WebSocket extension negotiation (RFC 6455 Section 9).
//!
//! `Sec-WebSocket-Extensions` values are lists of offers separated by
//! commas, each offer being `name; param1=value1; param2`. This module
//! parses and renders that grammar; [`deflate`] and [`negotiator`] give
//! the `permessage-deflate` offers their meaning.

pub mod deflate;
pub mod negotiator;

pub use deflate::{DeflateConfig, DeflateParams, PerMessageDeflate};
pub use negotiator::{DeflateNegotiator, NegotiationState, negotiate};

use crate::error::{Error, Result};
use std::fmt;

/// Represents a single extension parameter.
///
/// For example `client_max_window_bits=15` or `server_no_context_takeover`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionParam {
    /// Parameter name (e.g., "client_max_window_bits").
    pub name: String,
    /// Optional parameter value. None for flag parameters.
    pub value: Option<String>,
}

impl ExtensionParam {
    /// Create a new parameter with a value.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
        }
    }

    /// Create a flag parameter (no value).
    pub fn flag(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
        }
    }

    /// Parse a single parameter (`param=value`, `param="value"` or `param`).
    pub fn parse(s: &str) -> Self {
        let s = s.trim();
        match s.split_once('=') {
            Some((name, value)) => Self {
                name: name.trim().to_string(),
                value: Some(value.trim().trim_matches('"').to_string()),
            },
            None => Self::flag(s),
        }
    }
}

impl fmt::Display for ExtensionParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Some(v) => write!(f, "{}={}", self.name, v),
            None => write!(f, "{}", self.name),
        }
    }
}

/// One extension offer (or accepted response) with its parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionOffer {
    /// Extension name (e.g., "permessage-deflate").
    pub name: String,
    /// Parameters in the order they appeared.
    pub params: Vec<ExtensionParam>,
}

impl ExtensionOffer {
    /// Create a new extension offer with no parameters.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
        }
    }

    /// Create a new extension offer with parameters.
    pub fn with_params(name: impl Into<String>, params: Vec<ExtensionParam>) -> Self {
        Self {
            name: name.into(),
            params,
        }
    }

    /// Parse a single extension offer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidExtension`] if the extension name or a
    /// parameter name is empty.
    pub fn parse(s: &str) -> Result<Self> {
        let mut parts = s.split(';');
        let name = parts.next().unwrap_or_default().trim().to_string();

        if name.is_empty() {
            return Err(Error::InvalidExtension("Empty extension name".into()));
        }

        let params = parts
            .map(|part| {
                let param = ExtensionParam::parse(part);
                if param.name.is_empty() {
                    Err(Error::InvalidExtension(format!(
                        "Empty parameter name in {}",
                        name
                    )))
                } else {
                    Ok(param)
                }
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { name, params })
    }
}

impl fmt::Display for ExtensionOffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        for param in &self.params {
            write!(f, "; {}", param)?;
        }
        Ok(())
    }
}
