//! Address normalisation.
//!
//! Accepts `host`, `host:port`, `[v6]:port` and, for listeners, `:port`.
//! A missing port becomes [`DEFAULT_PORT`].

use url::Url;

/// Port used when an address string does not name one.
pub const DEFAULT_PORT: u16 = 12457;

/// Error type for address parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    /// Address string is empty or names no host.
    MissingHost(String),
    /// Address could not be parsed.
    Invalid { address: String, reason: String },
}

impl std::fmt::Display for AddressError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AddressError::MissingHost(addr) => write!(f, "No host in address '{}'", addr),
            AddressError::Invalid { address, reason } => {
                write!(f, "Invalid address '{}': {}", address, reason)
            }
        }
    }
}

impl std::error::Error for AddressError {}

/// Normalise an address to dial into `host:port`.
pub fn dial_address(address: &str) -> Result<String, AddressError> {
    let invalid = |reason: String| AddressError::Invalid {
        address: address.to_string(),
        reason,
    };

    let location = Url::parse(&format!("ignore://{}", address)).map_err(|e| match e {
        url::ParseError::EmptyHost => AddressError::MissingHost(address.to_string()),
        other => invalid(other.to_string()),
    })?;

    let host = location
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| AddressError::MissingHost(address.to_string()))?;

    if !location.username().is_empty()
        || location.password().is_some()
        || !location.path().is_empty()
        || location.query().is_some()
        || location.fragment().is_some()
    {
        return Err(invalid("expected host[:port]".to_string()));
    }

    let port = location.port().unwrap_or(DEFAULT_PORT);
    Ok(format!("{}:{}", host, port))
}

/// Normalise an address to listen on. No host means all interfaces.
pub fn listen_address(address: &str) -> Result<String, AddressError> {
    if address.is_empty() {
        return Ok(format!("0.0.0.0:{}", DEFAULT_PORT));
    }
    if address.starts_with(':') {
        return dial_address(&format!("0.0.0.0{}", address));
    }
    dial_address(address)
}
