//! Session token value type and the authentication capability.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque session credential issued by the WebUI after a successful login.
///
/// Decoupled from any HTTP library's cookie representation: the client only
/// needs the opaque value and the optional expiry.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionToken {
    value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    expiry: Option<DateTime<Utc>>,
}

impl SessionToken {
    pub fn new(value: impl Into<String>, expiry: Option<DateTime<Utc>>) -> Self {
        Self {
            value: value.into(),
            expiry,
        }
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn expiry(&self) -> Option<DateTime<Utc>> {
        self.expiry
    }

    /// A token with no expiry is valid until the server rejects it.
    pub fn is_expired(&self) -> bool {
        match self.expiry {
            Some(expiry) => Utc::now() > expiry,
            None => false,
        }
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionToken")
            .field("value", &"<redacted>")
            .field("expiry", &self.expiry)
            .finish()
    }
}

/// How a request authenticates against the WebUI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authenticator {
    /// Send the request without credentials (the login exchange itself).
    NoAuth,
    /// Attach a session token, negotiating one first if needed.
    Session,
}
