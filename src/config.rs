//! Server connection settings.
//!
//! [`ServerTarget`] is a plain value object: it is deserializable so it can be
//! embedded in an application's own configuration file, but this crate never
//! loads configuration by itself.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Default NNTP port.
pub const DEFAULT_PORT: u16 = 119;

/// Default NNTP-over-TLS port.
pub const DEFAULT_TLS_PORT: u16 = 563;

/// The server every connection in a pool talks to.
///
/// Immutable for the lifetime of a pool.
///
/// # Example
///
/// ```
/// use nntp_pool::ServerTarget;
///
/// let target = ServerTarget::new("news.example.com", 563)
///     .with_tls(true)
///     .with_credentials("reader", "secret");
/// assert_eq!(target.addr(), "news.example.com:563");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerTarget {
    /// Host name or address
    pub host: String,
    /// TCP port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Whether to negotiate TLS immediately after connecting
    #[serde(default)]
    pub tls: bool,
    /// Whether to verify the server certificate when `tls` is set
    #[serde(default = "default_true")]
    pub verify_certificates: bool,
    /// Optional AUTHINFO USER/PASS credentials
    #[serde(default)]
    pub credentials: Option<Credentials>,
}

/// AUTHINFO USER/PASS credentials.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// Username sent with AUTHINFO USER
    pub username: String,
    /// Password sent with AUTHINFO PASS
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_true() -> bool {
    true
}

impl ServerTarget {
    /// Plain-text target without credentials.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            tls: false,
            verify_certificates: true,
            credentials: None,
        }
    }

    /// Enable or disable TLS.
    pub fn with_tls(mut self, tls: bool) -> Self {
        self.tls = tls;
        self
    }

    /// Enable or disable certificate verification for TLS targets.
    pub fn with_certificate_verification(mut self, verify: bool) -> Self {
        self.verify_certificates = verify;
        self
    }

    /// Authenticate every connection with the given credentials.
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some(Credentials {
            username: username.into(),
            password: password.into(),
        });
        self
    }

    /// Address in `host:port` form.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
