//! Builder for a [`ConnectionFactory`], setting parameters one at a
//! time instead of filling in a [`ParameterMap`]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::connection::Opener;
use crate::error::{Error, Result};
use crate::factory::ConnectionFactory;
use crate::params::{
    ParamValue, ParameterMap, CHANNEL_RPC_TIMEOUT, CONNECTION_TIMEOUT, HEARTBEAT, HOST, KEEPALIVE,
    PASSWORD, PORT, READ_WRITE_TIMEOUT, SSL_CONTEXT, URL, USER, VHOST,
};
use crate::plan::ConnectionClass;

/// Builder to make a [`ConnectionFactory`] or an [`Opener`], from
/// which you can make a [`lapin::Connection`]
///
/// # Examples
/// ```rust
/// # fn main() -> miette::Result<()>{
/// use amqp_factory::{ConnectionBuilder, ConnectionClass};
/// let opener = ConnectionBuilder::new(ConnectionClass::Stream)
///     .url("amqp://127.0.0.1:5671/%2f")
///     .credentials("guest", "guest")
///     .ssl_option("cafile", "/etc/rabbitmq/ca_certificate.pem")
///     .ssl_option("verify_peer_name", false)
///     .heartbeat(30)
///     .factory()?;
/// # Ok(())}
/// ```
pub struct ConnectionBuilder {
    #[doc(hidden)]
    class: ConnectionClass,
    #[doc(hidden)]
    parameters: ParameterMap,
    #[doc(hidden)]
    ssl_options: Option<BTreeMap<String, ParamValue>>,
    #[doc(hidden)]
    password_file: Option<PathBuf>,
    #[doc(hidden)]
    properties: lapin::ConnectionProperties,
}

impl ConnectionBuilder {
    /// Start building a connection of the given class. Every parameter
    /// starts at its default
    pub fn new(class: ConnectionClass) -> Self {
        Self {
            class,
            parameters: ParameterMap::new(),
            ssl_options: None,
            password_file: None,
            properties: Default::default(),
        }
    }

    /// Take parameters from an `amqp://` URL. Anything the URL sets,
    /// including its query string, wins over the other builder calls
    pub fn url(self, url: &str) -> Self {
        self.param(URL, url)
    }

    /// Broker host name
    pub fn host(self, host: &str) -> Self {
        self.param(HOST, host)
    }

    /// Broker port
    pub fn port(self, port: u16) -> Self {
        self.param(PORT, port)
    }

    /// Log in with the given user name and password
    pub fn credentials(self, user: &str, password: &str) -> Self {
        self.param(USER, user).param(PASSWORD, password)
    }

    /// Read the password from the given file. A single trailing
    /// newline is removed. The file is read by [`Self::factory`]
    pub fn password_file(mut self, password_file: impl AsRef<Path>) -> Self {
        self.password_file = Some(password_file.as_ref().to_owned());
        self
    }

    /// Virtual host, not percent-encoded
    pub fn vhost(self, vhost: &str) -> Self {
        self.param(VHOST, vhost)
    }

    /// Set one TLS option, e.g. `cafile` or `verify_peer`. Setting any
    /// option makes `ssl_context` non-null
    pub fn ssl_option(mut self, key: &str, value: impl Into<ParamValue>) -> Self {
        self.ssl_options
            .get_or_insert_with(BTreeMap::new)
            .insert(key.to_string(), value.into());
        self
    }

    /// Use TLS with the default, fully verifying, options. Implied by
    /// [`Self::ssl_option`]
    pub fn tls(mut self) -> Self {
        self.ssl_options.get_or_insert_with(BTreeMap::new);
        self
    }

    /// TCP connect timeout
    pub fn connection_timeout(self, timeout: Duration) -> Self {
        self.param(CONNECTION_TIMEOUT, timeout)
    }

    /// Limit on the handshake after connecting
    pub fn read_write_timeout(self, timeout: Duration) -> Self {
        self.param(READ_WRITE_TIMEOUT, timeout)
    }

    /// Ask for TCP keepalive
    pub fn keepalive(self, keepalive: bool) -> Self {
        self.param(KEEPALIVE, keepalive)
    }

    /// Heartbeat interval in seconds
    pub fn heartbeat(self, seconds: u16) -> Self {
        self.param(HEARTBEAT, seconds)
    }

    /// Limit on channel RPCs
    pub fn channel_rpc_timeout(self, timeout: Duration) -> Self {
        self.param(CHANNEL_RPC_TIMEOUT, timeout)
    }

    /// Set any parameter by name
    pub fn param(mut self, key: &str, value: impl Into<ParamValue>) -> Self {
        self.parameters.insert(key, value);
        self
    }

    /// Use the given [`lapin::ConnectionProperties`]
    pub fn with_properties(mut self, properties: lapin::ConnectionProperties) -> Self {
        self.properties = properties;
        self
    }

    /// Return the configured [`ConnectionFactory`]
    pub fn factory(mut self) -> Result<ConnectionFactory> {
        if let Some(ssl) = self.ssl_options.take() {
            self.parameters.insert(SSL_CONTEXT, ParamValue::Map(ssl));
        }
        if let Some(pfile) = &self.password_file {
            self.parameters.insert(PASSWORD, read_password(pfile)?);
        }
        Ok(ConnectionFactory::new(self.class, self.parameters)?.with_properties(self.properties))
    }

    /// Return the configured [`crate::Opener`]
    pub fn opener(self) -> Result<Opener> {
        self.factory()?.create_connection()
    }
}

/// Read a password file, dropping one trailing newline
pub(crate) fn read_password(pfile: &Path) -> Result<String> {
    let p = std::fs::read_to_string(pfile).map_err(|e| Error::io(pfile, e))?;
    Ok(match p.strip_suffix('\n') {
        Some(p) => p.to_string(),
        None => p,
    })
}
