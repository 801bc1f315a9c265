use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::{
    builder::read_password,
    error::Result,
    params::{
        ParamValue, ParameterMap, CHANNEL_RPC_TIMEOUT, CONNECTION_TIMEOUT, HEARTBEAT, HOST,
        KEEPALIVE, PASSWORD, PORT, READ_WRITE_TIMEOUT, SSL_CONTEXT, URL, USER, VHOST,
    },
    ConnectionClass, ConnectionFactory,
};

/// Clap derive command-line arguments to make rabbit connections.
///
/// Add this struct to a `clap::Parser` struct to generate the command
/// line options needed to form RabbitMQ connections. Only the options
/// actually given end up in the parameter map, so anything left out
/// keeps its default (or the value from another source merged first).
///
/// # Example
/// ```rust
/// # fn main() -> miette::Result<()>{
/// use clap::Parser;
///
/// #[derive(Debug, clap::Parser)]
/// /// Clap derive command-line arguments to make rabbit connections
/// struct Args {
///     /// Generates all the options needed to create connection factories
///     #[command(flatten)]
///     rabbit: amqp_factory::ConnectionArgs
///     // Any other clap configuration goes here
/// }
///
/// let args = Args::parse_from(["example", "--url", "amqp://rabbit/%2f", "--heartbeat", "30"]);
/// let params = args.rabbit.parameters()?;
/// assert_eq!(params.get("heartbeat"), Some(&amqp_factory::ParamValue::Int(30)));
/// # Ok(()) }
/// ```
#[derive(Clone, Debug, clap::Args)]
pub struct ConnectionArgs {
    /// URL of the rabbitmq server. Values in the URL override the other options
    #[arg(long)]
    url: Option<String>,

    /// Kind of connection to make
    #[arg(long, value_enum, default_value_t = ConnectionClass::Stream)]
    connection_class: ConnectionClass,

    /// Broker host name
    #[arg(long)]
    host: Option<String>,

    /// Broker port
    #[arg(long)]
    port: Option<u16>,

    /// Username for RabbitMQ server
    #[arg(long)]
    user: Option<String>,

    /// Password for RabbitMQ server
    #[arg(long)]
    password: Option<String>,

    /// Plain text file containing the password. A single trailing newline will be removed
    #[arg(long, conflicts_with = "password")]
    password_file: Option<PathBuf>,

    /// Virtual host
    #[arg(long)]
    vhost: Option<String>,

    #[command(flatten)]
    /// Options to control TLS connections
    tls_options: TlsArgs,

    /// TCP connect timeout in seconds
    #[arg(long)]
    connection_timeout: Option<f64>,

    /// Read/write timeout in seconds
    #[arg(long)]
    read_write_timeout: Option<f64>,

    /// Ask for TCP keepalive
    #[arg(long)]
    keepalive: bool,

    /// Heartbeat interval in seconds
    #[arg(long)]
    heartbeat: Option<u16>,

    /// Timeout for channel RPCs in seconds
    #[arg(long)]
    channel_rpc_timeout: Option<f64>,

    /// Any other parameter, as key=value. May be repeated
    #[arg(long = "param", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    params: Vec<(String, String)>,
}

/// Options controlling TLS connections and certificate based
/// authentication. Giving any of them turns TLS on
#[derive(Clone, Debug, Default, clap::Args)]
struct TlsArgs {
    /// PEM formatted CA certificate chain
    #[arg(long)]
    ca_cert: Option<PathBuf>,

    /// Client certificate. PEM if --key is also given, otherwise PKCS#12
    #[arg(long)]
    cert: Option<PathBuf>,

    /// PEM formatted PKCS#8 private key for --cert
    #[arg(long, requires = "cert")]
    key: Option<PathBuf>,

    /// Password for a PKCS#12 --cert, if encrypted
    #[arg(long)]
    key_password: Option<String>,

    /// Name to verify the server certificate against, instead of the host
    #[arg(long)]
    peer_name: Option<String>,

    /// Skip verifying the server certificate
    #[arg(long)]
    insecure: bool,
}

impl TlsArgs {
    /// The `ssl_context` map, or `None` if no TLS option was given
    fn ssl_context(&self) -> Option<BTreeMap<String, ParamValue>> {
        let mut ssl = BTreeMap::new();
        let mut set = |key: &str, value: Option<ParamValue>| {
            if let Some(value) = value {
                ssl.insert(key.to_string(), value);
            }
        };
        let path = |p: &Option<PathBuf>| -> Option<ParamValue> {
            p.as_ref().map(|p| p.display().to_string().into())
        };
        set("cafile", path(&self.ca_cert));
        set("local_cert", path(&self.cert));
        set("local_pk", path(&self.key));
        set("passphrase", self.key_password.clone().map(Into::into));
        set("peer_name", self.peer_name.clone().map(Into::into));
        if self.insecure {
            set("verify_peer", Some(false.into()));
            set("verify_peer_name", Some(false.into()));
        }
        (!ssl.is_empty()).then_some(ssl)
    }
}

/// Split `key=value`
fn parse_key_value(s: &str) -> std::result::Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected KEY=VALUE, got {s:?}"))
}

impl ConnectionArgs {
    /// The requested connection class
    pub fn connection_class(&self) -> ConnectionClass {
        self.connection_class
    }

    /// The parameters given on the command line, with the URL not yet
    /// resolved. Reads the password file, if one was given
    pub fn parameters(&self) -> Result<ParameterMap> {
        let mut params = ParameterMap::new();
        // --param goes first, so that the dedicated options win
        for (key, value) in &self.params {
            params.insert(key.as_str(), value.as_str());
        }
        let mut set = |key: &str, value: Option<ParamValue>| {
            if let Some(value) = value {
                params.insert(key, value);
            }
        };
        set(HOST, self.host.clone().map(Into::into));
        set(PORT, self.port.map(Into::into));
        set(USER, self.user.clone().map(Into::into));
        set(PASSWORD, self.password.clone().map(Into::into));
        set(VHOST, self.vhost.clone().map(Into::into));
        set(CONNECTION_TIMEOUT, self.connection_timeout.map(Into::into));
        set(READ_WRITE_TIMEOUT, self.read_write_timeout.map(Into::into));
        set(KEEPALIVE, self.keepalive.then_some(true.into()));
        set(HEARTBEAT, self.heartbeat.map(Into::into));
        set(CHANNEL_RPC_TIMEOUT, self.channel_rpc_timeout.map(Into::into));
        set(SSL_CONTEXT, self.tls_options.ssl_context().map(Into::into));
        set(URL, self.url.clone().map(Into::into));
        if let Some(pfile) = &self.password_file {
            params.insert(PASSWORD, read_password(pfile)?);
        }
        Ok(params)
    }

    /// Build a factory from `base` with the command line parameters
    /// merged over it. Connections use the tokio executor and reactor,
    /// so this must be called from within a tokio runtime
    pub fn factory_with(&self, mut base: ParameterMap) -> Result<ConnectionFactory> {
        base.merge(self.parameters()?);
        let conn_props = lapin::ConnectionProperties::default()
            .with_executor(tokio_executor_trait::Tokio::current())
            .with_reactor(tokio_reactor_trait::Tokio);
        Ok(ConnectionFactory::new(self.connection_class, base)?.with_properties(conn_props))
    }

    /// Convert the given command line arguments into a
    /// [`ConnectionFactory`]. Must be called from within a tokio
    /// runtime. Equivalent to
    /// `self.factory_with(ParameterMap::new())`
    pub fn factory(&self) -> Result<ConnectionFactory> {
        self.factory_with(ParameterMap::new())
    }
}
