//! Choosing how resolved parameters turn into a connection.
//!
//! The three connection classes take their arguments in one of three
//! layouts. A [`ConnectionPlan`] records which layout applies and the
//! typed values for it, and [`ConnectionPlan::into_opener`] maps the
//! layout onto `lapin`.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use lapin::auth::SASLMechanism;
use lapin::uri::{AMQPScheme, AMQPUri};
use lapin::ConnectionProperties;
use tracing::{debug, warn};

use crate::connection::Opener;
use crate::error::{Error, Result};
use crate::params::{ConnectionParameters, ParamValue, SSL_CONTEXT};
use crate::tls::TlsOptions;

/// Locale sent by the stream and TLS layouts
const LOCALE_STREAM: &str = "en_US";
/// Locale sent by the plain layout
const LOCALE_PLAIN: &str = "en_EN";

/// The kind of connection being asked for
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum ConnectionClass {
    /// Stream connection. TLS is optional and configured by a context
    /// built from `ssl_context`
    #[default]
    Stream,
    /// TLS connection taking `ssl_context` as an options bag
    Ssl,
    /// Plain socket connection
    Socket,
}

impl FromStr for ConnectionClass {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "stream" => Ok(Self::Stream),
            "ssl" | "tls" => Ok(Self::Ssl),
            "socket" => Ok(Self::Socket),
            _ => Err(Error::invalid(
                "class",
                s,
                "expected one of stream, ssl or socket",
            )),
        }
    }
}

/// Where to connect and who to log in as
#[derive(Clone, PartialEq)]
pub struct Endpoint {
    /// Broker host
    pub host: String,
    /// Broker port
    pub port: u16,
    /// Login user name
    pub user: String,
    /// Login password
    pub password: String,
    /// Virtual host
    pub vhost: String,
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}:{}/{}", self.user, self.host, self.port, self.vhost)
    }
}

/// Timeouts and liveness settings shared by every layout
#[derive(Clone, Debug, PartialEq)]
pub struct Timeouts {
    /// TCP connect timeout
    pub connection: Duration,
    /// Limit on the handshake after the TCP connection is made
    pub read_write: Duration,
    /// Request TCP keepalive
    pub keepalive: bool,
    /// Heartbeat interval in seconds, 0 disables it
    pub heartbeat: u16,
    /// Limit for channel RPCs, zero disables it
    pub channel_rpc: Duration,
}

/// One of the three argument layouts a connection can be built with
#[derive(Clone, Debug, PartialEq)]
pub enum ConnectionPlan {
    /// Positional layout of the stream class. The TLS context is a
    /// separate, optional argument built from the `ssl_context` map
    Stream {
        /// Where to connect
        endpoint: Endpoint,
        /// Login mechanism
        login: SASLMechanism,
        /// Client locale
        locale: &'static str,
        /// Timeouts
        timeouts: Timeouts,
        /// TLS context, if `ssl_context` was a map
        context: Option<TlsOptions>,
    },
    /// `ssl_context` passed through as an options bag, with the
    /// timeouts bundled into a second options bag
    Tls {
        /// Where to connect
        endpoint: Endpoint,
        /// The `ssl_context` options
        ssl_options: TlsOptions,
        /// Timeouts
        options: Timeouts,
    },
    /// Positional layout without TLS
    Plain {
        /// Where to connect
        endpoint: Endpoint,
        /// Login mechanism
        login: SASLMechanism,
        /// Client locale
        locale: &'static str,
        /// Timeouts
        timeouts: Timeouts,
    },
}

impl ConnectionPlan {
    /// Pick the layout for `class` and fill it from `params`.
    ///
    /// The stream class always uses the stream layout. Every other
    /// class uses the TLS layout when `ssl_context` is set, and the
    /// plain layout when it is not.
    pub fn new(class: ConnectionClass, params: &ConnectionParameters) -> Result<Self> {
        let endpoint = Endpoint {
            host: params.host.clone(),
            port: params.port,
            user: params.user.clone(),
            password: params.password.clone(),
            vhost: params.vhost.clone(),
        };
        let timeouts = Timeouts {
            connection: params.connection_timeout,
            read_write: params.read_write_timeout,
            keepalive: params.keepalive,
            heartbeat: params.heartbeat,
            channel_rpc: params.channel_rpc_timeout,
        };

        let plan = match (class, &params.ssl_context) {
            (ConnectionClass::Stream, ssl_context) => {
                let context = match ssl_context {
                    Some(ParamValue::Map(ssl)) => Some(TlsOptions::from_map(ssl)?),
                    Some(other) => {
                        debug!(ssl_context = %other, "ssl_context is not a map, connecting without TLS");
                        None
                    }
                    None => None,
                };
                ConnectionPlan::Stream {
                    endpoint,
                    login: SASLMechanism::AMQPlain,
                    locale: LOCALE_STREAM,
                    timeouts,
                    context,
                }
            }
            (_, Some(ssl_context)) => {
                let ssl = ssl_context.as_map().ok_or_else(|| {
                    Error::invalid(SSL_CONTEXT, ssl_context, "expected a map of TLS options")
                })?;
                ConnectionPlan::Tls {
                    endpoint,
                    ssl_options: TlsOptions::from_map(ssl)?,
                    options: timeouts,
                }
            }
            (_, None) => ConnectionPlan::Plain {
                endpoint,
                login: SASLMechanism::AMQPlain,
                locale: LOCALE_PLAIN,
                timeouts,
            },
        };
        Ok(plan)
    }

    /// The endpoint, whatever the layout
    pub fn endpoint(&self) -> &Endpoint {
        match self {
            ConnectionPlan::Stream { endpoint, .. }
            | ConnectionPlan::Tls { endpoint, .. }
            | ConnectionPlan::Plain { endpoint, .. } => endpoint,
        }
    }

    /// The timeouts, whatever the layout
    pub fn timeouts(&self) -> &Timeouts {
        match self {
            ConnectionPlan::Stream { timeouts, .. }
            | ConnectionPlan::Tls {
                options: timeouts, ..
            }
            | ConnectionPlan::Plain { timeouts, .. } => timeouts,
        }
    }

    /// TLS options, if the connection will be encrypted
    pub fn tls(&self) -> Option<&TlsOptions> {
        match self {
            ConnectionPlan::Stream { context, .. } => context.as_ref(),
            ConnectionPlan::Tls { ssl_options, .. } => Some(ssl_options),
            ConnectionPlan::Plain { .. } => None,
        }
    }

    /// Short name of the layout, for logging
    pub fn layout(&self) -> &'static str {
        match self {
            ConnectionPlan::Stream { .. } => "stream",
            ConnectionPlan::Tls { .. } => "tls",
            ConnectionPlan::Plain { .. } => "plain",
        }
    }

    /// Build the [`Opener`] for this plan on top of the given base
    /// connection properties. The layout's locale replaces the one in
    /// `properties`
    pub fn into_opener(self, mut properties: ConnectionProperties) -> Result<Opener> {
        let (login, locale) = match &self {
            ConnectionPlan::Stream { login, locale, .. }
            | ConnectionPlan::Plain { login, locale, .. } => (login.clone(), *locale),
            // The TLS class falls back on the client's defaults
            ConnectionPlan::Tls { .. } => (SASLMechanism::AMQPlain, LOCALE_STREAM),
        };
        properties.locale = locale.to_string();

        let endpoint = self.endpoint();
        let timeouts = self.timeouts();
        check_timeouts(timeouts);

        let mut uri = AMQPUri::default();
        uri.scheme = AMQPScheme::AMQP;
        uri.authority.host = endpoint.host.clone();
        uri.authority.port = endpoint.port;
        uri.authority.userinfo.username = endpoint.user.clone();
        uri.authority.userinfo.password = endpoint.password.clone();
        uri.vhost = endpoint.vhost.clone();
        uri.query.auth_mechanism = Some(login);
        uri.query.heartbeat = Some(timeouts.heartbeat);
        if !timeouts.connection.is_zero() {
            uri.query.connection_timeout =
                Some(u64::try_from(timeouts.connection.as_millis()).unwrap_or(u64::MAX));
        }

        let (connector, domain) = match self.tls() {
            Some(tls) => (
                Some(Arc::new(tls.connector()?)),
                tls.peer_name.clone().unwrap_or_else(|| endpoint.host.clone()),
            ),
            None => (None, endpoint.host.clone()),
        };

        let open_timeout =
            (!timeouts.read_write.is_zero()).then(|| timeouts.connection + timeouts.read_write);
        let channel_rpc_timeout = (!timeouts.channel_rpc.is_zero()).then_some(timeouts.channel_rpc);

        Ok(Opener::new(uri, connector, properties)
            .with_domain(domain)
            .with_open_timeout(open_timeout)
            .with_channel_rpc_timeout(channel_rpc_timeout))
    }
}

/// Warn about settings `lapin` cannot honor as asked
fn check_timeouts(timeouts: &Timeouts) {
    if timeouts.keepalive {
        warn!("TCP keepalive cannot be set on lapin connections, use a heartbeat to detect dead peers");
    }
    let heartbeat = Duration::from_secs(timeouts.heartbeat.into());
    if !heartbeat.is_zero() && timeouts.read_write < heartbeat * 2 {
        warn!(
            read_write_timeout = ?timeouts.read_write,
            heartbeat = timeouts.heartbeat,
            "read_write_timeout should be at least twice the heartbeat"
        );
    }
}
