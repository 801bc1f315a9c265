//! Connection parameters, as a loosely typed map and as a typed view.
//!
//! Parameters arrive from configuration files, builders or URL query
//! strings, so values are kept as [`ParamValue`] until a connection is
//! actually planned. [`ConnectionParameters::from_map`] then coerces
//! them, so `"9"` from a query string works as well as `9`.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Key holding an `amqp://` URL that overrides the other parameters
pub const URL: &str = "url";
/// Broker host name
pub const HOST: &str = "host";
/// Broker port
pub const PORT: &str = "port";
/// Login user name
pub const USER: &str = "user";
/// Login password
pub const PASSWORD: &str = "password";
/// Virtual host
pub const VHOST: &str = "vhost";
/// Nullable map of TLS options
pub const SSL_CONTEXT: &str = "ssl_context";
/// TCP connect timeout, seconds
pub const CONNECTION_TIMEOUT: &str = "connection_timeout";
/// Read/write timeout, seconds
pub const READ_WRITE_TIMEOUT: &str = "read_write_timeout";
/// TCP keepalive flag
pub const KEEPALIVE: &str = "keepalive";
/// AMQP heartbeat, seconds
pub const HEARTBEAT: &str = "heartbeat";
/// Timeout for channel RPCs, seconds
pub const CHANNEL_RPC_TIMEOUT: &str = "channel_rpc_timeout";

/// Placeholder written over secrets by [`ParameterMap::redacted`]
const REDACTED: &str = "****";

/// A single loosely typed parameter value
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    /// Explicitly unset
    Null,
    /// Boolean flag
    Bool(bool),
    /// Integer
    Int(i64),
    /// Floating point number
    Float(f64),
    /// String. Everything parsed from a URL ends up here
    Str(String),
    /// List of values
    List(Vec<ParamValue>),
    /// Nested options, e.g. `ssl_context`
    Map(BTreeMap<String, ParamValue>),
}

impl ParamValue {
    /// `true` for [`ParamValue::Null`]
    pub fn is_null(&self) -> bool {
        matches!(self, ParamValue::Null)
    }

    /// The string slice, if this is a [`ParamValue::Str`]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// The nested map, if this is a [`ParamValue::Map`]
    pub fn as_map(&self) -> Option<&BTreeMap<String, ParamValue>> {
        match self {
            ParamValue::Map(m) => Some(m),
            _ => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Null => f.write_str("null"),
            ParamValue::Bool(b) => write!(f, "{b}"),
            ParamValue::Int(i) => write!(f, "{i}"),
            ParamValue::Float(x) => write!(f, "{x}"),
            ParamValue::Str(s) => write!(f, "{s:?}"),
            ParamValue::List(_) => f.write_str("[list]"),
            ParamValue::Map(_) => f.write_str("{map}"),
        }
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Str(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        ParamValue::Str(value)
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        ParamValue::Bool(value)
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        ParamValue::Int(value)
    }
}

impl From<u16> for ParamValue {
    fn from(value: u16) -> Self {
        ParamValue::Int(value.into())
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        ParamValue::Float(value)
    }
}

impl From<Duration> for ParamValue {
    fn from(value: Duration) -> Self {
        ParamValue::Float(value.as_secs_f64())
    }
}

impl From<BTreeMap<String, ParamValue>> for ParamValue {
    fn from(value: BTreeMap<String, ParamValue>) -> Self {
        ParamValue::Map(value)
    }
}

impl<T: Into<ParamValue>> From<Option<T>> for ParamValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(ParamValue::Null, Into::into)
    }
}

/// The flat parameter set for one connection attempt
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterMap(BTreeMap<String, ParamValue>);

impl ParameterMap {
    /// An empty map. Every key takes its default
    pub fn new() -> Self {
        Self::default()
    }

    /// Value stored under `key`
    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.0.get(key)
    }

    /// Store `value` under `key`, returning the previous value
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Option<ParamValue> {
        self.0.insert(key.into(), value.into())
    }

    /// Remove `key`, returning its value
    pub fn remove(&mut self, key: &str) -> Option<ParamValue> {
        self.0.remove(key)
    }

    /// Value stored under `key`, treating [`ParamValue::Null`] as missing
    pub fn present(&self, key: &str) -> Option<&ParamValue> {
        self.0.get(key).filter(|v| !v.is_null())
    }

    /// Whether `key` is present, even if it is [`ParamValue::Null`]
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Iterate over keys and values in key order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParamValue)> {
        self.0.iter()
    }

    /// Number of keys
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// `true` if no key is set
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Overlay every key of `other` onto this map. Keys in `other` win
    pub fn merge(&mut self, other: ParameterMap) {
        self.0.extend(other.0);
    }

    /// A copy safe to log or print: the password and any TLS key
    /// passphrase are masked
    pub fn redacted(&self) -> ParameterMap {
        let mut out = self.clone();
        if let Some(pw) = out.0.get_mut(PASSWORD) {
            if !pw.is_null() {
                *pw = REDACTED.into();
            }
        }
        if let Some(ParamValue::Map(ssl)) = out.0.get_mut(SSL_CONTEXT) {
            if let Some(pass) = ssl.get_mut("passphrase") {
                *pass = REDACTED.into();
            }
        }
        out
    }
}

impl<K: Into<String>, V: Into<ParamValue>> FromIterator<(K, V)> for ParameterMap {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl IntoIterator for ParameterMap {
    type Item = (String, ParamValue);
    type IntoIter = std::collections::btree_map::IntoIter<String, ParamValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Typed connection parameters, after URL resolution and coercion
#[derive(Clone, PartialEq)]
pub struct ConnectionParameters {
    /// Broker host name
    pub host: String,
    /// Broker port
    pub port: u16,
    /// Login user name
    pub user: String,
    /// Login password
    pub password: String,
    /// Virtual host, not percent-encoded
    pub vhost: String,
    /// TLS options, `None` when the key is missing or null
    pub ssl_context: Option<ParamValue>,
    /// TCP connect timeout
    pub connection_timeout: Duration,
    /// Limit for reads and writes during the handshake
    pub read_write_timeout: Duration,
    /// Request TCP keepalive
    pub keepalive: bool,
    /// Heartbeat interval in seconds, 0 disables it
    pub heartbeat: u16,
    /// Limit for channel RPCs, zero disables it
    pub channel_rpc_timeout: Duration,
}

impl Default for ConnectionParameters {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5672,
            user: "guest".to_string(),
            password: "guest".to_string(),
            vhost: "/".to_string(),
            ssl_context: None,
            connection_timeout: Duration::from_secs(3),
            read_write_timeout: Duration::from_secs(3),
            keepalive: false,
            heartbeat: 0,
            channel_rpc_timeout: Duration::ZERO,
        }
    }
}

impl fmt::Debug for ConnectionParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionParameters")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &REDACTED)
            .field("vhost", &self.vhost)
            .field("ssl_context", &self.ssl_context.is_some())
            .field("connection_timeout", &self.connection_timeout)
            .field("read_write_timeout", &self.read_write_timeout)
            .field("keepalive", &self.keepalive)
            .field("heartbeat", &self.heartbeat)
            .field("channel_rpc_timeout", &self.channel_rpc_timeout)
            .finish()
    }
}

impl ConnectionParameters {
    /// Coerce a resolved map into typed parameters. Missing and null
    /// keys keep their defaults, unknown keys are ignored. The `url`
    /// key must already have been resolved, see [`crate::resolve_url`]
    pub fn from_map(map: &ParameterMap) -> Result<Self> {
        let mut params = Self::default();

        if let Some(v) = map.present(HOST) {
            params.host = coerce_string(HOST, v)?;
        }
        if let Some(v) = map.present(PORT) {
            params.port = match coerce_int(PORT, v)? {
                p @ 1..=65535 => p as u16,
                _ => return Err(Error::invalid(PORT, v, "port must be between 1 and 65535")),
            };
        }
        if let Some(v) = map.present(USER) {
            params.user = coerce_string(USER, v)?;
        }
        if let Some(v) = map.present(PASSWORD) {
            params.password = coerce_string(PASSWORD, v)?;
        }
        if let Some(v) = map.present(VHOST) {
            params.vhost = coerce_string(VHOST, v)?;
        }
        params.ssl_context = map.present(SSL_CONTEXT).cloned();
        if let Some(v) = map.present(CONNECTION_TIMEOUT) {
            params.connection_timeout = coerce_duration(CONNECTION_TIMEOUT, v)?;
        }
        if let Some(v) = map.present(READ_WRITE_TIMEOUT) {
            params.read_write_timeout = coerce_duration(READ_WRITE_TIMEOUT, v)?;
        }
        if let Some(v) = map.present(KEEPALIVE) {
            params.keepalive = coerce_bool(KEEPALIVE, v)?;
        }
        if let Some(v) = map.present(HEARTBEAT) {
            params.heartbeat = u16::try_from(coerce_int(HEARTBEAT, v)?)
                .map_err(|_| Error::invalid(HEARTBEAT, v, "heartbeat must be between 0 and 65535 seconds"))?;
        }
        if let Some(v) = map.present(CHANNEL_RPC_TIMEOUT) {
            params.channel_rpc_timeout = coerce_duration(CHANNEL_RPC_TIMEOUT, v)?;
        }
        Ok(params)
    }
}

/// Integer from an int, an integral float or a decimal string
pub(crate) fn coerce_int(key: &str, value: &ParamValue) -> Result<i64> {
    match value {
        ParamValue::Int(i) => Ok(*i),
        ParamValue::Float(x) if x.fract() == 0.0 && x.is_finite() => Ok(*x as i64),
        ParamValue::Str(s) => s
            .trim()
            .parse()
            .map_err(|_| Error::invalid(key, value, "expected an integer")),
        _ => Err(Error::invalid(key, value, "expected an integer")),
    }
}

/// Non-negative number of seconds
pub(crate) fn coerce_duration(key: &str, value: &ParamValue) -> Result<Duration> {
    let secs = match value {
        ParamValue::Int(i) => *i as f64,
        ParamValue::Float(x) => *x,
        ParamValue::Str(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| Error::invalid(key, value, "expected a number of seconds"))?,
        _ => return Err(Error::invalid(key, value, "expected a number of seconds")),
    };
    Duration::try_from_secs_f64(secs)
        .map_err(|_| Error::invalid(key, value, "timeout must be a non-negative number of seconds"))
}

/// Boolean from a bool, 0/1, or the usual string spellings
pub(crate) fn coerce_bool(key: &str, value: &ParamValue) -> Result<bool> {
    match value {
        ParamValue::Bool(b) => Ok(*b),
        ParamValue::Int(0) => Ok(false),
        ParamValue::Int(1) => Ok(true),
        ParamValue::Str(s) => match s.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" | "" => Ok(false),
            _ => Err(Error::invalid(key, value, "expected a boolean")),
        },
        _ => Err(Error::invalid(key, value, "expected a boolean")),
    }
}

/// String, numbers are printed in decimal
pub(crate) fn coerce_string(key: &str, value: &ParamValue) -> Result<String> {
    match value {
        ParamValue::Str(s) => Ok(s.clone()),
        ParamValue::Int(i) => Ok(i.to_string()),
        ParamValue::Float(x) => Ok(x.to_string()),
        _ => Err(Error::invalid(key, value, "expected a string")),
    }
}
