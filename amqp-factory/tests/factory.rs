use std::collections::BTreeMap;
use std::time::Duration;

use amqp_factory::{
    resolve_url, ConnectionClass, ConnectionFactory, ConnectionPlan, Error, ParamValue,
    ParameterMap,
};

/// Parameters as a configuration file would give them
fn configured() -> ParameterMap {
    serde_json::from_str(
        r#"{
            "host": "localhost",
            "port": 5672,
            "user": "guest",
            "password": "guest",
            "vhost": "/",
            "ssl_context": null,
            "connection_timeout": 3,
            "read_write_timeout": 3,
            "keepalive": false,
            "heartbeat": 0,
            "channel_rpc_timeout": 0.0,
            "url": null
        }"#,
    )
    .expect("valid parameters")
}

#[test]
fn resolve_without_url_is_identity() -> eyre::Result<()> {
    let mut params = configured();
    params.remove("url");
    assert_eq!(resolve_url(params.clone())?, params);
    Ok(())
}

#[test]
fn resolve_full_url() -> eyre::Result<()> {
    let mut params = configured();
    params.insert("url", "amqp://u:p@h:1234/vh?connection_timeout=9");
    let resolved = resolve_url(params)?;
    assert_eq!(resolved.get("host"), Some(&ParamValue::from("h")));
    assert_eq!(resolved.get("port"), Some(&ParamValue::Int(1234)));
    assert_eq!(resolved.get("user"), Some(&ParamValue::from("u")));
    assert_eq!(resolved.get("password"), Some(&ParamValue::from("p")));
    assert_eq!(resolved.get("vhost"), Some(&ParamValue::from("vh")));
    assert_eq!(
        resolved.get("connection_timeout"),
        Some(&ParamValue::from("9"))
    );
    assert!(!resolved.contains_key("url"));
    // untouched keys survive
    assert_eq!(resolved.get("read_write_timeout"), Some(&ParamValue::Int(3)));
    Ok(())
}

#[test]
fn http_url_is_invalid() {
    let mut params = configured();
    params.insert("url", "http://u:p@h:1234/vh");
    let err = resolve_url(params).unwrap_err();
    assert!(matches!(err, Error::MalformedUrl { .. }));
    assert!(err.to_string().starts_with("Malformed parameter \"url\""));
}

#[test]
fn query_values_are_not_coerced() -> eyre::Result<()> {
    let mut params = configured();
    params.insert("url", "amqp://h:1234/vh?port=abc");
    let resolved = resolve_url(params)?;
    assert_eq!(resolved.get("port"), Some(&ParamValue::from("abc")));

    // the builder is where coercion happens, and it names the key
    let mut params = configured();
    params.insert("url", "amqp://h:1234/vh?port=abc");
    let factory = ConnectionFactory::new(ConnectionClass::Socket, params)?;
    assert!(matches!(
        factory.plan(),
        Err(Error::InvalidParameter { key, .. }) if key == "port"
    ));
    Ok(())
}

#[test]
fn stream_turns_ssl_array_into_context() -> eyre::Result<()> {
    let mut ssl = BTreeMap::new();
    ssl.insert("verify_peer".to_string(), ParamValue::Bool(false));
    ssl.insert("verify_peer_name".to_string(), ParamValue::Bool(false));
    let mut params = configured();
    params.insert("ssl_context", ParamValue::Map(ssl));

    let factory = ConnectionFactory::new(ConnectionClass::Stream, params)?;
    match factory.plan()? {
        ConnectionPlan::Stream {
            context: Some(context),
            ..
        } => {
            assert!(!context.verify_peer);
            assert!(!context.verify_peer_name);
        }
        other => panic!("expected a stream plan with a TLS context, got {other:?}"),
    }
    let opener = factory.create_connection()?;
    assert!(opener.is_tls());
    assert_eq!(opener.domain(), "localhost");
    Ok(())
}

#[test]
fn url_timeouts_reach_the_opener() -> eyre::Result<()> {
    let mut params = configured();
    params.insert(
        "url",
        "amqp://h/?connection_timeout=1.5&read_write_timeout=2&heartbeat=1&channel_rpc_timeout=4",
    );
    let opener = ConnectionFactory::new(ConnectionClass::Stream, params)?.create_connection()?;
    assert_eq!(opener.uri().query.connection_timeout, Some(1500));
    assert_eq!(opener.uri().query.heartbeat, Some(1));
    assert_eq!(opener.open_timeout(), Some(Duration::from_millis(3500)));
    assert_eq!(opener.channel_rpc_timeout(), Some(Duration::from_secs(4)));
    assert_eq!(opener.uri().vhost, "");
    Ok(())
}
