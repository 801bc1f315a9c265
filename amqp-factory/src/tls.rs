//! TLS context built from an `ssl_context` options map
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use native_tls::{Certificate, Identity, TlsConnector};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::params::{coerce_bool, coerce_string, ParamValue};

/// TLS options, named after the `ssl` stream context options. The
/// default verifies the server certificate and host name
#[derive(Clone, PartialEq)]
pub struct TlsOptions {
    /// PEM formatted CA certificate chain
    pub cafile: Option<PathBuf>,
    /// Client certificate. PEM if [`TlsOptions::local_pk`] is given,
    /// otherwise a PKCS#12 bundle holding both certificate and key
    pub local_cert: Option<PathBuf>,
    /// PEM formatted PKCS#8 private key for [`TlsOptions::local_cert`]
    pub local_pk: Option<PathBuf>,
    /// Password for the PKCS#12 bundle
    pub passphrase: Option<String>,
    /// Verify the server certificate chain
    pub verify_peer: bool,
    /// Verify the server certificate matches the host name
    pub verify_peer_name: bool,
    /// Accept self-signed server certificates
    pub allow_self_signed: bool,
    /// Name to verify the server certificate against, instead of the host
    pub peer_name: Option<String>,
}

impl std::fmt::Debug for TlsOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsOptions")
            .field("cafile", &self.cafile)
            .field("local_cert", &self.local_cert)
            .field("local_pk", &self.local_pk)
            .field("passphrase", &self.passphrase.as_ref().map(|_| "****"))
            .field("verify_peer", &self.verify_peer)
            .field("verify_peer_name", &self.verify_peer_name)
            .field("allow_self_signed", &self.allow_self_signed)
            .field("peer_name", &self.peer_name)
            .finish()
    }
}

impl Default for TlsOptions {
    fn default() -> Self {
        Self {
            cafile: None,
            local_cert: None,
            local_pk: None,
            passphrase: None,
            verify_peer: true,
            verify_peer_name: true,
            allow_self_signed: false,
            peer_name: None,
        }
    }
}

impl TlsOptions {
    /// Options with full verification and no client certificate
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the options out of an `ssl_context` map. Unknown keys are
    /// ignored
    pub fn from_map(map: &BTreeMap<String, ParamValue>) -> Result<Self> {
        let mut options = Self::new();
        for (key, value) in map {
            if value.is_null() {
                continue;
            }
            match key.as_str() {
                "cafile" => options.cafile = Some(coerce_string(key, value)?.into()),
                "local_cert" => options.local_cert = Some(coerce_string(key, value)?.into()),
                "local_pk" => options.local_pk = Some(coerce_string(key, value)?.into()),
                "passphrase" => options.passphrase = Some(coerce_string(key, value)?),
                "verify_peer" => options.verify_peer = coerce_bool(key, value)?,
                "verify_peer_name" => options.verify_peer_name = coerce_bool(key, value)?,
                "allow_self_signed" => options.allow_self_signed = coerce_bool(key, value)?,
                "peer_name" => options.peer_name = Some(coerce_string(key, value)?),
                other => debug!(option = other, "Ignoring unsupported TLS option"),
            }
        }
        Ok(options)
    }

    /// Build the TLS connector these options describe
    pub fn connector(&self) -> Result<TlsConnector> {
        let mut tls_builder = TlsConnector::builder();
        if let Some(cafile) = &self.cafile {
            tls_builder.add_root_certificate(ca_chain_from_file(cafile)?);
        }
        if let Some(cert) = &self.local_cert {
            tls_builder.identity(self.identity(cert)?);
        }
        if !self.verify_peer || self.allow_self_signed {
            warn!("TLS certificate verification is disabled");
            tls_builder.danger_accept_invalid_certs(true);
        }
        if !self.verify_peer_name {
            warn!("TLS host name verification is disabled");
            tls_builder.danger_accept_invalid_hostnames(true);
        }
        Ok(tls_builder.build()?)
    }

    /// Load the client identity, pairing the certificate with
    /// [`TlsOptions::local_pk`] if there is one
    fn identity(&self, cert: &Path) -> Result<Identity> {
        match &self.local_pk {
            Some(key) => Ok(Identity::from_pkcs8(&read(cert)?, &read(key)?)?),
            None => identity_from_file(cert, self.passphrase.as_deref()),
        }
    }
}

/// Read a whole file, remembering its path on failure
fn read(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|e| Error::io(path, e))
}

/// Load a TLS identity from p12 formatted file path
fn identity_from_file(p12_file: &Path, password: Option<&str>) -> Result<Identity> {
    let key_cert = read(p12_file)?;
    Identity::from_pkcs12(&key_cert, password.unwrap_or_default()).map_err(|e| {
        warn!(error=?e, p12_file=%p12_file.display(), "Failed to open key with password");
        e.into()
    })
}

/// Load a certificate authority from a PEM formatted file path
fn ca_chain_from_file(pem_file: &Path) -> Result<Certificate> {
    let ca_chain = read(pem_file)?;
    Ok(Certificate::from_pem(&ca_chain)?)
}

#[cfg(test)]
mod test {
    use std::io::Write;

    use super::*;

    fn map(entries: &[(&str, ParamValue)]) -> BTreeMap<String, ParamValue> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn defaults_verify() -> Result<()> {
        let options = TlsOptions::from_map(&BTreeMap::new())?;
        assert_eq!(options, TlsOptions::new());
        assert!(options.verify_peer);
        assert!(options.verify_peer_name);
        assert!(!options.allow_self_signed);
        Ok(())
    }

    #[test]
    fn default_is_verifying() {
        let options = TlsOptions::default();
        assert_eq!(options, TlsOptions::new());
        assert!(options.verify_peer);
        assert!(options.verify_peer_name);
        assert!(!options.allow_self_signed);
    }

    #[test]
    fn reads_stream_context_keys() -> Result<()> {
        let options = TlsOptions::from_map(&map(&[
            ("cafile", "/etc/ssl/ca.pem".into()),
            ("local_cert", "client.p12".into()),
            ("passphrase", "bunnies".into()),
            ("verify_peer", false.into()),
            ("verify_peer_name", "0".into()),
            ("peer_name", "rabbit.internal".into()),
            ("ciphers", "HIGH".into()),
            ("local_pk", ParamValue::Null),
        ]))?;
        assert_eq!(options.cafile, Some(PathBuf::from("/etc/ssl/ca.pem")));
        assert_eq!(options.local_cert, Some(PathBuf::from("client.p12")));
        assert_eq!(options.local_pk, None);
        assert_eq!(options.passphrase.as_deref(), Some("bunnies"));
        assert!(!options.verify_peer);
        assert!(!options.verify_peer_name);
        assert_eq!(options.peer_name.as_deref(), Some("rabbit.internal"));
        assert!(!format!("{options:?}").contains("bunnies"));
        Ok(())
    }

    #[test]
    fn bad_option_type() {
        let result = TlsOptions::from_map(&map(&[("verify_peer", "sometimes".into())]));
        assert!(matches!(result, Err(Error::InvalidParameter { .. })));
    }

    #[test]
    fn missing_ca_file() {
        let options = TlsOptions {
            cafile: Some("/nonexistent/ca.pem".into()),
            ..TlsOptions::new()
        };
        match options.connector() {
            Err(Error::Io { path, .. }) => assert_eq!(path, PathBuf::from("/nonexistent/ca.pem")),
            other => panic!("expected an io error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn garbage_ca_file() -> eyre::Result<()> {
        let mut pem = tempfile::NamedTempFile::new()?;
        pem.write_all(b"this is not a certificate")?;
        let options = TlsOptions {
            cafile: Some(pem.path().to_owned()),
            ..TlsOptions::new()
        };
        assert!(matches!(options.connector(), Err(Error::Tls(_))));
        Ok(())
    }

    #[test]
    fn connector_without_files() -> Result<()> {
        let options = TlsOptions {
            verify_peer: false,
            ..TlsOptions::new()
        };
        options.connector()?;
        Ok(())
    }
}
