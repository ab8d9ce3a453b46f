//! TLS material for the store connection

use crate::error::{RegistryError, RegistryResult};
use perch_core::TlsConfig;
use rustls_pemfile::{certs, ec_private_keys, pkcs8_private_keys, rsa_private_keys};
use std::io::BufRead;
use std::path::Path;
use tracing::debug;

/// PEM contents read from a [`TlsConfig`]
///
/// Each file has been checked to decode: the certificate and CA files
/// hold at least one certificate and the key file holds a private key.
#[derive(Clone)]
pub struct TlsMaterial {
    pub cert_pem: Vec<u8>,
    pub key_pem: Vec<u8>,
    pub ca_pem: Vec<u8>,
    pub server_name: Option<String>,
}

impl std::fmt::Debug for TlsMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsMaterial")
            .field("cert_pem", &format_args!("{} bytes", self.cert_pem.len()))
            .field("key_pem", &"<redacted>")
            .field("ca_pem", &format_args!("{} bytes", self.ca_pem.len()))
            .field("server_name", &self.server_name)
            .finish()
    }
}

impl TlsMaterial {
    /// Read and decode certificate, key and CA files
    pub fn load(config: &TlsConfig) -> RegistryResult<Self> {
        let cert_pem = read(&config.cert_file)?;
        let key_pem = read(&config.key_file)?;
        let ca_pem = read(&config.ca_file)?;

        let ca_count = count_certificates(&ca_pem)
            .ok_or_else(|| tls_error("failed to parse ca certificate as PEM encoded content"))?;
        let cert_count = count_certificates(&cert_pem).ok_or_else(|| {
            tls_error(format!(
                "no certificates found in certificate file {}",
                config.cert_file
            ))
        })?;
        if !has_private_key(&key_pem) {
            return Err(tls_error(format!(
                "no private key found in key file {}",
                config.key_file
            )));
        }

        debug!(
            ca_certificates = ca_count,
            certificates = cert_count,
            "Loaded TLS material"
        );
        Ok(Self {
            cert_pem,
            key_pem,
            ca_pem,
            server_name: config.server_name.clone(),
        })
    }

    /// Client TLS options for the etcd connection
    #[cfg(feature = "etcd")]
    pub fn into_tls_options(self) -> etcd_client::TlsOptions {
        use etcd_client::{Certificate, Identity, TlsOptions};

        let mut options = TlsOptions::new()
            .ca_certificate(Certificate::from_pem(self.ca_pem))
            .identity(Identity::from_pem(self.cert_pem, self.key_pem));
        if let Some(server_name) = self.server_name {
            options = options.domain_name(server_name);
        }
        options
    }
}

/// Number of certificates in `pem`; None if it holds none or fails to decode
fn count_certificates(pem: &[u8]) -> Option<usize> {
    match certs(&mut &pem[..]) {
        Ok(decoded) if !decoded.is_empty() => Some(decoded.len()),
        _ => None,
    }
}

type PemParser = fn(&mut dyn BufRead) -> std::io::Result<Vec<Vec<u8>>>;

/// PKCS8 first, then RSA, then SEC1 EC keys
const KEY_PARSERS: [PemParser; 3] = [pkcs8_private_keys, rsa_private_keys, ec_private_keys];

fn has_private_key(pem: &[u8]) -> bool {
    KEY_PARSERS
        .iter()
        .any(|parse| matches!(parse(&mut &pem[..]), Ok(keys) if !keys.is_empty()))
}

fn tls_error(reason: impl Into<String>) -> RegistryError {
    RegistryError::Tls {
        reason: reason.into(),
    }
}

fn read(path: &str) -> RegistryResult<Vec<u8>> {
    std::fs::read(Path::new(path))
        .map_err(|e| tls_error(format!("cannot read {}: {}", path, e)))
}
