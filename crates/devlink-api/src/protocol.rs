// ── Protocol handling ──
//
// Turns a `DeviceConfig` into a `TlsPlan`: nothing for plain HTTP, or a
// verification mode plus optional pin and client identity for HTTPS. The
// plan is materialized into a `rustls::ClientConfig` when the connection
// pool is built, so certificate files are read once per pool.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::client::WebPkiServerVerifier;
use rustls::client::danger::ServerCertVerifier;
use rustls::crypto::CryptoProvider;
use rustls::{ClientConfig, RootCertStore};
use rustls_pki_types::pem::PemObject;
use rustls_pki_types::{CertificateDer, PrivateKeyDer};
use tracing::debug;

use crate::config::{ClientIdentity, DeviceConfig, Protocol, Verify};
use crate::error::Error;
use crate::tls::{AcceptAnyCertificate, Fingerprint, PinnedVerifier};

/// How the server certificate chain is judged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    /// Any chain is accepted (the pin, if any, still applies).
    Disabled,
    /// Only chains rooted in this PEM bundle are accepted.
    CaBundle(PathBuf),
    /// Chains rooted in the bundled web PKI roots.
    SystemRoots,
}

/// Resolved HTTPS settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsSettings {
    pub verification: Verification,
    pub pin: Option<Fingerprint>,
    pub client_identity: Option<ClientIdentity>,
}

/// Transport arguments derived from a device configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TlsPlan {
    /// Plain HTTP. SSL settings were not consulted.
    Plain,
    Tls(TlsSettings),
}

/// Resolves scheme and TLS arguments for one device.
#[derive(Debug, Clone)]
pub struct ProtocolHandler {
    protocol: Protocol,
    plan: TlsPlan,
}

impl ProtocolHandler {
    pub fn new(config: &DeviceConfig) -> Self {
        let protocol = config.protocol();
        let plan = match protocol {
            Protocol::Http => TlsPlan::Plain,
            Protocol::Https => {
                let ssl = config.ssl();
                let verification = match ssl.verify() {
                    Verify::Disabled => Verification::Disabled,
                    Verify::CaBundle(path) => Verification::CaBundle(path.clone()),
                    Verify::System => Verification::SystemRoots,
                };
                TlsPlan::Tls(TlsSettings {
                    verification,
                    pin: ssl.pinned_fingerprint().copied(),
                    client_identity: ssl.client_identity().cloned(),
                })
            }
        };
        Self { protocol, plan }
    }

    pub fn scheme(&self) -> &'static str {
        self.protocol.scheme()
    }

    pub fn plan(&self) -> &TlsPlan {
        &self.plan
    }

    /// Build the rustls configuration for this plan, or `None` for plain HTTP.
    ///
    /// Every file problem (missing, unreadable, empty, malformed) is a
    /// security error; there is no fallback to a weaker configuration.
    pub(crate) fn tls_config(&self) -> Result<Option<ClientConfig>, Error> {
        let TlsPlan::Tls(settings) = &self.plan else {
            return Ok(None);
        };

        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let chain = chain_verifier(&settings.verification, &provider)?;
        let verifier: Arc<dyn ServerCertVerifier> = match settings.pin {
            Some(pin) => Arc::new(PinnedVerifier::new(chain, pin)),
            None => chain,
        };
        debug!(
            verification = ?settings.verification,
            pinned = settings.pin.is_some(),
            mutual = settings.client_identity.is_some(),
            "building TLS configuration"
        );

        let builder = ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| Error::tls_caused_by("unsupported TLS protocol versions", e))?
            .dangerous()
            .with_custom_certificate_verifier(verifier);

        let mut config = match &settings.client_identity {
            Some(identity) => {
                let (chain, key) = load_identity(identity)?;
                builder
                    .with_client_auth_cert(chain, key)
                    .map_err(|e| Error::tls_caused_by("client certificate rejected", e))?
            }
            None => builder.with_no_client_auth(),
        };
        config.alpn_protocols = vec![b"http/1.1".to_vec()];
        Ok(Some(config))
    }
}

fn chain_verifier(
    verification: &Verification,
    provider: &Arc<CryptoProvider>,
) -> Result<Arc<dyn ServerCertVerifier>, Error> {
    let roots = match verification {
        Verification::Disabled => {
            return Ok(Arc::new(AcceptAnyCertificate::new(Arc::clone(provider))));
        }
        Verification::SystemRoots => {
            let mut roots = RootCertStore::empty();
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            roots
        }
        Verification::CaBundle(path) => load_ca_bundle(path)?,
    };

    let verifier =
        WebPkiServerVerifier::builder_with_provider(Arc::new(roots), Arc::clone(provider))
            .build()
            .map_err(|e| Error::tls_caused_by("failed to build certificate verifier", e))?;
    Ok(verifier)
}

fn load_ca_bundle(path: &Path) -> Result<RootCertStore, Error> {
    let mut roots = RootCertStore::empty();
    for cert in read_certs(path, "CA bundle")? {
        roots.add(cert).map_err(|e| {
            Error::tls_caused_by(format!("invalid CA certificate in {}", path.display()), e)
        })?;
    }
    Ok(roots)
}

fn load_identity(
    identity: &ClientIdentity,
) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>), Error> {
    let chain = read_certs(&identity.cert_path, "client certificate")?;
    let key = PrivateKeyDer::from_pem_file(&identity.key_path).map_err(|e| {
        Error::tls_caused_by(
            format!("failed to read client key {}", identity.key_path.display()),
            e,
        )
    })?;
    Ok((chain, key))
}

fn read_certs(path: &Path, what: &str) -> Result<Vec<CertificateDer<'static>>, Error> {
    let certs = CertificateDer::pem_file_iter(path)
        .and_then(|certs| certs.collect::<Result<Vec<_>, _>>())
        .map_err(|e| Error::tls_caused_by(format!("failed to read {what} {}", path.display()), e))?;
    if certs.is_empty() {
        return Err(Error::tls(format!(
            "{what} {} contains no certificates",
            path.display()
        )));
    }
    Ok(certs)
}
