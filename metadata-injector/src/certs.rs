use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use log::{debug, info};
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::{any_supported_type, CertifiedKey};
use rustls::{Certificate, PrivateKey, ServerConfig};
use rustls_pemfile::{certs, read_all, Item};

use crate::errors::InjectorError;

/// A key/chain pair ready for TLS handshakes, plus where it was read from.
pub struct CertificateState {
    pub certified_key: Arc<CertifiedKey>,
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

fn open(path: &Path, what: &str) -> Result<BufReader<File>, InjectorError> {
    File::open(path).map(BufReader::new).map_err(|e| {
        InjectorError::CertLoadFailed(format!("Unable to open {} file {:?}: {}", what, path, e))
    })
}

/// Reads the PEM certificate chain and private key. All the file I/O of a
/// reload happens here, before any lock is taken.
pub fn load_certificate(cert_path: &Path, key_path: &Path) -> Result<CertificateState, InjectorError> {
    let raw_certs = certs(&mut open(cert_path, "cert")?).map_err(|e| {
        InjectorError::CertLoadFailed(format!("Unable to load certificates: {}", e))
    })?;
    if raw_certs.is_empty() {
        return Err(InjectorError::CertLoadFailed(format!(
            "No certificates found in {:?}",
            cert_path
        )));
    }
    let chain: Vec<Certificate> = raw_certs.into_iter().map(Certificate).collect();

    let key = read_all(&mut open(key_path, "key")?)
        .map_err(|e| InjectorError::CertLoadFailed(format!("Unable to load keys: {}", e)))?
        .into_iter()
        .find_map(|item| match item {
            Item::PKCS8Key(k) | Item::RSAKey(k) | Item::ECKey(k) => Some(PrivateKey(k)),
            _ => None,
        })
        .ok_or_else(|| {
            InjectorError::CertLoadFailed(format!("No private key found in {:?}", key_path))
        })?;
    let signing_key = any_supported_type(&key).map_err(|e| {
        InjectorError::CertLoadFailed(format!("Unsupported private key type: {}", e))
    })?;
    debug!(
        "Loaded certificate chain of {} certificates from {:?}",
        chain.len(),
        cert_path
    );
    Ok(CertificateState {
        certified_key: Arc::new(CertifiedKey::new(chain, signing_key)),
        cert_path: cert_path.to_path_buf(),
        key_path: key_path.to_path_buf(),
    })
}

pub trait CertificateReloader {
    fn reload(&self) -> Result<(), InjectorError>;
}

/// Holds the certificate served on every new TLS handshake.
///
/// Readers clone an `Arc` under the shared lock and writers swap it under the
/// exclusive lock, so a handshake sees either the old or the new pair.
pub struct CertificateStore {
    cert_path: PathBuf,
    key_path: PathBuf,
    current: RwLock<Option<Arc<CertificateState>>>,
}

impl CertificateStore {
    pub fn new(cert_path: PathBuf, key_path: PathBuf) -> Self {
        CertificateStore {
            cert_path,
            key_path,
            current: RwLock::new(None),
        }
    }

    pub fn cert_path(&self) -> &Path {
        &self.cert_path
    }

    pub fn read(&self) -> Option<Arc<CertificateState>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn replace(&self, state: CertificateState) {
        let state = Arc::new(state);
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(state);
    }

    pub fn is_present(&self) -> bool {
        self.read().is_some()
    }

    pub fn server_config(self: &Arc<Self>) -> ServerConfig {
        ServerConfig::builder()
            .with_safe_defaults()
            .with_no_client_auth()
            .with_cert_resolver(Arc::clone(self) as Arc<dyn ResolvesServerCert>)
    }
}

impl CertificateReloader for CertificateStore {
    fn reload(&self) -> Result<(), InjectorError> {
        let state = load_certificate(&self.cert_path, &self.key_path)?;
        info!(
            "cert/key pair reloaded from {:?} and {:?}",
            state.cert_path, state.key_path
        );
        self.replace(state);
        Ok(())
    }
}

impl ResolvesServerCert for CertificateStore {
    fn resolve(&self, _client_hello: ClientHello) -> Option<Arc<CertifiedKey>> {
        self.read().map(|s| Arc::clone(&s.certified_key))
    }
}
