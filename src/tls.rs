use std::fs::File;
use std::io::{self, BufReader, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use pgwire::tokio::TlsAcceptor;
use pgwire::tokio::tokio_rustls::rustls::ServerConfig;
use pgwire::tokio::tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};

/// PEM certificate chain and private key for the listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsFiles {
    pub cert: PathBuf,
    pub key: PathBuf,
}

impl TlsFiles {
    /// Both paths or neither. A lone cert or key is a configuration error.
    pub fn pair(cert: Option<&str>, key: Option<&str>) -> io::Result<Option<Self>> {
        match (cert, key) {
            (None, None) => Ok(None),
            (Some(cert), Some(key)) => Ok(Some(Self {
                cert: cert.into(),
                key: key.into(),
            })),
            _ => Err(io::Error::new(
                ErrorKind::InvalidInput,
                "SLOTGUARD_TLS_CERT and SLOTGUARD_TLS_KEY must be set together",
            )),
        }
    }
}

fn read_chain(path: &Path) -> io::Result<Vec<CertificateDer<'static>>> {
    let chain = rustls_pemfile::certs(&mut BufReader::new(File::open(path)?))
        .collect::<Result<Vec<_>, _>>()?;
    if chain.is_empty() {
        return Err(io::Error::new(
            ErrorKind::InvalidData,
            format!("no certificates in {}", path.display()),
        ));
    }
    Ok(chain)
}

fn read_key(path: &Path) -> io::Result<PrivateKeyDer<'static>> {
    rustls_pemfile::private_key(&mut BufReader::new(File::open(path)?))?.ok_or_else(|| {
        io::Error::new(
            ErrorKind::InvalidData,
            format!("no private key in {}", path.display()),
        )
    })
}

/// Build the acceptor handed to every connection. Advertises the
/// `postgresql` ALPN id so direct-TLS clients negotiate.
pub fn acceptor(files: &TlsFiles) -> io::Result<TlsAcceptor> {
    let mut config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(read_chain(&files.cert)?, read_key(&files.key)?)
        .map_err(|e| io::Error::new(ErrorKind::InvalidInput, e))?;
    config.alpn_protocols = vec![b"postgresql".to_vec()];
    Ok(TlsAcceptor::from(Arc::new(config)))
}

pub fn load_tls_acceptor(
    cert_path: Option<&str>,
    key_path: Option<&str>,
) -> io::Result<Option<TlsAcceptor>> {
    TlsFiles::pair(cert_path, key_path)?
        .map(|files| acceptor(&files))
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plaintext_when_unset() {
        assert!(load_tls_acceptor(None, None).unwrap().is_none());
    }

    #[test]
    fn lone_path_rejected() {
        let err = TlsFiles::pair(Some("cert.pem"), None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert!(TlsFiles::pair(None, Some("key.pem")).is_err());
    }

    #[test]
    fn empty_pem_has_no_chain() {
        let dir = std::env::temp_dir().join("slotguard_test_tls");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("empty.pem");
        std::fs::write(&path, "").unwrap();

        assert_eq!(read_chain(&path).unwrap_err().kind(), ErrorKind::InvalidData);
        assert_eq!(read_key(&path).unwrap_err().kind(), ErrorKind::InvalidData);
    }

    #[test]
    fn missing_file_surfaces_io_error() {
        let files = TlsFiles {
            cert: "/nonexistent/slotguard.crt".into(),
            key: "/nonexistent/slotguard.key".into(),
        };
        let err = acceptor(&files).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
