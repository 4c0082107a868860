//! The transport pool: an authority-keyed collection of HTTP/2
//! sessions, connection selection and establishment, and the
//! retry-on-graceful-shutdown loop.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;
use tracing::debug;

use crate::conn::{self, Conn};
use crate::error::Error;
use crate::tunnel::Tunnel;
use crate::types::{Request, Response};

/// Where non-HTTPS requests go when the embedder provides one.
pub trait Fallback: Send + Sync {
    fn round_trip<'a>(
        &'a self,
        req: &'a mut Request,
    ) -> Pin<Box<dyn Future<Output = Result<Response, Error>> + Send + 'a>>;
}

/// Resolves the proxy to dial for a request, overriding the request
/// URI's own authority.
pub type ProxyFn = Box<dyn Fn(&Request) -> Result<http::Uri, Error> + Send + Sync>;

/// Embedder-facing knobs. Everything defaults to off.
#[derive(Default)]
pub struct TransportConfig {
    /// Skip certificate verification on dial. The handshake still runs;
    /// the presented certificate is simply not checked.
    pub insecure_tls: bool,

    /// When set, every request is dialed through the resolved proxy
    /// authority instead of its own.
    pub proxy: Option<ProxyFn>,

    /// Round-tripper for requests this transport does not handle
    /// (non-HTTPS schemes without a proxy).
    pub fallback: Option<Arc<dyn Fallback>>,
}

/// The authority-keyed map of live sessions. Shared with every
/// connection so the reader task can remove its connection on exit.
pub(crate) struct PoolInner {
    pub(crate) conns: Mutex<HashMap<String, Vec<Arc<Conn>>>>,
}

impl PoolInner {
    /// Drop a connection from every key it is registered under,
    /// deleting emptied lists. Identity is by pointer, not by key.
    pub(crate) async fn remove_conn(&self, conn: &Arc<Conn>) {
        let mut conns = self.conns.lock().await;
        for key in conn.pool_keys() {
            if let Some(list) = conns.get_mut(key) {
                list.retain(|candidate| !Arc::ptr_eq(candidate, conn));
                if list.is_empty() {
                    conns.remove(key);
                }
            }
        }
    }
}

/// A pooled, multiplexing HTTP/2 client transport.
///
/// Requests to the same `host:port` authority share a connection for as
/// long as it will take new streams; connections that received GOAWAY
/// (or died) drop out of the pool and a fresh one is dialed.
pub struct Transport {
    pool: Arc<PoolInner>,
    connector: TlsConnector,
    proxy: Option<ProxyFn>,
    fallback: Option<Arc<dyn Fallback>>,
}

impl Default for Transport {
    fn default() -> Self {
        Self::new(TransportConfig::default())
    }
}

impl Transport {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            pool: Arc::new(PoolInner {
                conns: Mutex::new(HashMap::new()),
            }),
            connector: tls_connector(config.insecure_tls),
            proxy: config.proxy,
            fallback: config.fallback,
        }
    }

    /// Issue a request and return its response. Non-HTTPS requests are
    /// delegated to the fallback (or rejected). An attempt that finds
    /// its connection closed under it is retried on a fresh connection,
    /// up to three attempts total.
    pub async fn round_trip(&self, req: &mut Request) -> Result<Response, Error> {
        if req.uri.scheme_str() != Some("https") && self.proxy.is_none() {
            return match &self.fallback {
                Some(fallback) => fallback.round_trip(req).await,
                None => Err(Error::UnsupportedScheme {
                    scheme: req.uri.scheme_str().unwrap_or_default().to_string(),
                }),
            };
        }
        let (host, port) = self.target(req)?;

        for _ in 0..MAX_ATTEMPTS {
            let conn = self.get_conn(&host, port).await?;
            match conn.round_trip(req).await {
                Err(err) if should_retry(&err) => {
                    debug!(%err, "connection lost the race, retrying");
                }
                res => return res,
            }
        }
        Err(Error::RetriesExhausted {
            attempts: MAX_ATTEMPTS,
        })
    }

    /// Open a CONNECT tunnel to the request's target, with the same
    /// selection and retry behavior as [`Transport::round_trip`].
    pub async fn connect(&self, req: &mut Request) -> Result<Tunnel, Error> {
        let (host, port) = self.target(req)?;

        for _ in 0..MAX_ATTEMPTS {
            let conn = self.get_conn(&host, port).await?;
            match conn.connect(req).await {
                Err(err) if should_retry(&err) => {
                    debug!(%err, "connection lost the race, retrying");
                }
                res => return res,
            }
        }
        Err(Error::RetriesExhausted {
            attempts: MAX_ATTEMPTS,
        })
    }

    /// Close every connection with no streams in flight. Connections
    /// currently serving requests are left alone.
    pub async fn close_idle(&self) {
        let conns = self.pool.conns.lock().await;
        for list in conns.values() {
            for conn in list {
                conn.close_if_idle().await;
            }
        }
    }

    /// The `host:port` to dial: the proxy's when one is configured,
    /// the request URI's otherwise. Port defaults to 443.
    fn target(&self, req: &Request) -> Result<(String, u16), Error> {
        let proxied;
        let uri = match &self.proxy {
            Some(proxy) => {
                proxied = proxy(req)?;
                &proxied
            }
            None => &req.uri,
        };
        let host = uri.host().ok_or(Error::MissingHost)?.to_string();
        Ok((host, uri.port_u16().unwrap_or(443)))
    }

    /// Select the first pooled connection for the authority that can
    /// take a new request, or dial a fresh one and pool it.
    async fn get_conn(&self, host: &str, port: u16) -> Result<Arc<Conn>, Error> {
        let key = format!("{host}:{port}");
        let mut conns = self.pool.conns.lock().await;

        if let Some(list) = conns.get(&key) {
            for conn in list {
                if conn.can_take_new_request().await {
                    return Ok(conn.clone());
                }
            }
        }

        let conn = self.dial(host, port, key.clone()).await?;
        conns.entry(key).or_default().push(conn.clone());
        Ok(conn)
    }

    /// Dial TCP + TLS (ALPN `h2`, mutual agreement required) and run the
    /// HTTP/2 opening handshake.
    async fn dial(&self, host: &str, port: u16, key: String) -> Result<Arc<Conn>, Error> {
        let tcp = TcpStream::connect((host, port))
            .await
            .map_err(|e| Error::Connect(Arc::new(e)))?;
        let addrs = tcp.local_addr().ok().zip(tcp.peer_addr().ok());

        let server_name = ServerName::try_from(host.to_string())
            .map_err(|_| Error::InvalidServerName(host.to_string()))?;
        let tls = self
            .connector
            .connect(server_name, tcp)
            .await
            .map_err(|e| Error::Connect(Arc::new(e)))?;

        let (_, session) = tls.get_ref();
        match session.alpn_protocol() {
            Some(proto) if proto == weft_h2::ALPN_H2 => {}
            other => {
                return Err(Error::AlpnMismatch(
                    other.map(|p| String::from_utf8_lossy(p).into_owned()),
                ))
            }
        }

        conn::handshake_inner(tls, Arc::downgrade(&self.pool), vec![key], addrs).await
    }
}

const MAX_ATTEMPTS: usize = 3;

/// Only the select-then-close race is worth another attempt; anything
/// else may have reached the wire.
fn should_retry(err: &Error) -> bool {
    matches!(err, Error::ConnClosed)
}

fn tls_connector(insecure: bool) -> TlsConnector {
    let mut config = if insecure {
        ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(danger::NoVerify::new()))
            .with_no_client_auth()
    } else {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth()
    };
    config.alpn_protocols = vec![weft_h2::ALPN_H2.to_vec()];
    TlsConnector::from(Arc::new(config))
}

mod danger {
    use tokio_rustls::rustls::client::danger::{
        HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
    };
    use tokio_rustls::rustls::crypto::{
        verify_tls12_signature, verify_tls13_signature, CryptoProvider,
    };
    use tokio_rustls::rustls::pki_types::{CertificateDer, ServerName, UnixTime};
    use tokio_rustls::rustls::{self, DigitallySignedStruct, SignatureScheme};

    /// Verifier behind the insecure-TLS toggle: accepts any certificate
    /// but still verifies handshake signatures.
    #[derive(Debug)]
    pub(super) struct NoVerify(CryptoProvider);

    impl NoVerify {
        pub(super) fn new() -> Self {
            Self(rustls::crypto::aws_lc_rs::default_provider())
        }
    }

    impl ServerCertVerifier for NoVerify {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> Result<ServerCertVerified, rustls::Error> {
            Ok(ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            message: &[u8],
            cert: &CertificateDer<'_>,
            dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
        }

        fn verify_tls13_signature(
            &self,
            message: &[u8],
            cert: &CertificateDer<'_>,
            dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            self.0.signature_verification_algorithms.supported_schemes()
        }
    }
}
