use std::fmt::Debug;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::time::Duration;

use futures::{Stream, StreamExt};
use hyper::server::accept::Accept;
use hyper::server::conn::{AddrIncoming, AddrStream, Http};
use hyper::service::service_fn;
use hyper::{Body, Request, Response};
use log::{debug, error, info, warn};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_rustls::server::TlsStream;

use crate::errors::InjectorError;

/// How long a client may take to send the request head of a connection.
pub const HEADER_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Who is on the other side of a connection, handed to every request of it.
#[derive(Debug, Clone, Copy)]
pub struct PeerInfo {
    pub scheme: &'static str,
    pub remote_addr: SocketAddr,
}

pub trait Connection: AsyncRead + AsyncWrite + Unpin + Send + 'static {
    fn scheme(&self) -> &'static str;
    fn remote_addr(&self) -> SocketAddr;

    fn peer(&self) -> PeerInfo {
        PeerInfo {
            scheme: self.scheme(),
            remote_addr: self.remote_addr(),
        }
    }
}

impl Connection for AddrStream {
    fn scheme(&self) -> &'static str {
        "http"
    }

    fn remote_addr(&self) -> SocketAddr {
        AddrStream::remote_addr(self)
    }
}

impl Connection for TlsStream<AddrStream> {
    fn scheme(&self) -> &'static str {
        "https"
    }

    fn remote_addr(&self) -> SocketAddr {
        self.get_ref().0.remote_addr()
    }
}

pub fn bind(addr: &SocketAddr) -> Result<AddrIncoming, InjectorError> {
    AddrIncoming::bind(addr).map_err(|e| InjectorError::Bind(format!("{}: {}", addr, e)))
}

/// Plain TCP connections of a bound listener as a stream.
pub fn accept_stream(
    mut incoming: AddrIncoming,
) -> impl Stream<Item = Result<AddrStream, std::io::Error>> {
    futures::stream::poll_fn(move |cx| Pin::new(&mut incoming).poll_accept(cx))
}

/// Serves every accepted connection on its own task until `shutdown`
/// changes. Then stops accepting, asks open connections to finish and waits
/// at most `drain_timeout` for them before aborting the rest. Connections
/// that do not complete their request head within `header_read_timeout` are
/// closed.
pub async fn serve<S, C, E, H, F>(
    name: &'static str,
    incoming: S,
    handler: H,
    mut shutdown: watch::Receiver<bool>,
    drain_timeout: Duration,
    header_read_timeout: Duration,
) where
    S: Stream<Item = Result<C, E>>,
    C: Connection,
    E: Debug,
    H: Fn(Request<Body>, PeerInfo) -> F + Clone + Send + 'static,
    F: Future<Output = Result<Response<Body>, hyper::Error>> + Send + 'static,
{
    tokio::pin!(incoming);
    let mut connections = JoinSet::new();
    info!("Starting {} server", name);
    loop {
        tokio::select! {
            conn = incoming.next() => match conn {
                Some(Ok(conn)) => {
                    let peer = conn.peer();
                    debug!("New {} connection from {}", name, peer.remote_addr);
                    let handler = handler.clone();
                    let mut shutdown = shutdown.clone();
                    connections.spawn(async move {
                        let service = service_fn(move |req| handler(req, peer));
                        let connection = Http::new()
                            .http1_header_read_timeout(header_read_timeout)
                            .serve_connection(conn, service);
                        tokio::pin!(connection);
                        let result = tokio::select! {
                            result = connection.as_mut() => result,
                            _ = shutdown.changed() => {
                                connection.as_mut().graceful_shutdown();
                                connection.await
                            }
                        };
                        if let Err(e) = result {
                            warn!("can't write response to {}: {}", peer.remote_addr, e);
                        }
                    });
                }
                Some(Err(e)) => {
                    error!("Error accepting {} connection: {:?}", name, e);
                }
                None => {
                    warn!("{} listener closed", name);
                    break;
                }
            },
            Some(result) = connections.join_next(), if !connections.is_empty() => {
                if let Err(e) = result {
                    error!("{} connection task failed: {}", name, e);
                }
            }
            _ = shutdown.changed() => {
                info!("Stopping {} server", name);
                break;
            }
        }
    }

    let pending = connections.len();
    let drain = async {
        while connections.join_next().await.is_some() {}
    };
    if tokio::time::timeout(drain_timeout, drain).await.is_err() {
        warn!(
            "Aborting {} connections still open after {:?}",
            name, drain_timeout
        );
        connections.shutdown().await;
    }
    info!("{} server stopped ({} connections drained)", name, pending);
}
