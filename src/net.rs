//! Address parsing and TCP/Unix dial+listen (component L5).
//!
//! An `Endpoint` is this core's one address type, covering everything a
//! `-connect`/`-listen` flag can name: `host:port`, `[v6]:port`, `/path`
//! (Unix socket), and `@abstract` (Linux abstract namespace socket).
//! `Conn`/`Listener` are small enums that erase the TCP/Unix distinction
//! behind `AsyncRead`/`AsyncWrite` so the HTTP/1 and HTTP/2 engines never
//! need to know which transport they're running over.

use std::fmt;
use std::net::SocketAddr;
use std::os::linux::net::SocketAddrExt;
use std::path::PathBuf;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{self, AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream, UnixListener, UnixStream};

use crate::error::{Error, Result};

/// A parsed dial/listen target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// `host:port` or `[ipv6]:port`.
    Tcp(String, u16),
    /// `/path/to.sock`.
    UnixPath(PathBuf),
    /// `@name`, a Linux abstract-namespace socket.
    UnixAbstract(String),
}

/// Parse a `-connect`/`-listen` address argument.
///
/// Grammar: `/...` or `./...` is a Unix path; `@name` is an abstract Unix
/// socket; `[addr]:port` is bracketed (for IPv6 literals); otherwise
/// `host:port`.
pub fn parse_address(s: &str) -> Result<Endpoint> {
    if let Some(name) = s.strip_prefix('@') {
        return Ok(Endpoint::UnixAbstract(name.to_string()));
    }
    if s.starts_with('/') || s.starts_with("./") || s.starts_with("../") {
        return Ok(Endpoint::UnixPath(PathBuf::from(s)));
    }
    if let Some(rest) = s.strip_prefix('[') {
        let (host, rest) = rest
            .split_once(']')
            .ok_or_else(|| Error::user(format!("unterminated '[' in address {:?}", s)))?;
        let port = rest
            .strip_prefix(':')
            .ok_or_else(|| Error::user(format!("missing port in address {:?}", s)))?;
        let port: u16 = port
            .parse()
            .map_err(|_| Error::user(format!("bad port in address {:?}", s)))?;
        return Ok(Endpoint::Tcp(host.to_string(), port));
    }
    let (host, port) = s
        .rsplit_once(':')
        .ok_or_else(|| Error::user(format!("missing port in address {:?}", s)))?;
    let port: u16 = port
        .parse()
        .map_err(|_| Error::user(format!("bad port in address {:?}", s)))?;
    Ok(Endpoint::Tcp(host.to_string(), port))
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp(host, port) => write!(f, "{}:{}", host, port),
            Endpoint::UnixPath(path) => write!(f, "{}", path.display()),
            Endpoint::UnixAbstract(name) => write!(f, "@{}", name),
        }
    }
}

/// An accepted or dialed connection, transport-erased.
#[derive(Debug)]
pub enum Conn {
    /// A TCP stream.
    Tcp(TcpStream),
    /// A Unix-domain stream (path-based or abstract).
    Unix(UnixStream),
}

impl AsyncRead for Conn {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Conn::Tcp(s) => Pin::new(s).poll_read(cx, buf),
            Conn::Unix(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Conn {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Conn::Tcp(s) => Pin::new(s).poll_write(cx, buf),
            Conn::Unix(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Conn::Tcp(s) => Pin::new(s).poll_flush(cx),
            Conn::Unix(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Conn::Tcp(s) => Pin::new(s).poll_shutdown(cx),
            Conn::Unix(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}

/// A bound listening socket, transport-erased.
pub enum Listener {
    /// A bound TCP listener.
    Tcp(TcpListener),
    /// A bound Unix-domain listener (path-based or abstract).
    Unix(UnixListener),
}

/// What a listener ended up bound to: resolved host/port, or a Unix path.
#[derive(Debug, Clone)]
pub struct BoundAddr {
    /// `addr:port` for TCP, or the filesystem/abstract path for Unix.
    pub sock: String,
    /// The resolved host, empty for Unix sockets.
    pub host: String,
    /// The resolved port, `0` for Unix sockets.
    pub port: u16,
}

impl Listener {
    /// Bind a listening socket for `endpoint`.
    pub async fn bind(endpoint: &Endpoint) -> Result<(Listener, BoundAddr)> {
        match endpoint {
            Endpoint::Tcp(host, port) => {
                let addr = resolve(host, *port)?;
                let listener = TcpListener::bind(addr).await?;
                let local = listener.local_addr()?;
                let bound = BoundAddr {
                    sock: local.to_string(),
                    host: local.ip().to_string(),
                    port: local.port(),
                };
                Ok((Listener::Tcp(listener), bound))
            }
            Endpoint::UnixPath(path) => {
                let _ = std::fs::remove_file(path);
                let listener = UnixListener::bind(path)?;
                let bound = BoundAddr {
                    sock: path.display().to_string(),
                    host: String::new(),
                    port: 0,
                };
                Ok((Listener::Unix(listener), bound))
            }
            Endpoint::UnixAbstract(name) => {
                let addr = std::os::unix::net::SocketAddr::from_abstract_name(name.as_bytes())
                    .map_err(Error::from)?;
                let std_listener = std::os::unix::net::UnixListener::bind_addr(&addr)?;
                std_listener.set_nonblocking(true)?;
                let listener = UnixListener::from_std(std_listener)?;
                let bound = BoundAddr {
                    sock: format!("@{}", name),
                    host: String::new(),
                    port: 0,
                };
                Ok((Listener::Unix(listener), bound))
            }
        }
    }

    /// Accept one connection.
    pub async fn accept(&self) -> Result<Conn> {
        match self {
            Listener::Tcp(l) => Ok(Conn::Tcp(l.accept().await?.0)),
            Listener::Unix(l) => Ok(Conn::Unix(l.accept().await?.0)),
        }
    }
}

/// Dial `endpoint`.
pub async fn dial(endpoint: &Endpoint) -> Result<Conn> {
    match endpoint {
        Endpoint::Tcp(host, port) => {
            let addr = resolve(host, *port)?;
            Ok(Conn::Tcp(TcpStream::connect(addr).await?))
        }
        Endpoint::UnixPath(path) => Ok(Conn::Unix(UnixStream::connect(path).await?)),
        Endpoint::UnixAbstract(name) => {
            let addr = std::os::unix::net::SocketAddr::from_abstract_name(name.as_bytes())
                .map_err(Error::from)?;
            let std_stream = std::os::unix::net::UnixStream::connect_addr(&addr)?;
            std_stream.set_nonblocking(true)?;
            Ok(Conn::Unix(UnixStream::from_std(std_stream)?))
        }
    }
}

fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    use std::net::ToSocketAddrs;
    let host = if host.is_empty() { "0.0.0.0" } else { host };
    (host, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| Error::user(format!("could not resolve {}:{}", host, port)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_host_port() {
        assert_eq!(
            parse_address("localhost:8080").unwrap(),
            Endpoint::Tcp("localhost".into(), 8080)
        );
    }

    #[test]
    fn parses_bracketed_ipv6() {
        assert_eq!(
            parse_address("[::1]:9090").unwrap(),
            Endpoint::Tcp("::1".into(), 9090)
        );
    }

    #[test]
    fn parses_unix_path() {
        assert_eq!(
            parse_address("/tmp/foo.sock").unwrap(),
            Endpoint::UnixPath("/tmp/foo.sock".into())
        );
    }

    #[test]
    fn parses_abstract_socket() {
        assert_eq!(
            parse_address("@myapp").unwrap(),
            Endpoint::UnixAbstract("myapp".into())
        );
    }

    #[tokio::test]
    async fn tcp_dial_and_listen_round_trip() {
        let (listener, bound) = Listener::bind(&Endpoint::Tcp("127.0.0.1".into(), 0))
            .await
            .unwrap();
        assert_ne!(bound.port, 0);
        let endpoint = Endpoint::Tcp("127.0.0.1".into(), bound.port);
        let accept = tokio::spawn(async move { listener.accept().await });
        let _client = dial(&endpoint).await.unwrap();
        accept.await.unwrap().unwrap();
    }
}
