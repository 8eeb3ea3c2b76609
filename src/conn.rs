//! Auto-protocol dispatch shared by client and server fixtures (§4.3).

use crate::context::Shared;
use crate::error::Result;
use crate::logging::Logger;
use crate::net::Conn;

/// Which side of the connection a fixture's compiled spec is driving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// Tokens that only make sense inside an HTTP/2 spec; their presence
/// switches the connection handler from the HTTP/1 engine to the HTTP/2 one.
const HTTP2_TOKENS: &[&str] = &[
    "txpri", "rxpri", "stream ", "txsettings", "rxsettings", "txping", "rxping", "txgoaway",
    "rxgoaway", "txwinup", "rxwinup", "txprio", "rxprio",
];

fn is_http2_spec(spec: &str) -> bool {
    HTTP2_TOKENS.iter().any(|tok| spec.contains(tok))
}

/// Run a compiled fixture spec over `conn`, picking the HTTP/1 or HTTP/2
/// engine by inspecting the spec text.
pub async fn run_connection(
    conn: &mut Conn,
    spec: &str,
    role: Role,
    shared: &Shared,
    logger: &Logger,
    source: &str,
) -> Result<()> {
    if is_http2_spec(spec) {
        crate::http2::run(conn, spec, role, shared, logger, source).await
    } else {
        crate::http1::run(conn, spec, role, shared, logger, source).await
    }
}

/// Run one of the global commands (`barrier`, `shell`, `delay`) that may
/// appear inside a client/server body, not just at top level.
pub async fn run_global(name: &str, args: &[String], shared: &Shared, logger: &Logger, source: &str) -> Result<()> {
    crate::registry::run_global(name, args, shared, logger, source).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_http2_spec_by_stream_token() {
        assert!(is_http2_spec("stream 1 {\n txreq\n}"));
        assert!(!is_http2_spec("txreq -url /\nrxresp"));
    }
}
