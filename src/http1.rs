//! HTTP/1 line-oriented encode/decode engine (component H1).
//!
//! Deliberately not a production-correct HTTP/1 stack: callers can request
//! missing `Content-Length`, bogus chunk sizes, or arbitrary raw bytes on
//! the wire, because the whole point is to be able to construct malformed
//! messages and observe what a peer under test does with them.

use std::io::Write;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;

use crate::ast::{self, Node};
use crate::conn::Role;
use crate::error::{Error, Result};
use crate::logging::Logger;
use crate::net::Conn;

/// Headers as an ordered list of `(name, value)` pairs; original case is
/// kept, lookups are case-insensitive.
#[derive(Debug, Clone, Default)]
pub struct Headers(pub Vec<(String, String)>);

impl Headers {
    fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push((name.into(), value.into()));
    }

    fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }
}

#[derive(Debug, Default)]
struct MessageState {
    // request side
    method: String,
    url: String,
    req_proto: String,
    req_headers: Headers,
    head_method: bool,
    // response side
    status: u16,
    reason: String,
    resp_proto: String,
    resp_headers: Headers,
    // shared
    body: Vec<u8>,
    gzip_level: i32,
}

impl MessageState {
    fn new() -> MessageState {
        MessageState {
            gzip_level: -1,
            ..Default::default()
        }
    }
}

/// Run a compiled HTTP/1 spec over `conn`.
pub async fn run(
    conn: &mut Conn,
    spec: &str,
    role: Role,
    shared: &crate::context::Shared,
    logger: &Logger,
    source: &str,
) -> Result<()> {
    let ast = ast::parse(spec)?;
    let commands = match ast {
        Node::Root(children) => children,
        _ => unreachable!(),
    };
    let mut state = MessageState::new();
    let mut deadline = Duration::from_secs(10);

    for node in &commands {
        if let Node::Command { name, args, .. } = node {
            execute(
                name, args, conn, &mut state, &mut deadline, role, shared, logger, source,
            )
            .await?;
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn execute(
    name: &str,
    args: &[String],
    conn: &mut Conn,
    state: &mut MessageState,
    deadline: &mut Duration,
    _role: Role,
    shared: &crate::context::Shared,
    logger: &Logger,
    source: &str,
) -> Result<()> {
    match name {
        "txreq" => tx_request(args, conn, state, logger, source).await,
        "txresp" => tx_response(args, conn, state, logger, source).await,
        "rxreq" => rx_request(conn, state, *deadline, logger, source).await,
        "rxresp" => rx_response(conn, state, *deadline, logger, source, false).await,
        "rxresphdrs" => rx_response(conn, state, *deadline, logger, source, true).await,
        "rxrespbody" => rx_body_only(args, conn, state, *deadline).await,
        "expect" => expect(args, state),
        "send" => {
            let bytes = args.join(" ").into_bytes();
            logger.hexdump(source, &bytes);
            conn.write_all(&bytes).await?;
            Ok(())
        }
        "sendhex" => {
            let bytes = decode_hex(&args.join(""))?;
            logger.hexdump(source, &bytes);
            conn.write_all(&bytes).await?;
            Ok(())
        }
        "recv" => {
            let n: usize = args
                .first()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| Error::http1("recv requires a byte count"))?;
            let mut buf = vec![0u8; n];
            timeout(*deadline, conn.read_exact(&mut buf))
                .await
                .map_err(|_| Error::http1("recv timed out"))??;
            Ok(())
        }
        "timeout" => {
            *deadline = parse_duration(args.first().map(|s| s.as_str()).unwrap_or("10s"))?;
            Ok(())
        }
        "delay" => {
            let d = parse_duration(args.first().map(|s| s.as_str()).unwrap_or("0s"))?;
            tokio::time::sleep(d).await;
            Ok(())
        }
        "gunzip" => {
            state.body = gunzip(&state.body)?;
            Ok(())
        }
        "write_body" => {
            let path = args
                .first()
                .ok_or_else(|| Error::http1("write_body requires a path"))?;
            std::fs::write(path, &state.body)?;
            Ok(())
        }
        "barrier" | "shell" => {
            // Global commands re-entering a connection spec; delegate to the
            // shared registry so `barrier sync` etc. work inside client/server bodies.
            crate::conn::run_global(name, args, shared, logger, source).await
        }
        other => Err(Error::http1(format!("unknown HTTP/1 command {:?}", other))),
    }
}

async fn tx_request(
    args: &[String],
    conn: &mut Conn,
    state: &mut MessageState,
    logger: &Logger,
    source: &str,
) -> Result<()> {
    let mut method = "GET".to_string();
    let mut url = "/".to_string();
    let mut proto = "HTTP/1.1".to_string();
    let mut headers = Headers::default();
    let (body, opts) = parse_body_opts(args, &mut headers)?;

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "-method" => {
                i += 1;
                method = args[i].clone();
            }
            "-url" => {
                i += 1;
                url = args[i].clone();
            }
            "-proto" => {
                i += 1;
                proto = args[i].clone();
            }
            _ => {}
        }
        i += 1;
    }

    if !opts.nohost && !headers.contains("Host") {
        headers.push("Host", "localhost");
    }
    if !opts.nouseragent && !headers.contains("User-Agent") {
        headers.push("User-Agent", "vtc");
    }

    let bytes = encode_message(
        &format!("{} {} {}", method, url, proto),
        &mut headers,
        &body,
        &opts,
        opts.gzip_level.unwrap_or(state.gzip_level),
    )?;
    logger.hexdump(source, &bytes);
    conn.write_all(&bytes).await?;

    state.method = method;
    state.url = url;
    state.req_proto = proto;
    state.req_headers = headers;
    state.body = body;
    Ok(())
}

async fn tx_response(
    args: &[String],
    conn: &mut Conn,
    state: &mut MessageState,
    logger: &Logger,
    source: &str,
) -> Result<()> {
    let mut status: u16 = 200;
    let mut reason = "OK".to_string();
    let mut proto = "HTTP/1.1".to_string();
    let mut headers = Headers::default();
    let (body, opts) = parse_body_opts(args, &mut headers)?;

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "-status" => {
                i += 1;
                status = args[i]
                    .parse()
                    .map_err(|_| Error::http1(format!("bad -status {:?}", args[i])))?;
            }
            "-reason" => {
                i += 1;
                reason = args[i].clone();
            }
            "-proto" => {
                i += 1;
                proto = args[i].clone();
            }
            _ => {}
        }
        i += 1;
    }

    if !opts.noserver && !headers.contains("Server") {
        headers.push("Server", "vtc");
    }

    let bytes = encode_message(
        &format!("{} {} {}", proto, status, reason),
        &mut headers,
        &body,
        &opts,
        opts.gzip_level.unwrap_or(state.gzip_level),
    )?;
    logger.hexdump(source, &bytes);
    conn.write_all(&bytes).await?;

    state.status = status;
    state.reason = reason;
    state.resp_proto = proto;
    state.resp_headers = headers;
    state.body = body;
    Ok(())
}

#[derive(Default)]
struct BodyOpts {
    chunked: bool,
    nolen: bool,
    nohost: bool,
    nouseragent: bool,
    noserver: bool,
    gzip: bool,
    gzip_level: Option<i32>,
}

fn parse_body_opts(args: &[String], headers: &mut Headers) -> Result<(Vec<u8>, BodyOpts)> {
    let mut opts = BodyOpts::default();
    let mut body = Vec::new();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "-hdr" => {
                i += 1;
                let (n, v) = args[i]
                    .split_once(':')
                    .ok_or_else(|| Error::http1(format!("bad -hdr {:?}", args[i])))?;
                headers.push(n.trim(), v.trim());
            }
            "-body" => {
                i += 1;
                body = args[i].clone().into_bytes();
            }
            "-bodyfrom" => {
                i += 1;
                body = std::fs::read(&args[i])?;
            }
            "-bodylen" => {
                i += 1;
                let n: usize = args[i]
                    .parse()
                    .map_err(|_| Error::http1(format!("bad -bodylen {:?}", args[i])))?;
                body = generate_body(n);
            }
            "-gzip" => {
                opts.gzip = true;
            }
            "-gzipbody" => {
                i += 1;
                body = args[i].clone().into_bytes();
                opts.gzip = true;
            }
            "-gziplevel" => {
                i += 1;
                opts.gzip_level = Some(
                    args[i]
                        .parse()
                        .map_err(|_| Error::http1(format!("bad -gziplevel {:?}", args[i])))?,
                );
            }
            "-chunked" => opts.chunked = true,
            "-nohost" => opts.nohost = true,
            "-nouseragent" => opts.nouseragent = true,
            "-nolen" => opts.nolen = true,
            "-noserver" => opts.noserver = true,
            _ => {}
        }
        i += 1;
    }
    Ok((body, opts))
}

fn encode_message(
    start_line: &str,
    headers: &mut Headers,
    body: &[u8],
    opts: &BodyOpts,
    gzip_level: i32,
) -> Result<Vec<u8>> {
    let body = if opts.gzip {
        if !headers.contains("Content-Encoding") {
            headers.push("Content-Encoding", "gzip");
        }
        gzip(body, gzip_level)?
    } else {
        body.to_vec()
    };

    let mut out = Vec::new();
    out.extend_from_slice(start_line.as_bytes());
    out.extend_from_slice(b"\r\n");
    for (name, value) in &headers.0 {
        out.extend_from_slice(format!("{}: {}\r\n", name, value).as_bytes());
    }

    if opts.chunked {
        out.extend_from_slice(b"Transfer-Encoding: chunked\r\n\r\n");
        if !body.is_empty() {
            out.extend_from_slice(format!("{:x}\r\n", body.len()).as_bytes());
            out.extend_from_slice(&body);
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(b"0\r\n\r\n");
    } else {
        if !opts.nolen && !body.is_empty() {
            out.extend_from_slice(format!("Content-Length: {}\r\n", body.len()).as_bytes());
        }
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&body);
    }
    Ok(out)
}

/// Generate `n` bytes of printable ASCII: start at `!`, increment, wrap at
/// `~`, place `\n` at position `i` whenever `i % 64 == 63`.
fn generate_body(n: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(n);
    let mut b = b'!';
    for i in 0..n {
        if i % 64 == 63 {
            out.push(b'\n');
        } else {
            out.push(b);
            b = if b == b'~' { b'!' } else { b + 1 };
        }
    }
    out
}

async fn rx_request(
    conn: &mut Conn,
    state: &mut MessageState,
    deadline: Duration,
    logger: &Logger,
    source: &str,
) -> Result<()> {
    let mut reader = LineReader::new(conn, deadline);
    let line = reader.read_line().await?;
    let mut parts = line.splitn(3, ' ');
    let method = parts.next().unwrap_or_default().to_string();
    let url = parts
        .next()
        .ok_or_else(|| Error::http1("malformed request line"))?
        .to_string();
    let proto = parts
        .next()
        .ok_or_else(|| Error::http1("malformed request line"))?
        .to_string();

    state.head_method = method == "HEAD";
    let headers = read_headers(&mut reader).await?;
    let body = read_body(&mut reader, &headers).await?;

    logger.log(source, format!("rxreq: {} {} {}", method, url, proto));

    state.method = method;
    state.url = url;
    state.req_proto = proto;
    state.req_headers = headers;
    state.body = body;
    Ok(())
}

async fn rx_response(
    conn: &mut Conn,
    state: &mut MessageState,
    deadline: Duration,
    logger: &Logger,
    source: &str,
    headers_only: bool,
) -> Result<()> {
    let mut reader = LineReader::new(conn, deadline);
    let line = reader.read_line().await?;
    let mut parts = line.splitn(3, ' ');
    let proto = parts.next().unwrap_or_default().to_string();
    let status: u16 = parts
        .next()
        .ok_or_else(|| Error::http1("malformed status line"))?
        .parse()
        .map_err(|_| Error::http1("malformed status code"))?;
    let reason = parts.next().unwrap_or_default().to_string();

    let headers = read_headers(&mut reader).await?;
    let no_body = headers_only
        || (100..200).contains(&status)
        || status == 204
        || status == 304
        || state.head_method;
    let body = if no_body {
        Vec::new()
    } else {
        read_body(&mut reader, &headers).await?
    };

    logger.log(source, format!("rxresp: {} {} {}", proto, status, reason));

    state.resp_proto = proto;
    state.status = status;
    state.reason = reason;
    state.resp_headers = headers;
    state.body = body;
    Ok(())
}

async fn rx_body_only(
    args: &[String],
    conn: &mut Conn,
    state: &mut MessageState,
    deadline: Duration,
) -> Result<()> {
    let mut reader = LineReader::new(conn, deadline);
    let max: Option<usize> = args.first().and_then(|s| s.parse().ok());
    let mut body = read_body(&mut reader, &state.resp_headers).await?;
    if let Some(max) = max {
        body.truncate(max);
    }
    state.body = body;
    Ok(())
}

async fn read_headers(reader: &mut LineReader<'_>) -> Result<Headers> {
    let mut headers = Headers::default();
    loop {
        let line = reader.read_line().await?;
        if line.is_empty() {
            break;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| Error::http1(format!("malformed header line {:?}", line)))?;
        headers.push(name.trim(), value.trim());
    }
    Ok(headers)
}

async fn read_body(reader: &mut LineReader<'_>, headers: &Headers) -> Result<Vec<u8>> {
    if headers
        .get("Transfer-Encoding")
        .is_some_and(|v| v.eq_ignore_ascii_case("chunked"))
    {
        read_chunked_body(reader).await
    } else if let Some(len) = headers.get("Content-Length") {
        let n: usize = len
            .parse()
            .map_err(|_| Error::http1(format!("bad Content-Length {:?}", len)))?;
        reader.read_exact_bytes(n).await
    } else {
        Ok(Vec::new())
    }
}

async fn read_chunked_body(reader: &mut LineReader<'_>) -> Result<Vec<u8>> {
    let mut body = Vec::new();
    loop {
        let size_line = reader.read_line().await?;
        let size_str = size_line.split(';').next().unwrap_or("").trim();
        let size = usize::from_str_radix(size_str, 16)
            .map_err(|_| Error::http1(format!("malformed chunk size {:?}", size_str)))?;
        if size == 0 {
            loop {
                let trailer = reader.read_line().await?;
                if trailer.is_empty() {
                    break;
                }
            }
            break;
        }
        let chunk = reader.read_exact_bytes(size).await?;
        body.extend_from_slice(&chunk);
        let crlf = reader.read_line().await?;
        if !crlf.is_empty() {
            return Err(Error::http1("chunk data not terminated by CRLF"));
        }
    }
    Ok(body)
}

fn expect(args: &[String], state: &MessageState) -> Result<()> {
    if args.len() < 3 {
        return Err(Error::http1("expect requires FIELD OP VALUE"));
    }
    let field = &args[0];
    let op = &args[1];
    let expected = args[2..].join(" ");
    let actual = resolve_field(field, state)?;

    let ok = match op.as_str() {
        "==" => actual == expected,
        "!=" => actual != expected,
        "~" => regex::Regex::new(&expected)
            .map_err(|e| Error::http1(format!("bad regex {:?}: {}", expected, e)))?
            .is_match(&actual),
        "!~" => !regex::Regex::new(&expected)
            .map_err(|e| Error::http1(format!("bad regex {:?}: {}", expected, e)))?
            .is_match(&actual),
        "<" | ">" | "<=" | ">=" => compare_numeric(&actual, &expected, op)?,
        other => return Err(Error::http1(format!("unknown expect operator {:?}", other))),
    };

    if ok {
        Ok(())
    } else {
        Err(Error::expect(format!(
            "{} {} {:?}: actual {:?}",
            field, op, expected, actual
        )))
    }
}

fn compare_numeric(actual: &str, expected: &str, op: &str) -> Result<bool> {
    let parse = |s: &str| -> Result<f64> {
        s.parse::<i64>()
            .map(|v| v as f64)
            .or_else(|_| s.parse::<f64>())
            .map_err(|_| Error::http1(format!("cannot compare {:?} numerically", s)))
    };
    let a = parse(actual)?;
    let e = parse(expected)?;
    Ok(match op {
        "<" => a < e,
        ">" => a > e,
        "<=" => a <= e,
        ">=" => a >= e,
        _ => unreachable!(),
    })
}

fn resolve_field(field: &str, state: &MessageState) -> Result<String> {
    let (side, rest) = field
        .split_once('.')
        .ok_or_else(|| Error::http1(format!("bad expect field {:?}", field)))?;
    match (side, rest) {
        ("req", "method") => Ok(state.method.clone()),
        ("req", "url") => Ok(state.url.clone()),
        ("req", "proto") => Ok(state.req_proto.clone()),
        ("req", "body") => Ok(String::from_utf8_lossy(&state.body).into_owned()),
        ("req", "bodylen") => Ok(state.body.len().to_string()),
        ("resp", "proto") => Ok(state.resp_proto.clone()),
        ("resp", "status") => Ok(state.status.to_string()),
        ("resp", "reason") => Ok(state.reason.clone()),
        ("resp", "body") => Ok(String::from_utf8_lossy(&state.body).into_owned()),
        ("resp", "bodylen") => Ok(state.body.len().to_string()),
        (side, rest) if rest.starts_with("http.") => {
            let name = &rest["http.".len()..];
            let headers = if side == "req" {
                &state.req_headers
            } else {
                &state.resp_headers
            };
            Ok(headers.get(name).unwrap_or_default().to_string())
        }
        _ => Err(Error::http1(format!("unknown expect field {:?}", field))),
    }
}

fn decode_hex(s: &str) -> Result<Vec<u8>> {
    let cleaned: String = s.chars().filter(|c| !c.is_whitespace()).collect();
    if !cleaned.len().is_multiple_of(2) {
        return Err(Error::http1("sendhex: odd number of hex digits"));
    }
    (0..cleaned.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&cleaned[i..i + 2], 16)
                .map_err(|_| Error::http1(format!("sendhex: invalid hex at offset {}", i)))
        })
        .collect()
}

fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    let (num, unit) = s
        .find(|c: char| c.is_alphabetic())
        .map(|i| s.split_at(i))
        .unwrap_or((s, "s"));
    let value: f64 = num
        .parse()
        .map_err(|_| Error::http1(format!("bad duration {:?}", s)))?;
    let secs = match unit {
        "" | "s" => value,
        "ms" => value / 1000.0,
        "m" => value * 60.0,
        other => return Err(Error::http1(format!("unknown duration unit {:?}", other))),
    };
    Ok(Duration::from_secs_f64(secs.max(0.0)))
}

/// Gzip-compress `body`, zeroing every header field so output is deterministic.
fn gzip(body: &[u8], level: i32) -> Result<Vec<u8>> {
    use flate2::{Compression, GzBuilder};
    let level = if level < 0 {
        Compression::default()
    } else {
        Compression::new(level as u32)
    };
    let mut encoder = GzBuilder::new().mtime(0).write(Vec::new(), level);
    encoder.write_all(body)?;
    Ok(encoder.finish()?)
}

/// Gzip-decompress `body`.
fn gunzip(body: &[u8]) -> Result<Vec<u8>> {
    use flate2::read::GzDecoder;
    use std::io::Read;
    let mut decoder = GzDecoder::new(body);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| Error::http1(format!("gunzip failed: {}", e)))?;
    Ok(out)
}

/// A small buffered line reader over an `AsyncRead` connection, honouring a
/// per-call deadline.
struct LineReader<'a> {
    conn: &'a mut Conn,
    buf: Vec<u8>,
    pos: usize,
    deadline: Duration,
}

impl<'a> LineReader<'a> {
    fn new(conn: &'a mut Conn, deadline: Duration) -> LineReader<'a> {
        LineReader {
            conn,
            buf: Vec::new(),
            pos: 0,
            deadline,
        }
    }

    async fn fill(&mut self) -> Result<usize> {
        let mut chunk = [0u8; 4096];
        let n = timeout(self.deadline, self.conn.read(&mut chunk))
            .await
            .map_err(|_| Error::http1("read timed out"))??;
        self.buf.extend_from_slice(&chunk[..n]);
        Ok(n)
    }

    /// Read a CRLF- or LF-terminated line, trimming the terminator.
    async fn read_line(&mut self) -> Result<String> {
        loop {
            if let Some(rel) = self.buf[self.pos..].iter().position(|&b| b == b'\n') {
                let end = self.pos + rel;
                let mut line = &self.buf[self.pos..end];
                if line.last() == Some(&b'\r') {
                    line = &line[..line.len() - 1];
                }
                let s = String::from_utf8_lossy(line).into_owned();
                self.pos = end + 1;
                return Ok(s);
            }
            if self.fill().await? == 0 {
                return Err(Error::http1("connection closed before line terminator"));
            }
        }
    }

    async fn read_exact_bytes(&mut self, n: usize) -> Result<Vec<u8>> {
        while self.buf.len() - self.pos < n {
            if self.fill().await? == 0 {
                return Err(Error::http1("connection closed before expected bytes"));
            }
        }
        let out = self.buf[self.pos..self.pos + n].to_vec();
        self.pos += n;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_printable_body_of_requested_length() {
        let body = generate_body(130);
        assert_eq!(body.len(), 130);
        assert_eq!(body[63], b'\n');
        assert_eq!(body[127], b'\n');
        assert!(body.iter().all(|&b| b == b'\n' || (0x21..=0x7e).contains(&b)));
    }

    #[test]
    fn gzip_round_trips() {
        let data = b"hello world, this is a test body";
        let compressed = gzip(data, -1).unwrap();
        let decompressed = gunzip(&compressed).unwrap();
        assert_eq!(decompressed, data);
    }

    #[test]
    fn gziplevel_flag_is_captured_and_changes_compressed_size() {
        let mut headers = Headers::default();
        let (_, opts) = parse_body_opts(
            &["-gzipbody".into(), "x".repeat(4096), "-gziplevel".into(), "0".into()],
            &mut headers,
        )
        .unwrap();
        assert_eq!(opts.gzip_level, Some(0));

        let body = "x".repeat(4096).into_bytes();
        let uncompressed = gzip(&body, 0).unwrap();
        let best = gzip(&body, 9).unwrap();
        assert!(best.len() < uncompressed.len(), "level 9 should compress better than level 0");
    }

    #[test]
    fn decode_hex_strips_whitespace() {
        assert_eq!(decode_hex("00 01  0a\nff").unwrap(), vec![0x00, 0x01, 0x0a, 0xff]);
    }

    #[test]
    fn parses_durations_with_units() {
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("1m").unwrap(), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn txreq_rxreq_round_trip_over_tcp() {
        let (listener, bound) = crate::net::Listener::bind(&crate::net::Endpoint::Tcp(
            "127.0.0.1".into(),
            0,
        ))
        .await
        .unwrap();
        let endpoint = crate::net::Endpoint::Tcp("127.0.0.1".into(), bound.port);

        let server = tokio::spawn(async move {
            let mut conn = listener.accept().await.unwrap();
            let logger = Logger::new(false);
            rx_request(&mut conn, &mut MessageState::new(), Duration::from_secs(5), &logger, "s0")
                .await
                .unwrap()
        });

        let mut client_conn = crate::net::dial(&endpoint).await.unwrap();
        let logger = Logger::new(false);
        let mut state = MessageState::new();
        tx_request(
            &["-method".into(), "GET".into(), "-url".into(), "/ping".into()],
            &mut client_conn,
            &mut state,
            &logger,
            "c0",
        )
        .await
        .unwrap();

        server.await.unwrap();
    }
}
