//! HTTP/2 connection, stream scripting, and HPACK wiring (component H3).
//!
//! Unlike [`crate::http1`]'s implicit line framing, every exchange here is
//! scripted explicitly (`txpri`, `txsettings`, `txreq`, ...): there is no
//! automatic preface/SETTINGS handshake, so a script can deliberately send
//! a malformed preface or skip SETTINGS entirely.

use std::collections::HashMap;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;

use crate::ast::{self, Node};
use crate::conn::Role;
use crate::error::{Error, Result};
use crate::frame::{
    decode_settings, encode_settings, Frame, FrameType, StreamEvent, StreamState, FLAG_ACK, FLAG_END_HEADERS,
    FLAG_END_STREAM, FLAG_PADDED, FLAG_PRIORITY, PREFACE,
};
use crate::hpack;
use crate::logging::Logger;
use crate::net::Conn;

#[derive(Debug, Default)]
struct StreamMsg {
    state: Option<StreamState>,
    method: String,
    path: String,
    scheme: String,
    authority: String,
    status: u16,
    req_headers: Vec<(String, String)>,
    resp_headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl StreamMsg {
    fn apply(&mut self, event: StreamEvent) {
        self.state = Some(self.state.unwrap_or(StreamState::Idle).apply(event));
    }
}

/// Drives one HTTP/2 connection's worth of scripted frames.
struct Engine<'a> {
    conn: &'a mut Conn,
    role: Role,
    encoder: hpack::Encoder,
    decoder: hpack::Decoder,
    send_window: i64,
    recv_window: i64,
    remote_settings: HashMap<u16, u32>,
    last_goaway: Option<(u32, u32, Vec<u8>)>,
    last_ping: Option<[u8; 8]>,
    last_winup: Option<(u32, u32)>,
    deadline: Duration,
    streams: HashMap<u32, StreamMsg>,
    logger: &'a Logger,
    source: &'a str,
    shared: &'a crate::context::Shared,
}

/// Run a compiled HTTP/2 spec over `conn`.
pub async fn run(
    conn: &mut Conn,
    spec: &str,
    role: Role,
    shared: &crate::context::Shared,
    logger: &Logger,
    source: &str,
) -> Result<()> {
    // Nested `stream { ... }` bodies were flattened by `registry::compile_body`
    // with `\0` standing in for their internal newlines; restore them so a
    // single `ast::parse` call can recurse into the nested block normally.
    let spec = spec.replace('\u{0}', "\n");
    let ast = ast::parse(&spec)?;
    let commands = match ast {
        Node::Root(children) => children,
        _ => unreachable!(),
    };

    let mut engine = Engine {
        conn,
        role,
        encoder: hpack::Encoder::new(4096),
        decoder: hpack::Decoder::new(4096),
        send_window: 65535,
        recv_window: 65535,
        remote_settings: HashMap::new(),
        last_goaway: None,
        last_ping: None,
        last_winup: None,
        deadline: Duration::from_secs(10),
        streams: HashMap::new(),
        logger,
        source,
        shared,
    };

    for node in &commands {
        if let Node::Command { name, args, body, .. } = node {
            if name == "stream" {
                engine.exec_stream(args, body).await?;
            } else {
                engine.exec(0, name, args).await?;
            }
        }
    }
    Ok(())
}

impl<'a> Engine<'a> {
    async fn exec_stream(&mut self, args: &[String], body: &[Node]) -> Result<()> {
        let id: u32 = args
            .first()
            .ok_or_else(|| Error::http2("stream requires an id"))?
            .parse()
            .map_err(|_| Error::http2("stream id must be an integer"))?;
        self.streams.entry(id).or_default();
        for node in body {
            if let Node::Command { name, args, .. } = node {
                self.exec(id, name, args).await?;
            }
        }
        Ok(())
    }

    async fn exec(&mut self, id: u32, name: &str, args: &[String]) -> Result<()> {
        match name {
            "txpri" => self.tx_pri().await,
            "rxpri" => self.rx_pri().await,
            "txsettings" => self.tx_settings(args).await,
            "rxsettings" => self.rx_settings().await,
            "txping" => self.tx_ping(args).await,
            "rxping" => self.rx_ping().await,
            "txgoaway" => self.tx_goaway(args).await,
            "rxgoaway" => self.rx_goaway().await,
            "txwinup" => self.tx_winup(id, args).await,
            "rxwinup" => self.rx_winup().await,
            "txreq" => self.tx_headers(id, true, args).await,
            "txresp" => self.tx_headers(id, false, args).await,
            "rxreq" => self.rx_message(id, false).await,
            "rxresp" => self.rx_message(id, false).await,
            "rxhdrs" => self.rx_message(id, true).await,
            "txdata" => self.tx_data(id, args).await,
            "rxdata" => self.rx_data(id).await,
            "txprio" => self.tx_priority(id, args).await,
            "rxprio" => self.rx_priority(id).await,
            "txrst" => self.tx_rst(id, args).await,
            "rxrst" => self.rx_rst(id).await,
            "expect" => self.expect(id, args),
            "send" => {
                let bytes = args.join(" ").into_bytes();
                self.logger.hexdump(self.source, &bytes);
                self.conn.write_all(&bytes).await?;
                Ok(())
            }
            "sendhex" => {
                let bytes = decode_hex(&args.join(""))?;
                self.logger.hexdump(self.source, &bytes);
                self.conn.write_all(&bytes).await?;
                Ok(())
            }
            "delay" => {
                tokio::time::sleep(parse_duration(args.first().map(|s| s.as_str()).unwrap_or("0s"))?).await;
                Ok(())
            }
            "timeout" => {
                self.deadline = parse_duration(args.first().map(|s| s.as_str()).unwrap_or("10s"))?;
                Ok(())
            }
            "barrier" | "shell" => crate::conn::run_global(name, args, self.shared, self.logger, self.source).await,
            other => Err(Error::http2(format!("unknown HTTP/2 command {:?}", other))),
        }
    }

    async fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        let mut bytes = Vec::with_capacity(9 + frame.payload.len());
        bytes.push((frame.payload.len() >> 16) as u8);
        bytes.push((frame.payload.len() >> 8) as u8);
        bytes.push(frame.payload.len() as u8);
        bytes.push(frame.frame_type.to_byte());
        bytes.push(frame.flags);
        bytes.extend_from_slice(&frame.stream_id.to_be_bytes());
        bytes.extend_from_slice(&frame.payload);
        self.logger.hexdump(self.source, &bytes);
        frame.write(self.conn).await
    }

    async fn read_frame(&mut self) -> Result<Frame> {
        let frame = timeout(self.deadline, Frame::read(self.conn))
            .await
            .map_err(|_| Error::http2("timed out waiting for a frame"))??;
        self.logger.log(
            self.source,
            format!(
                "rx {:?} flags={:#x} stream={} len={}",
                frame.frame_type,
                frame.flags,
                frame.stream_id,
                frame.payload.len()
            ),
        );
        Ok(frame)
    }

    /// Read frames until one of `want_type` on `want_stream` (or any stream,
    /// if `None`) shows up, transparently ack-ing SETTINGS/PING along the way
    /// since RFC 7540 requires every endpoint to do so regardless of script intent.
    /// An ACK of our own SETTINGS is swallowed even when `rxsettings` is the
    /// one waiting, since a script asking to receive settings means the
    /// peer's announcement, not the ack of ours.
    async fn next_frame_for(&mut self, want_type: FrameType, want_stream: Option<u32>) -> Result<Frame> {
        loop {
            let frame = self.read_frame().await?;
            match frame.frame_type {
                FrameType::Settings if frame.flags & FLAG_ACK != 0 => {
                    continue;
                }
                FrameType::Settings if want_type != FrameType::Settings => {
                    for (id, value) in decode_settings(&frame.payload)? {
                        self.remote_settings.insert(id, value);
                    }
                    self.write_frame(&Frame::new(FrameType::Settings, FLAG_ACK, 0, Vec::new()))
                        .await?;
                }
                FrameType::Ping if frame.flags & FLAG_ACK == 0 && want_type != FrameType::Ping => {
                    self.write_frame(&Frame::new(FrameType::Ping, FLAG_ACK, 0, frame.payload.clone()))
                        .await?;
                }
                _ if frame.frame_type == want_type
                    && want_stream.is_none_or(|want| want == frame.stream_id) =>
                {
                    return Ok(frame)
                }
                other => {
                    return Err(Error::http2(format!(
                        "expected {:?} on stream {:?}, got {:?} on stream {}",
                        want_type, want_stream, other, frame.stream_id
                    )))
                }
            }
        }
    }

    async fn tx_pri(&mut self) -> Result<()> {
        self.logger.hexdump(self.source, PREFACE);
        self.conn.write_all(PREFACE).await?;
        Ok(())
    }

    async fn rx_pri(&mut self) -> Result<()> {
        let mut buf = vec![0u8; PREFACE.len()];
        timeout(self.deadline, self.conn.read_exact(&mut buf))
            .await
            .map_err(|_| Error::http2("timed out waiting for the connection preface"))??;
        if buf != PREFACE {
            return Err(Error::http2("connection preface did not match"));
        }
        Ok(())
    }

    async fn tx_settings(&mut self, args: &[String]) -> Result<()> {
        let mut settings = Vec::new();
        let mut ack = false;
        let mut i = 0;
        while i < args.len() {
            match args[i].as_str() {
                "-hdrtablesize" => {
                    i += 1;
                    settings.push((0x1u16, args[i].parse().unwrap_or(4096)));
                }
                "-maxframesize" => {
                    i += 1;
                    settings.push((0x5u16, args[i].parse().unwrap_or(16384)));
                }
                "-initialwindowsize" => {
                    i += 1;
                    settings.push((0x4u16, args[i].parse().unwrap_or(65535)));
                }
                "-ack" => ack = true,
                _ => {}
            }
            i += 1;
        }
        let flags = if ack { FLAG_ACK } else { 0 };
        self.write_frame(&Frame::new(FrameType::Settings, flags, 0, encode_settings(&settings)))
            .await
    }

    async fn rx_settings(&mut self) -> Result<()> {
        let frame = self.next_frame_for(FrameType::Settings, Some(0)).await?;
        if frame.flags & FLAG_ACK == 0 {
            for (id, value) in decode_settings(&frame.payload)? {
                self.remote_settings.insert(id, value);
            }
            self.write_frame(&Frame::new(FrameType::Settings, FLAG_ACK, 0, Vec::new()))
                .await?;
        }
        Ok(())
    }

    async fn tx_ping(&mut self, args: &[String]) -> Result<()> {
        let mut payload = [0u8; 8];
        let mut ack = false;
        let mut i = 0;
        while i < args.len() {
            match args[i].as_str() {
                "-data" => {
                    i += 1;
                    let bytes = decode_hex(&args[i])?;
                    payload[..bytes.len().min(8)].copy_from_slice(&bytes[..bytes.len().min(8)]);
                }
                "-ack" => ack = true,
                _ => {}
            }
            i += 1;
        }
        let flags = if ack { FLAG_ACK } else { 0 };
        self.write_frame(&Frame::new(FrameType::Ping, flags, 0, payload.to_vec())).await
    }

    async fn rx_ping(&mut self) -> Result<()> {
        let frame = self.next_frame_for(FrameType::Ping, Some(0)).await?;
        let mut payload = [0u8; 8];
        payload[..frame.payload.len().min(8)].copy_from_slice(&frame.payload[..frame.payload.len().min(8)]);
        self.last_ping = Some(payload);
        if frame.flags & FLAG_ACK == 0 {
            self.write_frame(&Frame::new(FrameType::Ping, FLAG_ACK, 0, frame.payload))
                .await?;
        }
        Ok(())
    }

    async fn tx_goaway(&mut self, args: &[String]) -> Result<()> {
        let mut last_stream = 0u32;
        let mut err = 0u32;
        let mut debug = Vec::new();
        let mut i = 0;
        while i < args.len() {
            match args[i].as_str() {
                "-laststream" => {
                    i += 1;
                    last_stream = args[i].parse().unwrap_or(0);
                }
                "-err" => {
                    i += 1;
                    err = args[i].parse().unwrap_or(0);
                }
                "-debug" => {
                    i += 1;
                    debug = args[i].clone().into_bytes();
                }
                _ => {}
            }
            i += 1;
        }
        let mut payload = Vec::with_capacity(8 + debug.len());
        payload.extend_from_slice(&last_stream.to_be_bytes());
        payload.extend_from_slice(&err.to_be_bytes());
        payload.extend_from_slice(&debug);
        self.write_frame(&Frame::new(FrameType::GoAway, 0, 0, payload)).await
    }

    async fn rx_goaway(&mut self) -> Result<()> {
        let frame = self.next_frame_for(FrameType::GoAway, Some(0)).await?;
        if frame.payload.len() < 8 {
            return Err(Error::http2("GOAWAY frame shorter than 8 bytes"));
        }
        let last_stream = u32::from_be_bytes(frame.payload[0..4].try_into().unwrap());
        let err = u32::from_be_bytes(frame.payload[4..8].try_into().unwrap());
        self.last_goaway = Some((last_stream, err, frame.payload[8..].to_vec()));
        Ok(())
    }

    async fn tx_winup(&mut self, current: u32, args: &[String]) -> Result<()> {
        let (stream_id, increment) = match args.len() {
            0 => (current, 1000u32),
            1 => (current, args[0].parse().unwrap_or(1000)),
            _ => (args[0].parse().unwrap_or(current), args[1].parse().unwrap_or(1000)),
        };
        self.write_frame(&Frame::new(
            FrameType::WindowUpdate,
            0,
            stream_id,
            (increment & 0x7fff_ffff).to_be_bytes().to_vec(),
        ))
        .await?;
        // Sending a WINDOW_UPDATE tells the peer it may send us more, so it
        // grows our own receive window, not our send window.
        self.recv_window += increment as i64;
        Ok(())
    }

    async fn rx_winup(&mut self) -> Result<()> {
        let frame = self.next_frame_for(FrameType::WindowUpdate, None).await?;
        if frame.payload.len() != 4 {
            return Err(Error::http2("WINDOW_UPDATE payload must be 4 bytes"));
        }
        let increment = u32::from_be_bytes(frame.payload[0..4].try_into().unwrap()) & 0x7fff_ffff;
        // A received WINDOW_UPDATE grants us more room to send.
        self.send_window += increment as i64;
        self.last_winup = Some((frame.stream_id, increment));
        Ok(())
    }

    fn build_headers(&mut self, id: u32, is_request: bool, args: &[String]) -> Result<(Vec<u8>, bool, bool)> {
        let msg = self.streams.entry(id).or_default();
        let mut pseudo: Vec<(String, String)> = Vec::new();
        let mut headers: Vec<(String, String, bool)> = Vec::new();
        let mut directives: Vec<(String, hpack::Indexing, String, String)> = Vec::new();
        let mut body = Vec::new();
        let mut end_data = true;
        let mut no_strend = false;

        if is_request {
            let mut method = "GET".to_string();
            let mut path = "/".to_string();
            let mut scheme = "http".to_string();
            let mut authority = "localhost".to_string();
            let mut i = 0;
            while i < args.len() {
                match args[i].as_str() {
                    "-method" => {
                        i += 1;
                        method = args[i].clone();
                    }
                    "-url" => {
                        i += 1;
                        path = args[i].clone();
                    }
                    "-scheme" => {
                        i += 1;
                        scheme = args[i].clone();
                    }
                    "-authority" => {
                        i += 1;
                        authority = args[i].clone();
                    }
                    _ => {}
                }
                i += 1;
            }
            pseudo.push((":method".into(), method.clone()));
            pseudo.push((":path".into(), path.clone()));
            pseudo.push((":scheme".into(), scheme.clone()));
            pseudo.push((":authority".into(), authority.clone()));
            msg.method = method;
            msg.path = path;
            msg.scheme = scheme;
            msg.authority = authority;
        } else {
            let mut status = 200u16;
            let mut i = 0;
            while i < args.len() {
                if args[i] == "-status" {
                    i += 1;
                    status = args[i].parse().unwrap_or(200);
                }
                i += 1;
            }
            pseudo.push((":status".into(), status.to_string()));
            msg.status = status;
        }

        let mut i = 0;
        while i < args.len() {
            match args[i].as_str() {
                "-hdr" => {
                    i += 1;
                    let (n, v) = args[i]
                        .split_once(':')
                        .ok_or_else(|| Error::http2(format!("bad -hdr {:?}", args[i])))?;
                    headers.push((n.trim().to_string(), v.trim().to_string(), false));
                }
                "-sensitivehdr" => {
                    i += 1;
                    let (n, v) = args[i]
                        .split_once(':')
                        .ok_or_else(|| Error::http2(format!("bad -sensitivehdr {:?}", args[i])))?;
                    headers.push((n.trim().to_string(), v.trim().to_string(), true));
                }
                "-body" => {
                    i += 1;
                    body = args[i].clone().into_bytes();
                    end_data = false;
                }
                "-bodylen" => {
                    i += 1;
                    let n: usize = args[i]
                        .parse()
                        .map_err(|_| Error::http2(format!("bad -bodylen {:?}", args[i])))?;
                    body = generate_body(n);
                    end_data = false;
                }
                "-bodyfrom" => {
                    i += 1;
                    body = std::fs::read(&args[i])?;
                    end_data = false;
                }
                "-nostrend" => {
                    no_strend = true;
                }
                "-idxHdr" => {
                    i += 1;
                    directives.push(("idx".into(), hpack::Indexing::Incremental, args[i].clone(), String::new()));
                }
                "-litIdxHdr" => {
                    // MODE NAMEINDEX ENC VALUE
                    let mode = parse_indexing_mode(&args[i + 1])?;
                    let name_index = args[i + 2].clone();
                    let value = args[i + 4].clone();
                    directives.push(("litidx".into(), mode, name_index, value));
                    i += 4;
                }
                "-litHdr" => {
                    // MODE NAMEENC NAME VALUEENC VALUE
                    let mode = parse_indexing_mode(&args[i + 1])?;
                    let name = args[i + 3].clone();
                    let value = args[i + 5].clone();
                    directives.push(("lit".into(), mode, name, value));
                    i += 5;
                }
                _ => {}
            }
            i += 1;
        }

        let mut all: Vec<(String, String, bool)> = pseudo.into_iter().map(|(n, v)| (n, v, false)).collect();
        all.extend(headers.iter().cloned());
        if is_request {
            self.streams.get_mut(&id).unwrap().req_headers = headers.iter().map(|(n, v, _)| (n.clone(), v.clone())).collect();
        } else {
            self.streams.get_mut(&id).unwrap().resp_headers = headers.iter().map(|(n, v, _)| (n.clone(), v.clone())).collect();
        }

        let mut block = self.encoder.encode(&all);
        for (kind, mode, a, b) in directives {
            match kind.as_str() {
                "idx" => {
                    let index: usize = a.parse().unwrap_or(0);
                    self.encoder.emit_indexed(&mut block, index);
                }
                "litidx" => {
                    let name_index: usize = a.parse().unwrap_or(0);
                    self.encoder.emit_literal_indexed_name(&mut block, mode, name_index, &b);
                    if mode == hpack::Indexing::Incremental {
                        if let Ok(name) = self.encoder.resolve_name(name_index) {
                            self.encoder.dynamic.insert(name, b.clone());
                        }
                    }
                }
                "lit" => {
                    self.encoder.emit_literal_new_name(&mut block, mode, &a, &b);
                    if mode == hpack::Indexing::Incremental {
                        self.encoder.dynamic.insert(a.clone(), b.clone());
                    }
                }
                _ => {}
            }
        }

        self.streams.get_mut(&id).unwrap().body = body.clone();
        Ok((block, end_data, no_strend))
    }

    async fn tx_headers(&mut self, id: u32, is_request: bool, args: &[String]) -> Result<()> {
        let (block, no_body, no_strend) = self.build_headers(id, is_request, args)?;
        let body = self.streams.get(&id).map(|m| m.body.clone()).unwrap_or_default();
        let end_stream_now = no_body && !no_strend;
        let flags = FLAG_END_HEADERS | if end_stream_now { FLAG_END_STREAM } else { 0 };
        self.write_frame(&Frame::new(FrameType::Headers, flags, id, block)).await?;
        if let Some(msg) = self.streams.get_mut(&id) {
            msg.apply(StreamEvent::SendHeaders { end_stream: end_stream_now });
        }
        if !no_body {
            let data_flags = if no_strend { 0 } else { FLAG_END_STREAM };
            self.write_frame(&Frame::new(FrameType::Data, data_flags, id, body)).await?;
            if !no_strend {
                if let Some(msg) = self.streams.get_mut(&id) {
                    msg.apply(StreamEvent::SendEndStream);
                }
            }
        }
        Ok(())
    }

    /// Strip HEADERS/DATA frame padding (and, for HEADERS, a leading
    /// priority block) per RFC 7540 §6.2/§6.1, returning the inner payload.
    fn strip_padding(&self, frame: &Frame, has_priority: bool) -> Result<Vec<u8>> {
        let mut payload: &[u8] = &frame.payload;
        let pad_len = if frame.flags & FLAG_PADDED != 0 {
            let n = *payload.first().ok_or_else(|| Error::http2("PADDED frame missing pad length byte"))? as usize;
            payload = &payload[1..];
            n
        } else {
            0
        };
        if has_priority && frame.flags & FLAG_PRIORITY != 0 {
            if payload.len() < 5 {
                return Err(Error::http2("HEADERS frame too short for PRIORITY fields"));
            }
            payload = &payload[5..];
        }
        if pad_len > payload.len() {
            return Err(Error::http2("pad length exceeds frame payload"));
        }
        Ok(payload[..payload.len() - pad_len].to_vec())
    }

    async fn rx_message(&mut self, id: u32, headers_only: bool) -> Result<()> {
        let frame = self.next_frame_for(FrameType::Headers, Some(id)).await?;
        let block = self.strip_padding(&frame, true)?;
        let headers = self.decoder.decode(&block)?;
        let mut end_stream = frame.flags & FLAG_END_STREAM != 0;

        let msg = self.streams.entry(id).or_default();
        for (name, value) in headers {
            match name.as_str() {
                ":method" => msg.method = value,
                ":path" => msg.path = value,
                ":scheme" => msg.scheme = value,
                ":authority" => msg.authority = value,
                ":status" => msg.status = value.parse().unwrap_or(0),
                _ => {
                    if self.role == Role::Server {
                        msg.req_headers.push((name, value));
                    } else {
                        msg.resp_headers.push((name, value));
                    }
                }
            }
        }
        msg.apply(StreamEvent::RecvHeaders { end_stream });

        if headers_only {
            return Ok(());
        }
        let mut body = Vec::new();
        while !end_stream {
            let data_frame = self.next_frame_for(FrameType::Data, Some(id)).await?;
            let chunk = self.strip_padding(&data_frame, false)?;
            body.extend_from_slice(&chunk);
            end_stream = data_frame.flags & FLAG_END_STREAM != 0;
        }
        if let Some(msg) = self.streams.get_mut(&id) {
            msg.body = body;
            if end_stream {
                msg.apply(StreamEvent::RecvEndStream);
            }
        }
        Ok(())
    }

    async fn tx_data(&mut self, id: u32, args: &[String]) -> Result<()> {
        let mut body = Vec::new();
        let mut end = false;
        let mut i = 0;
        while i < args.len() {
            match args[i].as_str() {
                "-body" => {
                    i += 1;
                    body = args[i].clone().into_bytes();
                }
                "-bodylen" => {
                    i += 1;
                    let n: usize = args[i]
                        .parse()
                        .map_err(|_| Error::http2(format!("bad -bodylen {:?}", args[i])))?;
                    body = generate_body(n);
                }
                "-end" => end = true,
                _ => {}
            }
            i += 1;
        }
        self.send_window -= body.len() as i64;
        let flags = if end { FLAG_END_STREAM } else { 0 };
        self.write_frame(&Frame::new(FrameType::Data, flags, id, body)).await?;
        if end {
            if let Some(msg) = self.streams.get_mut(&id) {
                msg.apply(StreamEvent::SendEndStream);
            }
        }
        Ok(())
    }

    async fn rx_data(&mut self, id: u32) -> Result<()> {
        let frame = self.next_frame_for(FrameType::Data, Some(id)).await?;
        let chunk = self.strip_padding(&frame, false)?;
        self.recv_window -= chunk.len() as i64;
        let end_stream = frame.flags & FLAG_END_STREAM != 0;
        let msg = self.streams.entry(id).or_default();
        msg.body.extend_from_slice(&chunk);
        if end_stream {
            msg.apply(StreamEvent::RecvEndStream);
        }
        Ok(())
    }

    async fn tx_priority(&mut self, id: u32, args: &[String]) -> Result<()> {
        let mut dep = 0u32;
        let mut weight = 15u8;
        let mut exclusive = false;
        let mut i = 0;
        while i < args.len() {
            match args[i].as_str() {
                "-dep" => {
                    i += 1;
                    dep = args[i].parse().unwrap_or(0);
                }
                "-weight" => {
                    i += 1;
                    weight = args[i].parse().unwrap_or(15);
                }
                "-exclusive" => exclusive = true,
                _ => {}
            }
            i += 1;
        }
        let mut payload = dep.to_be_bytes();
        if exclusive {
            payload[0] |= 0x80;
        }
        let mut out = payload.to_vec();
        out.push(weight);
        self.write_frame(&Frame::new(FrameType::Priority, 0, id, out)).await
    }

    async fn rx_priority(&mut self, id: u32) -> Result<()> {
        self.next_frame_for(FrameType::Priority, Some(id)).await?;
        Ok(())
    }

    async fn tx_rst(&mut self, id: u32, args: &[String]) -> Result<()> {
        let err: u32 = args
            .iter()
            .position(|a| a == "-err")
            .and_then(|i| args.get(i + 1))
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        self.write_frame(&Frame::new(FrameType::RstStream, 0, id, err.to_be_bytes().to_vec()))
            .await?;
        if let Some(msg) = self.streams.get_mut(&id) {
            msg.apply(StreamEvent::Rst);
        }
        Ok(())
    }

    async fn rx_rst(&mut self, id: u32) -> Result<()> {
        self.next_frame_for(FrameType::RstStream, Some(id)).await?;
        if let Some(msg) = self.streams.get_mut(&id) {
            msg.apply(StreamEvent::Rst);
        }
        Ok(())
    }

    fn expect(&self, id: u32, args: &[String]) -> Result<()> {
        if args.len() < 3 {
            return Err(Error::http2("expect requires FIELD OP VALUE"));
        }
        let field = &args[0];
        let op = &args[1];
        let expected = args[2..].join(" ");
        let actual = self.resolve_field(id, field)?;
        let ok = match op.as_str() {
            "==" => actual == expected,
            "!=" => actual != expected,
            "~" => regex::Regex::new(&expected)
                .map_err(|e| Error::http2(format!("bad regex {:?}: {}", expected, e)))?
                .is_match(&actual),
            "!~" => !regex::Regex::new(&expected)
                .map_err(|e| Error::http2(format!("bad regex {:?}: {}", expected, e)))?
                .is_match(&actual),
            _ => return Err(Error::http2(format!("unknown expect operator {:?}", op))),
        };
        if ok {
            Ok(())
        } else {
            Err(Error::expect(format!("{} {} {:?}: actual {:?}", field, op, expected, actual)))
        }
    }

    fn resolve_field(&self, id: u32, field: &str) -> Result<String> {
        if let Some(rest) = field.strip_prefix("conn.") {
            return Ok(match rest {
                "lastgoawaystream" => self.last_goaway.as_ref().map(|g| g.0.to_string()).unwrap_or_default(),
                "goawayerr" => self.last_goaway.as_ref().map(|g| g.1.to_string()).unwrap_or_default(),
                "winupsize" => self.last_winup.as_ref().map(|w| w.1.to_string()).unwrap_or_default(),
                "pingdata" => self
                    .last_ping
                    .map(|p| p.iter().map(|b| format!("{:02x}", b)).collect::<String>())
                    .unwrap_or_default(),
                other => return Err(Error::http2(format!("unknown expect field {:?}", other))),
            });
        }
        let (side, rest) = field
            .split_once('.')
            .ok_or_else(|| Error::http2(format!("bad expect field {:?}", field)))?;
        let msg = self
            .streams
            .get(&id)
            .ok_or_else(|| Error::http2(format!("no such stream {}", id)))?;
        match (side, rest) {
            ("req", "method") => Ok(msg.method.clone()),
            ("req", "url") => Ok(msg.path.clone()),
            ("req", "scheme") => Ok(msg.scheme.clone()),
            ("req", "authority") => Ok(msg.authority.clone()),
            ("req", "body") => Ok(String::from_utf8_lossy(&msg.body).into_owned()),
            ("req", "bodylen") => Ok(msg.body.len().to_string()),
            ("resp", "status") => Ok(msg.status.to_string()),
            ("resp", "body") => Ok(String::from_utf8_lossy(&msg.body).into_owned()),
            ("resp", "bodylen") => Ok(msg.body.len().to_string()),
            (side, rest) if rest.starts_with("http.") => {
                let name = &rest["http.".len()..];
                let headers = if side == "req" { &msg.req_headers } else { &msg.resp_headers };
                Ok(headers
                    .iter()
                    .find(|(n, _)| n.eq_ignore_ascii_case(name))
                    .map(|(_, v)| v.clone())
                    .unwrap_or_default())
            }
            _ => Err(Error::http2(format!("unknown expect field {:?}", field))),
        }
    }
}

/// Maps an explicit HPACK directive's MODE operand (`inc`/`not`/`never`) to
/// the encoder's indexing mode.
fn parse_indexing_mode(s: &str) -> Result<hpack::Indexing> {
    match s {
        "inc" => Ok(hpack::Indexing::Incremental),
        "not" => Ok(hpack::Indexing::WithoutIndexing),
        "never" => Ok(hpack::Indexing::NeverIndexed),
        other => Err(Error::http2(format!("bad indexing mode {:?}", other))),
    }
}

/// Generate `n` bytes of printable ASCII, matching the HTTP/1 body filler.
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

fn decode_hex(s: &str) -> Result<Vec<u8>> {
    let cleaned: String = s.chars().filter(|c| !c.is_whitespace()).collect();
    if !cleaned.len().is_multiple_of(2) {
        return Err(Error::http2("sendhex: odd number of hex digits"));
    }
    (0..cleaned.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&cleaned[i..i + 2], 16)
                .map_err(|_| Error::http2(format!("sendhex: invalid hex at offset {}", i)))
        })
        .collect()
}

fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    let (num, unit) = s
        .find(|c: char| c.is_alphabetic())
        .map(|i| s.split_at(i))
        .unwrap_or((s, "s"));
    let value: f64 = num.parse().map_err(|_| Error::http2(format!("bad duration {:?}", s)))?;
    let secs = match unit {
        "" | "s" => value,
        "ms" => value / 1000.0,
        "m" => value * 60.0,
        other => return Err(Error::http2(format!("unknown duration unit {:?}", other))),
    };
    Ok(Duration::from_secs_f64(secs.max(0.0)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_hex_strips_whitespace() {
        assert_eq!(decode_hex("00 01  0a\nff").unwrap(), vec![0x00, 0x01, 0x0a, 0xff]);
    }

    #[test]
    fn stream_msg_tracks_state_transitions() {
        let mut msg = StreamMsg::default();
        msg.apply(StreamEvent::RecvHeaders { end_stream: false });
        assert_eq!(msg.state, Some(StreamState::Open));
        msg.apply(StreamEvent::RecvEndStream);
        assert_eq!(msg.state, Some(StreamState::HalfClosedRemote));
    }

    #[tokio::test]
    async fn preface_round_trips_over_tcp() {
        let (listener, bound) = crate::net::Listener::bind(&crate::net::Endpoint::Tcp("127.0.0.1".into(), 0))
            .await
            .unwrap();
        let endpoint = crate::net::Endpoint::Tcp("127.0.0.1".into(), bound.port);

        let server = tokio::spawn(async move {
            let mut conn = listener.accept().await.unwrap();
            let mut buf = vec![0u8; PREFACE.len()];
            conn.read_exact(&mut buf).await.unwrap();
            assert_eq!(buf, PREFACE);
        });

        let mut client_conn = crate::net::dial(&endpoint).await.unwrap();
        client_conn.write_all(PREFACE).await.unwrap();
        server.await.unwrap();
    }
}
