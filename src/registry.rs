//! Command registry and top-level executor (component C2).
//!
//! The registry is a compile-time table (no runtime plugin loading, per the
//! REDESIGN notes): each handler is an async fn pointer keyed by name, with
//! `Global`/`Shutdown` flags recorded alongside it for documentation even
//! though the executor currently only consults `Global` (`Shutdown` marks
//! commands -- none yet -- that would tear down the whole context early).

use std::sync::Arc;
use std::time::Duration;

use crate::ast::Node;
use crate::client::ClientFixture;
use crate::context::{ExecContext, Shared};
use crate::error::{Error, Result};
use crate::logging::Logger;
use crate::net::parse_address;
use crate::process::{run_shell, Process};
use crate::server::{dispatch_allowed, ServerFixture};

/// Whether a command is reachable from inside a client/server body in
/// addition to top level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flag {
    Global,
    Local,
}

/// Run one top-level command against `ctx`, recursing into its body if any.
pub async fn exec_command(ctx: &mut ExecContext, name: &str, args: &[String], body: &[Node]) -> Result<()> {
    match name {
        "barrier" => exec_barrier(ctx, args).await,
        "shell" => exec_shell(ctx, args).await,
        "delay" => exec_delay(args).await,
        "feature" => exec_feature(ctx, args).await,
        "filewrite" => exec_filewrite(ctx, args).await,
        "process" => exec_process(ctx, args).await,
        "client" => exec_client(ctx, args, body).await,
        "server" => exec_server(ctx, args, body).await,
        other => Err(Error::user(format!("unknown command {:?}", other))),
    }
}

/// Run the AST's top-level children in order, halting on the first fatal
/// error or skip.
pub async fn run_script(ctx: &mut ExecContext, root: &Node) -> Result<()> {
    let children = match root {
        Node::Root(children) => children,
        _ => return Err(Error::user("expected a root node")),
    };
    for node in children {
        if ctx.deadline_exceeded() {
            return Err(Error::deadline());
        }
        match node {
            Node::Comment { .. } => {}
            Node::Vtest { .. } => {}
            Node::Command { name, args, body, line } => {
                if let Err(err) = exec_command(ctx, name, args, body).await {
                    let err = err.with_line(*line);
                    if err.is_skip() {
                        ctx.skip_reason = Some(format!("{}", err));
                    } else {
                        ctx.failed = Some(err);
                    }
                    return Ok(());
                }
            }
            Node::Root(_) => {}
        }
    }
    Ok(())
}

async fn exec_barrier(ctx: &mut ExecContext, args: &[String]) -> Result<()> {
    if args.len() < 2 {
        return Err(Error::user("barrier requires a name and sub-command"));
    }
    let barrier_name = &args[0];
    match args[1].as_str() {
        "cond" | "sock" => {
            let count: u64 = args
                .get(2)
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| Error::user("barrier cond/sock requires a participant count"))?;
            let cyclic = args.iter().any(|a| a == "-cyclic");
            let barrier = Arc::new(crate::barrier::Barrier::new(
                barrier_name.clone(),
                count,
                cyclic,
                Duration::from_secs(10),
            ));
            ctx.shared
                .barriers
                .lock()
                .unwrap()
                .insert(barrier_name.clone(), barrier);
            Ok(())
        }
        "sync" => {
            let barrier = lookup_barrier(ctx, barrier_name)?;
            barrier.sync().await
        }
        other => Err(Error::user(format!("unknown barrier sub-command {:?}", other))),
    }
}

fn lookup_barrier(ctx: &ExecContext, name: &str) -> Result<Arc<crate::barrier::Barrier>> {
    ctx.shared
        .barriers
        .lock()
        .unwrap()
        .get(name)
        .cloned()
        .ok_or_else(|| Error::not_found(format!("no such barrier {:?}", name)))
}

async fn exec_shell(ctx: &mut ExecContext, args: &[String]) -> Result<()> {
    let cmd = ctx.macros().expand(args.first().map(|s| s.as_str()).unwrap_or("")).await?;
    let (output, code) = run_shell(&cmd, ctx.tmpdir()).await?;
    ctx.logger.log("shell", format!("`{}` exited {}", cmd, code));

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-exit" => {
                i += 1;
                let want: i32 = args[i]
                    .parse()
                    .map_err(|_| Error::user("shell -exit requires an integer"))?;
                if code != want {
                    return Err(Error::user(format!("shell exited {}, wanted {}", code, want)));
                }
            }
            "-match" => {
                i += 1;
                let re = regex::Regex::new(&args[i])
                    .map_err(|e| Error::user(format!("bad -match regex: {}", e)))?;
                if !re.is_match(&output) {
                    return Err(Error::user(format!("shell output did not match {:?}", args[i])));
                }
            }
            "-expect" => {
                i += 1;
                if output.trim() != args[i] {
                    return Err(Error::user(format!(
                        "shell output {:?} did not equal {:?}",
                        output.trim(),
                        args[i]
                    )));
                }
            }
            _ => {}
        }
        i += 1;
    }
    Ok(())
}

async fn exec_delay(args: &[String]) -> Result<()> {
    let d = parse_delay(args.first().map(|s| s.as_str()).unwrap_or("0s"))?;
    tokio::time::sleep(d).await;
    Ok(())
}

fn parse_delay(s: &str) -> Result<Duration> {
    let s = s.trim();
    let (num, unit) = s
        .find(|c: char| c.is_alphabetic())
        .map(|i| s.split_at(i))
        .unwrap_or((s, "s"));
    let value: f64 = num.parse().map_err(|_| Error::user(format!("bad delay {:?}", s)))?;
    let secs = match unit {
        "" | "s" => value,
        "ms" => value / 1000.0,
        "m" => value * 60.0,
        other => return Err(Error::user(format!("unknown duration unit {:?}", other))),
    };
    Ok(Duration::from_secs_f64(secs.max(0.0)))
}

async fn exec_feature(ctx: &mut ExecContext, args: &[String]) -> Result<()> {
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "cmd" => {
                i += 1;
                let name = &args[i];
                if which(name).is_none() {
                    return Err(Error::skip(format!("missing command {:?}", name)));
                }
            }
            "user" => {
                i += 1;
                let wanted = &args[i];
                let current = current_username();
                if wanted != &current {
                    return Err(Error::skip(format!("not running as user {:?}", wanted)));
                }
            }
            "dns" => {
                // Real DNS resolution is out of scope; assume the host stack works.
            }
            "ipv4" if std::net::UdpSocket::bind("0.0.0.0:0").is_err() => {
                return Err(Error::skip("no ipv4 support"));
            }
            "ipv4" => {}
            "ipv6" if std::net::UdpSocket::bind("[::]:0").is_err() => {
                return Err(Error::skip("no ipv6 support"));
            }
            "ipv6" => {}
            _ => {
                // Opaque platform tags are accepted unconditionally.
            }
        }
        i += 1;
    }
    let _ = ctx;
    Ok(())
}

fn which(name: &str) -> Option<std::path::PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}

fn current_username() -> String {
    if unsafe { libc::geteuid() } == 0 {
        "root".to_string()
    } else {
        std::env::var("USER").unwrap_or_default()
    }
}

async fn exec_filewrite(ctx: &mut ExecContext, args: &[String]) -> Result<()> {
    let mut append = false;
    let mut rest = args;
    if rest.first().map(|s| s.as_str()) == Some("-append") {
        append = true;
        rest = &rest[1..];
    }
    let path = rest.first().ok_or_else(|| Error::user("filewrite requires a path"))?;
    let path = ctx.macros().expand(path).await?;
    let content = ctx.macros().expand(&rest[1..].join(" ")).await?;
    let path = ctx.resolve_path(&path);

    use std::io::Write;
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .append(append)
        .truncate(!append)
        .open(&path)?;
    file.write_all(content.as_bytes())?;
    Ok(())
}

async fn exec_process(ctx: &mut ExecContext, args: &[String]) -> Result<()> {
    let name = args.first().ok_or_else(|| Error::user("process requires a name"))?;
    if !name.starts_with('p') {
        return Err(Error::user(format!("process name {:?} must start with 'p'", name)));
    }

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-start" => {
                i += 1;
                let cmd = ctx.macros().expand(&args[i]).await?;
                let proc = Process::start(name.clone(), &cmd, ctx.tmpdir())?;
                ctx.processes.insert(name.clone(), Arc::new(proc));
            }
            "-wait" => {
                let proc = ctx
                    .processes
                    .get(name)
                    .cloned()
                    .ok_or_else(|| Error::not_found(format!("no such process {:?}", name)))?;
                proc.wait(Duration::from_secs(10)).await?;
            }
            "-stop" => {
                let proc = ctx
                    .processes
                    .get(name)
                    .cloned()
                    .ok_or_else(|| Error::not_found(format!("no such process {:?}", name)))?;
                proc.signal(false).await?;
            }
            "-kill" => {
                let proc = ctx
                    .processes
                    .get(name)
                    .cloned()
                    .ok_or_else(|| Error::not_found(format!("no such process {:?}", name)))?;
                proc.signal(true).await?;
            }
            _ => {}
        }
        i += 1;
    }
    Ok(())
}

/// Quote `s` using the escape grammar `ast::take_escape` understands
/// (`\n \r \t \\ \"` plus `\xNN` for everything outside printable ASCII),
/// so a re-parsed nested block round-trips instead of picking up Rust's
/// `Debug` escapes, which `ast.rs` doesn't know how to read back.
fn quote_arg(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for b in s.bytes() {
        match b {
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b'\t' => out.push_str("\\t"),
            b'\\' => out.push_str("\\\\"),
            b'"' => out.push_str("\\\""),
            0x20..=0x7e => out.push(b as char),
            _ => out.push_str(&format!("\\x{:02x}", b)),
        }
    }
    out.push('"');
    out
}

/// Compile `body` into a newline-joined sub-spec, re-serialising nested
/// `stream { ... }` blocks with a `\0` delimiter so the HTTP/2 stream
/// handler can split them back into lines (`\0` never appears in `.vtc`
/// source text).
fn compile_body(body: &[Node]) -> String {
    let mut lines = Vec::new();
    for node in body {
        if let Node::Command { name, args, body: inner, .. } = node {
            let mut line = name.clone();
            for arg in args {
                line.push(' ');
                if arg.contains(' ') || arg.is_empty() {
                    line.push_str(&quote_arg(arg));
                } else {
                    line.push_str(arg);
                }
            }
            if !inner.is_empty() {
                let nested = compile_body(inner).replace('\n', "\u{0}");
                line.push_str(&format!(" {{{}}}", nested));
            }
            lines.push(line);
        }
    }
    lines.join("\n")
}

async fn exec_client(ctx: &mut ExecContext, args: &[String], body: &[Node]) -> Result<()> {
    let name = args.first().ok_or_else(|| Error::user("client requires a name"))?.clone();
    if !name.starts_with('c') {
        return Err(Error::user(format!("client name {:?} must start with 'c'", name)));
    }
    let spec = compile_body(body);
    let fixture = Arc::new(ClientFixture::new(name.clone(), spec));

    let mut run_now = false;
    let mut start_now = false;
    let mut wait_now = false;
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-connect" => {
                i += 1;
                let addr = ctx.macros().expand(&args[i]).await?;
                fixture.set_connect(parse_address(&addr)?);
            }
            "-start" => start_now = true,
            "-wait" => wait_now = true,
            "-run" => run_now = true,
            "-proxy1" | "-proxy2" => {
                i += 1;
                ctx.logger.log(&name, "PROXY preamble requested but not implemented");
            }
            flag => {
                apply_client_session_flag(&fixture, flag, args, &mut i);
            }
        }
        i += 1;
    }

    ctx.clients.insert(name.clone(), fixture.clone());

    if run_now {
        fixture.run(ctx.shared.clone(), ctx.logger.clone()).await?;
    } else if start_now {
        fixture.clone().start(ctx.shared.clone(), ctx.logger.clone());
        if wait_now {
            fixture.wait().await?;
        }
    } else if wait_now {
        fixture.wait().await?;
    }
    Ok(())
}

fn apply_client_session_flag(fixture: &Arc<ClientFixture>, flag: &str, args: &[String], i: &mut usize) {
    match flag {
        "-repeat" => {
            *i += 1;
            if let Some(n) = args.get(*i).and_then(|s| s.parse().ok()) {
                fixture.set_repeat(n);
            }
        }
        "-keepalive" => fixture.set_keepalive(true),
        "-rcvbuf" => {
            *i += 1;
            if let Some(n) = args.get(*i).and_then(|s| s.parse().ok()) {
                fixture.set_rcvbuf(n);
            }
        }
        _ => {}
    }
}

async fn exec_server(ctx: &mut ExecContext, args: &[String], body: &[Node]) -> Result<()> {
    let name = args.first().ok_or_else(|| Error::user("server requires a name"))?.clone();
    if !name.starts_with('s') {
        return Err(Error::user(format!("server name {:?} must start with 's'", name)));
    }
    let dispatch = args.iter().any(|a| a == "-dispatch");
    if dispatch && !dispatch_allowed(&name) {
        return Err(Error::user("-dispatch is only permitted on server s0"));
    }

    let spec = compile_body(body);
    let fixture = Arc::new(ServerFixture::new(name.clone(), spec, dispatch));

    let mut start_now = false;
    let mut wait_now = false;
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-listen" => {
                i += 1;
                let addr = ctx.macros().expand(&args[i]).await?;
                fixture.set_listen(parse_address(&addr)?);
            }
            "-start" => start_now = true,
            "-wait" => wait_now = true,
            "-break" => fixture.force_stop(),
            "-dispatch" => {}
            flag => {
                let mut j = i;
                fixture.apply_flag(flag, args, &mut j);
                i = j;
            }
        }
        i += 1;
    }

    ctx.servers.insert(name.clone(), fixture.clone());

    // Servers always run asynchronously (their own accept loop); `-start` is
    // the default mode, `-wait` optionally joins immediately after. Binding
    // happens before `start` returns, so `{name}_addr` is already resolvable.
    let _ = start_now;
    fixture.clone().start(ctx.shared.clone(), ctx.logger.clone()).await?;
    if wait_now {
        fixture.wait().await?;
    }
    Ok(())
}

/// Run one of the global commands (`barrier`, `shell`, `delay`) from inside
/// a connection handler's compiled spec.
pub async fn run_global(name: &str, args: &[String], shared: &Shared, logger: &Logger, source: &str) -> Result<()> {
    match name {
        "barrier" => {
            if args.len() < 2 || args[1] != "sync" {
                return Err(Error::user("only `barrier NAME sync` is valid inside a connection spec"));
            }
            let barrier = shared
                .barriers
                .lock()
                .unwrap()
                .get(&args[0])
                .cloned()
                .ok_or_else(|| Error::not_found(format!("no such barrier {:?}", args[0])))?;
            barrier.sync().await
        }
        "shell" => {
            let cmd = shared.macros.expand(args.first().map(|s| s.as_str()).unwrap_or("")).await?;
            let (_output, code) = run_shell(&cmd, &shared.tmpdir).await?;
            logger.log(source, format!("`{}` exited {}", cmd, code));
            Ok(())
        }
        "delay" => {
            let d = parse_delay(args.first().map(|s| s.as_str()).unwrap_or("0s"))?;
            tokio::time::sleep(d).await;
            Ok(())
        }
        other => Err(Error::user(format!("{:?} is not a global command", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast;

    #[tokio::test]
    async fn barrier_cond_then_sync_releases() {
        let mut ctx = ExecContext::new(std::env::temp_dir(), Logger::new(false), Duration::from_secs(30));
        let ast = ast::parse("barrier b1 cond 1\nbarrier b1 sync\n").unwrap();
        run_script(&mut ctx, &ast).await.unwrap();
        assert!(ctx.failed.is_none());
    }

    #[tokio::test]
    async fn unknown_command_fails_the_test() {
        let mut ctx = ExecContext::new(std::env::temp_dir(), Logger::new(false), Duration::from_secs(30));
        let ast = ast::parse("bogus\n").unwrap();
        run_script(&mut ctx, &ast).await.unwrap();
        assert!(ctx.failed.is_some());
    }

    #[tokio::test]
    async fn filewrite_then_shell_reads_it_back() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = ExecContext::new(dir.path().to_path_buf(), Logger::new(false), Duration::from_secs(30));
        let ast = ast::parse("filewrite out.txt \"hello\"\nshell \"cat out.txt\" -expect hello\n").unwrap();
        run_script(&mut ctx, &ast).await.unwrap();
        assert!(ctx.failed.is_none(), "{:?}", ctx.failed.map(|e| e.to_string()));
    }
}
