//! Client fixture (component C3): dial, run a compiled spec per iteration.

use std::sync::Mutex;

use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::net::{self, Endpoint};
use crate::session::Session;

/// A named `client` fixture (name must start with `c`).
pub struct ClientFixture {
    name: String,
    connect: Mutex<Option<Endpoint>>,
    spec: String,
    session: Mutex<Session>,
    handle: Mutex<Option<JoinHandle<Result<()>>>>,
}

impl ClientFixture {
    pub fn new(name: impl Into<String>, spec: String) -> ClientFixture {
        ClientFixture {
            name: name.into(),
            connect: Mutex::new(None),
            spec,
            session: Mutex::new(Session::default()),
            handle: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_connect(&self, endpoint: Endpoint) {
        *self.connect.lock().unwrap() = Some(endpoint);
    }

    pub fn set_repeat(&self, n: u32) {
        self.session.lock().unwrap().set_repeat(n);
    }

    pub fn set_keepalive(&self, on: bool) {
        self.session.lock().unwrap().set_keepalive(on);
    }

    pub fn set_rcvbuf(&self, n: u32) {
        self.session.lock().unwrap().set_rcvbuf(n);
    }

    /// Run the fixture's iterations to completion on the current task.
    pub async fn run(
        self: std::sync::Arc<Self>,
        shared: crate::context::Shared,
        logger: crate::logging::Logger,
    ) -> Result<()> {
        let endpoint = self
            .connect
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| Error::user(format!("client {}: no -connect address set", self.name)))?;
        let (repeat, keepalive) = {
            let session = self.session.lock().unwrap();
            (session.repeat(), session.keepalive())
        };

        let mut conn = None;
        for _ in 0..repeat {
            if conn.is_none() {
                conn = Some(net::dial(&endpoint).await?);
            }
            let c = conn.as_mut().unwrap();
            crate::conn::run_connection(
                c,
                &self.spec,
                crate::conn::Role::Client,
                &shared,
                &logger,
                &self.name,
            )
            .await?;
            if !keepalive {
                conn = None;
            }
        }
        Ok(())
    }

    /// Start the fixture asynchronously (`-start`); join later with `-wait`.
    pub fn start(
        self: std::sync::Arc<Self>,
        shared: crate::context::Shared,
        logger: crate::logging::Logger,
    ) {
        let fixture = self.clone();
        let join = tokio::spawn(async move { fixture.run(shared, logger).await });
        *self.handle.lock().unwrap() = Some(join);
    }

    /// Join a fixture previously `-start`ed.
    pub async fn wait(&self) -> Result<()> {
        let handle = self.handle.lock().unwrap().take();
        match handle {
            Some(h) => h
                .await
                .map_err(|e| Error::user(format!("client {}: task panicked: {}", self.name, e)))?,
            None => Ok(()),
        }
    }
}

/// Apply a client/server's flag set, returning leftover (unrecognised) flags.
///
/// Shared between [`ClientFixture`] and [`crate::server::ServerFixture`]
/// configuration so `-repeat`/`-keepalive`/`-rcvbuf` parse identically for
/// both kinds of fixture.
pub fn apply_session_flag(session: &mut Session, flag: &str, args: &[String], i: &mut usize) -> bool {
    match flag {
        "-repeat" => {
            *i += 1;
            if let Some(n) = args.get(*i).and_then(|s| s.parse().ok()) {
                session.set_repeat(n);
            }
            true
        }
        "-keepalive" => {
            session.set_keepalive(true);
            true
        }
        "-rcvbuf" => {
            *i += 1;
            if let Some(n) = args.get(*i).and_then(|s| s.parse().ok()) {
                session.set_rcvbuf(n);
            }
            true
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_fixture_has_no_connect_target() {
        let fixture = ClientFixture::new("c0", String::new());
        assert!(fixture.connect.lock().unwrap().is_none());
    }
}
