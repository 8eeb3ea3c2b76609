//! Server fixture (component C4): bind, accept, dispatch, export macros.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use tokio::task::JoinHandle;

use crate::client::apply_session_flag;
use crate::context::Shared;
use crate::error::{Error, Result};
use crate::net::{Endpoint, Listener};
use crate::session::Session;

/// A named `server` fixture (name must start with `s`).
pub struct ServerFixture {
    name: String,
    listen: Mutex<Option<Endpoint>>,
    spec: String,
    session: Mutex<Session>,
    dispatch: bool,
    stopped: std::sync::Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<Result<()>>>>,
}

impl ServerFixture {
    pub fn new(name: impl Into<String>, spec: String, dispatch: bool) -> ServerFixture {
        ServerFixture {
            name: name.into(),
            listen: Mutex::new(None),
            spec,
            session: Mutex::new(Session::default()),
            dispatch,
            stopped: std::sync::Arc::new(AtomicBool::new(false)),
            handle: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_listen(&self, endpoint: Endpoint) {
        *self.listen.lock().unwrap() = Some(endpoint);
    }

    pub fn apply_flag(&self, flag: &str, args: &[String], i: &mut usize) -> bool {
        let mut session = self.session.lock().unwrap();
        apply_session_flag(&mut session, flag, args, i)
    }

    pub fn force_stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    /// Bind the listen address and define `{name}_addr/port/sock`. Done
    /// synchronously (not inside the spawned task) so that by the time
    /// `-start` returns control to the script, a client statement right
    /// after it can already resolve `${name}_addr`.
    async fn bind(&self, shared: &Shared) -> Result<Listener> {
        let endpoint = self
            .listen
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| Error::user(format!("server {}: no -listen address set", self.name)))?;
        let (listener, bound) = Listener::bind(&endpoint).await?;
        let macros = shared.macros.clone();
        macros.set(format!("{}_addr", self.name), bound.host.clone()).await;
        macros.set(format!("{}_port", self.name), bound.port.to_string()).await;
        macros.set(format!("{}_sock", self.name), bound.sock.clone()).await;
        Ok(listener)
    }

    /// Run the accept loop to completion, then unset this server's macros.
    pub async fn run(
        self: std::sync::Arc<Self>,
        listener: Listener,
        shared: Shared,
        logger: crate::logging::Logger,
    ) -> Result<()> {
        let result = self.accept_loop(&listener, &shared, &logger).await;

        let macros = shared.macros.clone();
        macros.remove(&format!("{}_addr", self.name)).await;
        macros.remove(&format!("{}_port", self.name)).await;
        macros.remove(&format!("{}_sock", self.name)).await;

        result
    }

    async fn accept_loop(
        &self,
        listener: &Listener,
        shared: &Shared,
        logger: &crate::logging::Logger,
    ) -> Result<()> {
        let repeat = self.session.lock().unwrap().repeat();
        if self.dispatch {
            let mut tasks = Vec::new();
            loop {
                if self.stopped.load(Ordering::SeqCst) {
                    break;
                }
                let mut conn = tokio::select! {
                    accepted = listener.accept() => accepted?,
                    _ = tokio::time::sleep(std::time::Duration::from_millis(100)) => continue,
                };
                let spec = self.spec.clone();
                let source = self.name.clone();
                let logger = logger.clone();
                let shared = shared.clone();
                tasks.push(tokio::spawn(async move {
                    crate::conn::run_connection(
                        &mut conn,
                        &spec,
                        crate::conn::Role::Server,
                        &shared,
                        &logger,
                        &source,
                    )
                    .await
                }));
            }
            for t in tasks {
                let _ = t.await;
            }
            Ok(())
        } else {
            for _ in 0..repeat {
                let mut conn = listener.accept().await?;
                crate::conn::run_connection(
                    &mut conn,
                    &self.spec,
                    crate::conn::Role::Server,
                    shared,
                    logger,
                    &self.name,
                )
                .await?;
            }
            Ok(())
        }
    }

    /// Bind synchronously, then hand the accept loop off to a background
    /// task. Returns once the listener is bound and its macros are set.
    pub async fn start(self: std::sync::Arc<Self>, shared: Shared, logger: crate::logging::Logger) -> Result<()> {
        let listener = self.bind(&shared).await?;
        let fixture = self.clone();
        let join = tokio::spawn(async move { fixture.run(listener, shared, logger).await });
        *self.handle.lock().unwrap() = Some(join);
        Ok(())
    }

    pub async fn wait(&self) -> Result<()> {
        let handle = self.handle.lock().unwrap().take();
        match handle {
            Some(h) => h
                .await
                .map_err(|e| Error::user(format!("server {}: task panicked: {}", self.name, e)))?,
            None => Ok(()),
        }
    }
}

/// Only a server named `s0` may run in `-dispatch` mode (§4.3).
pub fn dispatch_allowed(name: &str) -> bool {
    name == "s0"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_is_restricted_to_s0() {
        assert!(dispatch_allowed("s0"));
        assert!(!dispatch_allowed("s1"));
    }
}
