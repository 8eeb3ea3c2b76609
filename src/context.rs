//! The per-test execution context (component C2's shared state, §3 "Execution Context").

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::barrier::Barrier;
use crate::client::ClientFixture;
use crate::logging::Logger;
use crate::macro_store::MacroStore;
use crate::process::Process;
use crate::server::ServerFixture;

/// The subset of test state a connection handler needs: macros and barriers
/// must be reachable from `barrier`/`shell` commands that appear inside a
/// client or server body, not just at top level.
#[derive(Clone)]
pub struct Shared {
    pub macros: MacroStore,
    pub barriers: Arc<Mutex<HashMap<String, Arc<Barrier>>>>,
    pub tmpdir: PathBuf,
}

/// Everything a running test shares across its commands and fixtures.
///
/// Owns the four name-indexed fixture maps the data model calls for
/// (clients, servers, barriers, processes); name collisions across types
/// are legal since each type has its own map.
pub struct ExecContext {
    pub shared: Shared,
    pub logger: Logger,
    deadline: Instant,
    pub failed: Option<crate::error::Error>,
    pub skip_reason: Option<String>,
    pub clients: HashMap<String, Arc<ClientFixture>>,
    pub servers: HashMap<String, Arc<ServerFixture>>,
    pub processes: HashMap<String, Arc<Process>>,
}

impl ExecContext {
    pub fn new(tmpdir: PathBuf, logger: Logger, deadline_from_now: Duration) -> ExecContext {
        ExecContext {
            shared: Shared {
                macros: MacroStore::new(),
                barriers: Arc::new(Mutex::new(HashMap::new())),
                tmpdir,
            },
            logger,
            deadline: Instant::now() + deadline_from_now,
            failed: None,
            skip_reason: None,
            clients: HashMap::new(),
            servers: HashMap::new(),
            processes: HashMap::new(),
        }
    }

    pub fn macros(&self) -> &MacroStore {
        &self.shared.macros
    }

    pub fn tmpdir(&self) -> &PathBuf {
        &self.shared.tmpdir
    }

    /// Whether the whole test's wall-clock budget has been exceeded.
    pub fn deadline_exceeded(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// Time remaining before the test's wall-clock deadline.
    pub fn time_remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Resolve a path argument against the test's temp directory, unless
    /// it's already absolute.
    pub fn resolve_path(&self, path: &str) -> PathBuf {
        let p = PathBuf::from(path);
        if p.is_absolute() {
            p
        } else {
            self.shared.tmpdir.join(p)
        }
    }
}
