//! Named rendezvous points for N participants (component L3).

use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio::time::timeout;

use crate::error::{Error, Result};

/// A named cyclic or one-shot barrier.
///
/// `current == count` releases all waiters of that cycle: `current` resets
/// to zero and `cycle` increments. A non-cyclic barrier still resets
/// `current` after its single release (so a second wave of `sync` calls
/// doesn't wedge forever), but per spec it no longer enforces the original
/// participant count on later cycles.
pub struct Barrier {
    name: String,
    count: u64,
    cyclic: bool,
    timeout: Duration,
    state: Mutex<State>,
    notify: Notify,
}

struct State {
    current: u64,
    cycle: u64,
}

impl Barrier {
    /// Create a barrier requiring `count` participants per cycle.
    pub fn new(name: impl Into<String>, count: u64, cyclic: bool, timeout: Duration) -> Barrier {
        Barrier {
            name: name.into(),
            count,
            cyclic,
            timeout,
            state: Mutex::new(State {
                current: 0,
                cycle: 0,
            }),
            notify: Notify::new(),
        }
    }

    /// Block until `count` participants (including this one) have called
    /// `sync`. Returns an error if this call's wait exceeds the barrier's
    /// timeout; other waiters are unaffected and keep waiting.
    pub async fn sync(&self) -> Result<()> {
        let wait_for_cycle = {
            let mut state = self.state.lock().await;
            state.current += 1;
            let my_cycle = state.cycle;
            if state.current >= self.count {
                state.current = 0;
                state.cycle += 1;
                self.notify.notify_waiters();
                return Ok(());
            }
            my_cycle
        };

        loop {
            let notified = self.notify.notified();
            {
                let state = self.state.lock().await;
                if state.cycle > wait_for_cycle {
                    return Ok(());
                }
            }
            match timeout(self.timeout, notified).await {
                Ok(()) => {
                    let state = self.state.lock().await;
                    if state.cycle > wait_for_cycle {
                        return Ok(());
                    }
                    // Spurious wakeup from an unrelated cycle; keep waiting
                    // for the remainder of this call's budget.
                }
                Err(_) => {
                    let mut state = self.state.lock().await;
                    if state.cycle > wait_for_cycle {
                        return Ok(());
                    }
                    if state.current > 0 {
                        state.current -= 1;
                    }
                    return Err(Error::barrier_timeout(self.name.clone()));
                }
            }
        }
    }

    /// Whether this barrier releases repeatedly (vs. once).
    pub fn is_cyclic(&self) -> bool {
        self.cyclic
    }

    /// The barrier's configured participant count.
    pub fn count(&self) -> u64 {
        self.count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn three_participants_release_together() {
        let barrier = Arc::new(Barrier::new("b1", 3, false, Duration::from_secs(5)));
        let mut handles = Vec::new();
        for _ in 0..3 {
            let b = barrier.clone();
            handles.push(tokio::spawn(async move { b.sync().await }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
    }

    #[tokio::test]
    async fn cyclic_barrier_releases_every_cycle() {
        let barrier = Arc::new(Barrier::new("b1", 2, true, Duration::from_secs(5)));
        for _cycle in 0..2 {
            let mut handles = Vec::new();
            for _ in 0..2 {
                let b = barrier.clone();
                handles.push(tokio::spawn(async move { b.sync().await }));
            }
            for h in handles {
                h.await.unwrap().unwrap();
            }
        }
    }

    #[tokio::test]
    async fn lone_waiter_times_out() {
        let barrier = Barrier::new("b1", 2, false, Duration::from_millis(50));
        let err = barrier.sync().await.unwrap_err();
        assert!(format!("{}", err).contains("barrier"));
    }
}
