use revgraph_core::error::{Error, Result};
use std::{
    sync::{Condvar, Mutex},
    time::Duration,
};

const IDLE_WAIT: Duration = Duration::from_millis(1);

#[derive(Debug, Default)]
struct BarrierState {
    permits: usize,
    released: usize,
}

/// One-shot counting barrier for a fan-in node.
///
/// The last of `parties` arrivals releases the other `parties - 1`. A waiter
/// on a rayon worker keeps running pending pool jobs while it waits, so
/// arrivals that still have to happen are never starved of threads.
#[derive(Debug)]
pub struct JoinBarrier {
    parties: usize,
    state: Mutex<BarrierState>,
    cvar: Condvar,
}

impl JoinBarrier {
    pub fn new(parties: usize) -> Self {
        Self {
            parties,
            state: Mutex::new(BarrierState::default()),
            cvar: Condvar::new(),
        }
    }

    pub fn parties(&self) -> usize {
        self.parties
    }

    pub fn released(&self) -> Result<usize> {
        Ok(self.state.lock()?.released)
    }

    /// Hands out `count` permits. Releasing more than `parties - 1` in total
    /// is an error and hands out nothing.
    pub fn release(&self, count: usize) -> Result<()> {
        let mut state = self.state.lock()?;
        let released = state.released + count;
        if released > self.parties.saturating_sub(1) {
            return Err(Error::BarrierOverflow {
                parties: self.parties,
                released,
            });
        }
        state.released = released;
        state.permits += count;
        self.cvar.notify_all();
        Ok(())
    }

    /// Blocks until a permit is available.
    ///
    /// `check` runs under the barrier lock whenever no permit is found; an
    /// error from it ends the wait.
    pub fn wait<F>(&self, mut check: F) -> Result<()>
    where
        F: FnMut() -> Result<()>,
    {
        loop {
            {
                let mut state = self.state.lock()?;
                if state.permits > 0 {
                    state.permits -= 1;
                    return Ok(());
                }
                check()?;
            }

            if let Some(rayon::Yield::Executed) = rayon::yield_now() {
                continue;
            }

            let state = self.state.lock()?;
            if state.permits == 0 {
                let _ = self.cvar.wait_timeout(state, IDLE_WAIT)?;
            }
        }
    }

    /// Wakes every waiter so it re-runs its check.
    pub fn interrupt(&self) {
        if let Ok(_state) = self.state.lock() {
            self.cvar.notify_all();
        }
    }
}
