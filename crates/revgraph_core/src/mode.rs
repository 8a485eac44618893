#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ExecutionMode {
    /// Branches run one after another on the calling thread.
    Sequential,
    /// Branches run as tasks on a rayon pool.
    Parallel,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sequential => "sequential",
            Self::Parallel => "parallel",
        }
    }

    pub fn is_parallel(&self) -> bool {
        matches!(self, Self::Parallel)
    }
}

thread_local! {
    static DEFAULT_EXECUTION_MODE: std::cell::Cell<ExecutionMode> = const { std::cell::Cell::new(ExecutionMode::Parallel) };
}

pub fn get_default_execution_mode() -> ExecutionMode {
    DEFAULT_EXECUTION_MODE.with(|m| m.get())
}

pub fn set_default_execution_mode(mode: ExecutionMode) {
    DEFAULT_EXECUTION_MODE.with(|m| m.set(mode));
}

pub struct ExecutionModeGuard {
    prev_mode: ExecutionMode,
}

impl ExecutionModeGuard {
    fn new(mode: ExecutionMode) -> Self {
        let prev_mode = get_default_execution_mode();
        set_default_execution_mode(mode);
        Self { prev_mode }
    }
}

impl Drop for ExecutionModeGuard {
    fn drop(&mut self) {
        set_default_execution_mode(self.prev_mode);
    }
}

pub fn sequential_mode() -> ExecutionModeGuard {
    ExecutionModeGuard::new(ExecutionMode::Sequential)
}

pub fn parallel_mode() -> ExecutionModeGuard {
    ExecutionModeGuard::new(ExecutionMode::Parallel)
}

pub fn with_execution_mode<F, R>(mode: ExecutionMode, f: F) -> R
where
    F: FnOnce() -> R,
{
    let _guard = ExecutionModeGuard::new(mode);
    f()
}
