//! Run progress events.
//!
//! The test runner publishes events through a [`tokio::sync::broadcast`]
//! channel handed to it by the caller, so every run has its own sink and
//! concurrently running modules never share global logging state.
//! Delivery is best-effort: a slow subscriber may miss events.

use crate::types::{ModuleStatus, TestResult, TestStatus};

/// Lifecycle state of a module run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleState {
    Pending,
    Running,
    Completed,
}

/// An event emitted while a run progresses.
#[derive(Debug, Clone)]
pub enum RunEvent {
    /// A module changed lifecycle state.
    ModuleState { module: String, state: ModuleState },

    /// One attempt of a test case finished.
    ///
    /// Attempts that are later retried only ever show up here; the module
    /// result keeps the final attempt alone.
    AttemptFinished {
        module: String,
        test: String,
        /// 1-based attempt number.
        attempt: u32,
        status: TestStatus,
        detail: String,
    },

    /// A test case produced its final result.
    TestFinished { module: String, result: TestResult },

    /// A module finished with the given overall status.
    ModuleFinished { module: String, status: ModuleStatus },
}
