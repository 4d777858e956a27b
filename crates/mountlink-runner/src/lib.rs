//! mountlink-runner: executes diagnostic modules against a controller.
//!
//! - [`RunConfig`]: where the device is and how patient to be
//! - [`ModuleKind`] / [`build_module`]: the built-in module catalog
//! - [`TestRunner`]: retries, session reuse, aggregation, concurrent modules
//! - [`RunReport`]: timestamped results of a whole run
//! - [`probe_baud`]: find the baud rate a serial controller answers at
//!
//! # Example
//!
//! ```no_run
//! use mountlink_runner::{resolve_job, ModuleKind, RunConfig, TestRunner};
//!
//! # async fn example() {
//! let config = RunConfig::default().with_host("192.168.4.1");
//! let mut jobs = Vec::new();
//! for kind in ModuleKind::all() {
//!     jobs.push(resolve_job(*kind, &config).await);
//! }
//! let runner = TestRunner::new().with_retry_backoff(config.retry_backoff());
//! for result in runner.run_modules(jobs).await {
//!     println!("{}: {}", result.module(), result.overall_status());
//! }
//! # }
//! ```

pub mod config;
pub mod modules;
pub mod probe;
pub mod report;
pub mod runner;

pub use config::{BaudPolicy, RunConfig, STANDARD_BAUD_CANDIDATES};
pub use modules::{build_module, module_endpoint, resolve_job, ModuleKind};
pub use probe::{probe_baud, probe_serial, BaudAttempt, ProbeReport};
pub use report::RunReport;
pub use runner::{ModuleJob, TestModule, TestRunner, DEFAULT_RETRY_BACKOFF};
