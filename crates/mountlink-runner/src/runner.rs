//! Module execution: retries, session reuse, aggregation.
//!
//! A [`TestModule`] is an ordered list of test cases run over one endpoint.
//! [`TestRunner::run_module`] executes its cases strictly in order over a
//! single session, retrying timeouts and transport errors, and aggregates
//! the final attempts into a [`ModuleResult`].
//!
//! [`TestRunner::run_modules`] runs several modules concurrently, one task
//! each. A module that fails or panics is reported as
//! [`ModuleStatus::Error`](mountlink_core::ModuleStatus::Error) and never
//! takes its siblings down with it.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::Instrument;

use mountlink_core::error::Error;
use mountlink_core::transport::Connect;
use mountlink_core::{
    ModuleResult, ModuleState, RunEvent, Session, TestCase, TestResult, TestStatus,
};
use mountlink_protocol::{Exchange, ProtocolClient};

use crate::report::RunReport;

/// Default pause between attempts of the same test case.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(100);

/// A named, ordered group of test cases.
#[derive(Debug, Clone)]
pub struct TestModule {
    name: String,
    cases: Vec<TestCase>,
    stop_on_critical: bool,
}

impl TestModule {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cases: Vec::new(),
            stop_on_critical: false,
        }
    }

    pub fn with_case(mut self, case: TestCase) -> Self {
        self.cases.push(case);
        self
    }

    pub fn with_cases(mut self, cases: impl IntoIterator<Item = TestCase>) -> Self {
        self.cases.extend(cases);
        self
    }

    /// When set, a critical case that does not pass marks every later case
    /// `Skipped` instead of running it.
    pub fn stop_on_critical(mut self, stop: bool) -> Self {
        self.stop_on_critical = stop;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cases(&self) -> &[TestCase] {
        &self.cases
    }
}

/// A module together with how to reach its endpoint.
///
/// A `target` error means the endpoint could not even be described (bad
/// configuration, no baud rate answered); the module is then reported
/// without opening anything.
pub struct ModuleJob {
    pub module: TestModule,
    pub target: Result<Arc<dyn Connect>, Error>,
}

impl ModuleJob {
    pub fn new(module: TestModule, connector: Arc<dyn Connect>) -> Self {
        Self {
            module,
            target: Ok(connector),
        }
    }

    pub fn unreachable(module: TestModule, error: Error) -> Self {
        Self {
            module,
            target: Err(error),
        }
    }
}

/// Executes modules and publishes progress.
#[derive(Debug, Clone)]
pub struct TestRunner {
    client: ProtocolClient,
    retry_backoff: Duration,
    events: Option<broadcast::Sender<RunEvent>>,
}

impl Default for TestRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl TestRunner {
    pub fn new() -> Self {
        Self {
            client: ProtocolClient::new(),
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            events: None,
        }
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Publish run progress on `events`. Each run should get its own channel.
    pub fn with_events(mut self, events: broadcast::Sender<RunEvent>) -> Self {
        self.events = Some(events);
        self
    }

    fn emit(&self, event: RunEvent) {
        if let Some(tx) = &self.events {
            // No subscribers is fine.
            let _ = tx.send(event);
        }
    }

    fn emit_state(&self, module: &str, state: ModuleState) {
        self.emit(RunEvent::ModuleState {
            module: module.to_string(),
            state,
        });
    }

    /// Run every case of `module` over sessions from `connector`.
    pub async fn run_module(&self, module: &TestModule, connector: &dyn Connect) -> ModuleResult {
        let span = tracing::info_span!(
            "module",
            module = %module.name(),
            endpoint = %connector.endpoint()
        );
        self.run_module_inner(module, connector).instrument(span).await
    }

    async fn run_module_inner(&self, module: &TestModule, connector: &dyn Connect) -> ModuleResult {
        self.emit_state(module.name(), ModuleState::Running);
        tracing::info!(cases = module.cases().len(), "Module started");

        let mut session: Option<Session> = None;
        let mut results = Vec::with_capacity(module.cases().len());
        let mut blocked_by: Option<String> = None;

        for case in module.cases() {
            let result = match &blocked_by {
                Some(prerequisite) => TestResult::skipped(
                    case,
                    format!("skipped: critical test {prerequisite:?} did not pass"),
                ),
                None => self.run_case(module.name(), case, connector, &mut session).await,
            };

            tracing::info!(
                test = case.name(),
                status = %result.status(),
                attempts = result.attempts(),
                "Test finished"
            );
            self.emit(RunEvent::TestFinished {
                module: module.name().to_string(),
                result: result.clone(),
            });

            if blocked_by.is_none()
                && module.stop_on_critical
                && case.is_critical()
                && !result.passed()
            {
                blocked_by = Some(case.name().to_string());
            }
            results.push(result);
        }

        if let Some(open) = session.take() {
            close_session(open).await;
        }

        let result = ModuleResult::from_results(module.name(), results);
        tracing::info!(status = %result.overall_status(), "Module finished");
        self.finish(module.name(), &result);
        result
    }

    fn finish(&self, module: &str, result: &ModuleResult) {
        self.emit(RunEvent::ModuleFinished {
            module: module.to_string(),
            status: result.overall_status(),
        });
        self.emit_state(module, ModuleState::Completed);
    }

    /// Run one case, retrying timeouts and transport errors.
    async fn run_case(
        &self,
        module: &str,
        case: &TestCase,
        connector: &dyn Connect,
        session: &mut Option<Session>,
    ) -> TestResult {
        let started = Instant::now();
        let max_attempts = case.max_attempts();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let exchange = self.attempt(case, connector, session).await;

            self.emit(RunEvent::AttemptFinished {
                module: module.to_string(),
                test: case.name().to_string(),
                attempt,
                status: exchange.status,
                detail: exchange.detail.clone(),
            });

            if !exchange.status.is_retryable() || attempt >= max_attempts {
                return exchange
                    .into_result(case, attempt)
                    .with_duration(started.elapsed());
            }

            tracing::info!(
                test = case.name(),
                attempt,
                max_attempts,
                status = %exchange.status,
                detail = %exchange.detail,
                "Retrying"
            );
            tokio::time::sleep(self.retry_backoff).await;
        }
    }

    /// One attempt: open a session if needed, exchange, and drop the
    /// session if the exchange left it in doubt.
    async fn attempt(
        &self,
        case: &TestCase,
        connector: &dyn Connect,
        session: &mut Option<Session>,
    ) -> Exchange {
        let started = Instant::now();

        let mut open = match session.take() {
            Some(open) => open,
            None => match connector.connect().await {
                Ok(opened) => opened,
                Err(e) => {
                    tracing::warn!(endpoint = %connector.endpoint(), error = %e, "Cannot open session");
                    return Exchange {
                        status: TestStatus::Error,
                        detail: format!("cannot open {}: {e}", connector.endpoint()),
                        response: None,
                        error: Some(e),
                        elapsed: started.elapsed(),
                    };
                }
            },
        };

        let exchange = self.client.exchange(&mut open, case).await;

        // A late reply to a timed-out command would otherwise be read as the
        // answer to the next one.
        if exchange.session_suspect() {
            close_session(open).await;
        } else {
            *session = Some(open);
        }
        exchange
    }

    /// Run a module whose target may already have failed.
    pub async fn run_job(&self, job: ModuleJob) -> ModuleResult {
        match job.target {
            Ok(connector) => self.run_module(&job.module, connector.as_ref()).await,
            Err(error) => self.report_unreachable(&job.module, error),
        }
    }

    fn report_unreachable(&self, module: &TestModule, error: Error) -> ModuleResult {
        self.emit_state(module.name(), ModuleState::Running);
        tracing::warn!(module = module.name(), error = %error, "Module target unavailable");

        let result = if matches!(error, Error::InvalidParameter(_)) {
            ModuleResult::errored(module.name(), &error, Vec::new())
        } else {
            let results = module
                .cases()
                .iter()
                .map(|case| {
                    TestResult::new(case.name(), TestStatus::Error, error.to_string())
                        .critical(case.is_critical())
                        .with_failure(&error)
                })
                .collect();
            ModuleResult::from_results(module.name(), results)
        };

        self.finish(module.name(), &result);
        result
    }

    /// Run `jobs` concurrently, one task per module. Results come back in
    /// the order the jobs were given.
    pub async fn run_modules(&self, jobs: Vec<ModuleJob>) -> Vec<ModuleResult> {
        for job in &jobs {
            self.emit_state(job.module.name(), ModuleState::Pending);
        }

        let handles: Vec<_> = jobs
            .into_iter()
            .map(|job| {
                let name = job.module.name().to_string();
                let runner = self.clone();
                (name, tokio::spawn(async move { runner.run_job(job).await }))
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for (name, handle) in handles {
            match handle.await {
                Ok(result) => results.push(result),
                Err(e) => {
                    let cause = if e.is_panic() {
                        "module task panicked"
                    } else {
                        "module task was cancelled"
                    };
                    tracing::error!(module = %name, error = %e, "{cause}");
                    let result = ModuleResult::errored(&name, cause, Vec::new());
                    self.finish(&name, &result);
                    results.push(result);
                }
            }
        }
        results
    }

    /// [`run_modules`](Self::run_modules), stamped with the start time and
    /// the total duration.
    pub async fn run_report(&self, jobs: Vec<ModuleJob>) -> RunReport {
        let started = chrono::Utc::now();
        let clock = Instant::now();
        let modules = self.run_modules(jobs).await;
        let report = RunReport::new(started, clock.elapsed(), modules);
        tracing::info!(
            modules = report.modules.len(),
            duration_ms = report.test_duration_ms,
            "Run finished"
        );
        report
    }
}

async fn close_session(mut session: Session) {
    if let Err(e) = session.close().await {
        tracing::warn!(endpoint = %session.endpoint(), error = %e, "Failed to close session");
    }
}
