use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Instant;

use flume::Sender;
use futures::StreamExt;
use futures::future;
use futures::stream;
use thiserror::Error;
use tracing::error;
use tracing::info;
use tracing::instrument;
use tracing::warn;

use crate::asserter;
use crate::executor::Transport;
use crate::materializer::materialize;
use crate::model::Environment;
use crate::model::ExecutionResult;
use crate::model::RequestTemplate;
use crate::model::ResponseEnvelope;
use crate::model::SuiteDefinition;
use crate::model::SuiteResult;
use crate::model::SuiteStatus;
use crate::model::TestDefinition;
use crate::model::Variables;
use crate::store::ResultStore;
use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("failed to persist result for test `{test}`: {source}")]
    Store {
        test: String,
        #[source]
        source: StoreError,
    },
}

/// Progress notifications for whoever renders a run.
#[derive(Debug, Clone)]
pub enum RunEvent {
    SuiteStarted { suite: String, total: usize },
    TestFinished(Box<ExecutionResult>),
    SuiteFinished(Box<SuiteResult>),
}

/// Drives materialize -> auth -> send -> assert -> persist.
///
/// The environment is captured once when the runner is built, so a run is not
/// affected by later edits to it.
pub struct Runner {
    transport: Arc<dyn Transport>,
    store: Arc<dyn ResultStore>,
    variables: Variables,
    environment: Option<String>,
    concurrency: usize,
    events: Option<Sender<RunEvent>>,
}

impl Runner {
    pub fn new(transport: Arc<dyn Transport>, store: Arc<dyn ResultStore>) -> Self {
        Self {
            transport,
            store,
            variables: Variables::new(),
            environment: None,
            concurrency: 1,
            events: None,
        }
    }

    pub fn with_environment(mut self, environment: Option<&Environment>) -> Self {
        self.variables = environment
            .map(|env| env.variables.clone())
            .unwrap_or_default();
        self.environment = environment.map(|env| env.name.clone());
        self
    }

    /// Tests in flight at once; 1 runs them strictly one after another.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_events(mut self, events: Sender<RunEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn store(&self) -> &Arc<dyn ResultStore> {
        &self.store
    }

    #[instrument(skip_all, fields(request = %template.name))]
    pub async fn execute_request(&self, template: &RequestTemplate) -> ResponseEnvelope {
        let request = materialize(template, &self.variables);
        self.transport.send(&request).await
    }

    #[instrument(skip_all, fields(test = %test.name))]
    pub async fn run_test(&self, test: &TestDefinition) -> Result<ExecutionResult, RunnerError> {
        let running = ExecutionResult::start(test, self.environment.as_deref());
        self.persist(test, self.store.create_execution(&running).await)?;

        let response = self.execute_request(&test.request).await;
        let evaluation = match response.error {
            Some(_) => None,
            None => Some(asserter::evaluate(&response, test)),
        };

        let result = running.finalize(response, evaluation);
        self.persist(test, self.store.finalize_execution(&result).await)?;

        info!(status = ?result.status, "test finished");
        self.emit(RunEvent::TestFinished(Box::new(result.clone())));

        Ok(result)
    }

    /// Runs every enabled test regardless of earlier failures. Always returns
    /// a terminal result; a persistence fault stops scheduling more tests and
    /// marks the suite failed.
    #[instrument(skip_all, fields(suite = %suite.name))]
    pub async fn run_suite(&self, suite: &SuiteDefinition) -> SuiteResult {
        let started = Instant::now();
        let suite_result = SuiteResult::start(suite, self.environment.as_deref());
        let tests: Vec<&TestDefinition> = suite.enabled_tests().collect();

        self.emit(RunEvent::SuiteStarted {
            suite: suite.name.clone(),
            total: tests.len(),
        });

        if let Err(err) = self.store.create_suite(&suite_result).await {
            error!(error = %err, "failed to record suite start");
            let finished = suite_result.finish(
                Vec::new(),
                elapsed_ms(started),
                Some(format!("failed to record suite start: {err}")),
            );
            self.emit(RunEvent::SuiteFinished(Box::new(finished.clone())));
            return finished;
        }

        let mut results = Vec::with_capacity(tests.len());
        let mut fault = None;

        let halted = AtomicBool::new(false);

        // After a fault no new test is started, but tests already in flight
        // run to completion so none of their records is left `running`.
        let mut runs = stream::iter(tests)
            .take_while(|_| future::ready(!halted.load(Ordering::SeqCst)))
            .map(|test| self.run_test(test))
            .buffered(self.concurrency);

        while let Some(outcome) = runs.next().await {
            match outcome {
                Ok(result) => results.push(result),
                Err(err) => {
                    error!(error = %err, "aborting suite");
                    halted.store(true, Ordering::SeqCst);
                    fault.get_or_insert_with(|| err.to_string());
                }
            }
        }
        drop(runs);

        let mut finished = suite_result.finish(results, elapsed_ms(started), fault);

        if let Err(err) = self.store.finalize_suite(&finished).await {
            warn!(error = %err, "failed to record suite completion");
            if finished.error.is_none() {
                finished = SuiteResult {
                    status: SuiteStatus::Failed,
                    error: Some(format!("failed to record suite completion: {err}")),
                    ..finished
                };
            }
        }

        info!(
            total = finished.total_tests,
            passed = finished.passed_tests,
            failed = finished.failed_tests,
            status = ?finished.status,
            "suite finished"
        );
        self.emit(RunEvent::SuiteFinished(Box::new(finished.clone())));

        finished
    }

    fn persist(
        &self,
        test: &TestDefinition,
        outcome: Result<(), StoreError>,
    ) -> Result<(), RunnerError> {
        outcome.map_err(|source| RunnerError::Store {
            test: test.name.clone(),
            source,
        })
    }

    fn emit(&self, event: RunEvent) {
        if let Some(events) = &self.events {
            // A closed receiver only means nobody is watching.
            let _ = events.send(event);
        }
    }
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}
