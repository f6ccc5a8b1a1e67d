//! Persistence seam for execution and suite results.

use std::sync::Mutex;
use std::sync::MutexGuard;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::model::ExecutionResult;
use crate::model::ExecutionStatus;
use crate::model::SuiteResult;
use crate::model::SuiteStatus;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("no record with id {0}")]
    NotFound(Uuid),

    #[error("record {0} already exists")]
    Duplicate(Uuid),

    #[error("record {0} is already finalized")]
    AlreadyFinalized(Uuid),

    #[error("record {0} cannot be finalized while still running")]
    NotTerminal(Uuid),

    #[error("result store unavailable: {0}")]
    Unavailable(String),
}

/// Created in `running` state, finalized exactly once.
#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn create_execution(&self, result: &ExecutionResult) -> Result<(), StoreError>;
    async fn finalize_execution(&self, result: &ExecutionResult) -> Result<(), StoreError>;
    async fn create_suite(&self, result: &SuiteResult) -> Result<(), StoreError>;
    async fn finalize_suite(&self, result: &SuiteResult) -> Result<(), StoreError>;

    /// Finalized execution results, newest first.
    async fn recent_executions(&self, limit: usize) -> Result<Vec<ExecutionResult>, StoreError>;
    async fn statistics(&self) -> Result<ResultStatistics, StoreError>;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResultStatistics {
    pub total_results: usize,
    pub passed_results: usize,
    pub failed_results: usize,
    pub error_results: usize,
    pub success_rate: f64,
    pub average_response_time: f64,
}

impl ResultStatistics {
    pub fn from_results<'a>(results: impl IntoIterator<Item = &'a ExecutionResult>) -> Self {
        let mut stats = Self::default();
        let mut timed = 0usize;
        let mut time_sum = 0.0;

        for result in results {
            match result.status {
                ExecutionStatus::Running => continue,
                ExecutionStatus::Passed => stats.passed_results += 1,
                ExecutionStatus::Failed => stats.failed_results += 1,
                ExecutionStatus::Error => stats.error_results += 1,
            }
            stats.total_results += 1;

            if let Some(response) = &result.response {
                timed += 1;
                time_sum += response.elapsed_ms;
            }
        }

        if stats.total_results > 0 {
            stats.success_rate =
                stats.passed_results as f64 / stats.total_results as f64 * 100.0;
        }
        if timed > 0 {
            stats.average_response_time = (time_sum / timed as f64 * 100.0).round() / 100.0;
        }

        stats
    }
}

#[derive(Debug, Default)]
struct Records {
    executions: Vec<ExecutionResult>,
    suites: Vec<SuiteResult>,
}

/// Process-local store. Records are kept in insertion order.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<Records>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Records>, StoreError> {
        self.records
            .lock()
            .map_err(|_| StoreError::Unavailable("store lock poisoned".into()))
    }

    pub fn execution(&self, id: Uuid) -> Option<ExecutionResult> {
        self.lock()
            .ok()?
            .executions
            .iter()
            .find(|r| r.id == id)
            .cloned()
    }

    pub fn suite(&self, id: Uuid) -> Option<SuiteResult> {
        self.lock().ok()?.suites.iter().find(|r| r.id == id).cloned()
    }
}

#[async_trait]
impl ResultStore for MemoryStore {
    async fn create_execution(&self, result: &ExecutionResult) -> Result<(), StoreError> {
        let mut records = self.lock()?;
        if records.executions.iter().any(|r| r.id == result.id) {
            return Err(StoreError::Duplicate(result.id));
        }
        records.executions.push(result.clone());
        Ok(())
    }

    async fn finalize_execution(&self, result: &ExecutionResult) -> Result<(), StoreError> {
        if !result.is_finalized() {
            return Err(StoreError::NotTerminal(result.id));
        }

        let mut records = self.lock()?;
        let stored = records
            .executions
            .iter_mut()
            .find(|r| r.id == result.id)
            .ok_or(StoreError::NotFound(result.id))?;

        if stored.is_finalized() {
            return Err(StoreError::AlreadyFinalized(result.id));
        }
        *stored = result.clone();
        Ok(())
    }

    async fn create_suite(&self, result: &SuiteResult) -> Result<(), StoreError> {
        let mut records = self.lock()?;
        if records.suites.iter().any(|r| r.id == result.id) {
            return Err(StoreError::Duplicate(result.id));
        }
        records.suites.push(result.clone());
        Ok(())
    }

    async fn finalize_suite(&self, result: &SuiteResult) -> Result<(), StoreError> {
        if result.status == SuiteStatus::Running {
            return Err(StoreError::NotTerminal(result.id));
        }

        let mut records = self.lock()?;
        let stored = records
            .suites
            .iter_mut()
            .find(|r| r.id == result.id)
            .ok_or(StoreError::NotFound(result.id))?;

        if stored.status != SuiteStatus::Running {
            return Err(StoreError::AlreadyFinalized(result.id));
        }
        *stored = result.clone();
        Ok(())
    }

    async fn recent_executions(&self, limit: usize) -> Result<Vec<ExecutionResult>, StoreError> {
        let records = self.lock()?;
        Ok(records
            .executions
            .iter()
            .rev()
            .filter(|r| r.is_finalized())
            .take(limit)
            .cloned()
            .collect())
    }

    async fn statistics(&self) -> Result<ResultStatistics, StoreError> {
        let records = self.lock()?;
        Ok(ResultStatistics::from_results(&records.executions))
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use reqwest::Method;

    use super::*;
    use crate::model::Evaluation;
    use crate::model::RequestTemplate;
    use crate::model::ResponseEnvelope;
    use crate::model::SuiteDefinition;
    use crate::model::TestDefinition;

    fn test_definition(name: &str) -> TestDefinition {
        TestDefinition::new(
            name,
            Arc::new(RequestTemplate::new("r", Method::GET, "http://h/")),
        )
    }

    fn ok_response(elapsed_ms: f64) -> ResponseEnvelope {
        ResponseEnvelope {
            status_code: Some(200),
            elapsed_ms,
            ..Default::default()
        }
    }

    fn failing() -> Option<Evaluation> {
        Some(Evaluation {
            passed: false,
            assertions: vec![],
            script: None,
        })
    }

    #[tokio::test]
    async fn execution_is_finalized_exactly_once() {
        let store = MemoryStore::new();
        let running = ExecutionResult::start(&test_definition("t"), None);
        store.create_execution(&running).await.unwrap();

        assert!(matches!(
            store.finalize_execution(&running).await,
            Err(StoreError::NotTerminal(_))
        ));

        let done = running.finalize(ok_response(10.0), None);
        store.finalize_execution(&done).await.unwrap();
        assert_eq!(store.execution(done.id), Some(done.clone()));

        assert!(matches!(
            store.finalize_execution(&done).await,
            Err(StoreError::AlreadyFinalized(_))
        ));
    }

    #[tokio::test]
    async fn finalize_unknown_record_fails() {
        let store = MemoryStore::new();
        let done =
            ExecutionResult::start(&test_definition("t"), None).finalize(ok_response(1.0), None);

        assert!(matches!(
            store.finalize_execution(&done).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn suite_lifecycle() {
        let store = MemoryStore::new();
        let suite = SuiteDefinition {
            name: "s".into(),
            tests: vec![],
        };
        let running = SuiteResult::start(&suite, None);

        store.create_suite(&running).await.unwrap();
        assert!(matches!(
            store.create_suite(&running).await,
            Err(StoreError::Duplicate(_))
        ));

        let done = running.finish(vec![], 0.0, None);
        store.finalize_suite(&done).await.unwrap();
        assert_eq!(store.suite(done.id).unwrap().status, SuiteStatus::Completed);
        assert!(store.finalize_suite(&done).await.is_err());
    }

    #[tokio::test]
    async fn statistics_and_recent() {
        let store = MemoryStore::new();
        let outcomes = [
            ExecutionResult::start(&test_definition("a"), None).finalize(ok_response(10.0), None),
            ExecutionResult::start(&test_definition("b"), None)
                .finalize(ok_response(20.0), failing()),
            ExecutionResult::start(&test_definition("c"), None)
                .finalize(ResponseEnvelope::failed("refused", 5.0), None),
            ExecutionResult::start(&test_definition("d"), None).finalize(ok_response(1.0), None),
        ];
        for outcome in &outcomes {
            let mut running = outcome.clone();
            running.status = ExecutionStatus::Running;
            store.create_execution(&running).await.unwrap();
            store.finalize_execution(outcome).await.unwrap();
        }
        let pending = ExecutionResult::start(&test_definition("e"), None);
        store.create_execution(&pending).await.unwrap();

        let stats = store.statistics().await.unwrap();
        assert_eq!(stats.total_results, 4);
        assert_eq!(stats.passed_results, 2);
        assert_eq!(stats.failed_results, 1);
        assert_eq!(stats.error_results, 1);
        assert_eq!(stats.success_rate, 50.0);
        assert_eq!(stats.average_response_time, 9.0);

        let recent = store.recent_executions(2).await.unwrap();
        let names: Vec<_> = recent.iter().map(|r| r.test_name.as_str()).collect();
        assert_eq!(names, ["d", "c"]);
    }

    #[test]
    fn empty_statistics_are_zero() {
        assert_eq!(
            ResultStatistics::from_results(&[]),
            ResultStatistics::default()
        );
    }
}
