//! Fans one query out to several strategies with bounded concurrency

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{Instant, timeout, timeout_at};
use tracing::{error, info, warn};

use super::sink::ResultWriter;
use crate::domain::{
    InstrumentedExecutor, StrategyConfig, StrategyFactory, StrategyKind, StrategyResult,
};

pub const DEFAULT_CONCURRENCY: usize = 3;
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(300);

/// One fan-out request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    pub query: String,
    /// Restricts every search to one document
    #[serde(default)]
    pub scope: Option<String>,
    pub strategies: Vec<String>,
    /// Maximum strategies running at once; the orchestrator default when unset
    #[serde(default)]
    pub concurrency: Option<usize>,
    #[serde(default)]
    pub config: StrategyConfig,
}

impl QueryRequest {
    pub fn new<S: Into<String>>(query: impl Into<String>, strategies: impl IntoIterator<Item = S>) -> Self {
        Self {
            query: query.into(),
            strategies: strategies.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = Some(concurrency);
        self
    }

    pub fn with_config(mut self, config: StrategyConfig) -> Self {
        self.config = config;
        self
    }
}

/// A strategy that produced no result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskFailure {
    pub technique_id: String,
    pub reason: String,
    pub partial_trace_len: usize,
    /// Stopped by the request deadline rather than by its own error
    #[serde(default)]
    pub cancelled: bool,
}

impl TaskFailure {
    fn new(technique_id: impl Into<String>, reason: impl Into<String>, partial_trace_len: usize) -> Self {
        Self {
            technique_id: technique_id.into(),
            reason: reason.into(),
            partial_trace_len,
            cancelled: false,
        }
    }

    fn cancelled(technique_id: impl Into<String>, partial_trace_len: usize) -> Self {
        Self {
            cancelled: true,
            ..Self::new(technique_id, "Cancelled by request timeout", partial_trace_len)
        }
    }
}

/// Successful results in completion order plus the failures that were skipped
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FanOutOutcome {
    pub results: Vec<StrategyResult>,
    pub failures: Vec<TaskFailure>,
    pub requested: usize,
}

impl FanOutOutcome {
    /// True when at least one requested strategy produced no result
    pub fn degraded(&self) -> bool {
        self.results.len() < self.requested
    }
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("No strategies requested")]
    NoStrategies,

    #[error("All {requested} strategies failed")]
    AllFailed {
        requested: usize,
        failures: Vec<TaskFailure>,
    },

    #[error("Request timed out after {elapsed:?} before any strategy completed")]
    Timeout {
        elapsed: Duration,
        failures: Vec<TaskFailure>,
    },
}

/// Limits applied to every fan-out
#[derive(Debug, Clone, Copy)]
pub struct OrchestratorSettings {
    pub concurrency: usize,
    pub task_timeout: Duration,
    /// Cancels strategies still executing once elapsed
    pub request_timeout: Option<Duration>,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            task_timeout: DEFAULT_TASK_TIMEOUT,
            request_timeout: None,
        }
    }
}

pub struct Orchestrator {
    factory: Arc<dyn StrategyFactory>,
    writer: Option<ResultWriter>,
    settings: OrchestratorSettings,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("factory", &self.factory)
            .field("persisting", &self.writer.is_some())
            .field("settings", &self.settings)
            .finish()
    }
}

impl Orchestrator {
    pub fn new(factory: Arc<dyn StrategyFactory>) -> Self {
        Self {
            factory,
            writer: None,
            settings: OrchestratorSettings::default(),
        }
    }

    /// Hands every successful result to `writer` before it counts as done
    pub fn with_writer(mut self, writer: ResultWriter) -> Self {
        self.writer = Some(writer);
        self
    }

    pub fn with_settings(mut self, settings: OrchestratorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub async fn run(&self, request: QueryRequest) -> Result<FanOutOutcome, OrchestratorError> {
        if request.strategies.is_empty() {
            return Err(OrchestratorError::NoStrategies);
        }

        let requested = request.strategies.len();
        let concurrency = request
            .concurrency
            .unwrap_or(self.settings.concurrency)
            .max(1);
        let started = Instant::now();
        let deadline = self.settings.request_timeout.map(|d| started + d);

        info!(
            requested,
            concurrency,
            scope = request.scope.as_deref().unwrap_or("-"),
            "Starting fan-out"
        );

        let query: Arc<str> = Arc::from(request.query.as_str());
        let config = Arc::new(request.config);
        let semaphore = Arc::new(Semaphore::new(concurrency));

        let mut failures = Vec::new();
        let mut tasks = JoinSet::new();

        for id in &request.strategies {
            let strategy = match id
                .parse::<StrategyKind>()
                .and_then(|kind| self.factory.create(kind, &config, request.scope.as_deref()))
            {
                Ok(strategy) => strategy,
                Err(e) => {
                    warn!(technique = id.as_str(), "Skipping strategy: {}", e);
                    failures.push(TaskFailure::new(id.as_str(), e.to_string(), 0));
                    continue;
                }
            };

            let technique_id = strategy.kind().id().to_string();

            let query = query.clone();
            let config = config.clone();
            let semaphore = semaphore.clone();
            let writer = self.writer.clone();
            let task_timeout = self.settings.task_timeout;

            tasks.spawn(async move {
                let run = async {
                    let executor = InstrumentedExecutor::new();

                    let work = async {
                        let permit = semaphore
                            .acquire_owned()
                            .await
                            .map_err(|_| TaskFailure::new(&technique_id, "Semaphore closed", 0))?;
                        let outcome = timeout(
                            task_timeout,
                            executor.execute(strategy.as_ref(), &query, &config),
                        )
                        .await;
                        Ok::<_, TaskFailure>((permit, outcome))
                    };

                    // The deadline bounds execution only; a finished result is always persisted
                    let (_permit, outcome) = match deadline {
                        Some(deadline) => match timeout_at(deadline, work).await {
                            Ok(finished) => finished?,
                            Err(_) => {
                                return Err(TaskFailure::cancelled(
                                    &technique_id,
                                    executor.trace_len(),
                                ));
                            }
                        },
                        None => work.await?,
                    };

                    let result = match outcome {
                        Ok(Ok(result)) => result,
                        Ok(Err(failure)) => {
                            return Err(TaskFailure::new(
                                &technique_id,
                                failure.to_string(),
                                failure.partial_trace.len(),
                            ));
                        }
                        Err(_) => {
                            return Err(TaskFailure::new(
                                &technique_id,
                                format!("Timed out after {:?}", task_timeout),
                                executor.trace_len(),
                            ));
                        }
                    };

                    if let Some(writer) = writer {
                        writer.persist(result.clone()).await.map_err(|e| {
                            TaskFailure::new(&technique_id, e.to_string(), result.trace().len())
                        })?;
                    }

                    Ok(result)
                };

                match AssertUnwindSafe(run).catch_unwind().await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(TaskFailure::new(&technique_id, "Strategy task panicked", 0)),
                }
            });
        }

        let mut results = Vec::with_capacity(requested);

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(result)) => {
                    info!(
                        technique = result.technique_id(),
                        seconds = result.execution_time_seconds(),
                        "Strategy finished"
                    );
                    results.push(result);
                }
                Ok(Err(failure)) => {
                    error!(
                        technique = failure.technique_id.as_str(),
                        partial_trace_len = failure.partial_trace_len,
                        "Strategy failed: {}",
                        failure.reason
                    );
                    failures.push(failure);
                }
                Err(e) => error!("Strategy task aborted: {}", e),
            }
        }

        let cancelled = failures.iter().filter(|f| f.cancelled).count();
        if cancelled > 0 {
            warn!(cancelled, "Request timeout cancelled outstanding strategies");
            if results.is_empty() {
                return Err(OrchestratorError::Timeout {
                    elapsed: started.elapsed(),
                    failures,
                });
            }
        }

        if results.is_empty() {
            return Err(OrchestratorError::AllFailed {
                requested,
                failures,
            });
        }

        let outcome = FanOutOutcome {
            results,
            failures,
            requested,
        };
        if outcome.degraded() {
            warn!(
                succeeded = outcome.results.len(),
                requested,
                "Fan-out completed with failures"
            );
        }

        Ok(outcome)
    }
}
