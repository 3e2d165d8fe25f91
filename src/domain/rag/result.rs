use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::{ExecutionTraceEntry, RetrievedUnit};

/// Outcome of running one strategy against one query.
///
/// Built once by the executor and read through accessors afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyResult {
    id: Uuid,
    technique_id: String,
    query: String,
    answer: String,
    retrieved_units: Vec<RetrievedUnit>,
    execution_time_seconds: f64,
    trace: Vec<ExecutionTraceEntry>,
    aux_metadata: Map<String, Value>,
    created_at: DateTime<Utc>,
}

impl StrategyResult {
    pub fn new(
        technique_id: impl Into<String>,
        query: impl Into<String>,
        answer: impl Into<String>,
        retrieved_units: Vec<RetrievedUnit>,
        execution_time_seconds: f64,
        trace: Vec<ExecutionTraceEntry>,
        aux_metadata: Map<String, Value>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            technique_id: technique_id.into(),
            query: query.into(),
            answer: answer.into(),
            retrieved_units,
            execution_time_seconds,
            trace,
            aux_metadata,
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn technique_id(&self) -> &str {
        &self.technique_id
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn answer(&self) -> &str {
        &self.answer
    }

    pub fn retrieved_units(&self) -> &[RetrievedUnit] {
        &self.retrieved_units
    }

    pub fn execution_time_seconds(&self) -> f64 {
        self.execution_time_seconds
    }

    pub fn trace(&self) -> &[ExecutionTraceEntry] {
        &self.trace
    }

    pub fn aux_metadata(&self) -> &Map<String, Value> {
        &self.aux_metadata
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}
