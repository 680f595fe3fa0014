//! Flow record: the persisted state of one flow instance.
//!
//! Following the same pattern as the task records of the queue:
//! - single source of truth for a flow's state
//! - state transitions go through methods, never direct field writes from
//!   the driver

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{FlowId, TaskId};
use super::result::TaskResult;
use super::transition::{FlowResult, FlowState, LogEntry};

/// Log lines recorded for one step, optionally tied to a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepLog {
    pub step: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,

    pub entries: Vec<LogEntry>,
    pub logged_at: DateTime<Utc>,
}

/// Last error seen by the flow, kept for operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub step: String,
    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowRecord {
    pub flow_id: FlowId,
    pub flow_type: String,
    pub current_step: Option<String>,
    pub state: FlowState,
    pub result: FlowResult,

    /// Task results per step, in arrival order. One entry per task id.
    #[serde(default)]
    pub step_results: BTreeMap<String, Vec<TaskResult>>,

    /// Tasks launched per step, in the order they were created.
    #[serde(default)]
    pub step_tasks: BTreeMap<String, Vec<TaskId>>,

    #[serde(default)]
    pub log: Vec<StepLog>,

    /// Steps that produced a real edge, in completion order.
    #[serde(default)]
    pub completed_steps: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<ErrorInfo>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FlowRecord {
    pub fn new(flow_id: FlowId, flow_type: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            flow_id,
            flow_type: flow_type.into(),
            current_step: None,
            state: FlowState::Created,
            result: FlowResult::Unknown,
            step_results: BTreeMap::new(),
            step_tasks: BTreeMap::new(),
            log: Vec::new(),
            completed_steps: Vec::new(),
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Enter Running. The first start positions the flow on `first_step`;
    /// later starts (resume) keep the persisted current step.
    pub fn start(&mut self, first_step: &str) {
        if self.current_step.is_none() {
            self.current_step = Some(first_step.to_string());
        }
        self.state = FlowState::Running;
    }

    pub fn advance_to(&mut self, step: impl Into<String>) {
        self.current_step = Some(step.into());
    }

    /// Operator override of the step to run on the next resume.
    pub fn set_current_step(&mut self, step: impl Into<String>) {
        self.current_step = Some(step.into());
    }

    pub fn pause(&mut self) {
        self.state = FlowState::Paused;
    }

    pub fn complete(&mut self, result: FlowResult) {
        self.state = FlowState::Completed;
        self.result = result;
    }

    pub fn set_result(&mut self, result: FlowResult) {
        self.result = result;
    }

    pub fn mark_step_completed(&mut self, step: &str) {
        if !self.completed_steps.iter().any(|s| s == step) {
            self.completed_steps.push(step.to_string());
        }
    }

    pub fn is_step_completed(&self, step: &str) -> bool {
        self.completed_steps.iter().any(|s| s == step)
    }

    pub fn record_task(&mut self, step: &str, task_id: TaskId) {
        let tasks = self.step_tasks.entry(step.to_string()).or_default();
        if !tasks.contains(&task_id) {
            tasks.push(task_id);
        }
    }

    /// Store a task result; a second result for the same task replaces the
    /// first in place.
    pub fn save_task_result(&mut self, step: &str, result: TaskResult) {
        let results = self.step_results.entry(step.to_string()).or_default();
        match results.iter_mut().find(|r| r.task_id == result.task_id) {
            Some(existing) => *existing = result,
            None => results.push(result),
        }
    }

    pub fn task_results(&self, step: &str) -> &[TaskResult] {
        self.step_results
            .get(step)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn append_log(
        &mut self,
        step: &str,
        task_id: Option<TaskId>,
        entries: Vec<LogEntry>,
        at: DateTime<Utc>,
    ) {
        if entries.is_empty() {
            return;
        }
        self.log.push(StepLog {
            step: step.to_string(),
            task_id,
            entries,
            logged_at: at,
        });
    }

    pub fn logs_for(&self, step: &str) -> impl Iterator<Item = &StepLog> {
        self.log.iter().filter(move |l| l.step == step)
    }

    pub fn record_error(&mut self, step: &str, message: impl Into<String>, cause: Option<String>) {
        self.last_error = Some(ErrorInfo {
            step: step.to_string(),
            message: message.into(),
            cause,
        });
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }
}
