//! GroupTask - one task template fanned out over many targets.
//!
//! A group never runs by itself. It materializes one concrete task per target
//! (cross-joined with that target's parameter sets, if any) and those tasks
//! run side by side inside a batch.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;

use super::Task;
use crate::domain::{ExecuteOption, TaskError, TaskId, TaskResult};
use crate::ports::{IdGenerator, SystemClock, UlidGenerator};

/// Where one materialized task runs, and with which parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskTarget {
    pub host: String,
    pub params: BTreeMap<String, String>,
}

impl TaskTarget {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            params: BTreeMap::new(),
        }
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }
}

/// Produces the concrete task for one target.
pub trait TaskTemplate: Send + Sync {
    fn instantiate(&self, task_id: TaskId, option: &ExecuteOption, target: &TaskTarget) -> Arc<dyn Task>;
}

impl<F> TaskTemplate for F
where
    F: Fn(TaskId, &ExecuteOption, &TaskTarget) -> Arc<dyn Task> + Send + Sync,
{
    fn instantiate(&self, task_id: TaskId, option: &ExecuteOption, target: &TaskTarget) -> Arc<dyn Task> {
        self(task_id, option, target)
    }
}

pub struct GroupTask {
    task_id: TaskId,
    option: ExecuteOption,
    template: Arc<dyn TaskTemplate>,
    hosts: Vec<String>,
    host_params: HashMap<String, Vec<BTreeMap<String, String>>>,
    id_gen: Arc<dyn IdGenerator>,
}

impl GroupTask {
    pub fn new(option: ExecuteOption, template: impl TaskTemplate + 'static) -> Self {
        Self {
            task_id: TaskId::generate(),
            option,
            template: Arc::new(template),
            hosts: Vec::new(),
            host_params: HashMap::new(),
            id_gen: Arc::new(UlidGenerator::new(SystemClock)),
        }
    }

    pub fn with_id_generator(mut self, id_gen: Arc<dyn IdGenerator>) -> Self {
        self.id_gen = id_gen;
        self
    }

    pub fn hosts<I, S>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.hosts.extend(hosts.into_iter().map(Into::into));
        self
    }

    /// Add one parameter set for `host`. A host with N sets yields N tasks.
    pub fn host_params(mut self, host: impl Into<String>, params: BTreeMap<String, String>) -> Self {
        self.host_params.entry(host.into()).or_default().push(params);
        self
    }

    /// Every (host, parameter set) pair, hosts in declaration order.
    pub fn targets(&self) -> Vec<TaskTarget> {
        let mut targets = Vec::new();
        for host in &self.hosts {
            match self.host_params.get(host) {
                Some(sets) if !sets.is_empty() => {
                    for params in sets {
                        targets.push(TaskTarget {
                            host: host.clone(),
                            params: params.clone(),
                        });
                    }
                }
                _ => targets.push(TaskTarget::new(host.clone())),
            }
        }
        targets
    }

    /// Materialize the concrete tasks, each with a fresh task id.
    pub fn tasks(&self) -> Vec<Arc<dyn Task>> {
        self.targets()
            .iter()
            .map(|target| {
                self.template
                    .instantiate(self.id_gen.generate_task_id(), &self.option, target)
            })
            .collect()
    }
}

#[async_trait]
impl Task for GroupTask {
    fn task_id(&self) -> TaskId {
        self.task_id
    }

    fn execute_option(&self) -> &ExecuteOption {
        &self.option
    }

    async fn execute(&self) -> Result<TaskResult, TaskError> {
        Err(TaskError::Unsupported(
            "a group task only runs through a batch of its materialized tasks".to_string(),
        ))
    }

    fn fan_out(&self) -> Option<Vec<Arc<dyn Task>>> {
        Some(self.tasks())
    }
}
