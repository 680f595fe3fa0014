//! Supervision of spawned work.
//!
//! Every execute / poll call runs in its own tokio task. A panic there turns
//! into `TaskError::Crashed` instead of tearing down the worker, and dropping
//! the waiting side (timeout, pause) aborts the call.

use std::any::Any;
use std::future::Future;
use std::sync::Arc;

use tokio::task::{JoinError, JoinHandle};

use crate::domain::{TaskError, TaskResult};
use crate::task::Task;

/// Aborts the wrapped task when dropped.
pub(crate) struct AbortOnDrop<T>(pub(crate) JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Spawn `fut` and wait for it; a panic comes back as `TaskError::Crashed`.
pub(crate) async fn supervised<F, T>(fut: F) -> Result<T, TaskError>
where
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let mut guard = AbortOnDrop(tokio::spawn(fut));
    (&mut guard.0).await.map_err(crashed)
}

/// Run `task.execute()` under supervision.
pub(crate) async fn execute_supervised(task: &Arc<dyn Task>) -> Result<TaskResult, TaskError> {
    let task = Arc::clone(task);
    supervised(async move { task.execute().await }).await?
}

pub(crate) fn crashed(err: JoinError) -> TaskError {
    if err.is_panic() {
        TaskError::Crashed(panic_message(err.into_panic()))
    } else {
        TaskError::Crashed(err.to_string())
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}
