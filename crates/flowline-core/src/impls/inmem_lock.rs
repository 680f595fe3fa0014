//! InMemoryLockService - single-process `LockService`.
//!
//! 1 プロセス内でのみ排他を保証します。
//! 複数ノードで flow を動かす場合は共有バックエンドの実装が必要です。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{FlowId, LeaseId, LockError};
use crate::ports::{IdGenerator, Lease, LockService, SystemClock, UlidGenerator};

pub struct InMemoryLockService {
    held: Arc<Mutex<HashMap<FlowId, LeaseId>>>,
    id_gen: Arc<dyn IdGenerator>,
}

impl InMemoryLockService {
    pub fn new() -> Self {
        Self::with_id_generator(Arc::new(UlidGenerator::new(SystemClock)))
    }

    pub fn with_id_generator(id_gen: Arc<dyn IdGenerator>) -> Self {
        Self {
            held: Arc::new(Mutex::new(HashMap::new())),
            id_gen,
        }
    }

    pub async fn is_held(&self, flow_id: FlowId) -> bool {
        self.held.lock().await.contains_key(&flow_id)
    }
}

impl Default for InMemoryLockService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LockService for InMemoryLockService {
    async fn acquire(&self, flow_id: FlowId) -> Result<Lease, LockError> {
        let mut held = self.held.lock().await;
        if held.contains_key(&flow_id) {
            return Err(LockError::Held(flow_id));
        }
        let lease_id = self.id_gen.generate_lease_id();
        held.insert(flow_id, lease_id);
        Ok(Lease { lease_id, flow_id })
    }

    async fn release(&self, lease: Lease) -> Result<(), LockError> {
        let mut held = self.held.lock().await;
        // 現在の保持者だけが解放できる
        if held.get(&lease.flow_id) == Some(&lease.lease_id) {
            held.remove(&lease.flow_id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_acquire_fails_until_release() {
        let locks = InMemoryLockService::new();
        let flow_id = FlowId::generate();

        let lease = locks.acquire(flow_id).await.unwrap();
        assert!(locks.is_held(flow_id).await);
        assert_eq!(locks.acquire(flow_id).await, Err(LockError::Held(flow_id)));

        locks.release(lease).await.unwrap();
        assert!(!locks.is_held(flow_id).await);
        assert!(locks.acquire(flow_id).await.is_ok());
    }

    #[tokio::test]
    async fn stale_lease_release_is_ignored() {
        let locks = InMemoryLockService::new();
        let flow_id = FlowId::generate();

        let old = locks.acquire(flow_id).await.unwrap();
        locks.release(old.clone()).await.unwrap();
        let _current = locks.acquire(flow_id).await.unwrap();

        // 古い lease の release は現在の lease に影響しない
        locks.release(old).await.unwrap();
        assert!(locks.is_held(flow_id).await);
    }
}
