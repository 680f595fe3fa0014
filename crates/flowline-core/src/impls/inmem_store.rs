//! InMemoryFlowStore - development / test implementation of `FlowStore`.
//!
//! record は clone して出し入れします（store の外から内部状態を参照しない）。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{FlowId, FlowRecord, StepLog, StoreError};
use crate::ports::FlowStore;

#[derive(Default)]
struct InMemoryStoreState {
    records: HashMap<FlowId, FlowRecord>,

    /// flow ごとの `save` 呼び出し回数（テスト用）
    saves: HashMap<FlowId, usize>,
}

#[derive(Clone, Default)]
pub struct InMemoryFlowStore {
    state: Arc<Mutex<InMemoryStoreState>>,
}

impl InMemoryFlowStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn save_count(&self, flow_id: FlowId) -> usize {
        let state = self.state.lock().await;
        state.saves.get(&flow_id).copied().unwrap_or(0)
    }
}

#[async_trait]
impl FlowStore for InMemoryFlowStore {
    async fn save(&self, record: &FlowRecord) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.records.insert(record.flow_id, record.clone());
        *state.saves.entry(record.flow_id).or_default() += 1;
        Ok(())
    }

    async fn delete(&self, flow_id: FlowId) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.records.remove(&flow_id);
        state.saves.remove(&flow_id);
        Ok(())
    }

    async fn find_by_id(&self, flow_id: FlowId) -> Result<Option<FlowRecord>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.records.get(&flow_id).cloned())
    }

    async fn find_by_flow_id(&self, flow_id: FlowId) -> Result<Vec<StepLog>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .records
            .get(&flow_id)
            .map(|r| r.log.clone())
            .unwrap_or_default())
    }
}
