//! FlowStore port - durable flow state.
//!
//! engine は transition を適用するたび、および pause 時に FlowRecord を保存します。
//!
//! # 実装への要求
//! - `save` は upsert（同じ record の再保存は無害であること）
//! - 保存の失敗は `StoreError` で返す（step 実行中の失敗はその step のエラーになる）

use async_trait::async_trait;

use crate::domain::{FlowId, FlowRecord, StepLog, StoreError};

#[async_trait]
pub trait FlowStore: Send + Sync {
    /// Insert or replace the record for `record.flow_id`.
    async fn save(&self, record: &FlowRecord) -> Result<(), StoreError>;

    async fn delete(&self, flow_id: FlowId) -> Result<(), StoreError>;

    async fn find_by_id(&self, flow_id: FlowId) -> Result<Option<FlowRecord>, StoreError>;

    /// Step logs of a flow, oldest first.
    async fn find_by_flow_id(&self, flow_id: FlowId) -> Result<Vec<StepLog>, StoreError>;
}
