//! LockService port - cluster-wide exclusive execution of a flow.
//!
//! driver は flow を進める前に lease を取得し、flow が suspend / pause /
//! complete したら解放します。
//!
//! # 実装への要求
//! - 1 つの flow id に対して、クラスタ全体で有効な lease は高々 1 つ
//! - 保持者以外からの release は無視する

use async_trait::async_trait;

use crate::domain::{FlowId, LeaseId, LockError};

/// flow の排他所有を示す lease
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub lease_id: LeaseId,
    pub flow_id: FlowId,
}

#[async_trait]
pub trait LockService: Send + Sync {
    /// lease を取得。すでに保持されていれば `LockError::Held`
    async fn acquire(&self, flow_id: FlowId) -> Result<Lease, LockError>;

    /// Releasing a lease that is no longer held is a no-op.
    async fn release(&self, lease: Lease) -> Result<(), LockError>;
}
