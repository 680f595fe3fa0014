//! Domain identifiers (strongly-typed IDs).
//!
//! # ULID ベースの ID
//! Flow / Task / Lease の ID はすべて ULID を `Id<T>` で包んだものです。
//!
//! ## ULID の特性
//! - **時刻でソート可能**: 先頭が timestamp なので、生成順に並ぶ
//! - **分散生成可能**: ノード間の調整なしで生成できる
//! - **128-bit**: UUID と同じサイズ
//!
//! ## Phantom Type
//! `T` は実行時には使わないマーカー型（PhantomData）です。
//! `FlowId` と `TaskId` は別の型になり、取り違えはコンパイルエラーになります。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use ulid::Ulid;

/// IdMarker は各 ID 型のマーカー trait
pub trait IdMarker: Send + Sync + 'static {
    /// Display で使うプレフィックス（例: "flow-", "task-"）
    fn prefix() -> &'static str;
}

/// ジェネリック ID 型
///
/// # 例
/// ```ignore
/// let flow_id: FlowId = Id::from(Ulid::new());
/// let task_id = TaskId::generate();
/// // flow_id と task_id は異なる型
/// ```
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    /// ULID から Id を作成
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    /// システム時刻で新しい ID を生成
    ///
    /// 時刻を固定したい場合は `IdGenerator` を使ってください。
    pub fn generate() -> Self {
        Self::from_ulid(Ulid::new())
    }

    /// 内部の ULID を取得
    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

// ========================================
// マーカー型の定義
// ========================================

/// Flow のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Flow {}

impl IdMarker for Flow {
    fn prefix() -> &'static str {
        "flow-"
    }
}

/// Task のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Task {}

impl IdMarker for Task {
    fn prefix() -> &'static str {
        "task-"
    }
}

/// Lease のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Lease {}

impl IdMarker for Lease {
    fn prefix() -> &'static str {
        "lease-"
    }
}

// ========================================
// Type Alias
// ========================================

/// Identifier of a flow instance (one running multi-step process).
pub type FlowId = Id<Flow>;

/// Identifier of a task (one unit of remote work launched by a step).
pub type TaskId = Id<Task>;

/// Identifier of an exclusive execution lease handed out by a lock service.
pub type LeaseId = Id<Lease>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_distinct_types() {
        let ulid1 = Ulid::new();
        let ulid2 = Ulid::new();

        let flow = FlowId::from_ulid(ulid1);
        let task = TaskId::from_ulid(ulid2);

        assert_eq!(flow.as_ulid(), ulid1);
        assert_eq!(task.as_ulid(), ulid2);

        // Display のプレフィックスを確認
        assert!(flow.to_string().starts_with("flow-"));
        assert!(task.to_string().starts_with("task-"));
        assert!(LeaseId::generate().to_string().starts_with("lease-"));
        // let _: FlowId = task; // <- does not compile
    }

    #[test]
    fn ulid_ids_are_sortable() {
        let id1 = TaskId::generate();
        std::thread::sleep(std::time::Duration::from_millis(2)); // 時刻が進むのを待つ
        let id2 = TaskId::generate();

        assert!(id1 < id2);
    }

    #[test]
    fn ulid_ids_can_be_serialized() {
        let flow_id = FlowId::generate();

        let serialized = serde_json::to_string(&flow_id).unwrap();
        let deserialized: FlowId = serde_json::from_str(&serialized).unwrap();

        assert_eq!(flow_id, deserialized);
    }

    #[test]
    fn phantom_data_does_not_consume_memory() {
        use std::mem::size_of;

        // Id<T> のサイズは Ulid と同じ（16 bytes）
        assert_eq!(size_of::<FlowId>(), size_of::<Ulid>());
        assert_eq!(size_of::<TaskId>(), 16);
    }
}
