//! IdGenerator port - ID 生成の抽象化
//!
//! # 実装
//! - **UlidGenerator**: `Clock` の timestamp + ランダム部分で ULID を作る

use crate::domain::ids::{FlowId, LeaseId, TaskId};
use crate::ports::Clock;
use ulid::Ulid;

/// IdGenerator は分散環境で使える ID を生成
///
/// # Thread Safety
/// - `Send + Sync` を要求（複数の driver / worker から共有される）
pub trait IdGenerator: Send + Sync {
    /// Flow ID を生成
    fn generate_flow_id(&self) -> FlowId;

    /// Task ID を生成
    fn generate_task_id(&self) -> TaskId;

    /// Lease ID を生成
    fn generate_lease_id(&self) -> LeaseId;
}

/// UlidGenerator は ULID ベースの ID 生成器
///
/// timestamp 部分は Clock から取るので、FixedClock を使えば
/// 時刻部分が決まった ID を生成できます。
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }

    fn next_ulid(&self) -> Ulid {
        let timestamp_ms = self.clock.now().timestamp_millis() as u64;
        Ulid::from_parts(timestamp_ms, rand::random())
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_flow_id(&self) -> FlowId {
        FlowId::from(self.next_ulid())
    }

    fn generate_task_id(&self) -> TaskId {
        TaskId::from(self.next_ulid())
    }

    fn generate_lease_id(&self) -> LeaseId {
        LeaseId::from(self.next_ulid())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{FixedClock, SystemClock};
    use chrono::{TimeZone, Utc};

    #[test]
    fn ulid_generator_generates_unique_ids() {
        let id_gen = UlidGenerator::new(SystemClock);

        let id1 = id_gen.generate_task_id();
        let id2 = id_gen.generate_task_id();
        let id3 = id_gen.generate_task_id();

        // 各 ID が一意であることを確認
        assert_ne!(id1, id2);
        assert_ne!(id2, id3);
        assert_ne!(id1, id3);
    }

    #[test]
    fn ulid_generator_with_fixed_clock_shares_timestamp() {
        let fixed_time = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let id_gen = UlidGenerator::new(FixedClock::new(fixed_time));

        let id1 = id_gen.generate_flow_id();
        let id2 = id_gen.generate_flow_id();

        // ランダム部分があるので ID は異なる
        assert_ne!(id1, id2);

        // ただし timestamp 部分は同じ

        let timestamp1 = (id1.as_ulid().0 >> 80) as u64;
        let timestamp2 = (id2.as_ulid().0 >> 80) as u64;
        assert_eq!(timestamp1, timestamp2);
        assert_eq!(timestamp1, fixed_time.timestamp_millis() as u64);
    }

    #[test]
    fn different_id_types_are_generated() {
        let id_gen = UlidGenerator::new(SystemClock);

        assert!(id_gen.generate_flow_id().to_string().starts_with("flow-"));
        assert!(id_gen.generate_task_id().to_string().starts_with("task-"));
        assert!(id_gen.generate_lease_id().to_string().starts_with("lease-"));
    }
}
