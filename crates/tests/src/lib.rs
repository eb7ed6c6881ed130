//! # Integration Tests
//!
//! 集成测试与端到端测试。
//!
//! 负责：
//! - 合约快照测试
//! - 基于 mock client 的分发场景（fan-out、隔离、退避、背压）
//! - 真实 sender 的 e2e 测试（mockito + Unix socket）

#[cfg(test)]
mod dispatch_tests;

#[cfg(test)]
mod e2e_tests;

#[cfg(test)]
mod contract_tests {
    use contracts::{BackendKind, BackendSet, DeliveryResult};

    #[test]
    fn test_backend_labels_are_stable() {
        let labels: Vec<_> = BackendKind::ALL.iter().map(|k| k.as_str()).collect();
        assert_eq!(labels, vec!["https", "relay", "cloud_ingest"]);
        assert_eq!(BackendSet::all().len(), 3);
    }

    #[test]
    fn test_delivery_outcome_labels() {
        assert_eq!(DeliveryResult::Delivered.outcome(), "delivered");
        assert_eq!(DeliveryResult::retriable("x").outcome(), "retriable");
        assert_eq!(DeliveryResult::fatal("x").outcome(), "fatal");
    }
}
