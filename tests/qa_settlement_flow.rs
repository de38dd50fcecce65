use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bundle_settlement::config::{AppConfig, MsisdnConfig};
use bundle_settlement::idempotency::IdempotencyKey;
use bundle_settlement::ledger::{EntryKind, InMemoryLedger, LedgerError, LedgerStore};
use bundle_settlement::msisdn::{Msisdn, PhoneNormalizer};
use bundle_settlement::provider::{
    BalanceInfo, ProviderAdapter, ProviderOutcome, ProviderRejection, StatusReport,
    TransferReceipt, TransportFault,
};
use bundle_settlement::transfer::{
    InMemoryTransferStore, TransferOrchestrator, TransferRequest, TransferView,
};

/// Gateway that remembers what it executed, so status checks answer
/// truthfully. The first `drop_replies` sends execute but lose the reply.
#[derive(Default)]
struct RecordingGateway {
    executed: Mutex<HashMap<String, i64>>,
    drop_replies: Mutex<usize>,
}

#[async_trait]
impl ProviderAdapter for RecordingGateway {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn check_balance(&self) -> ProviderOutcome<BalanceInfo> {
        ProviderOutcome::ApplicationError(ProviderRejection::new("304", "Invalid credentials"))
    }

    async fn send_transfer(
        &self,
        key: &IdempotencyKey,
        _destination: &Msisdn,
        amount_mb: i64,
    ) -> ProviderOutcome<TransferReceipt> {
        self.executed
            .lock()
            .unwrap()
            .insert(key.to_string(), amount_mb);

        let mut drops = self.drop_replies.lock().unwrap();
        if *drops > 0 {
            *drops -= 1;
            return ProviderOutcome::TransportFault(TransportFault::Timeout);
        }
        ProviderOutcome::Success(TransferReceipt {
            provider_ref: format!("P-{}", key),
            provider_txn_ref: format!("T-{}", key),
            message: "OK".to_string(),
        })
    }

    async fn check_status(&self, key: &IdempotencyKey) -> ProviderOutcome<StatusReport> {
        match self.executed.lock().unwrap().get(key.as_str()) {
            Some(amount) => ProviderOutcome::Success(StatusReport {
                message: "Found".to_string(),
                amount_mb: Some(*amount),
                provider_ref: format!("P-{}", key),
                provider_txn_ref: format!("T-{}", key),
                sender: None,
                recipient: None,
            }),
            None => ProviderOutcome::ApplicationError(ProviderRejection::new(
                "404",
                "Transaction not found",
            )),
        }
    }
}

fn config() -> AppConfig {
    AppConfig::from_yaml(
        r#"
provider:
  endpoint: "http://127.0.0.1:1/dealer"
  username: "dealer01"
  password: "secret"
  dealer_msisdn: "233244000111"
reconciliation:
  scan_interval_secs: 1
  grace_period_secs: 0
  stale_reserved_secs: 60
  base_backoff_secs: 0
  max_backoff_secs: 0
  max_attempts: 3
  batch_size: 10
rate_limit:
  enabled: false
  max_submissions: 1
  window_secs: 60
"#,
    )
    .unwrap()
}

#[test]
fn qa_tc_msisdn_normalization_vectors() {
    let normalizer = PhoneNormalizer::new(&MsisdnConfig::default());
    let ok = [
        ("0267781294", "233267781294"),
        ("267781294", "233267781294"),
        ("233267781294", "233267781294"),
        ("0233267781294", "233267781294"),
        ("+233 26 778 1294", "233267781294"),
        ("026-778-1294", "233267781294"),
    ];
    for (raw, expected) in ok {
        assert_eq!(
            normalizer.normalize(raw).unwrap().as_str(),
            expected,
            "normalizing {raw}"
        );
    }

    for bad in ["", "abc", "12345", "1267781294", "44267781294"] {
        assert!(normalizer.normalize(bad).is_err(), "{bad} should be rejected");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn qa_tc_concurrent_debits_keep_balance_non_negative() {
    let ledger = Arc::new(InMemoryLedger::new());
    ledger.open_account(7).await.unwrap();
    ledger
        .credit(7, 1_000, EntryKind::ProviderLoad, Some("topup-1"))
        .await
        .unwrap();

    let tasks: Vec<_> = (0..20)
        .map(|i| {
            let ledger = Arc::clone(&ledger);
            tokio::spawn(async move {
                let correlation = format!("usage-{i}");
                ledger
                    .try_debit(7, 150, EntryKind::DataUsage, Some(correlation.as_str()))
                    .await
            })
        })
        .collect();

    let results: Vec<_> = futures::future::join_all(tasks)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();
    let ok = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(ok, 6);
    assert!(
        results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(LedgerError::is_insufficient_funds)
    );

    let balance = ledger.balance_of(7).await.unwrap();
    assert_eq!(balance, 100);
    let sum: i64 = ledger
        .entries_for(7)
        .await
        .unwrap()
        .iter()
        .map(|e| e.amount)
        .sum();
    assert_eq!(balance, sum);
}

#[tokio::test]
async fn qa_tc_lost_reply_is_reconciled_not_resent() {
    let ledger = Arc::new(InMemoryLedger::new());
    ledger.open_account(1).await.unwrap();
    ledger
        .credit(1, 500, EntryKind::ProviderLoad, None)
        .await
        .unwrap();
    let gateway = Arc::new(RecordingGateway::default());
    *gateway.drop_replies.lock().unwrap() = 1;

    let orchestrator = Arc::new(
        TransferOrchestrator::new(
            ledger.clone(),
            Arc::new(InMemoryTransferStore::new()),
            gateway.clone(),
            &config(),
        )
        .unwrap(),
    );

    let view = orchestrator
        .submit(TransferRequest::new(1, "0244123456", 200))
        .await
        .unwrap();
    let TransferView::Pending { key } = view else {
        panic!("expected pending, got {:?}", view);
    };

    // Resubmitting the key while unknown must not send again
    let again = orchestrator
        .submit(TransferRequest::new(1, "0244123456", 200).with_key(key.clone()))
        .await
        .unwrap();
    assert!(again.is_pending());
    assert_eq!(gateway.executed.lock().unwrap().len(), 1);

    let view = orchestrator.check_status(&key).await.unwrap();
    assert_eq!(
        view,
        TransferView::Completed {
            reference: format!("T-{}", key)
        }
    );
    assert_eq!(ledger.balance_of(1).await.unwrap(), 300);
    assert_eq!(ledger.available_of(1).await.unwrap(), 300);
}

#[tokio::test]
async fn qa_tc_provider_balance_rejection_surfaces_reason() {
    let ledger = Arc::new(InMemoryLedger::new());
    let orchestrator = TransferOrchestrator::new(
        ledger,
        Arc::new(InMemoryTransferStore::new()),
        Arc::new(RecordingGateway::default()),
        &config(),
    )
    .unwrap();

    let err = orchestrator.provider_balance().await.unwrap_err();
    assert_eq!(err.code(), "PROVIDER_REJECTED");
    assert_eq!(err.http_status(), 422);
}
