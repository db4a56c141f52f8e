//! Delivery engine behavior over scripted RPC and bundler doubles
//!
//! Run with: `cargo test --test delivery_test`

mod common;

use common::{unsigned_transfer, MockBundler, MockRpc, Subscription};
use solana_sdk::signature::{Keypair, Signer};
use solana_swap_executor::delivery::{
    DeliveryPath, DeliveryRequest, EngineSettings, SubmissionEngine,
};
use solana_swap_executor::error::SwapError;
use solana_swap_executor::providers::signer::{sign_with, KeypairSigner, SignedTransaction};
use solana_swap_executor::providers::{
    BundleProvider, BundleStatus, ConfirmationResult, SignerAccount,
};
use solana_swap_executor::session::{Notification, SessionStore, SwapPhase};
use std::sync::Arc;

struct Setup {
    engine: SubmissionEngine,
    rpc: Arc<MockRpc>,
    bundler: Arc<MockBundler>,
    session: SessionStore,
    signed: SignedTransaction,
    account: SignerAccount,
    payer: solana_sdk::pubkey::Pubkey,
}

async fn setup(bundler: MockBundler) -> Setup {
    let keypair = Keypair::new();
    let payer = keypair.pubkey();
    let signer = Arc::new(KeypairSigner::new(keypair));
    let rpc = Arc::new(MockRpc::default());
    let bundler = Arc::new(bundler);

    let (signed, account) = sign_with(signer.as_ref(), &unsigned_transfer(&payer, 5_000), &payer)
        .await
        .unwrap();

    let engine = SubmissionEngine::new(
        rpc.clone(),
        Some(bundler.clone() as Arc<dyn BundleProvider>),
        signer,
        EngineSettings::default(),
    );

    Setup {
        engine,
        rpc,
        bundler,
        session: SessionStore::new(),
        signed,
        account,
        payer,
    }
}

impl Setup {
    fn request(&self, path: DeliveryPath) -> DeliveryRequest<'_> {
        DeliveryRequest {
            signed: &self.signed,
            account: &self.account,
            payer: self.payer,
            path,
            tip_lamports: 100_000,
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_standard_path_submits_once_and_confirms() {
    let s = setup(MockBundler::default()).await;

    let receipt = s
        .engine
        .deliver(s.request(DeliveryPath::Standard), &s.session)
        .await
        .unwrap();

    assert_eq!(receipt.signature, s.signed.signature);
    assert_eq!(receipt.path, DeliveryPath::Standard);
    assert_eq!(receipt.bundle_id, None);
    assert_eq!(s.rpc.submitted().len(), 1);
    assert_eq!(s.bundler.submit_calls(), 0);

    let snapshot = s.session.snapshot();
    assert_eq!(snapshot.signature, Some(s.signed.signature.to_string()));
    assert_eq!(snapshot.delivery_path, Some(DeliveryPath::Standard));
    assert_eq!(snapshot.phase, SwapPhase::Confirming);
}

#[tokio::test(start_paused = true)]
async fn test_fast_path_bundles_primary_with_tip() {
    let s = setup(MockBundler::default()).await;

    let receipt = s
        .engine
        .deliver(s.request(DeliveryPath::FastPath), &s.session)
        .await
        .unwrap();

    assert_eq!(receipt.path, DeliveryPath::FastPath);
    assert_eq!(receipt.bundle_id.as_deref(), Some("bundle-1"));
    assert_eq!(receipt.signature, s.signed.signature);
    assert!(s.rpc.submitted().is_empty());

    let bundles = s.bundler.bundles.lock().clone();
    assert_eq!(bundles.len(), 1);
    let bundle = &bundles[0];
    assert_eq!(bundle.len(), 2);
    assert_eq!(bundle[0].signatures[0], s.signed.signature);

    // the tip pays one of the bundler's tip accounts and is signed by the payer
    let tip = &bundle[1];
    let keys = tip.message.static_account_keys();
    assert_eq!(keys[0], s.payer);
    assert!(s.bundler.tip_accounts.iter().any(|a| keys.contains(a)));
    assert_ne!(tip.signatures[0], solana_sdk::signature::Signature::default());
}

#[tokio::test(start_paused = true)]
async fn test_bundle_submit_failure_falls_back_with_same_transaction() {
    let bundler = MockBundler::default();
    bundler.fail_submits(3, "connection refused");
    let s = setup(bundler).await;
    let mut notices = s.session.notifications();

    let receipt = s
        .engine
        .deliver(s.request(DeliveryPath::FastPath), &s.session)
        .await
        .unwrap();

    assert_eq!(s.bundler.submit_calls(), 3);
    assert_eq!(receipt.path, DeliveryPath::Standard);
    assert_eq!(receipt.signature, s.signed.signature);

    let submitted = s.rpc.submitted();
    assert_eq!(submitted.len(), 1);
    assert_eq!(
        bincode::serialize(&submitted[0]).unwrap(),
        bincode::serialize(&s.signed.transaction).unwrap()
    );

    let mut saw_fallback = false;
    while let Ok(notice) = notices.try_recv() {
        if notice == Notification::Loading("Jito unavailable, using RPC...".to_string()) {
            saw_fallback = true;
        }
    }
    assert!(saw_fallback);
}

#[tokio::test(start_paused = true)]
async fn test_bundle_submit_recovers_on_retry() {
    let bundler = MockBundler::default();
    bundler.fail_submits(2, "503 Service Unavailable");
    let s = setup(bundler).await;

    let receipt = s
        .engine
        .deliver(s.request(DeliveryPath::FastPath), &s.session)
        .await
        .unwrap();

    assert_eq!(s.bundler.submit_calls(), 3);
    assert_eq!(receipt.path, DeliveryPath::FastPath);
    assert_eq!(receipt.bundle_id.as_deref(), Some("bundle-3"));
}

#[tokio::test(start_paused = true)]
async fn test_rate_limited_poll_is_retried() {
    let bundler = MockBundler::default();
    bundler.push_status(Err("429 Too Many Requests".to_string()));
    let s = setup(bundler).await;

    let receipt = s
        .engine
        .deliver(s.request(DeliveryPath::FastPath), &s.session)
        .await
        .unwrap();

    assert_eq!(s.bundler.status_calls(), 2);
    assert_eq!(receipt.path, DeliveryPath::FastPath);
}

#[tokio::test(start_paused = true)]
async fn test_fatal_bundle_error_fails_without_fallback() {
    let bundler = MockBundler::default();
    bundler.push_status(Ok(BundleStatus {
        landed: false,
        error: Some("bundle simulation failed".to_string()),
    }));
    let s = setup(bundler).await;

    let err = s
        .engine
        .deliver(s.request(DeliveryPath::FastPath), &s.session)
        .await
        .unwrap_err();

    assert!(matches!(err, SwapError::SubmissionFailed(_)));
    assert!(err.to_string().contains("Jito bundle failed"));
    assert_eq!(s.bundler.status_calls(), 1);
    assert!(s.rpc.submitted().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_unknown_bundle_status_confirms_by_signature() {
    let bundler = MockBundler::default();
    for _ in 0..3 {
        bundler.push_status(Ok(BundleStatus::default()));
    }
    let s = setup(bundler).await;

    let receipt = s
        .engine
        .deliver(s.request(DeliveryPath::FastPath), &s.session)
        .await
        .unwrap();

    assert_eq!(s.bundler.status_calls(), 3);
    assert_eq!(receipt.path, DeliveryPath::FastPath);
    assert_eq!(receipt.signature, s.signed.signature);
    // confirmed by subscription, not resubmitted
    assert!(s.rpc.submitted().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_landed_bundle_with_execution_error_fails() {
    let s = setup(MockBundler::default()).await;
    s.rpc
        .set_status(true, Some("{\"InstructionError\":[2,{\"Custom\":6001}]}"));

    let err = s
        .engine
        .deliver(s.request(DeliveryPath::FastPath), &s.session)
        .await
        .unwrap_err();

    match err {
        SwapError::OnChainExecution { signature, error } => {
            assert_eq!(signature, s.signed.signature.to_string());
            assert!(error.contains("6001"));
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_confirmed_with_error_is_on_chain_failure() {
    let s = setup(MockBundler::default()).await;
    s.rpc.set_subscription(Subscription::Confirm(ConfirmationResult {
        confirmed: true,
        error: Some("InsufficientFundsForRent".to_string()),
    }));

    let err = s
        .engine
        .deliver(s.request(DeliveryPath::Standard), &s.session)
        .await
        .unwrap_err();

    assert!(matches!(err, SwapError::OnChainExecution { .. }));
    assert!(!err.is_recoverable());
}

#[tokio::test(start_paused = true)]
async fn test_confirmation_times_out_with_explorer_link() {
    let s = setup(MockBundler::default()).await;
    s.rpc.set_subscription(Subscription::Never);

    let started = tokio::time::Instant::now();
    let err = s
        .engine
        .deliver(s.request(DeliveryPath::Standard), &s.session)
        .await
        .unwrap_err();

    assert!(started.elapsed() >= std::time::Duration::from_secs(60));
    let signature = s.signed.signature.to_string();
    match &err {
        SwapError::ConfirmationTimeout {
            signature: sig,
            explorer_url,
            timeout_secs,
        } => {
            assert_eq!(sig, &signature);
            assert_eq!(explorer_url, &format!("https://solscan.io/tx/{}", signature));
            assert_eq!(*timeout_secs, 60);
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert!(err.to_string().contains("60s"));
}

#[tokio::test(start_paused = true)]
async fn test_subscription_failure_checks_status_once() {
    let s = setup(MockBundler::default()).await;
    s.rpc
        .set_subscription(Subscription::Fail("websocket closed".to_string()));

    // landed anyway
    s.engine
        .deliver(s.request(DeliveryPath::Standard), &s.session)
        .await
        .unwrap();
    assert_eq!(
        s.rpc.status_calls.load(std::sync::atomic::Ordering::SeqCst),
        1
    );

    // not landed: no verdict
    s.rpc.set_status(false, None);
    let err = s
        .engine
        .deliver(s.request(DeliveryPath::Standard), &s.session)
        .await
        .unwrap_err();
    assert!(matches!(err, SwapError::ConfirmationTimeout { .. }));
}

#[tokio::test(start_paused = true)]
async fn test_no_tip_accounts_uses_standard_path() {
    let bundler = MockBundler {
        tip_accounts: Vec::new(),
        ..MockBundler::default()
    };
    let s = setup(bundler).await;

    let receipt = s
        .engine
        .deliver(s.request(DeliveryPath::FastPath), &s.session)
        .await
        .unwrap();

    assert_eq!(receipt.path, DeliveryPath::Standard);
    assert_eq!(s.bundler.submit_calls(), 0);
    assert_eq!(s.rpc.submitted().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_rpc_rejection_is_submission_failure() {
    let s = setup(MockBundler::default()).await;
    *s.rpc.submit_error.lock() = Some("Blockhash not found".to_string());

    let err = s
        .engine
        .deliver(s.request(DeliveryPath::Standard), &s.session)
        .await
        .unwrap_err();

    assert!(matches!(err, SwapError::SubmissionFailed(_)));
    assert_eq!(s.session.snapshot().signature, None);
}
