use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use storesync::{
    AppError, AppResult, CatalogError, CatalogProvider, EngineConfig, EngineSnapshot,
    EntitlementCatalog, EntitlementDecision, EntitlementStore, LifecycleState,
    LocalTransactionSource, LoopState, MemoryEntitlementStore, Offering, PassTrigger,
    PeriodUnit, PersistedEntitlement, PersistenceError, PurchaseError, PurchaseOutcome,
    PurchaseScript, ReconcileEvent, ReconcileHandle, ReconciliationLoop, SharedSecretVerifier,
    StaticCatalogProvider, SubscriptionGroupStatus, SubscriptionPeriod, TransactionClaim,
    PurchaseFact, TransactionEvent, TransactionSource, TransactionVerifier, VerificationError,
};
use tokio::sync::mpsc;

const SECRET: &[u8] = b"sandbox-secret";

fn catalog() -> Vec<Offering> {
    vec![
        Offering::subscription("monthly", 1, SubscriptionPeriod::new(PeriodUnit::Month, 1)),
        Offering::subscription("yearly", 1, SubscriptionPeriod::new(PeriodUnit::Year, 1)),
        Offering::unlock("lifetime", 2),
    ]
}

fn at(minutes: i64) -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH + chrono::Duration::minutes(minutes)
}

fn claim(tx: &str, offering: &str, minutes: i64, state: LifecycleState) -> TransactionClaim {
    TransactionClaim {
        transaction_id: tx.into(),
        offering_id: offering.into(),
        observed_at: at(minutes),
        state,
        renewal_offering_id: None,
    }
}

fn signed(source: &LocalTransactionSource, claim: TransactionClaim) -> TransactionEvent {
    source.sign(claim).unwrap()
}

fn forged(claim: TransactionClaim) -> TransactionEvent {
    TransactionEvent {
        claim,
        signature: "00".into(),
        requires_acknowledgment: true,
    }
}

struct Harness {
    handle: ReconcileHandle,
    source: Arc<LocalTransactionSource>,
    events: mpsc::Receiver<ReconcileEvent>,
}

impl Harness {
    async fn start(
        source: Arc<LocalTransactionSource>,
        store: Arc<dyn EntitlementStore>,
        provider: Arc<dyn CatalogProvider>,
    ) -> Self {
        Self::start_with(
            source.clone(),
            source,
            Arc::new(SharedSecretVerifier::new(SECRET.to_vec())),
            store,
            provider,
            Duration::from_secs(1),
        )
        .await
    }

    /// Starts the loop on `loop_source`, which may wrap `source`.
    async fn start_with(
        source: Arc<LocalTransactionSource>,
        loop_source: Arc<dyn TransactionSource>,
        verifier: Arc<dyn TransactionVerifier>,
        store: Arc<dyn EntitlementStore>,
        provider: Arc<dyn CatalogProvider>,
        verification_timeout: Duration,
    ) -> Self {
        let config = EngineConfig {
            verification_timeout,
            catalog_timeout: Duration::from_secs(1),
            ..EngineConfig::default()
        };
        let catalog = Arc::new(EntitlementCatalog::new(
            provider,
            config.app_id.clone(),
            config.catalog_timeout,
        ));
        let (tx, events) = mpsc::channel(256);
        let handle = ReconciliationLoop::new(catalog, loop_source, verifier, store, &config)
            .with_events(tx)
            .start()
            .await
            .unwrap();

        Harness { handle, source, events }
    }

    async fn with_store(store: Arc<dyn EntitlementStore>) -> Self {
        let source = Arc::new(LocalTransactionSource::new(SECRET.to_vec()));
        Self::start(source, store, Arc::new(StaticCatalogProvider::new(catalog()))).await
    }

    async fn new() -> Self {
        Self::with_store(Arc::new(MemoryEntitlementStore::new())).await
    }

    /// Waits for the next pass with the given trigger and returns the
    /// snapshot published by it.
    async fn pass(&mut self, trigger: PassTrigger) -> EngineSnapshot {
        self.until(|event| {
            matches!(event, ReconcileEvent::PassCompleted { trigger: t, .. } if *t == trigger)
        })
        .await
    }

    /// Waits for a pass with the given trigger that declined to write.
    async fn deferred(&mut self, trigger: PassTrigger) -> EngineSnapshot {
        self.until(|event| *event == ReconcileEvent::PassDeferred { trigger }).await
    }

    async fn until(&mut self, wanted: impl Fn(&ReconcileEvent) -> bool) -> EngineSnapshot {
        let wait = async {
            while let Some(event) = self.events.recv().await {
                if wanted(&event) {
                    return;
                }
            }
            panic!("event stream ended before the expected event");
        };
        tokio::time::timeout(Duration::from_secs(5), wait)
            .await
            .expect("timed out waiting for loop event");
        self.handle.snapshot()
    }
}

fn winner(snapshot: &EngineSnapshot) -> Option<String> {
    snapshot
        .decision
        .as_ref()
        .and_then(|d| d.winner_id().map(str::to_string))
}

#[tokio::test]
async fn test_scenario_a_single_active_subscription() {
    let mut h = Harness::new().await;
    h.pass(PassTrigger::Startup).await;

    h.source
        .deliver(signed(&h.source, claim("t1", "monthly", 1, LifecycleState::Active)))
        .await;
    let snapshot = h.pass(PassTrigger::Transaction).await;

    assert_eq!(winner(&snapshot).as_deref(), Some("monthly"));
    assert!(h.handle.is_premium());
    assert!(snapshot.entitlement.premium_ever_activated);
    assert_eq!(
        h.handle.current_subscription_group_status(),
        SubscriptionGroupStatus::Subscribed
    );
}

#[tokio::test]
async fn test_scenario_b_equal_tier_uses_catalog_order() {
    let source = Arc::new(LocalTransactionSource::new(SECRET.to_vec()));
    // Yearly is newer and listed first by the source; monthly still wins.
    source
        .set_statuses(vec![
            signed(&source, claim("t2", "yearly", 5, LifecycleState::Active)),
            signed(&source, claim("t1", "monthly", 1, LifecycleState::Active)),
        ])
        .await;
    let mut h = Harness::start(
        source,
        Arc::new(MemoryEntitlementStore::new()),
        Arc::new(StaticCatalogProvider::new(catalog())),
    )
    .await;

    let snapshot = h.pass(PassTrigger::Startup).await;
    assert_eq!(winner(&snapshot).as_deref(), Some("monthly"));
    assert!(snapshot.entitlement.premium);
}

#[tokio::test]
async fn test_scenario_c_unverifiable_fact_never_wins() {
    let mut h = Harness::new().await;
    h.pass(PassTrigger::Startup).await;

    h.source
        .deliver(forged(claim("t1", "monthly", 1, LifecycleState::Active)))
        .await;
    let snapshot = h.pass(PassTrigger::Transaction).await;

    assert_eq!(winner(&snapshot), None);
    assert!(!snapshot.entitlement.premium);
    let decision = snapshot.decision.unwrap();
    assert_eq!(decision.exclusions.len(), 1);
    // Unverified transactions are never finished.
    assert!(h.source.acknowledged().await.is_empty());
}

#[tokio::test]
async fn test_scenario_d_expired_leaves_activation_flag_alone() {
    for previously_activated in [false, true] {
        let prior = PersistedEntitlement {
            premium: false,
            premium_ever_activated: previously_activated,
            group_status: SubscriptionGroupStatus::None,
        };
        let mut h = Harness::with_store(Arc::new(MemoryEntitlementStore::with_state(prior))).await;
        h.pass(PassTrigger::Startup).await;

        h.source
            .deliver(signed(&h.source, claim("t1", "monthly", 1, LifecycleState::Expired)))
            .await;
        let snapshot = h.pass(PassTrigger::Transaction).await;

        assert_eq!(winner(&snapshot), None);
        assert!(!snapshot.entitlement.premium);
        assert_eq!(snapshot.entitlement.premium_ever_activated, previously_activated);
        assert_eq!(snapshot.entitlement.group_status, SubscriptionGroupStatus::Expired);
    }
}

#[tokio::test]
async fn test_scenario_e_refresh_with_no_statuses_clears_winner() {
    let mut h = Harness::new().await;
    h.pass(PassTrigger::Startup).await;
    h.source
        .deliver(signed(&h.source, claim("t1", "monthly", 1, LifecycleState::Active)))
        .await;
    assert!(h.pass(PassTrigger::Transaction).await.entitlement.premium);

    // The purchase was cancelled outside the app.
    h.source.set_statuses(Vec::new()).await;
    let snapshot = h.handle.refresh().await.unwrap();

    assert_eq!(winner(&snapshot), None);
    assert!(!snapshot.entitlement.premium);
    assert!(!h.handle.is_premium());
    assert!(snapshot.entitlement.premium_ever_activated);
}

#[tokio::test]
async fn test_late_older_fact_cannot_resurrect_expired_subscription() {
    let mut h = Harness::new().await;
    h.pass(PassTrigger::Startup).await;

    h.source
        .deliver(signed(&h.source, claim("t2", "monthly", 10, LifecycleState::Expired)))
        .await;
    h.pass(PassTrigger::Transaction).await;
    h.source
        .deliver(signed(&h.source, claim("t1", "monthly", 5, LifecycleState::Active)))
        .await;
    let snapshot = h.pass(PassTrigger::Transaction).await;

    assert!(!snapshot.entitlement.premium);
}

#[tokio::test]
async fn test_forged_expiry_does_not_drop_premium() {
    let mut h = Harness::new().await;
    h.pass(PassTrigger::Startup).await;
    h.source
        .deliver(signed(&h.source, claim("t1", "monthly", 1, LifecycleState::Active)))
        .await;
    h.pass(PassTrigger::Transaction).await;

    h.source
        .deliver(forged(claim("t2", "monthly", 9, LifecycleState::Revoked)))
        .await;
    let snapshot = h.pass(PassTrigger::Transaction).await;

    assert!(snapshot.entitlement.premium);
    assert_eq!(winner(&snapshot).as_deref(), Some("monthly"));
}

fn stored_premium() -> PersistedEntitlement {
    PersistedEntitlement {
        premium: true,
        premium_ever_activated: true,
        group_status: SubscriptionGroupStatus::Subscribed,
    }
}

/// Local source whose status query can be switched off.
struct FlakySource {
    inner: Arc<LocalTransactionSource>,
    offline: AtomicBool,
}

#[async_trait]
impl TransactionSource for FlakySource {
    async fn subscribe(&self) -> AppResult<mpsc::Receiver<TransactionEvent>> {
        self.inner.subscribe().await
    }

    async fn current_statuses(&self) -> AppResult<Vec<TransactionEvent>> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(AppError::source("store offline"));
        }
        self.inner.current_statuses().await
    }

    async fn purchase(&self, offering_id: &str) -> Result<PurchaseOutcome, PurchaseError> {
        self.inner.purchase(offering_id).await
    }

    async fn acknowledge(&self, transaction_id: &str) -> AppResult<()> {
        self.inner.acknowledge(transaction_id).await
    }
}

/// Correct verifier that can be made to stall past any sane timeout.
struct StallingVerifier {
    inner: SharedSecretVerifier,
    stalled: AtomicBool,
}

#[async_trait]
impl TransactionVerifier for StallingVerifier {
    async fn verify(&self, event: &TransactionEvent) -> Result<PurchaseFact, VerificationError> {
        if self.stalled.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
        self.inner.verify(event).await
    }
}

#[tokio::test]
async fn test_status_query_outage_at_startup_keeps_stored_premium() {
    let local = Arc::new(LocalTransactionSource::new(SECRET.to_vec()));
    let flaky = Arc::new(FlakySource { inner: local.clone(), offline: AtomicBool::new(true) });
    let store = Arc::new(MemoryEntitlementStore::with_state(stored_premium()));
    let mut h = Harness::start_with(
        local,
        flaky.clone(),
        Arc::new(SharedSecretVerifier::new(SECRET.to_vec())),
        store.clone(),
        Arc::new(StaticCatalogProvider::new(catalog())),
        Duration::from_secs(1),
    )
    .await;

    let err = h.handle.refresh().await.unwrap_err();
    assert!(matches!(err, AppError::Source(_)));
    assert!(h.handle.is_premium());
    assert_eq!(store.read().await.unwrap(), stored_premium());

    // Without a status baseline, a forged revocation cannot clear it either.
    h.source
        .deliver(forged(claim("t9", "lifetime", 9, LifecycleState::Revoked)))
        .await;
    let snapshot = h.deferred(PassTrigger::Transaction).await;
    assert!(snapshot.entitlement.premium);
    assert!(store.read().await.unwrap().premium);

    h.source
        .set_statuses(vec![signed(&h.source, claim("t1", "lifetime", 1, LifecycleState::Active))])
        .await;
    flaky.offline.store(false, Ordering::SeqCst);
    let snapshot = h.handle.refresh().await.unwrap();
    assert!(snapshot.entitlement.premium);
    assert_eq!(winner(&snapshot).as_deref(), Some("lifetime"));
}

#[tokio::test]
async fn test_verifier_timeout_at_startup_keeps_stored_premium() {
    let local = Arc::new(LocalTransactionSource::new(SECRET.to_vec()));
    local
        .set_statuses(vec![signed(&local, claim("t1", "lifetime", 1, LifecycleState::Active))])
        .await;
    let verifier = Arc::new(StallingVerifier {
        inner: SharedSecretVerifier::new(SECRET.to_vec()),
        stalled: AtomicBool::new(true),
    });
    let store = Arc::new(MemoryEntitlementStore::with_state(stored_premium()));
    let mut h = Harness::start_with(
        local.clone(),
        local,
        verifier.clone(),
        store.clone(),
        Arc::new(StaticCatalogProvider::new(catalog())),
        Duration::from_millis(50),
    )
    .await;

    let snapshot = h.deferred(PassTrigger::Startup).await;
    assert!(snapshot.entitlement.premium);
    assert_eq!(store.read().await.unwrap(), stored_premium());
    assert!(h.source.acknowledged().await.is_empty());

    verifier.stalled.store(false, Ordering::SeqCst);
    let snapshot = h.handle.refresh().await.unwrap();
    assert!(snapshot.entitlement.premium);
    assert_eq!(winner(&snapshot).as_deref(), Some("lifetime"));
    assert_eq!(h.source.acknowledged().await, vec!["t1".to_string()]);
}

#[tokio::test]
async fn test_catalog_outage_then_recovery_keeps_stored_premium() {
    let provider = Arc::new(SwitchableCatalog { available: AtomicBool::new(false) });
    let source = Arc::new(LocalTransactionSource::new(SECRET.to_vec()));
    source
        .set_statuses(vec![signed(&source, claim("t1", "monthly", 1, LifecycleState::Active))])
        .await;
    let store = Arc::new(MemoryEntitlementStore::with_state(stored_premium()));
    let h = Harness::start(source, store.clone(), provider.clone()).await;

    let err = h.handle.refresh().await.unwrap_err();
    assert!(matches!(err, AppError::Catalog(CatalogError::Unavailable(_))));
    assert!(h.handle.is_premium());
    assert_eq!(store.read().await.unwrap(), stored_premium());

    provider.available.store(true, Ordering::SeqCst);
    let snapshot = h.handle.refresh().await.unwrap();
    assert!(snapshot.entitlement.premium);
    assert_eq!(winner(&snapshot).as_deref(), Some("monthly"));
    assert_eq!(store.read().await.unwrap().group_status, SubscriptionGroupStatus::Subscribed);
}

#[tokio::test]
async fn test_lifetime_unlock_outranks_subscription() {
    let mut h = Harness::new().await;
    h.pass(PassTrigger::Startup).await;
    h.source
        .deliver(signed(&h.source, claim("t1", "monthly", 1, LifecycleState::Active)))
        .await;
    h.pass(PassTrigger::Transaction).await;
    h.source
        .deliver(signed(&h.source, claim("t2", "lifetime", 2, LifecycleState::Active)))
        .await;
    let snapshot = h.pass(PassTrigger::Transaction).await;

    assert_eq!(winner(&snapshot).as_deref(), Some("lifetime"));
    assert!(snapshot.decision.unwrap().unlock_owned);
}

// Records writes and acknowledgments in one timeline.
type Timeline = Arc<Mutex<Vec<String>>>;

struct RecordingStore {
    inner: MemoryEntitlementStore,
    failing: AtomicBool,
    timeline: Timeline,
}

#[async_trait]
impl EntitlementStore for RecordingStore {
    async fn read(&self) -> AppResult<PersistedEntitlement> {
        self.inner.read().await
    }

    async fn write(
        &self,
        decision: &EntitlementDecision,
        sticky_activation: bool,
    ) -> Result<PersistedEntitlement, PersistenceError> {
        if self.failing.load(Ordering::SeqCst) {
            self.timeline.lock().unwrap().push("write-failed".into());
            return Err(PersistenceError::WriteFailed("disk full".into()));
        }
        let state = self.inner.write(decision, sticky_activation).await?;
        self.timeline.lock().unwrap().push("write".into());
        Ok(state)
    }
}

struct RecordingSource {
    inner: Arc<LocalTransactionSource>,
    timeline: Timeline,
}

#[async_trait]
impl TransactionSource for RecordingSource {
    async fn subscribe(&self) -> AppResult<mpsc::Receiver<TransactionEvent>> {
        self.inner.subscribe().await
    }

    async fn current_statuses(&self) -> AppResult<Vec<TransactionEvent>> {
        self.inner.current_statuses().await
    }

    async fn purchase(&self, offering_id: &str) -> Result<PurchaseOutcome, PurchaseError> {
        self.inner.purchase(offering_id).await
    }

    async fn acknowledge(&self, transaction_id: &str) -> AppResult<()> {
        self.timeline.lock().unwrap().push(format!("ack:{}", transaction_id));
        self.inner.acknowledge(transaction_id).await
    }
}

#[tokio::test]
async fn test_acknowledgment_waits_for_successful_write() {
    let timeline: Timeline = Arc::new(Mutex::new(Vec::new()));
    let local = Arc::new(LocalTransactionSource::new(SECRET.to_vec()));
    let store = Arc::new(RecordingStore {
        inner: MemoryEntitlementStore::new(),
        failing: AtomicBool::new(true),
        timeline: timeline.clone(),
    });
    let source = Arc::new(RecordingSource { inner: local.clone(), timeline: timeline.clone() });

    let config = EngineConfig::default();
    let catalog = Arc::new(EntitlementCatalog::new(
        Arc::new(StaticCatalogProvider::new(catalog())),
        config.app_id.clone(),
        config.catalog_timeout,
    ));
    let (tx, mut events) = mpsc::channel(256);
    let handle = ReconciliationLoop::new(
        catalog,
        source,
        Arc::new(SharedSecretVerifier::new(SECRET.to_vec())),
        store.clone(),
        &config,
    )
    .with_events(tx)
    .start()
    .await
    .unwrap();

    local
        .deliver(signed(&local, claim("t1", "monthly", 1, LifecycleState::Active)))
        .await;
    // The startup write fails too, so wait for the transaction's failure.
    let mut failures = 0;
    while failures < 2 {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        if matches!(event, ReconcileEvent::PersistFailed(_)) {
            failures += 1;
        }
    }
    assert!(local.acknowledged().await.is_empty());
    assert!(handle.snapshot().persist_error.is_some());
    assert!(!handle.is_premium());

    store.failing.store(false, Ordering::SeqCst);
    let snapshot = handle.refresh().await.unwrap();
    assert!(snapshot.entitlement.premium);
    assert!(snapshot.persist_error.is_none());
    assert_eq!(local.acknowledged().await, vec!["t1".to_string()]);

    let timeline = timeline.lock().unwrap().clone();
    let first_write = timeline.iter().position(|e| e == "write").unwrap();
    let ack = timeline.iter().position(|e| e == "ack:t1").unwrap();
    assert!(first_write < ack, "timeline: {:?}", timeline);
    handle.shutdown().await;
}

struct SwitchableCatalog {
    available: AtomicBool,
}

#[async_trait]
impl CatalogProvider for SwitchableCatalog {
    async fn load_offerings(&self, _app_id: &str) -> Result<Vec<Offering>, CatalogError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(catalog())
        } else {
            Err(CatalogError::Unavailable("registry unreachable".into()))
        }
    }
}

#[tokio::test]
async fn test_catalog_outage_keeps_listening_until_refresh() {
    let provider = Arc::new(SwitchableCatalog { available: AtomicBool::new(false) });
    let source = Arc::new(LocalTransactionSource::new(SECRET.to_vec()));
    let h = Harness::start(
        source.clone(),
        Arc::new(MemoryEntitlementStore::new()),
        provider.clone(),
    )
    .await;

    let err = h.handle.refresh().await.unwrap_err();
    assert!(matches!(err, AppError::Catalog(CatalogError::Unavailable(_))));
    assert_eq!(h.handle.state(), LoopState::Errored);
    assert!(h.handle.snapshot().catalog_error.is_some());

    // Facts are collected but nothing is decided or acknowledged yet.
    assert_eq!(
        source
            .deliver(signed(&source, claim("t1", "lifetime", 1, LifecycleState::Active)))
            .await,
        1
    );
    provider.available.store(true, Ordering::SeqCst);
    let snapshot = h.handle.refresh().await.unwrap();

    assert_eq!(snapshot.state, LoopState::Listening);
    assert!(snapshot.catalog_error.is_none());
    assert!(snapshot.entitlement.premium);
    assert!(source.acknowledged().await.contains(&"t1".to_string()));
}

#[tokio::test]
async fn test_cancel_is_idempotent_and_releases_subscription() {
    let mut h = Harness::new().await;
    h.pass(PassTrigger::Startup).await;
    assert_eq!(h.source.active_subscribers().await, 1);

    let other = h.handle.clone();
    h.handle.cancel();
    other.cancel();
    h.handle.join().await;
    other.join().await;
    h.handle.cancel();

    assert_eq!(h.handle.state(), LoopState::Cancelled);
    assert_eq!(h.source.active_subscribers().await, 0);
    assert!(matches!(h.handle.refresh().await, Err(AppError::Shutdown)));
    assert!(matches!(
        h.handle.purchase("monthly").await,
        Err(PurchaseError::Failed(_))
    ));
}

#[tokio::test]
async fn test_cancel_before_startup_pass_still_stops_cleanly() {
    let h = Harness::new().await;
    h.handle.cancel();
    h.handle.join().await;
    assert_eq!(h.handle.state(), LoopState::Cancelled);
    assert_eq!(h.source.active_subscribers().await, 0);
}

#[tokio::test]
async fn test_purchase_success_flips_premium_on_next_pass() {
    let mut h = Harness::new().await;
    h.pass(PassTrigger::Startup).await;

    h.handle.purchase("yearly").await.unwrap();
    let snapshot = h.pass(PassTrigger::Purchase).await;

    assert_eq!(winner(&snapshot).as_deref(), Some("yearly"));
    assert!(snapshot.entitlement.premium);
    assert_eq!(h.source.acknowledged().await.len(), 1);
}

#[tokio::test]
async fn test_purchase_error_paths() {
    let mut h = Harness::new().await;
    h.pass(PassTrigger::Startup).await;

    h.source.script_purchase("monthly", PurchaseScript::Cancel).await;
    assert_eq!(h.handle.purchase("monthly").await, Err(PurchaseError::UserCancelled));

    h.source.script_purchase("monthly", PurchaseScript::Pending).await;
    assert_eq!(h.handle.purchase("monthly").await, Err(PurchaseError::Pending));

    h.source
        .script_purchase("monthly", PurchaseScript::Fail("card declined".into()))
        .await;
    assert_eq!(
        h.handle.purchase("monthly").await,
        Err(PurchaseError::Failed("card declined".into()))
    );

    assert!(matches!(
        h.handle.purchase("weekly").await,
        Err(PurchaseError::Failed(_))
    ));
    assert!(!h.handle.is_premium());
}

#[tokio::test]
async fn test_unverifiable_purchase_surfaces_failure() {
    let mut h = Harness::new().await;
    h.pass(PassTrigger::Startup).await;

    h.source.script_purchase("lifetime", PurchaseScript::Unsigned).await;
    let err = h.handle.purchase("lifetime").await.unwrap_err();
    assert!(matches!(err, PurchaseError::Failed(_)));

    let snapshot = h.pass(PassTrigger::Purchase).await;
    assert!(!snapshot.entitlement.premium);
    assert!(h.source.acknowledged().await.is_empty());
}
