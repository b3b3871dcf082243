use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::worker::{verify_with_timeout, Command, Worker};
use super::{EngineSnapshot, LoopState, ReconcileEvent, WorkingSet};
use crate::catalog::EntitlementCatalog;
use crate::config::EngineConfig;
use crate::error::{AppError, AppResult, PurchaseError};
use crate::models::{PurchaseFact, PurchaseOutcome, SubscriptionGroupStatus, VerificationOutcome};
use crate::source::{TransactionSource, TransactionVerifier};
use crate::store::EntitlementStore;
use crate::utils::logging::log_verification_failure;

/// Collaborators for one session's loop. Consumed by [`start`](Self::start).
pub struct ReconciliationLoop {
    catalog: Arc<EntitlementCatalog>,
    source: Arc<dyn TransactionSource>,
    verifier: Arc<dyn TransactionVerifier>,
    store: Arc<dyn EntitlementStore>,
    verification_timeout: Duration,
    command_buffer: usize,
    events: Option<mpsc::Sender<ReconcileEvent>>,
}

impl ReconciliationLoop {
    pub fn new(
        catalog: Arc<EntitlementCatalog>,
        source: Arc<dyn TransactionSource>,
        verifier: Arc<dyn TransactionVerifier>,
        store: Arc<dyn EntitlementStore>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            catalog,
            source,
            verifier,
            store,
            verification_timeout: config.verification_timeout,
            command_buffer: config.command_buffer.max(1),
            events: None,
        }
    }

    /// Also report discrete loop events on `sender`. Events are dropped
    /// rather than awaited when the receiver falls behind.
    pub fn with_events(mut self, sender: mpsc::Sender<ReconcileEvent>) -> Self {
        self.events = Some(sender);
        self
    }

    /// Reads the stored entitlement, subscribes to the source and spawns the
    /// loop task. The first pass (catalog load plus status query) runs on
    /// that task.
    pub async fn start(self) -> AppResult<ReconcileHandle> {
        let initial = self.store.read().await?;
        let updates = self.source.subscribe().await?;

        let (snapshot_tx, snapshot_rx) = watch::channel(EngineSnapshot::new(initial));
        let (command_tx, command_rx) = mpsc::channel(self.command_buffer);
        let cancel = CancellationToken::new();

        let worker = Worker {
            catalog: self.catalog.clone(),
            source: self.source.clone(),
            verifier: self.verifier.clone(),
            store: self.store,
            verification_timeout: self.verification_timeout,
            snapshot: snapshot_tx,
            events: self.events,
            state: LoopState::Idle,
            working: WorkingSet::new(),
            pending_acks: Vec::new(),
            previous_winner: None,
            catalog_error: None,
        };
        let task = tokio::spawn(worker.run(updates, command_rx, cancel.clone()));
        info!(
            "Started reconciliation loop for '{}' (premium stored: {})",
            self.catalog.app_id(),
            initial.premium
        );

        Ok(ReconcileHandle {
            commands: command_tx,
            snapshot: snapshot_rx,
            cancel,
            task: Arc::new(Mutex::new(Some(task))),
            catalog: self.catalog,
            source: self.source,
            verifier: self.verifier,
            verification_timeout: self.verification_timeout,
        })
    }
}

/// Host-facing handle to a running loop. Cheap to clone; the loop stops
/// when it is cancelled or when every clone has been dropped.
#[derive(Clone)]
pub struct ReconcileHandle {
    commands: mpsc::Sender<Command>,
    snapshot: watch::Receiver<EngineSnapshot>,
    cancel: CancellationToken,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
    catalog: Arc<EntitlementCatalog>,
    source: Arc<dyn TransactionSource>,
    verifier: Arc<dyn TransactionVerifier>,
    verification_timeout: Duration,
}

impl ReconcileHandle {
    /// Stops the loop. Safe to call any number of times from anywhere; a
    /// pass already in flight finishes before the loop exits.
    pub fn cancel(&self) {
        if !self.cancel.is_cancelled() {
            info!("Cancelling reconciliation loop");
        }
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Waits until the loop task has exited.
    pub async fn join(&self) {
        let task = self.task.lock().await.take();
        match task {
            Some(task) => {
                if let Err(e) = task.await {
                    error!("Reconciliation task ended abnormally: {}", e);
                }
            }
            None => {
                let mut rx = self.snapshot.clone();
                // An error means the loop is gone, which is what we wait for.
                let _ = rx.wait_for(|s| s.state.is_terminal()).await;
            }
        }
    }

    pub async fn shutdown(&self) {
        self.cancel();
        self.join().await;
    }

    /// Reactive view of the engine. Every state change, pass result and
    /// error is published here.
    pub fn subscribe(&self) -> watch::Receiver<EngineSnapshot> {
        self.snapshot.clone()
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn state(&self) -> LoopState {
        self.snapshot.borrow().state
    }

    pub fn is_premium(&self) -> bool {
        self.snapshot.borrow().entitlement.premium
    }

    pub fn current_subscription_group_status(&self) -> SubscriptionGroupStatus {
        self.snapshot.borrow().entitlement.group_status
    }

    /// Reloads the catalog, re-queries every status and re-evaluates. This
    /// is the only path that clears an entitlement the store no longer
    /// reports.
    pub async fn refresh(&self) -> AppResult<EngineSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Refresh { reply })
            .await
            .map_err(|_| AppError::Shutdown)?;
        rx.await.map_err(|_| AppError::Shutdown)?
    }

    /// Buys `offering_id` through the source. `Ok` means the purchase was
    /// verified and handed to the loop; premium follows on the next pass.
    pub async fn purchase(&self, offering_id: &str) -> Result<(), PurchaseError> {
        if self.is_cancelled() {
            return Err(PurchaseError::Failed("reconciliation loop has stopped".into()));
        }
        if let Some(offerings) = self.catalog.cached().await {
            if !offerings.iter().any(|o| o.id == offering_id) {
                warn!("Purchase requested for unknown offering '{}'", offering_id);
                return Err(PurchaseError::Failed(format!("unknown offering '{}'", offering_id)));
            }
        }

        let event = match self.source.purchase(offering_id).await? {
            PurchaseOutcome::Success(event) => event,
            PurchaseOutcome::UserCancelled => return Err(PurchaseError::UserCancelled),
            PurchaseOutcome::Pending => {
                info!("Purchase of '{}' is awaiting approval", offering_id);
                return Err(PurchaseError::Pending);
            }
        };

        match verify_with_timeout(self.verifier.as_ref(), &event, self.verification_timeout).await {
            Ok(fact) => self.forward(fact, event.requires_acknowledgment).await,
            Err(e) => {
                log_verification_failure(event.transaction_id(), &e);
                let fact = event.to_fact(VerificationOutcome::Unverifiable);
                if self.forward(fact, false).await.is_err() {
                    warn!("Could not record unverified purchase {}", event.transaction_id());
                }
                Err(PurchaseError::Failed(e.to_string()))
            }
        }
    }

    async fn forward(&self, fact: PurchaseFact, acknowledge: bool) -> Result<(), PurchaseError> {
        self.commands
            .send(Command::Ingest { fact, acknowledge })
            .await
            .map_err(|_| PurchaseError::Failed("reconciliation loop has stopped".into()))
    }
}
