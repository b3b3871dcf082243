use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use super::{EngineSnapshot, LoopState, PassTrigger, ReconcileEvent, WorkingSet};
use crate::catalog::EntitlementCatalog;
use crate::error::{AppError, AppResult, CatalogError, VerificationError};
use crate::evaluator::evaluate;
use crate::models::{Offering, PurchaseFact, TransactionEvent, VerificationOutcome};
use crate::source::{TransactionSource, TransactionVerifier};
use crate::store::EntitlementStore;
use crate::utils::logging::{
    log_catalog_outage, log_error_with_context, log_pass_result, log_verification_failure,
};

/// Requests from handles to the loop task.
pub(super) enum Command {
    Refresh {
        reply: oneshot::Sender<AppResult<EngineSnapshot>>,
    },
    /// A fact already verified by the purchase path.
    Ingest { fact: PurchaseFact, acknowledge: bool },
}

pub(super) async fn verify_with_timeout(
    verifier: &dyn TransactionVerifier,
    event: &TransactionEvent,
    limit: Duration,
) -> Result<PurchaseFact, VerificationError> {
    match timeout(limit, verifier.verify(event)).await {
        Ok(result) => result,
        Err(_) => Err(VerificationError::FailedVerification(format!(
            "verifier did not answer within {:?}",
            limit
        ))),
    }
}

async fn next_update(
    updates: &mut Option<mpsc::Receiver<TransactionEvent>>,
) -> Option<TransactionEvent> {
    match updates {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

pub(super) struct Worker {
    pub(super) catalog: Arc<EntitlementCatalog>,
    pub(super) source: Arc<dyn TransactionSource>,
    pub(super) verifier: Arc<dyn TransactionVerifier>,
    pub(super) store: Arc<dyn EntitlementStore>,
    pub(super) verification_timeout: Duration,
    pub(super) snapshot: watch::Sender<EngineSnapshot>,
    pub(super) events: Option<mpsc::Sender<ReconcileEvent>>,
    pub(super) state: LoopState,
    pub(super) working: WorkingSet,
    pub(super) pending_acks: Vec<String>,
    pub(super) previous_winner: Option<Offering>,
    pub(super) catalog_error: Option<CatalogError>,
}

impl Worker {
    pub(super) async fn run(
        mut self,
        updates: mpsc::Receiver<TransactionEvent>,
        mut commands: mpsc::Receiver<Command>,
        cancel: CancellationToken,
    ) {
        info!("Reconciliation loop running for '{}'", self.catalog.app_id());
        let mut updates = Some(updates);

        if !cancel.is_cancelled() {
            if let Err(e) = self.refresh_pass(PassTrigger::Startup).await {
                warn!("Startup pass incomplete: {}", e.to_safe_string());
            }
        }

        loop {
            if cancel.is_cancelled() {
                info!("Cancellation observed, stopping reconciliation loop");
                break;
            }

            let mut stream_closed = false;
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    info!("Cancelled while waiting, stopping reconciliation loop");
                    break;
                }
                command = commands.recv() => match command {
                    Some(Command::Refresh { reply }) => {
                        let result = self.refresh_pass(PassTrigger::Refresh).await;
                        if reply.send(result).is_err() {
                            debug!("Refresh caller went away before the result was ready");
                        }
                    }
                    Some(Command::Ingest { fact, acknowledge }) => {
                        self.ingest(fact, acknowledge, PassTrigger::Purchase).await;
                    }
                    None => {
                        info!("All handles dropped, stopping reconciliation loop");
                        break;
                    }
                },
                event = next_update(&mut updates) => match event {
                    Some(event) => self.on_transaction(event).await,
                    None => stream_closed = true,
                },
            }

            if stream_closed {
                warn!("Transaction stream closed by the source");
                updates = None;
            }
        }

        // Unsubscribe before reporting the stop.
        drop(updates);
        self.transition(LoopState::Cancelled);
        self.emit(ReconcileEvent::Stopped);
        info!(
            "Reconciliation loop stopped ({} acknowledgments still pending)",
            self.pending_acks.len()
        );
    }

    async fn on_transaction(&mut self, event: TransactionEvent) {
        debug!("Transaction {} arrived for '{}'", event.transaction_id(), event.claim.offering_id);
        let fact = self.verify(&event).await;
        let acknowledge = event.requires_acknowledgment && fact.is_verified();
        self.ingest(fact, acknowledge, PassTrigger::Transaction).await;
    }

    async fn ingest(&mut self, fact: PurchaseFact, acknowledge: bool, trigger: PassTrigger) {
        let transaction_id = fact.transaction_id.clone();
        self.working.absorb(fact);
        if acknowledge {
            self.queue_ack(transaction_id);
        }
        if let Err(e) = self.run_pass(trigger).await {
            debug!("{:?} pass failed: {}", trigger, e.to_safe_string());
        }
    }

    /// Verifies `event`. A failure yields the same claim marked unverifiable.
    async fn verify(&mut self, event: &TransactionEvent) -> PurchaseFact {
        match verify_with_timeout(self.verifier.as_ref(), event, self.verification_timeout).await {
            Ok(fact) => fact,
            Err(e) => {
                log_verification_failure(event.transaction_id(), &e);
                self.emit(ReconcileEvent::VerificationFailed {
                    transaction_id: event.transaction_id().to_string(),
                    error: e,
                });
                event.to_fact(VerificationOutcome::Unverifiable)
            }
        }
    }

    fn queue_ack(&mut self, transaction_id: String) {
        if !self.pending_acks.contains(&transaction_id) {
            self.pending_acks.push(transaction_id);
        }
    }

    /// Reloads the catalog, replaces the working set from the source's
    /// current statuses and runs a pass. Returns the first failure, after
    /// doing as much of the work as it could.
    async fn refresh_pass(&mut self, trigger: PassTrigger) -> AppResult<EngineSnapshot> {
        let mut failure: Option<AppError> = None;

        self.transition(LoopState::CatalogLoading);
        match self.catalog.reload().await {
            Ok(_) => self.set_catalog_error(None),
            Err(e) => {
                log_catalog_outage(self.catalog.app_id(), &e);
                self.set_catalog_error(Some(e.clone()));
                self.emit(ReconcileEvent::CatalogFailed(e.clone()));
                failure = Some(e.into());
            }
        }
        self.rest();

        let mut evaluate = true;
        match self.source.current_statuses().await {
            Ok(events) => {
                let mut facts = Vec::with_capacity(events.len());
                for event in events {
                    let fact = self.verify(&event).await;
                    if event.requires_acknowledgment && fact.is_verified() {
                        self.queue_ack(fact.transaction_id.clone());
                    }
                    facts.push(fact);
                }
                info!("Replacing working set with {} current statuses", facts.len());
                self.working.replace(facts);
            }
            Err(e) => {
                log_error_with_context(&e, "status query");
                if !self.working.is_seeded() {
                    info!("No status query has succeeded yet, keeping the stored entitlement");
                    evaluate = false;
                }
                failure.get_or_insert(e);
            }
        }

        if evaluate {
            if let Err(e) = self.run_pass(trigger).await {
                failure.get_or_insert(e);
            }
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(self.snapshot.borrow().clone()),
        }
    }

    /// Evaluates the working set and persists the decision, then releases
    /// the acknowledgments that decision covers.
    ///
    /// A decision that would take premium away is held back unless the
    /// working set is authoritative.
    async fn run_pass(&mut self, trigger: PassTrigger) -> AppResult<()> {
        let Some(catalog) = self.catalog.cached().await else {
            debug!(
                "No catalog loaded yet, holding {} facts for a later pass",
                self.working.verified_len() + self.working.untrusted_len()
            );
            return Ok(());
        };

        self.transition(LoopState::Evaluating);
        let decision = evaluate(
            &self.working.evaluation_input(),
            &catalog,
            self.previous_winner.as_ref(),
        );

        let stored_premium = self.snapshot.borrow().entitlement.premium;
        if stored_premium && !decision.grants_premium() && !self.working.is_authoritative() {
            warn!(
                "{:?} pass would clear premium from an incomplete verified view, keeping the stored entitlement",
                trigger
            );
            self.rest();
            self.emit(ReconcileEvent::PassDeferred { trigger });
            return Ok(());
        }

        self.transition(LoopState::Persisting);
        let outcome = self.store.write(&decision, decision.grants_premium()).await;
        let (result, event) = match outcome {
            Ok(entitlement) => {
                self.flush_acks().await;
                log_pass_result(trigger, &decision, &entitlement);
                self.previous_winner = decision.winner.clone();
                let event = ReconcileEvent::PassCompleted {
                    trigger,
                    premium: entitlement.premium,
                    winner: decision.winner_id().map(str::to_string),
                };
                self.snapshot.send_modify(|s| {
                    s.entitlement = entitlement;
                    s.decision = Some(decision);
                    s.persist_error = None;
                });
                (Ok(()), event)
            }
            Err(e) => {
                error!("{:?} pass not persisted: {}", trigger, e);
                self.snapshot.send_modify(|s| s.persist_error = Some(e.clone()));
                (Err(e.clone().into()), ReconcileEvent::PersistFailed(e))
            }
        };

        self.rest();
        self.emit(event);
        result
    }

    async fn flush_acks(&mut self) {
        for transaction_id in std::mem::take(&mut self.pending_acks) {
            match self.source.acknowledge(&transaction_id).await {
                Ok(()) => debug!("Acknowledged transaction {}", transaction_id),
                Err(e) => {
                    warn!(
                        "Acknowledging {} failed, will retry after the next pass: {}",
                        transaction_id,
                        e.to_safe_string()
                    );
                    self.pending_acks.push(transaction_id);
                }
            }
        }
    }

    fn set_catalog_error(&mut self, error: Option<CatalogError>) {
        self.catalog_error = error.clone();
        self.snapshot.send_modify(|s| s.catalog_error = error);
    }

    fn rest(&mut self) {
        let next = match self.catalog_error {
            Some(_) => LoopState::Errored,
            None => LoopState::Listening,
        };
        self.transition(next);
    }

    fn transition(&mut self, next: LoopState) {
        if self.state == next {
            return;
        }
        if !self.state.can_transition_to(next) {
            warn!("Ignoring illegal loop transition {:?} -> {:?}", self.state, next);
            return;
        }
        debug!("Loop state {:?} -> {:?}", self.state, next);
        self.state = next;
        self.snapshot.send_modify(|s| s.state = next);
    }

    fn emit(&self, event: ReconcileEvent) {
        if let Some(tx) = &self.events {
            if let Err(e) = tx.try_send(event) {
                debug!("Dropped reconcile event: {}", e);
            }
        }
    }
}
