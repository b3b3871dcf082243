// In-process transaction source for sandbox runs and tests.
// The host pushes signed events; purchases are signed locally.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::Utc;
use log::{debug, info};
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use super::{sign_claim, TransactionSource};
use crate::error::{AppResult, PurchaseError};
use crate::models::{LifecycleState, PurchaseOutcome, TransactionClaim, TransactionEvent};

/// Scripted answer for the next purchase of an offering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PurchaseScript {
    Cancel,
    Pending,
    Fail(String),
    /// Succeeds with a signature that will not verify.
    Unsigned,
}

#[derive(Default)]
struct Inner {
    subscribers: Vec<mpsc::Sender<TransactionEvent>>,
    statuses: BTreeMap<String, TransactionEvent>,
    acknowledged: Vec<String>,
    scripts: HashMap<String, PurchaseScript>,
}

pub struct LocalTransactionSource {
    secret: Vec<u8>,
    buffer: usize,
    inner: Mutex<Inner>,
}

impl LocalTransactionSource {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
            buffer: 64,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Wraps `claim` in an event signed with this source's secret.
    pub fn sign(&self, claim: TransactionClaim) -> AppResult<TransactionEvent> {
        let signature = sign_claim(&self.secret, &claim)?;
        Ok(TransactionEvent {
            claim,
            signature,
            requires_acknowledgment: true,
        })
    }

    /// Pushes an event to every live subscriber and records it as the
    /// offering's status if it is the newest claim seen for it.
    pub async fn deliver(&self, event: TransactionEvent) -> usize {
        let senders = {
            let mut inner = self.inner.lock().await;
            record_status(&mut inner.statuses, &event);
            inner.subscribers.retain(|tx| !tx.is_closed());
            inner.subscribers.clone()
        };

        let mut reached = 0;
        for tx in senders {
            if tx.send(event.clone()).await.is_ok() {
                reached += 1;
            }
        }
        debug!("Delivered transaction {} to {} subscribers", event.transaction_id(), reached);
        reached
    }

    /// Replaces the status table, as if the store's view changed externally.
    pub async fn set_statuses(&self, events: Vec<TransactionEvent>) {
        let mut inner = self.inner.lock().await;
        inner.statuses.clear();
        for event in &events {
            record_status(&mut inner.statuses, event);
        }
    }

    pub async fn script_purchase(&self, offering_id: &str, script: PurchaseScript) {
        self.inner.lock().await.scripts.insert(offering_id.to_string(), script);
    }

    pub async fn acknowledged(&self) -> Vec<String> {
        self.inner.lock().await.acknowledged.clone()
    }

    pub async fn active_subscribers(&self) -> usize {
        let mut inner = self.inner.lock().await;
        inner.subscribers.retain(|tx| !tx.is_closed());
        inner.subscribers.len()
    }
}

fn record_status(statuses: &mut BTreeMap<String, TransactionEvent>, event: &TransactionEvent) {
    let newer = match statuses.get(&event.claim.offering_id) {
        Some(existing) => {
            (event.claim.observed_at, &event.claim.transaction_id)
                > (existing.claim.observed_at, &existing.claim.transaction_id)
        }
        None => true,
    };
    if newer {
        statuses.insert(event.claim.offering_id.clone(), event.clone());
    }
}

#[async_trait]
impl TransactionSource for LocalTransactionSource {
    async fn subscribe(&self) -> AppResult<mpsc::Receiver<TransactionEvent>> {
        let (tx, rx) = mpsc::channel(self.buffer);
        self.inner.lock().await.subscribers.push(tx);
        Ok(rx)
    }

    async fn current_statuses(&self) -> AppResult<Vec<TransactionEvent>> {
        Ok(self.inner.lock().await.statuses.values().cloned().collect())
    }

    async fn purchase(&self, offering_id: &str) -> Result<PurchaseOutcome, PurchaseError> {
        let script = self.inner.lock().await.scripts.remove(offering_id);
        let unsigned = matches!(script, Some(PurchaseScript::Unsigned));
        match script {
            Some(PurchaseScript::Cancel) => return Ok(PurchaseOutcome::UserCancelled),
            Some(PurchaseScript::Pending) => return Ok(PurchaseOutcome::Pending),
            Some(PurchaseScript::Fail(reason)) => return Err(PurchaseError::Failed(reason)),
            Some(PurchaseScript::Unsigned) | None => {}
        }

        let claim = TransactionClaim {
            transaction_id: Uuid::new_v4().to_string(),
            offering_id: offering_id.to_string(),
            observed_at: Utc::now(),
            state: LifecycleState::Active,
            renewal_offering_id: None,
        };
        let mut event = self
            .sign(claim)
            .map_err(|e| PurchaseError::Failed(e.to_safe_string()))?;
        if unsigned {
            event.signature = "00".to_string();
        }

        info!("Sandbox purchase of '{}' as {}", offering_id, event.transaction_id());
        record_status(&mut self.inner.lock().await.statuses, &event);
        Ok(PurchaseOutcome::Success(event))
    }

    async fn acknowledge(&self, transaction_id: &str) -> AppResult<()> {
        self.inner.lock().await.acknowledged.push(transaction_id.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn claim(tx: &str, offering: &str, minutes: i64) -> TransactionClaim {
        TransactionClaim {
            transaction_id: tx.into(),
            offering_id: offering.into(),
            observed_at: Utc::now() + Duration::minutes(minutes),
            state: LifecycleState::Active,
            renewal_offering_id: None,
        }
    }

    #[tokio::test]
    async fn test_deliver_reaches_subscribers() {
        let source = LocalTransactionSource::new(b"secret".to_vec());
        let mut rx = source.subscribe().await.unwrap();

        let event = source.sign(claim("t1", "monthly", 0)).unwrap();
        assert_eq!(source.deliver(event.clone()).await, 1);
        assert_eq!(rx.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn test_dropped_receiver_is_pruned() {
        let source = LocalTransactionSource::new(b"secret".to_vec());
        let rx = source.subscribe().await.unwrap();
        assert_eq!(source.active_subscribers().await, 1);

        drop(rx);
        assert_eq!(source.active_subscribers().await, 0);
    }

    #[tokio::test]
    async fn test_status_table_keeps_newest_claim() {
        let source = LocalTransactionSource::new(b"secret".to_vec());
        let newer = source.sign(claim("t2", "monthly", 10)).unwrap();
        let older = source.sign(claim("t1", "monthly", 0)).unwrap();

        source.deliver(newer.clone()).await;
        source.deliver(older).await;

        assert_eq!(source.current_statuses().await.unwrap(), vec![newer]);
    }

    #[tokio::test]
    async fn test_scripted_purchase_outcomes() {
        let source = LocalTransactionSource::new(b"secret".to_vec());
        source.script_purchase("monthly", PurchaseScript::Cancel).await;
        source.script_purchase("yearly", PurchaseScript::Fail("card declined".into())).await;

        assert_eq!(source.purchase("monthly").await.unwrap(), PurchaseOutcome::UserCancelled);
        assert_eq!(
            source.purchase("yearly").await.unwrap_err(),
            PurchaseError::Failed("card declined".into())
        );
        // Scripts apply once.
        assert!(matches!(source.purchase("monthly").await.unwrap(), PurchaseOutcome::Success(_)));
    }

    #[tokio::test]
    async fn test_acknowledge_is_recorded() {
        let source = LocalTransactionSource::new(b"secret".to_vec());
        source.acknowledge("t1").await.unwrap();
        assert_eq!(source.acknowledged().await, vec!["t1".to_string()]);
    }
}
