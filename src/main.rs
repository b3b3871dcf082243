// storesync host
// Runs one reconciliation session against the sandbox transaction source
// and speaks JSON lines on stdin/stdout.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use storesync::config::SIGNING_SECRET_VAR;
use storesync::utils::logging::{init_logging, log_error_with_context};
use storesync::utils::retry::{retry_with_exponential_backoff, RetryConfig};
use storesync::{
    Database, EngineConfig, EngineSnapshot, EntitlementCatalog, JsonCatalogProvider,
    LocalTransactionSource, ReconcileEvent, ReconcileHandle, ReconciliationLoop,
    SharedSecretVerifier, SqliteEntitlementStore, TransactionClaim, TransactionEvent,
};

#[derive(Debug, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
enum HostCommand {
    Status,
    Refresh,
    Purchase {
        offering_id: String,
    },
    /// Pushes a transaction through the sandbox source. Unsigned claims are
    /// signed with the session secret.
    Deliver {
        claim: TransactionClaim,
        #[serde(default)]
        signature: Option<String>,
        #[serde(default = "default_requires_ack")]
        requires_acknowledgment: bool,
    },
    Quit,
}

fn default_requires_ack() -> bool {
    true
}

#[derive(Debug, Serialize)]
struct Reply {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    snapshot: Option<EngineSnapshot>,
}

impl Reply {
    fn ok(snapshot: EngineSnapshot) -> Self {
        Self { ok: true, error: None, snapshot: Some(snapshot) }
    }

    fn failed(error: impl ToString) -> Self {
        Self { ok: false, error: Some(error.to_string()), snapshot: None }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(e) = init_logging() {
        eprintln!("Failed to initialize logging: {}", e);
    }

    let config = EngineConfig::from_env().context("Failed to load configuration")?;
    let secret = config
        .signing_secret
        .clone()
        .ok_or_else(|| anyhow!("{} must be set", SIGNING_SECRET_VAR))?;

    let db = Database::open(&config.database_path).await?;
    let store = Arc::new(SqliteEntitlementStore::new(db));
    let catalog = Arc::new(EntitlementCatalog::new(
        Arc::new(JsonCatalogProvider::new(config.catalog_path.clone())),
        config.app_id.clone(),
        config.catalog_timeout,
    ));
    let source = Arc::new(LocalTransactionSource::new(secret.clone().into_bytes()));
    let verifier = Arc::new(SharedSecretVerifier::new(secret.into_bytes()));

    let (event_tx, event_rx) = mpsc::channel(64);
    let handle = ReconciliationLoop::new(catalog, source.clone(), verifier, store, &config)
        .with_events(event_tx)
        .start()
        .await
        .context("Failed to start reconciliation loop")?;
    tokio::spawn(log_events(event_rx));

    match retry_with_exponential_backoff(&RetryConfig::default(), || handle.refresh()).await {
        Ok(snapshot) => info!(
            "Initial refresh done: premium={} status={}",
            snapshot.entitlement.premium,
            snapshot.entitlement.group_status.as_str()
        ),
        Err(e) => log_error_with_context(&e, "initial refresh"),
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("Failed to read stdin")?,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                None
            }
        };
        let Some(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }

        let reply = match serde_json::from_str::<HostCommand>(&line) {
            Ok(HostCommand::Quit) => break,
            Ok(command) => run_command(&handle, &source, command).await,
            Err(e) => Reply::failed(format!("invalid command: {}", e)),
        };
        let mut out = serde_json::to_vec(&reply)?;
        out.push(b'\n');
        stdout.write_all(&out).await?;
        stdout.flush().await?;
    }

    handle.shutdown().await;
    info!("storesync host exiting");
    Ok(())
}

async fn run_command(
    handle: &ReconcileHandle,
    source: &LocalTransactionSource,
    command: HostCommand,
) -> Reply {
    match command {
        HostCommand::Status => Reply::ok(handle.snapshot()),
        HostCommand::Refresh => match handle.refresh().await {
            Ok(snapshot) => Reply::ok(snapshot),
            Err(e) => Reply::failed(e.to_safe_string()),
        },
        HostCommand::Purchase { offering_id } => match handle.purchase(&offering_id).await {
            // Premium follows on the loop's next pass.
            Ok(()) => Reply::ok(handle.snapshot()),
            Err(e) => Reply::failed(e),
        },
        HostCommand::Deliver { claim, signature, requires_acknowledgment } => {
            let event = match signature {
                Some(signature) => TransactionEvent { claim, signature, requires_acknowledgment },
                None => match source.sign(claim) {
                    Ok(event) => TransactionEvent { requires_acknowledgment, ..event },
                    Err(e) => return Reply::failed(e.to_safe_string()),
                },
            };
            if source.deliver(event).await == 0 {
                warn!("Delivered transaction reached no subscriber");
            }
            Reply::ok(handle.snapshot())
        }
        HostCommand::Quit => Reply::ok(handle.snapshot()),
    }
}

async fn log_events(mut events: mpsc::Receiver<ReconcileEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            ReconcileEvent::PassCompleted { trigger, premium, winner } => debug!(
                "Event: {:?} pass completed, premium={} winner={:?}",
                trigger, premium, winner
            ),
            ReconcileEvent::PassDeferred { trigger } => {
                warn!("Event: {:?} pass deferred, stored entitlement kept", trigger)
            }
            ReconcileEvent::CatalogFailed(e) => warn!("Event: catalog failed: {}", e),
            ReconcileEvent::VerificationFailed { transaction_id, error } => {
                warn!("Event: {} failed verification: {}", transaction_id, error)
            }
            ReconcileEvent::PersistFailed(e) => error!("Event: persist failed: {}", e),
            ReconcileEvent::Stopped => {
                info!("Event: loop stopped");
                break;
            }
        }
    }
}
