use env_logger::{Builder, Target};
use log::{Level, LevelFilter, SetLoggerError};
use std::env;
use std::error::Error;
use std::io::Write;

use crate::error::{AppError, CatalogError, VerificationError};
use crate::models::{EntitlementDecision, PersistedEntitlement};
use crate::reconcile::PassTrigger;

fn level_from_env(value: &str) -> LevelFilter {
    match value.to_lowercase().as_str() {
        "error" => LevelFilter::Error,
        "warn" => LevelFilter::Warn,
        "info" => LevelFilter::Info,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        _ => LevelFilter::Info,
    }
}

/// Logs go to stderr; stdout carries the host protocol.
pub fn init_logging() -> Result<(), SetLoggerError> {
    let log_level = level_from_env(&env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()));

    let mut builder = Builder::from_default_env();
    builder.format(|buf, record| {
        let timestamp = buf.timestamp();
        let target = record.target();
        match record.level() {
            Level::Info => writeln!(buf, "{} [INFO] [{}]: {}", timestamp, target, record.args()),
            level => writeln!(
                buf,
                "{} [{}] [{}:{}] {}: {}",
                timestamp,
                level,
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                target,
                record.args()
            ),
        }
    });

    if env::var("RUST_ENV").unwrap_or_else(|_| "development".to_string()) == "production" {
        builder.filter_module("tokio", LevelFilter::Info);
        builder.filter_module("sqlx", LevelFilter::Warn);
    }

    builder.filter_level(log_level).target(Target::Stderr).try_init()
}

pub fn log_error_with_context(error: &AppError, context: &str) {
    log::error!("[{}] {}", context, error.to_safe_string());

    let mut source = error.source();
    while let Some(err) = source {
        log::debug!("  Caused by: {}", err);
        source = err.source();
    }
}

pub fn log_pass_result(
    trigger: PassTrigger,
    decision: &EntitlementDecision,
    entitlement: &PersistedEntitlement,
) {
    log::info!(
        "[Reconcile] {:?} pass: winner={} status={} premium={} ever={} excluded={}",
        trigger,
        decision.winner_id().unwrap_or("-"),
        entitlement.group_status.as_str(),
        entitlement.premium,
        entitlement.premium_ever_activated,
        decision.exclusions.len()
    );
}

pub fn log_catalog_outage(app_id: &str, error: &CatalogError) {
    log::error!("[Catalog] Load for '{}' failed, still listening: {}", app_id, error);
}

pub fn log_verification_failure(transaction_id: &str, error: &VerificationError) {
    log::warn!("[Verify] Transaction {} treated as unverifiable: {}", transaction_id, error);
}
