// SPDX-FileCopyrightText: 2025 Abe Kohandel <abe@kodebooth.com>
// SPDX-License-Identifier: MIT

use std::{sync::Arc, time::Duration};

#[cfg(feature = "dynamodb")]
use acctlock::DynamodbStore;
use acctlock::{
    Account, DistributedLocks, Ledger, LocalLocks, MemoryStore, Processor, Provider, RetryPolicy,
    Transaction,
};
use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use rust_decimal::Decimal;
use tokio::{signal, time::timeout};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Backend {
    /// In-process lock store
    Memory,
    /// Per-account mutexes, no store
    Local,
    /// DynamoDB lock table
    #[cfg(feature = "dynamodb")]
    Dynamodb,
}

/// Apply a batch of account transactions under per-account locks
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    #[arg(long, env = "ACCTLOCK_BACKEND", value_enum, default_value = "memory")]
    backend: Backend,

    /// DynamoDB table holding lock records
    #[arg(long, env = "ACCTLOCK_TABLE", default_value = "acctlock")]
    table: String,

    /// DynamoDB endpoint override, e.g. a DynamoDB Local instance
    #[arg(long, env = "ACCTLOCK_ENDPOINT")]
    endpoint: Option<String>,

    /// Lock TTL in milliseconds
    #[arg(long, default_value_t = 5000, value_parser = clap::value_parser!(u64).range(1..))]
    ttl_ms: u64,

    /// Acquisition attempts per transaction
    #[arg(long, default_value_t = 3)]
    attempts: u32,

    /// Delay between acquisition attempts in milliseconds
    #[arg(long, default_value_t = 100)]
    delay_ms: u64,

    /// How long to wait for in-flight transactions on Ctrl-C
    #[arg(long, default_value_t = 5)]
    grace_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let ledger = Arc::new(Ledger::new([
        Account::new("11111", "John Doe", Decimal::from(1000)),
        Account::new("22222", "Jane Doe", Decimal::from(2000)),
    ]));
    let transactions = vec![
        Transaction::new("11111", Decimal::from(-200)),
        Transaction::new("11111", Decimal::from(300)),
        Transaction::new("22222", Decimal::from(-500)),
        Transaction::new("22222", Decimal::from(-3000)),
        Transaction::new("11111", Decimal::from(100)),
    ];
    let retry = RetryPolicy::builder()
        .attempts(args.attempts)
        .delay(Duration::from_millis(args.delay_ms))
        .build();
    let ttl = Duration::from_millis(args.ttl_ms);
    let grace = Duration::from_secs(args.grace_secs);

    info!(backend = ?args.backend, ?ttl, "Processing transactions");

    match args.backend {
        Backend::Memory => {
            let store = MemoryStore::new();
            let _reaper = store.spawn_reaper(ttl);
            let processor = Processor::builder()
                .provider(DistributedLocks::new(store))
                .ledger(ledger)
                .retry(retry)
                .ttl(ttl)
                .build();
            run(processor, transactions, grace).await
        }
        Backend::Local => {
            let processor = Processor::builder()
                .provider(LocalLocks::new())
                .ledger(ledger)
                .retry(retry)
                .ttl(ttl)
                .build();
            run(processor, transactions, grace).await
        }
        #[cfg(feature = "dynamodb")]
        Backend::Dynamodb => {
            let store = dynamodb_store(&args).await;
            let processor = Processor::builder()
                .provider(DistributedLocks::new(store))
                .ledger(ledger)
                .retry(retry)
                .ttl(ttl)
                .build();
            run(processor, transactions, grace).await
        }
    }
}

#[cfg(feature = "dynamodb")]
async fn dynamodb_store(args: &Args) -> DynamodbStore {
    let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
    if let Some(endpoint) = &args.endpoint {
        loader = loader.endpoint_url(endpoint);
    }
    let config = loader.load().await;

    DynamodbStore::builder()
        .client(Arc::new(aws_sdk_dynamodb::Client::new(&config)))
        .table_name(args.table.clone())
        .build()
}

async fn run<P>(processor: Processor<P>, transactions: Vec<Transaction>, grace: Duration) -> Result<()>
where
    P: Provider + Clone + 'static,
{
    let ledger = Arc::clone(processor.ledger());
    let mut batch = tokio::spawn(async move { processor.run(transactions).await });

    let outcomes = tokio::select! {
        joined = &mut batch => joined.context("transaction batch panicked")?,
        _ = signal::ctrl_c() => {
            info!(?grace, "Shutting down, waiting for in-flight transactions");
            match timeout(grace, batch).await {
                Ok(joined) => joined.context("transaction batch panicked")?,
                Err(_) => {
                    warn!("Grace period elapsed, abandoning in-flight transactions");
                    return Ok(());
                }
            }
        }
    };

    let skipped = outcomes.iter().filter(|(_, outcome)| outcome.is_err()).count();
    info!(
        applied = outcomes.len() - skipped,
        skipped,
        "Batch complete"
    );
    for account in ledger.accounts() {
        info!(account = %account.id, balance = %account.balance, "Final balance");
    }

    Ok(())
}
