//! Payflow Service
//!
//! Payment-transaction lifecycle daemon: dispute-gated ledger, idempotent
//! invoicing and signed webhook fan-out behind an HTTP API.

use std::sync::Arc;

use clap::Parser;

use payflow::config::AppConfig;
use payflow::dispute::DisputeLedger;
use payflow::handlers::{self, AppState, ServiceStats};
use payflow::invoice::{InMemoryBlobStore, InvoiceGenerator, TextInvoiceRenderer};
use payflow::ledger::TransactionLedger;
use payflow::lookup::{InMemoryProjectCatalog, InMemoryUserDirectory};
use payflow::outbox::{self, OutboxWorker};
use payflow::store::InMemoryStore;
use payflow::webhook::{DispatcherConfig, SignedDispatcher, SubscriptionRegistry};

/// Payflow Service
#[derive(Parser, Debug)]
#[command(name = "payflowd")]
#[command(author = "Payflow Team")]
#[command(version)]
#[command(about = "Payment-transaction lifecycle service")]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "3001")]
    port: u16,

    /// Host to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Seed a user id into the in-memory directory (repeatable)
    #[arg(long = "seed-user")]
    seed_users: Vec<String>,

    /// Seed a project id into the in-memory catalog (repeatable)
    #[arg(long = "seed-project")]
    seed_projects: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let filter = if args.verbose { "debug" } else { "info" };

    tracing_subscriber::fmt().with_env_filter(filter).init();

    // A missing signing secret is fatal here, before anything listens.
    let config = AppConfig::from_env()?;

    let store = Arc::new(InMemoryStore::new());
    let users = Arc::new(InMemoryUserDirectory::new());
    for id in &args.seed_users {
        users.seed(id.clone());
    }
    let projects = Arc::new(InMemoryProjectCatalog::new());
    for id in &args.seed_projects {
        projects.seed(id.clone());
    }

    let stats = Arc::new(ServiceStats::new());
    let registry = Arc::new(SubscriptionRegistry::new(store.clone()));
    let dispatcher = Arc::new(SignedDispatcher::new(
        DispatcherConfig::from(&config),
        store.clone(),
    )?);
    let invoices = Arc::new(InvoiceGenerator::new(
        store.clone(),
        users.clone(),
        projects.clone(),
        Arc::new(TextInvoiceRenderer),
        Arc::new(InMemoryBlobStore::new()),
        config.render_timeout,
    ));

    let (outbox_tx, outbox_rx) = outbox::channel();
    let disputes = Arc::new(DisputeLedger::new(
        store.clone(),
        store.clone(),
        users.clone(),
        outbox_tx.clone(),
    ));
    let ledger = Arc::new(TransactionLedger::new(
        store.clone(),
        disputes.clone(),
        users,
        projects,
        outbox_tx,
    ));

    let worker = OutboxWorker::new(
        outbox_rx,
        store.clone(),
        store.clone(),
        store.clone(),
        invoices,
        dispatcher,
        config.clone(),
        stats.clone(),
    );
    tokio::spawn(worker.run());

    let state = Arc::new(AppState::new(ledger, disputes, registry, stats));
    let router = handlers::router(state);

    let listener = tokio::net::TcpListener::bind((args.host.as_str(), args.port)).await?;
    tracing::info!("Payflow listening on {}:{}", args.host, args.port);

    axum::serve(listener, router).await?;
    Ok(())
}
