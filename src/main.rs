use clap::{Args, Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use rust_decimal::Decimal;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::PathBuf;
use std::sync::Arc;
use storefront::application::cart::CartService;
use storefront::application::pricing::PricingEngine;
use storefront::application::reconcile::ReconciliationEngine;
use storefront::config::{CheckoutSettings, NotificationSettings, PricingPolicy};
use storefront::domain::cart::CartMode;
use storefront::domain::identity::{Customer, Identity, UserId};
use storefront::domain::money::Money;
use storefront::domain::ports::{SharedCustomerStore, SharedOrderStore};
use storefront::domain::pricing::PricingSummary;
use storefront::infrastructure::in_memory::{
    InMemoryCartRepository, InMemoryCatalog, InMemoryCustomerStore, InMemoryOrderStore,
    InMemorySession,
};
use storefront::infrastructure::notifier::LogNotifier;
use storefront::interfaces::csv::cart_reader::CartReader;
use storefront::interfaces::csv::catalog_reader::CatalogReader;
use storefront::interfaces::csv::outcome_writer::{OutcomeRecord, OutcomeWriter};
use storefront::interfaces::webhook::parse_event;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Price a cart against a catalog and print the breakdown
    Quote(QuoteArgs),
    /// Replay gateway webhook events through reconciliation
    Replay(ReplayArgs),
}

#[derive(Args)]
struct PricingArgs {
    #[arg(long, env = "STOREFRONT_FIRST_TIME_DISCOUNT_RATE", default_value = "0.10")]
    first_time_discount_rate: Decimal,

    #[arg(long, env = "STOREFRONT_FREE_DELIVERY_THRESHOLD", default_value = "40.00")]
    free_delivery_threshold: Decimal,

    #[arg(long, env = "STOREFRONT_DELIVERY_FEE", default_value = "4.99")]
    delivery_fee: Decimal,

    #[arg(long, env = "STOREFRONT_DELIVERY_DAYS", default_value_t = 2)]
    delivery_days: u64,
}

impl From<PricingArgs> for PricingPolicy {
    fn from(args: PricingArgs) -> Self {
        PricingPolicy {
            first_time_discount_rate: args.first_time_discount_rate,
            free_delivery_threshold: Money::new(args.free_delivery_threshold),
            delivery_fee: Money::new(args.delivery_fee),
            delivery_days: args.delivery_days,
        }
    }
}

#[derive(Args)]
struct QuoteArgs {
    /// Catalog CSV file
    #[arg(long)]
    catalog: PathBuf,

    /// Cart lines CSV file
    #[arg(long)]
    cart: PathBuf,

    /// Price the cart for this registered customer instead of a guest
    #[arg(long)]
    user_id: Option<u64>,

    #[arg(long, requires = "user_id")]
    email: Option<String>,

    #[arg(long, requires = "user_id")]
    first_time_buyer: bool,

    #[command(flatten)]
    pricing: PricingArgs,
}

#[derive(Args)]
struct ReplayArgs {
    /// Webhook envelopes, one JSON object per line
    #[arg(long)]
    events: PathBuf,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long, env = "STOREFRONT_DB_PATH")]
    db_path: Option<PathBuf>,

    #[arg(long, env = "STOREFRONT_NOTIFICATIONS", default_value_t = true, action = clap::ArgAction::Set)]
    notifications: bool,

    #[arg(long, env = "STOREFRONT_ADMIN_EMAIL")]
    admin_email: Option<String>,

    #[arg(long, env = "STOREFRONT_LAST_ERROR_LIMIT", default_value_t = CheckoutSettings::default().last_error_limit)]
    last_error_limit: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine.
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Quote(args) => quote(args).await,
        Command::Replay(args) => replay(args).await,
    }
}

async fn quote(args: QuoteArgs) -> Result<()> {
    let (products, bundles) = CatalogReader::new(File::open(&args.catalog).into_diagnostic()?)
        .load()
        .into_diagnostic()?;
    let catalog = Arc::new(InMemoryCatalog::with_entries(products, bundles));
    let customers: SharedCustomerStore = Arc::new(InMemoryCustomerStore::new());

    let identity = match args.user_id {
        Some(id) => {
            let mut customer = Customer::new(UserId(id), args.email);
            customer.first_time_buyer = args.first_time_buyer;
            customers.store(customer).await.into_diagnostic()?;
            Identity::Authenticated(UserId(id))
        }
        None => Identity::Anonymous,
    };

    let carts = CartService::new(catalog.clone(), Arc::new(InMemoryCartRepository::new()));
    let session = Arc::new(InMemorySession::new());
    for record in CartReader::new(File::open(&args.cart).into_diagnostic()?).records() {
        let record = record.into_diagnostic()?;
        carts
            .add_item(
                identity,
                session.clone(),
                &record.key,
                record.quantity,
                record.price.map(Money::new),
            )
            .await
            .into_diagnostic()?;
    }

    let pricing = PricingEngine::new(catalog, customers, args.pricing.into());
    let (store, mode) = carts.resolve(identity, session);
    let summary = pricing
        .price(store.as_ref(), identity)
        .await
        .into_diagnostic()?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mode = match mode {
        CartMode::Persistent => "persistent",
        CartMode::Ephemeral => "ephemeral",
    };
    writeln!(out, "cart: {mode}").into_diagnostic()?;
    write_summary(&mut out, &summary).into_diagnostic()?;
    writeln!(
        out,
        "amount_minor: {}",
        summary.grand_total.to_minor_units().into_diagnostic()?
    )
    .into_diagnostic()?;
    Ok(())
}

fn write_summary(out: &mut impl Write, summary: &PricingSummary) -> io::Result<()> {
    for line in &summary.lines {
        writeln!(
            out,
            "{} x{} @ {} = {}",
            line.name,
            line.quantity.get(),
            line.unit_after,
            line.subtotal_after()
        )?;
    }
    writeln!(out, "total_before_discount: {}", summary.total_before_discount)?;
    writeln!(out, "bundle_discount: {}", summary.bundle_discount_total)?;
    writeln!(out, "first_time_discount: {}", summary.first_time_discount_total)?;
    writeln!(out, "cart_total: {}", summary.cart_total)?;
    writeln!(out, "delivery_fee: {}", summary.delivery_fee)?;
    writeln!(out, "grand_total: {}", summary.grand_total)?;
    writeln!(out, "estimated_delivery: {}", summary.estimated_delivery)
}

fn open_order_stores(
    db_path: Option<PathBuf>,
) -> Result<(SharedOrderStore, SharedCustomerStore)> {
    #[cfg(feature = "storage-rocksdb")]
    if let Some(path) = db_path {
        let store =
            storefront::infrastructure::rocksdb::RocksDBStore::open(path).into_diagnostic()?;
        let orders: SharedOrderStore = Arc::new(store.clone());
        let customers: SharedCustomerStore = Arc::new(store);
        return Ok((orders, customers));
    }

    #[cfg(not(feature = "storage-rocksdb"))]
    if db_path.is_some() {
        eprintln!(
            "WARNING: --db-path ignored; built without the storage-rocksdb feature. Using in-memory storage."
        );
    }

    let orders: SharedOrderStore = Arc::new(InMemoryOrderStore::new());
    let customers: SharedCustomerStore = Arc::new(InMemoryCustomerStore::new());
    Ok((orders, customers))
}

async fn replay(args: ReplayArgs) -> Result<()> {
    let (orders, customers) = open_order_stores(args.db_path)?;
    let engine = ReconciliationEngine::new(
        orders,
        customers,
        Arc::new(LogNotifier::new()),
        NotificationSettings {
            enabled: args.notifications,
            admin_email: args.admin_email,
        },
        args.last_error_limit,
    );

    let input = BufReader::new(File::open(&args.events).into_diagnostic()?);
    let stdout = io::stdout();
    let mut writer = OutcomeWriter::new(stdout.lock());
    for (index, line) in input.lines().enumerate() {
        let line = line.into_diagnostic()?;
        if line.trim().is_empty() {
            continue;
        }

        let event = match parse_event(line.as_bytes()) {
            Ok(Some(event)) => event,
            Ok(None) => {
                let id = envelope_id(&line);
                tracing::debug!(line = index + 1, event = ?id, "Skipping unhandled event type");
                writer
                    .write(&OutcomeRecord::unmatched(id.as_deref()))
                    .into_diagnostic()?;
                continue;
            }
            Err(e) => {
                tracing::error!(line = index + 1, error = %e, "Error reading event");
                continue;
            }
        };

        let record = match engine.reconcile(&event).await {
            Ok(Some(order)) => OutcomeRecord::matched(event.event_id.as_deref(), &order),
            Ok(None) => OutcomeRecord::unmatched(event.event_id.as_deref()),
            Err(e) => {
                tracing::error!(line = index + 1, event = ?event.event_id, error = %e, "Error reconciling event");
                OutcomeRecord::unmatched(event.event_id.as_deref())
            }
        };
        writer.write(&record).into_diagnostic()?;
    }
    writer.finish().into_diagnostic()?;
    Ok(())
}

fn envelope_id(line: &str) -> Option<String> {
    serde_json::from_str::<serde_json::Value>(line)
        .ok()?
        .get("id")?
        .as_str()
        .map(str::to_string)
}
