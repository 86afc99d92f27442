//! Cartsync CLI - Drive the cart engine from a terminal.
//!
//! # Usage
//!
//! ```bash
//! # Show the active cart
//! cartctl show
//!
//! # Add one unit (stock ceiling from the catalog, or explicit)
//! cartctl add 65f0c2 --stock 3
//!
//! # Sign in; the guest cart is merged into the account cart
//! cartctl login --token "$ACCESS_TOKEN"
//!
//! # Sign out; the guest cart becomes active again
//! cartctl logout
//! ```
//!
//! # Commands
//!
//! - `show` - Print the derived view
//! - `add` / `decrease` / `delete` / `set` / `clear` - Cart operations
//! - `refresh` - Re-fetch the account cart
//! - `login` / `logout` - Session transitions

#![cfg_attr(not(test), forbid(unsafe_code))]

use cartsync_client::config::ClientConfig;
use cartsync_client::dispatcher::Outcome;
use clap::{Parser, Subcommand};
use sentry::integrations::tracing as sentry_tracing;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

#[derive(Parser)]
#[command(name = "cartctl")]
#[command(author, version, about = "Cart synchronization engine CLI")]
struct Cli {
    /// Print the cart as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the active cart
    Show,
    /// Add one unit of a product
    Add {
        /// Product ID
        product: String,

        /// Stock ceiling (defaults to the catalog's stock)
        #[arg(short, long)]
        stock: Option<u32>,
    },
    /// Remove one unit of a product
    Decrease {
        /// Product ID
        product: String,
    },
    /// Remove a product line entirely
    Delete {
        /// Product ID
        product: String,
    },
    /// Set the quantity of a product (0 removes it)
    Set {
        /// Product ID
        product: String,

        /// New quantity
        quantity: u32,

        /// Stock ceiling (defaults to the catalog's stock)
        #[arg(short, long)]
        stock: Option<u32>,
    },
    /// Empty the active cart
    Clear,
    /// Re-fetch the account cart from the server
    Refresh,
    /// Sign in with an access token
    Login {
        /// Access token issued by the auth service
        #[arg(short, long, env = "CARTCTL_TOKEN", hide_env_values = true)]
        token: String,
    },
    /// Sign out
    Logout,
}

/// Initialize Sentry error tracking.
///
/// Returns a guard that must be held for the lifetime of the process.
/// Returns `None` if `SENTRY_DSN` is not configured.
fn init_sentry(config: &ClientConfig) -> Option<sentry::ClientInitGuard> {
    let dsn = config.sentry_dsn.as_ref()?;

    let guard = sentry::init((
        dsn.as_str(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            attach_stacktrace: true,
            ..Default::default()
        },
    ));

    tracing::info!("Sentry initialized");
    Some(guard)
}

/// Filter tracing events to Sentry event types.
fn sentry_event_filter(metadata: &tracing::Metadata<'_>) -> sentry_tracing::EventFilter {
    match *metadata.level() {
        tracing::Level::ERROR | tracing::Level::WARN => sentry_tracing::EventFilter::Event,
        tracing::Level::INFO | tracing::Level::DEBUG => sentry_tracing::EventFilter::Breadcrumb,
        _ => sentry_tracing::EventFilter::Ignore,
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match ClientConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            #[allow(clippy::print_stderr)]
            {
                eprintln!("cartctl: {e}");
            }
            std::process::exit(2);
        }
    };

    // Initialize Sentry (must be done before tracing subscriber)
    let _sentry_guard = init_sentry(&config);

    // Defaults to info level for our crates if RUST_LOG is not set
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "cartsync_client=info,cartsync_cli=info".into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(sentry_tracing::layer().event_filter(sentry_event_filter))
        .init();

    if let Err(e) = run(cli, &config).await {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli, config: &ClientConfig) -> Result<(), commands::CliError> {
    let engine = commands::open_engine(config).await?;

    let outcome = match cli.command {
        Commands::Show => Outcome::Applied,
        Commands::Add { product, stock } => commands::cart::add(&engine, &product, stock).await?,
        Commands::Decrease { product } => commands::cart::decrease(&engine, &product).await?,
        Commands::Delete { product } => commands::cart::delete(&engine, &product).await?,
        Commands::Set {
            product,
            quantity,
            stock,
        } => commands::cart::set(&engine, &product, quantity, stock).await?,
        Commands::Clear => engine.dispatcher().clear().await,
        Commands::Refresh => engine.dispatcher().refresh().await,
        Commands::Login { token } => commands::session::login(&engine, token).await?,
        Commands::Logout => commands::session::logout(&engine).await?,
    };

    commands::render(&engine, cli.json)?;

    match outcome {
        Outcome::Applied => Ok(()),
        Outcome::Rejected(notice) => Err(commands::CliError::Rejected(notice.message)),
    }
}
