//! Restricted-asset order desk - Entry Point
//!
//! Operator CLI for creating, approving, rejecting and cancelling purchase
//! orders, and for listing the current order set.

use anyhow::Result;
use clap::{Parser, Subcommand};
use rwa_core::{format_units, parse_units, Address, AssetId, Order, OrderStatus};
use rwa_settlement::{DeskError, SideEffectOutcome};
use rwa_telemetry::Metrics;
use tracing::{info, warn};

use rwa_desk::{AppConfig, Application};

/// Restricted-asset purchase order desk
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via RWA_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a purchase order as the configured signer
    Create {
        #[arg(long)]
        asset: Address,
        /// Units to buy, in asset units (e.g. "100" or "2.5")
        #[arg(long)]
        quantity: String,
        /// Price per unit in settlement currency (e.g. "10.00")
        #[arg(long)]
        unit_price: String,
    },
    /// Approve a pending order and settle it
    Approve { order: Address },
    /// Reject a pending order
    Reject {
        order: Address,
        #[arg(long)]
        reason: String,
    },
    /// Cancel one of your own pending orders
    Cancel { order: Address },
    /// List orders from a fresh snapshot
    List {
        #[arg(long)]
        status: Option<OrderStatus>,
        #[arg(long)]
        requester: Option<Address>,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Derive a fresh order address without submitting anything
    Address {
        #[arg(long)]
        asset: Address,
        #[arg(long)]
        requester: Address,
    },
    /// Refresh the order store and print Prometheus metrics
    Metrics,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Determine config path: CLI arg > RWA_CONFIG env var > default
    let config = match &args.config {
        Some(path) => AppConfig::from_file(path)?,
        None => AppConfig::load()?,
    };

    rwa_telemetry::init_logging(&config.telemetry.log_level)?;
    info!("Starting rwa-desk v{}", env!("CARGO_PKG_VERSION"));

    let app = Application::new(config)?;
    if let Err(e) = run(&app, args.command).await {
        if let Some(DeskError::SubmissionFailed { logs, .. }) = e.downcast_ref::<DeskError>() {
            for line in logs {
                eprintln!("  {line}");
            }
        }
        return Err(e);
    }
    Ok(())
}

async fn run(app: &Application, command: Command) -> Result<()> {
    let units = &app.config().units;
    let desk = app.desk();

    match command {
        Command::Create {
            asset,
            quantity,
            unit_price,
        } => {
            let signer = app.load_signer()?;
            let quantity = parse_units(&quantity, units.asset_decimals)?;
            let unit_price = parse_units(&unit_price, units.currency_decimals)?;
            let receipt = desk
                .create(&signer, AssetId::new(asset), quantity, unit_price)
                .await?;
            println!("order      {}", receipt.order_address);
            println!(
                "total due  {}",
                format_units(receipt.total_due, units.currency_decimals)
            );
            println!("reference  {}", receipt.reference);
            if receipt.reconciled {
                println!("note       confirmed by reconciliation");
            }
        }

        Command::Approve { order } => {
            let signer = app.load_signer()?;
            let receipt = desk.approve(&signer, order).await?;
            println!("order      {} approved", receipt.order_address);
            println!("settlement {}", receipt.settlement_ref);
            if receipt.created_holding_account {
                println!("note       requester holding account created");
            }
            if let SideEffectOutcome::Completed(reference) = &receipt.side_effect {
                println!("deposit    {reference}");
            }
            for warning in receipt.warnings() {
                warn!(warning = %warning, "Approval completed with warning");
                println!("warning    {warning}");
            }
        }

        Command::Reject { order, reason } => {
            let signer = app.load_signer()?;
            let receipt = desk.reject(&signer, order, &reason).await?;
            println!("order      {} {}", receipt.order_address, receipt.status);
            println!("reference  {}", receipt.reference);
        }

        Command::Cancel { order } => {
            let signer = app.load_signer()?;
            let receipt = desk.cancel(&signer, order).await?;
            println!("order      {} {}", receipt.order_address, receipt.status);
            println!("reference  {}", receipt.reference);
        }

        Command::List {
            status,
            requester,
            json,
        } => {
            desk.store().refresh().await?;
            let snapshot = desk.store().snapshot();
            let orders: Vec<&Order> = snapshot
                .orders()
                .iter()
                .filter(|o| status.map_or(true, |s| o.status == s))
                .filter(|o| requester.map_or(true, |r| o.requester == r))
                .collect();

            if json {
                println!("{}", serde_json::to_string_pretty(&orders)?);
                return Ok(());
            }
            for order in &orders {
                print_order(order, app);
            }
            let counts: Vec<String> = snapshot
                .status_counts()
                .into_iter()
                .map(|(s, n)| format!("{s}={n}"))
                .collect();
            println!("{} shown; {}", orders.len(), counts.join(" "));
        }

        Command::Address { asset, requester } => {
            let (address, created_at) = desk
                .deriver()
                .derive(&AssetId::new(asset), &requester)
                .map_err(DeskError::from)?;
            println!("order      {address}");
            println!("created_at {}", created_at.value());
        }

        Command::Metrics => {
            if let Err(e) = desk.store().refresh().await {
                warn!(error = %e, "Refresh failed before metrics dump");
            }
            print!("{}", Metrics::gather_text()?);
        }
    }
    Ok(())
}

fn print_order(order: &Order, app: &Application) {
    let units = &app.config().units;
    let updated = chrono::DateTime::from_timestamp(order.updated_at, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_default();
    println!(
        "{}  {:<9}  requester {}  qty {}  total {}  updated {}",
        order.address,
        order.status.as_str(),
        order.requester.short(),
        format_units(order.quantity, units.asset_decimals),
        format_units(order.total_due, units.currency_decimals),
        updated,
    );
    if let Some(reason) = &order.reject_reason {
        println!("    reason: {reason}");
    }
}
