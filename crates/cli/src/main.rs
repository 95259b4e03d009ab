//! `stockledger` operations CLI.
//!
//! Batch entry points for running against a Postgres-backed ledger: schema
//! setup, the weekly storage pass, cost recalculation and billing-period
//! backfills. Configuration comes from `stockledger.toml` and
//! `STOCKLEDGER__*` variables (a `.env` file is loaded first).

use std::sync::Arc;

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing::info;
use uuid::Uuid;

use stockledger_billing::BillingPeriod;
use stockledger_core::{ActorId, MovementId, WarehouseId};
use stockledger_events::TracingAuditSink;
use stockledger_infra::{CostCalculationEngine, LedgerConfig, PgMasterData, PostgresLedgerStore};
use stockledger_observability::LogFormat;

#[derive(Parser)]
#[command(name = "stockledger")]
#[command(about = "Inventory ledger and cost calculation operations")]
#[command(version)]
struct Cli {
    /// Log output format (json or pretty)
    #[arg(long, env = "STOCKLEDGER_LOG_FORMAT", default_value = "json")]
    log_format: LogFormat,

    /// Actor recorded on audit events and derived rows
    #[arg(long, env = "STOCKLEDGER_ACTOR")]
    actor: Option<ActorId>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply the bundled database schema
    Migrate,

    /// Run the weekly storage pass for the ISO week containing a date
    SweepStorage {
        /// Any date in the week to charge (usually its Sunday)
        #[arg(long)]
        week_ending: NaiveDate,

        /// Limit the pass to one warehouse
        #[arg(long)]
        warehouse: Option<WarehouseId>,
    },

    /// Delete and recompute the costs of one movement
    Recalculate {
        #[arg(long)]
        movement: MovementId,
    },

    /// Backfill and summarise the billing period containing a date
    PeriodCosts {
        #[arg(long)]
        warehouse: WarehouseId,

        /// Any date inside the billing period
        #[arg(long)]
        date: NaiveDate,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    stockledger_observability::init_with(cli.log_format);

    let config = LedgerConfig::load().context("loading configuration")?;
    let store = Arc::new(
        PostgresLedgerStore::connect(&config)
            .await
            .context("connecting to database")?,
    );
    let actor = cli.actor.unwrap_or_else(|| ActorId::from_uuid(Uuid::nil()));

    if let Commands::Migrate = cli.command {
        store.migrate().await.context("applying schema")?;
        info!("schema applied");
        return Ok(());
    }

    let master = Arc::new(PgMasterData::new(store.pool().clone()));
    let engine = CostCalculationEngine::from_config(
        Arc::clone(&store),
        master,
        Arc::new(TracingAuditSink),
        &config,
    )?;

    match cli.command {
        Commands::Migrate => {}
        Commands::SweepStorage {
            week_ending,
            warehouse,
        } => {
            let report = engine
                .calculate_weekly_storage_costs(week_ending, actor, warehouse)
                .await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if report.errors > 0 {
                anyhow::bail!("{} balances failed; see log for details", report.errors);
            }
        }
        Commands::Recalculate { movement } => {
            let costs = engine.recalculate_movement_costs(movement, actor).await?;
            println!("{}", serde_json::to_string_pretty(&costs)?);
        }
        Commands::PeriodCosts { warehouse, date } => {
            let period = BillingPeriod::containing(date)?;
            let report = engine.calculate_period_costs(warehouse, period, actor).await?;
            let summary = engine.cost_summary(warehouse, period).await?;
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "report": report,
                    "summary": summary,
                }))?
            );
        }
    }
    Ok(())
}
