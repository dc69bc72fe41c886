use std::str::FromStr;
use std::sync::Arc;

use anyhow::Context;
use chrono::{NaiveDate, Utc};
use rota::batch::BatchDriver;
use rota::config::EngineConfig;
use rota::engine::Engine;
use rota::error::ConfigError;
use rota::store::{Database, LibSqlBackend};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let db_path = std::env::var("ROTA_DB_PATH").unwrap_or_else(|_| "./data/rota.db".to_string());

    let config = EngineConfig::from_env()?;

    let args: Vec<String> = std::env::args().skip(1).collect();
    let daemon = args.iter().any(|a| a == "--daemon");
    let date_arg = args.iter().find(|a| !a.starts_with("--"));

    eprintln!("🗓  Rota v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Database: {}", db_path);
    eprintln!("   Lookback: {} days", config.lookback_days);

    let db_path_ref = std::path::Path::new(&db_path);
    let store: Arc<dyn Database> = Arc::new(
        LibSqlBackend::new_local(db_path_ref)
            .await
            .with_context(|| format!("Failed to open database at {db_path}"))?,
    );

    let driver = BatchDriver::new(Arc::new(Engine::new(store, config)));

    if daemon {
        run_daemon(&driver).await
    } else {
        let date = match date_arg {
            Some(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .with_context(|| format!("Invalid date '{s}', expected YYYY-MM-DD"))?,
            None => Utc::now().date_naive(),
        };
        run_once(&driver, date).await
    }
}

/// One batch sweep; the report goes to stdout as JSON.
async fn run_once(driver: &BatchDriver, date: NaiveDate) -> anyhow::Result<()> {
    let report = driver.run_all(date).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    if report.failures.is_empty() {
        Ok(())
    } else {
        anyhow::bail!("{} domain(s) failed generation", report.failures.len())
    }
}

/// Fire the batch on a cron cadence (default 05:00 UTC daily). The engine
/// itself stays clock-free; this loop just supplies the date.
async fn run_daemon(driver: &BatchDriver) -> anyhow::Result<()> {
    let expr = std::env::var("ROTA_CRON").unwrap_or_else(|_| "0 0 5 * * *".to_string());
    let schedule = cron::Schedule::from_str(&expr).map_err(|e| ConfigError::InvalidValue {
        key: "ROTA_CRON".to_string(),
        message: e.to_string(),
    })?;
    eprintln!("   Schedule: {expr}");

    loop {
        let Some(next) = schedule.upcoming(Utc).next() else {
            anyhow::bail!("Schedule '{expr}' has no upcoming fire time");
        };
        let wait = (next - Utc::now()).to_std().unwrap_or_default();
        tracing::info!(fire_at = %next, "Sleeping until next generation run");
        tokio::time::sleep(wait).await;

        let date = Utc::now().date_naive();
        match driver.run_all(date).await {
            Ok(report) => println!("{}", serde_json::to_string(&report)?),
            Err(e) => tracing::error!("Batch sweep failed: {e}"),
        }
    }
}
