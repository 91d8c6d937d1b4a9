//! Biblio circulation maintenance runner
//!
//! Wires the engine to Postgres and exposes the operational entry points:
//!
//!     biblio-circulation recalculate   batched availability recalculation
//!     biblio-circulation audit         print integrity issues
//!     biblio-circulation autofix       repair the reparable issues
//!     biblio-circulation maintain      periodic maintenance daemon

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use biblio_circulation::{
    config::AppConfig,
    repository::Repository,
    services::Services,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    let config = AppConfig::load()?;

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("biblio_circulation={}", config.logging.level).into());

    if config.logging.format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    tracing::info!("Starting biblio-circulation v{}", env!("CARGO_PKG_VERSION"));

    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .connect(&config.database.url)
        .await?;

    tracing::info!("Connected to database");

    sqlx::migrate!("./migrations").run(&pool).await?;

    let repository = Repository::new(pool);
    let services = Services::new(repository, &config);

    let command = std::env::args().nth(1).unwrap_or_else(|| "maintain".to_string());
    match command.as_str() {
        "recalculate" => {
            let report = services
                .recalculator
                .recalculate_all_batched(
                    config.maintenance.chunk_size,
                    Some(&mut |processed, total| {
                        tracing::info!(processed, total, "recalculation progress");
                    }),
                )
                .await?;
            tracing::info!(
                updated = report.updated,
                total = report.total,
                errors = report.errors.len(),
                "recalculation finished"
            );
            for error in &report.errors {
                tracing::warn!(%error, "recalculation error");
            }
        }
        "audit" => {
            let issues = services.auditor.verify().await?;
            if issues.is_empty() {
                tracing::info!("no integrity issues found");
            }
            for issue in &issues {
                tracing::warn!(kind = ?issue.kind, severity = ?issue.severity, "{}", issue.message);
            }
            // Machine-readable report on stdout, logs on stderr.
            println!("{}", serde_json::to_string_pretty(&issues)?);
        }
        "autofix" => {
            let report = services.auditor.autofix().await?;
            tracing::info!(fixed = report.fixed, errors = report.errors.len(), "autofix finished");
            for error in &report.errors {
                tracing::warn!(%error, "autofix error");
            }
        }
        "maintain" => {
            tracing::info!(
                tick_seconds = config.maintenance.tick_seconds,
                cooldown_minutes = config.maintenance.cooldown_minutes,
                "maintenance daemon started"
            );
            let mut ticker = tokio::time::interval(Duration::from_secs(config.maintenance.tick_seconds));
            loop {
                ticker.tick().await;
                match services.maintenance.run_if_needed().await {
                    Ok(Some(report)) => {
                        for error in &report.errors {
                            tracing::warn!(%error, "maintenance task error");
                        }
                    }
                    Ok(None) => {}
                    Err(e) => tracing::error!(error = %e, "maintenance run failed"),
                }
            }
        }
        other => anyhow::bail!("unknown command: {}", other),
    }

    Ok(())
}
