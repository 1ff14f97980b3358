mod api_client;
mod audit;
mod backfill;
mod chunker;
mod config;
mod credentials;
mod data;
mod error;
mod loader;
mod pipeline;
mod registry;
mod reporting_client;
mod retry;
mod router;
mod transform;

#[cfg(test)]
mod test_support;

use api_client::HttpReportingApi;
use backfill::BackfillDriver;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use config::Config;
use credentials::Credentials;
use data::Catalog;
use error::Error;
use loader::{DryRunLoader, ParquetWarehouseLoader, WarehouseLoader};
use log::{error, info};
use pipeline::Orchestrator;
use registry::{Registry, ALL_REPORTS};
use reporting_client::ReportingClient;
use router::{LiveRouter, TriggerRequest};
use std::sync::Arc;

#[derive(Parser)]
struct Args {
    #[command(flatten)]
    config: Config,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Runs one report over its default range, e.g. '{"report_type": "GEO_MONTHLY"}'.
    Trigger { payload: String },

    /// Reloads a historical range one calendar month at a time.
    Backfill {
        #[arg(long, help = "Date should be in the form YYYY-MM-DD", value_parser = validate_date)]
        start: NaiveDate,

        #[arg(long, help = "Date should be in the form YYYY-MM-DD", value_parser = validate_date)]
        end: NaiveDate,

        /// Report types or aliases; `all` selects every registered report.
        #[arg(long, num_args = 1.., value_delimiter = ',', default_value = ALL_REPORTS)]
        reports: Vec<String>,

        /// Fetch and transform, but write nothing to the warehouse.
        #[arg(long)]
        dry_run: bool,
    },

    /// Prints row counts, partition range and duplicate keys per table as JSON.
    Audit {
        /// Report types, aliases or table names; every table when empty.
        tables: Vec<String>,
    },
}

fn validate_date(s: &str) -> Result<NaiveDate, String> {
    let error_message = "Invalid date, expected YYYY-MM-DD";

    let parts = s
        .split('-')
        .map(|part| part.parse::<u32>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| error_message)?;

    match parts.as_slice() {
        &[year, month, day] if (1..=9999).contains(&year) => {
            NaiveDate::from_ymd_opt(year as i32, month, day).ok_or(error_message.to_string())
        }
        _ => Err(error_message.to_string()),
    }
}

fn load_registry(config: &Config) -> Result<Arc<Registry>, Error> {
    let registry = match &config.reports_file {
        Some(path) => Registry::from_json_file(path)?,
        None => Registry::builtin()?,
    };
    info!("Registered {} report type(s)", registry.list_all().len());
    Ok(Arc::new(registry))
}

fn build_orchestrator(
    config: &Config,
    registry: Arc<Registry>,
    dry_run: bool,
) -> Result<Orchestrator, Error> {
    let credentials = Credentials::resolve(config)?;
    let api = Arc::new(HttpReportingApi::new(
        &config.api_url,
        &credentials,
        config.request_timeout(),
    )?);
    let client = ReportingClient::new(api, config.retry_policy(), config.poll_settings());

    let catalog = Catalog::for_registry(&registry);
    let loader: Arc<dyn WarehouseLoader> = if dry_run {
        Arc::new(DryRunLoader::new(catalog))
    } else {
        Arc::new(ParquetWarehouseLoader::new(&config.warehouse_dir, catalog))
    };

    Ok(Orchestrator::new(registry, client, loader))
}

/// Runs the selected command. `Ok(false)` means it ran but did not succeed.
async fn run(args: Args) -> Result<bool, Error> {
    let config = args.config;
    let registry = load_registry(&config)?;

    match args.command {
        Command::Trigger { payload } => {
            let request = TriggerRequest::from_json(&payload)?;
            let router = LiveRouter::new(
                build_orchestrator(&config, registry, false)?,
                config.utc_offset,
            );
            let result = router.handle(&request).await?;
            Ok(!result.is_failure())
        }
        Command::Backfill {
            start,
            end,
            reports,
            dry_run,
        } => {
            let driver = BackfillDriver::new(build_orchestrator(&config, registry, dry_run)?);
            let results = driver.run(&reports, start, end).await?;
            let failures = results.iter().filter(|r| r.is_failure()).count();
            info!(
                "Backfill finished: {} chunk(s) run, {} failed",
                results.len(),
                failures
            );
            Ok(failures == 0)
        }
        Command::Audit { tables } => {
            let definitions = audit::select_definitions(&registry, &tables)?;
            let catalog = Catalog::for_registry(&registry);
            let audits = audit::audit(&config.warehouse_dir, &catalog, &definitions).await?;
            println!("{}", serde_json::to_string_pretty(&audits)?);
            Ok(true)
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();

    env_logger::init();

    match run(args).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(err) => {
            error!("{}", err);
            std::process::exit(1);
        }
    };

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::date;

    #[test]
    fn test_validate_date() {
        assert_eq!(validate_date("2024-02-29").unwrap(), date("2024-02-29"));
        assert!(validate_date("2023-02-29").is_err());
        assert!(validate_date("2024-13-01").is_err());
        assert!(validate_date("2024/01/01").is_err());
        assert!(validate_date("2024-01").is_err());
    }

    #[test]
    fn test_backfill_arguments() {
        let args = Args::try_parse_from([
            "ad-report-pipeline",
            "backfill",
            "--start",
            "2024-01-15",
            "--end",
            "2024-03-10",
            "--reports",
            "inventory,geo",
            "--dry-run",
        ])
        .unwrap();

        match args.command {
            Command::Backfill {
                start,
                end,
                reports,
                dry_run,
            } => {
                assert_eq!(start, date("2024-01-15"));
                assert_eq!(end, date("2024-03-10"));
                assert_eq!(reports, vec!["inventory", "geo"]);
                assert!(dry_run);
            }
            _ => panic!("Expected backfill command"),
        }
    }

    #[test]
    fn test_backfill_defaults_to_all_reports() {
        let args = Args::try_parse_from([
            "ad-report-pipeline",
            "backfill",
            "--start",
            "2024-01-01",
            "--end",
            "2024-01-31",
        ])
        .unwrap();

        match args.command {
            Command::Backfill {
                reports, dry_run, ..
            } => {
                assert_eq!(reports, vec![ALL_REPORTS]);
                assert!(!dry_run);
            }
            _ => panic!("Expected backfill command"),
        }
    }

    #[test]
    fn test_trigger_without_credentials_fails() {
        let mut config = crate::config::tests::test_config("./warehouse");
        config.network_code = None;
        config.api_token = None;
        config.credentials_file = None;

        let result = build_orchestrator(&config, Arc::new(Registry::builtin().unwrap()), false);
        assert!(matches!(result.err(), Some(Error::CredentialError { .. })));
    }
}
