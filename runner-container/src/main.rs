use anyhow::{Context, Result, bail};
use std::io::{BufRead, BufReader};
use tracing::{error, info};

use bulk_load_core::errors::LoadError;
use bulk_load_core::telemetry::{init_tracing, report_summary};
use bulk_load_core::{Batch, Loader, load_config};

/// Path of a YAML config file. When unset the YAML is read from `LOADER_CONFIG`.
const CONFIG_PATH_ENV_VAR: &str = "LOADER_CONFIG_PATH";

/// Entry point for a one-shot bulk load in a container.
///
/// Usage: `runner-container <destination> [rows.ndjson]`
///
///     Load config.
///     Read newline-delimited JSON rows from the file, or stdin when omitted.
///     Save them into the destination and print the summary as JSON.
#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let mut args = std::env::args().skip(1);
    let Some(destination) = args.next() else {
        bail!("usage: runner-container <destination> [rows.ndjson]");
    };
    let input = args.next();

    let config_path = std::env::var(CONFIG_PATH_ENV_VAR).ok();
    let config = load_config(config_path.as_deref()).context("Failed to load loader config")?;
    let loader = Loader::from_config(config)?;

    let rows = match &input {
        Some(path) => {
            let file = std::fs::File::open(path).with_context(|| format!("Cannot open {path}"))?;
            read_rows(BufReader::new(file))?
        }
        None => read_rows(std::io::stdin().lock())?,
    };
    let batch = Batch::from_json_rows(rows, &destination)?;
    info!(destination = %destination, records = batch.len(), "Rows read");

    let result = loader.save(&batch, &destination).await;
    loader.close();

    match result {
        Ok(summary) => {
            report_summary(&summary);
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
        Err(LoadError::Interrupted {
            completed, cause, ..
        }) => {
            report_summary(&completed);
            println!("{}", serde_json::to_string_pretty(&completed)?);
            error!(destination = %destination, error = %cause, "Load interrupted");
            Err(anyhow::Error::new(*cause).context("Load interrupted"))
        }
        Err(e) => Err(e.into()),
    }
}

fn read_rows(reader: impl BufRead) -> Result<Vec<serde_json::Value>> {
    let mut rows = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let row = serde_json::from_str(&line)
            .with_context(|| format!("Line {} is not valid JSON", i + 1))?;
        rows.push(row);
    }
    Ok(rows)
}
