use std::collections::HashMap;
use std::path::PathBuf;

use clap::Args;
use entity_enrich_core::model::Entity;
use entity_enrich_pipeline::engine;
use serde::Deserialize;

use crate::output::{print_error, print_info, print_success};
use crate::wiring;

/// Enrich every entity in a CSV file, deferring system-of-record writes
/// until the whole batch has been scored and gated.
#[derive(Args)]
pub struct BatchArgs {
    /// CSV file with a `url` column and an optional `tracking_id` column
    csv_path: PathBuf,

    /// Path to a TOML config file (defaults to built-in defaults)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Estimated dollar cost per entity, recorded on the tracking record
    #[arg(long, default_value_t = 0.0)]
    cost_per_entity: f64,
}

#[derive(Debug, Deserialize)]
struct BatchRow {
    url: String,
    tracking_id: Option<String>,
}

pub async fn run(args: BatchArgs) -> anyhow::Result<i32> {
    let config = wiring::load_config(args.config.as_deref())?;
    let registry = wiring::registry()?;
    let questions = wiring::questions();
    let naics = wiring::naics_reference();
    let collaborators = wiring::build_collaborators();

    let mut reader = csv::Reader::from_path(&args.csv_path)
        .map_err(|e| anyhow::anyhow!("configuration error: reading {}: {e}", args.csv_path.display()))?;

    let mut entities = Vec::new();
    for row in reader.deserialize::<BatchRow>() {
        let row = row.map_err(|e| anyhow::anyhow!("configuration error: malformed CSV row: {e}"))?;
        entities.push(Entity {
            primary_url: row.url.clone(),
            display_name: None,
            address_line: None,
            city: None,
            state: None,
            postal_code: None,
            tracking_record_id: row.tracking_id.unwrap_or(row.url),
            sor_id: None,
            seed_hints: HashMap::new(),
        });
    }

    if entities.is_empty() {
        print_error("batch CSV contained no rows");
        return Ok(2);
    }

    print_info(&format!("preparing {} entities", entities.len()));

    let mut prepared = Vec::with_capacity(entities.len());
    let mut had_fatal_error = false;
    for entity in entities {
        let url = entity.primary_url.clone();
        match engine::run_deferred(&collaborators, entity, &config, &registry, &questions, &naics, &[]).await {
            Ok(result) => prepared.push(result),
            Err(e) => {
                had_fatal_error = true;
                print_error(&format!("{url}: {e}"));
            }
        }
    }

    print_info(&format!("flushing writes for {} prepared entities", prepared.len()));
    let finalized = engine::finalize_batch(&collaborators, prepared, args.cost_per_entity).await?;

    let passed = finalized.iter().filter(|r| r.gate_decision.as_ref().is_some_and(|d| d.passed)).count();
    print_success(&format!("{passed}/{} entities passed the quality gate", finalized.len()));

    Ok(if had_fatal_error { 1 } else { 0 })
}
