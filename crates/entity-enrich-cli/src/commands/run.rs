use std::collections::HashMap;
use std::path::PathBuf;

use clap::Args;
use entity_enrich_core::model::Entity;
use entity_enrich_pipeline::engine;

use crate::output::{print_error, print_info};
use crate::wiring;

/// Enrich a single entity from its website URL.
#[derive(Args)]
pub struct RunArgs {
    /// Website URL of the entity to enrich
    url: String,

    /// Path to a TOML config file (defaults to built-in defaults)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Tracking record id to attach to the run (defaults to the url itself)
    #[arg(long)]
    tracking_id: Option<String>,
}

pub async fn run(args: RunArgs) -> anyhow::Result<i32> {
    let config = wiring::load_config(args.config.as_deref())?;
    let registry = wiring::registry()?;
    let questions = wiring::questions();
    let naics = wiring::naics_reference();
    let collaborators = wiring::build_collaborators();

    let entity = Entity {
        primary_url: args.url.clone(),
        display_name: None,
        address_line: None,
        city: None,
        state: None,
        postal_code: None,
        tracking_record_id: args.tracking_id.unwrap_or_else(|| args.url.clone()),
        sor_id: None,
        seed_hints: HashMap::new(),
    };

    print_info(&format!("enriching {}", args.url));

    match engine::run(&collaborators, entity, &config, &registry, &questions, &naics, &[]).await {
        Ok(result) => {
            println!("{}", entity_enrich_pipeline::phases::report::render_summary(&args.url, &result));
            Ok(0)
        }
        Err(e) => {
            print_error(&format!("enrichment failed: {e}"));
            Ok(1)
        }
    }
}
