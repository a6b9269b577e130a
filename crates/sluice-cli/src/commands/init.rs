use crate::logger;
use crate::GlobalOpts;
use colored::*;
use std::fs;
use std::io::{self, Write};
use std::path::Path;

const DEFAULT_FILENAME: &str = "chain.yaml";

const CHAIN_TEMPLATE: &str = r#"# Sluice Chain Configuration
# This file defines filter chains for processing reading batches

# Variables for substitution (use ${var} or $(var) syntax)
variables:
  factor: "2.0"
  site: "plant-a"

# Named chains - each is an ordered list of filter stages
chains:
  # Simple chain with a single stage
  simple:
    - scale-stage

  # Readings flow through every stage in order; each stage may drop,
  # modify, or hold back readings before emitting downstream
  process:
    - scale-stage
    - label-stage

# Stage configuration blocks
# Each block is flattened to string items and handed to the plugin;
# the `plugin` item names the Python module to load
config:
  scale-stage:
    plugin: scale
    factor: ${factor}

  label-stage:
    plugin: metadata
    source: ${site}
"#;

/// Initialize a new chain file
pub fn handle_init(filename: Option<String>, _opts: GlobalOpts) {
    logger::debug("Handling init command");

    let target_filename = filename.unwrap_or_else(|| DEFAULT_FILENAME.to_string());
    let target_path = Path::new(&target_filename);

    logger::debug(&format!("Target file: {}", target_filename));

    if target_path.exists() {
        // Check for skip confirmation flag
        let should_skip = std::env::var("SLUICE_INIT_YES").is_ok();

        if !should_skip {
            print!(
                "{} File '{}' already exists. Overwrite? {} ",
                "?".bold().cyan(),
                target_filename,
                "[y/n] ›".dimmed()
            );
            let _ = io::stdout().flush();

            let mut response = String::new();
            if io::stdin().read_line(&mut response).is_ok() {
                let response = response.trim().to_lowercase();
                if response != "y" && response != "yes" {
                    logger::info("Operation cancelled by user");
                    println!("Operation cancelled.");
                    return;
                }
            } else {
                logger::error("Failed to read input");
                return;
            }
        } else {
            logger::debug("Skipping confirmation (SLUICE_INIT_YES set)");
        }
    }

    match fs::write(&target_filename, CHAIN_TEMPLATE) {
        Ok(_) => {
            logger::success(&format!("Created chain file: {}", target_filename));
            println!();
            println!("{}  Chain file created successfully!", "✔".green());
            println!();
            println!("Next steps:");
            println!(
                "  1. Edit {} with your chain configuration",
                target_filename.bold()
            );
            println!(
                "  2. Drop plugin modules into the plugin directory (see --plugin-dir)"
            );
            println!(
                "  3. List available chains: sluice run {} --list",
                target_filename
            );
            println!(
                "  4. Run a chain: sluice run {} <chain-name> --input readings.json",
                target_filename
            );
            println!(
                "  5. Preview a chain: sluice run {} <chain-name> --dry-run",
                target_filename
            );
        }
        Err(e) => {
            logger::error(&format!("Failed to create chain file: {}", e));
        }
    }
}
