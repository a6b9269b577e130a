use crate::chain_config::ChainConfig;
use crate::errors::ChainError;
use crate::logger;
use crate::GlobalOpts;
use clap::Parser;
use colored::Colorize;
use sluice_bridge::Bridge;
use sluice_pipeline::{
    AssetTracker, MemoryTracker, OutputStream, OutputToken, PluginHandle, ReadingSet,
};
use std::collections::VecDeque;
use std::io::{self, Read};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug)]
pub enum RunError {
    Chain(ChainError),
    InvalidArgs(String),
    StageInit(String),
}

impl std::fmt::Display for RunError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunError::Chain(e) => write!(f, "Chain error: {}", e),
            RunError::InvalidArgs(msg) => write!(f, "Invalid arguments: {}", msg),
            RunError::StageInit(stage) => {
                write!(f, "Stage '{}' failed to initialize (see log for details)", stage)
            }
        }
    }
}

impl std::error::Error for RunError {}

impl From<ChainError> for RunError {
    fn from(e: ChainError) -> Self {
        RunError::Chain(e)
    }
}

#[derive(Parser, Debug)]
pub struct RunCommand {
    #[arg(value_name = "YAML_PATH")]
    pub yaml_path: Option<String>,
    #[arg(value_name = "NAME")]
    pub chain_name: Option<String>,
    #[arg(long)]
    pub list: bool,
    #[arg(long)]
    pub print: bool,
    #[arg(long)]
    pub dry_run: bool,
    #[arg(short = 'i', long, value_name = "FILE")]
    pub input: Option<String>,
    #[arg(short = 'o', long, value_name = "FILE")]
    pub output: Option<String>,
    #[arg(long, value_name = "N")]
    pub batch_size: Option<usize>,
}

pub fn handle_run(cmd: RunCommand, opts: GlobalOpts) -> Result<(), RunError> {
    let yaml_path = cmd.yaml_path.unwrap_or_else(|| "chain.yaml".to_string());
    let config = ChainConfig::load(&yaml_path)?;

    if cmd.list {
        list_chains(&config);
        return Ok(());
    }

    // A file with a single chain doesn't need the name spelled out
    let Some(name) = cmd.chain_name.or_else(|| config.only_chain()) else {
        return Err(RunError::InvalidArgs(
            "Chain name required (the file defines more than one)".to_string(),
        ));
    };

    if cmd.print {
        print_chain_config(&config, &name)?;
    } else if cmd.dry_run {
        show_chain_flow(&config, &name)?;
    } else {
        run_chain(
            &config,
            &name,
            cmd.input.as_deref(),
            cmd.output.as_deref(),
            cmd.batch_size,
            &opts,
        )?;
    }

    Ok(())
}

fn list_chains(config: &ChainConfig) {
    let chains = config.list_chains();

    if chains.is_empty() {
        logger::warn("No chains found in YAML file");
        return;
    }

    logger::step("Available Chains:");
    for name in chains {
        if let Some(stages) = config.get_chain(&name) {
            println!("  {} ({} stages)", name, stages.len());
            for stage in stages {
                println!("    - {}", stage);
            }
        }
    }
}

fn print_chain_config(config: &ChainConfig, chain_name: &str) -> Result<(), RunError> {
    let output = config.print_chain_config(chain_name)?;
    println!("{}", output);
    Ok(())
}

fn show_chain_flow(config: &ChainConfig, chain_name: &str) -> Result<(), RunError> {
    let chain = config
        .get_chain(chain_name)
        .ok_or_else(|| ChainError::ChainNotFound(chain_name.to_string()))?;

    logger::success(&format!("Chain: {}", chain_name));
    println!("\nChain flow (--dry-run):");

    for (index, stage) in chain.iter().enumerate() {
        // Resolving the category validates the stage block without
        // touching the interpreter
        let category = config.stage_category(stage)?;
        let plugin = category.plugin_name().unwrap_or("?").to_string();

        let input_marker = if index > 0 { "← previous stage" } else { "← input" };
        let output_marker = if index + 1 == chain.len() { "→ output" } else { "" };

        print!("  {} [{}]", stage, plugin);
        print!("  {}", input_marker.dimmed());
        if !output_marker.is_empty() {
            print!("  {}", output_marker.dimmed());
        }
        println!();
    }

    println!(
        "\n{}  No actual execution. Use without --dry-run to run the chain.",
        "✔".green()
    );

    Ok(())
}

#[derive(Debug, Default)]
struct ChainStats {
    batches_in: usize,
    readings_in: usize,
    batches_out: usize,
    readings_out: usize,
}

/// Queues of emitted batches, one per stage, filled by the shared
/// output stream and drained between deliveries.
type StageQueues = Arc<Mutex<Vec<VecDeque<ReadingSet>>>>;

fn run_chain(
    config: &ChainConfig,
    chain_name: &str,
    input: Option<&str>,
    output_file: Option<&str>,
    batch_size: Option<usize>,
    opts: &GlobalOpts,
) -> Result<(), RunError> {
    let chain = config
        .get_chain(chain_name)
        .ok_or_else(|| ChainError::ChainNotFound(chain_name.to_string()))?;

    if chain.is_empty() {
        return Err(RunError::InvalidArgs(format!(
            "Chain '{}' has no stages",
            chain_name
        )));
    }

    // Resolve every stage block upfront before touching the interpreter
    let mut categories = Vec::new();
    for stage in chain {
        categories.push(config.stage_category(stage)?);
    }

    let input_batch = read_input(input)?;

    let chain_start = Instant::now();
    eprintln!("{}", format!("Running: {}", chain_name).cyan().bold());

    // Show log file location to user
    if let Some(log_path) = logger::get_log_path() {
        eprintln!("{}", format!("  Log file: {}", log_path.display()).dimmed());
    }

    let tracker = Arc::new(MemoryTracker::new());
    let bridge =
        Bridge::new(opts.search_paths()).with_tracker(Arc::clone(&tracker) as Arc<dyn AssetTracker>);

    let stage_count = categories.len();
    let queues: StageQueues = Arc::new(Mutex::new((0..stage_count).map(|_| VecDeque::new()).collect()));

    // One stream shared by every stage; the token names the emitting
    // stage so its batches land in the matching queue
    let sink = Arc::clone(&queues);
    let stream: OutputStream = Arc::new(move |token, batch| {
        let index = (token.as_raw() as usize).saturating_sub(1);
        if let Ok(mut slots) = sink.lock() {
            if let Some(slot) = slots.get_mut(index) {
                slot.push_back(batch);
            }
        }
    });

    let mut handles: Vec<PluginHandle> = Vec::new();
    for (index, category) in categories.iter().enumerate() {
        let stage_start = Instant::now();
        let token = OutputToken::new(index as u64 + 1);
        let Some(handle) = bridge.init(category, token, Arc::clone(&stream)) else {
            // Unwind the stages that did come up
            for started in handles {
                bridge.shutdown(started);
            }
            return Err(RunError::StageInit(category.name().to_string()));
        };
        logger::debug(&format!(
            "  {} [{}/{}] initialized ({})",
            category.name(),
            index + 1,
            stage_count,
            format_duration(stage_start.elapsed())
        ));
        handles.push(handle);
    }

    let mut stats = ChainStats::default();
    let mut survivors: Vec<ReadingSet> = Vec::new();

    for batch in split_batches(input_batch, batch_size) {
        stats.batches_in += 1;
        stats.readings_in += batch.len();
        bridge.ingest(handles[0], batch);
        drain(&bridge, &handles, &queues, 0, &mut survivors, &mut stats);
    }

    // Plugins may hold readings back; shutting down stage by stage lets
    // late flushes still traverse the rest of the chain
    for (index, handle) in handles.iter().enumerate() {
        bridge.shutdown(*handle);
        drain(&bridge, &handles, &queues, index, &mut survivors, &mut stats);
    }

    eprintln!(
        "{}",
        format!("Finished in: {}", format_duration(chain_start.elapsed()))
            .green()
            .bold()
    );

    logger::success(&format!(
        "Chain complete: {} batches in ({} readings), {} batches out ({} readings)",
        stats.batches_in, stats.readings_in, stats.batches_out, stats.readings_out
    ));
    logger::debug(&format!("{} plugin deliveries tracked", tracker.count()));

    let mut merged = ReadingSet::default();
    for batch in survivors {
        for reading in batch {
            merged.push(reading);
        }
    }
    write_output(&merged, output_file, opts)?;

    Ok(())
}

/// Move emitted batches down the chain until every queue is empty.
///
/// Batches from the last stage are the chain's output; batches from any
/// earlier stage are delivered to the next one, which may emit more.
fn drain(
    bridge: &Bridge,
    handles: &[PluginHandle],
    queues: &StageQueues,
    from_stage: usize,
    survivors: &mut Vec<ReadingSet>,
    stats: &mut ChainStats,
) {
    for index in from_stage..handles.len() {
        loop {
            // Pop outside of delivery so the stream callback can take
            // the queue lock again
            let next = queues
                .lock()
                .ok()
                .and_then(|mut slots| slots.get_mut(index).and_then(VecDeque::pop_front));
            let Some(batch) = next else {
                break;
            };

            if index + 1 < handles.len() {
                bridge.ingest(handles[index + 1], batch);
            } else {
                stats.batches_out += 1;
                stats.readings_out += batch.len();
                survivors.push(batch);
            }
        }
    }
}

fn split_batches(input: ReadingSet, batch_size: Option<usize>) -> Vec<ReadingSet> {
    if input.is_empty() {
        return Vec::new();
    }
    match batch_size {
        Some(size) if size > 0 => {
            let readings = input.into_readings();
            readings
                .chunks(size)
                .map(|chunk| ReadingSet::new(chunk.to_vec()))
                .collect()
        }
        _ => vec![input],
    }
}

fn read_input(path: Option<&str>) -> Result<ReadingSet, ChainError> {
    let text = match path {
        Some(path) => std::fs::read_to_string(path)?,
        None => {
            let mut buffer = String::new();
            io::stdin().read_to_string(&mut buffer)?;
            buffer
        }
    };

    // An empty feed is a valid run; plugins may still flush on shutdown
    if text.trim().is_empty() {
        return Ok(ReadingSet::default());
    }

    Ok(ReadingSet::from_json(&text)?)
}

fn write_output(
    survivors: &ReadingSet,
    output_file: Option<&str>,
    opts: &GlobalOpts,
) -> Result<(), RunError> {
    let text = survivors.to_json().map_err(ChainError::from)?;

    if let Some(output_path) = output_file {
        logger::step(&format!("Writing output to: {}", output_path));
        std::fs::write(output_path, text.as_bytes()).map_err(ChainError::from)?;
        logger::success(&format!("Output saved to: {}", output_path));
    } else if opts.no_stdout {
        logger::debug("Chain output suppressed");
    } else {
        println!("{}", text);
    }

    Ok(())
}

fn format_duration(duration: Duration) -> String {
    let total_ms = duration.as_millis();
    if total_ms < 1000 {
        format!("{}ms", total_ms)
    } else {
        format!("{:.2}s", duration.as_secs_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_pipeline::Reading;

    fn batch_of(count: usize) -> ReadingSet {
        let readings = (0..count)
            .map(|i| Reading::new(format!("asset-{}", i)).with_datapoint("value", i as i64))
            .collect();
        ReadingSet::new(readings)
    }

    #[test]
    fn test_split_batches_chunks_by_size() {
        let batches = split_batches(batch_of(5), Some(2));
        let sizes: Vec<usize> = batches.iter().map(ReadingSet::len).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
    }

    #[test]
    fn test_split_batches_passes_through_without_size() {
        let batches = split_batches(batch_of(3), None);
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 3);
    }

    #[test]
    fn test_split_batches_drops_empty_input() {
        assert!(split_batches(ReadingSet::default(), Some(2)).is_empty());
        assert!(split_batches(ReadingSet::default(), None).is_empty());
    }

    #[test]
    fn test_run_error_display() {
        let err = RunError::StageInit("scale-stage".to_string());
        assert_eq!(
            err.to_string(),
            "Stage 'scale-stage' failed to initialize (see log for details)"
        );

        let err = RunError::Chain(ChainError::ChainNotFound("demo".to_string()));
        assert_eq!(err.to_string(), "Chain error: Chain 'demo' not found in YAML");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.50s");
    }
}
