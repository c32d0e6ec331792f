//! flowspike-sim - synthetic flow data, terminal replay and policy scoring
//!
//! Usage:
//!   flowspike-sim generate --output flows.csv --truth truth.json
//!   flowspike-sim replay --input flows.csv --entities 0,1,2,3
//!   flowspike-sim evaluate --input flows.csv --truth truth.json

use clap::{Parser, Subcommand};
use std::error::Error;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

use flowspike_core::{
    EntityId, Pipeline, PipelineConfig, Playback, RevealCursor, TaggingPolicy, loader,
};
use flowspike_sim::{DetectionReport, GroundTruth, SimConfig, evaluate, simulate};

#[derive(Parser)]
#[command(name = "flowspike-sim")]
#[command(about = "Synthetic flow data with injected spikes, replay and scoring")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a flow CSV and its ground truth
    Generate {
        #[arg(short, long, default_value = "flows.csv")]
        output: PathBuf,

        /// Where to write injected spikes as JSON
        #[arg(short, long)]
        truth: Option<PathBuf>,

        #[arg(long, default_value = "10")]
        entities: u32,

        #[arg(long, default_value = "90")]
        days: u32,

        #[arg(long, default_value = "42")]
        seed: u64,

        #[arg(long, default_value = "0.03")]
        spike_rate: f64,

        #[arg(long, default_value = "0.05")]
        gap_rate: f64,
    },

    /// Replay a data set tick by tick, printing newly revealed points
    Replay {
        #[arg(short, long)]
        input: PathBuf,

        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Comma-separated entity ids (defaults to the configured selection)
        #[arg(short, long)]
        entities: Option<String>,

        /// Delay between ticks; 0 replays as fast as possible
        #[arg(long, default_value = "0")]
        tick_ms: u64,
    },

    /// Score tagging policies against ground truth
    Evaluate {
        #[arg(short, long)]
        input: PathBuf,

        #[arg(short, long)]
        truth: PathBuf,

        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Emit reports as JSON instead of a table
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Generate {
            output,
            truth,
            entities,
            days,
            seed,
            spike_rate,
            gap_rate,
        } => {
            let config = SimConfig {
                entities,
                days,
                seed,
                spike_probability: spike_rate,
                gap_probability: gap_rate,
                ..Default::default()
            };
            run_generate(config, &output, truth.as_deref())
        }
        Commands::Replay {
            input,
            config,
            entities,
            tick_ms,
        } => run_replay(&input, config.as_deref(), entities.as_deref(), tick_ms),
        Commands::Evaluate {
            input,
            truth,
            config,
            json,
        } => run_evaluate(&input, &truth, config.as_deref(), json),
    }
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig, Box<dyn Error>> {
    Ok(match path {
        Some(path) => PipelineConfig::from_toml_file(path)?,
        None => PipelineConfig::default(),
    })
}

fn parse_entities(raw: &str) -> Result<Vec<EntityId>, Box<dyn Error>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<EntityId>()
                .map_err(|_| Box::<dyn Error>::from(format!("Bad entity id: {}", s)))
        })
        .collect()
}

fn run_generate(config: SimConfig, output: &Path, truth: Option<&Path>) -> Result<(), Box<dyn Error>> {
    let sim = simulate(config)?;
    loader::save_csv(output, &sim.records)?;
    info!(path = %output.display(), records = sim.records.len(), "Flow records written");

    if let Some(path) = truth {
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, &sim.truth)?;
        info!(path = %path.display(), spikes = sim.truth.len(), "Ground truth written");
    }
    Ok(())
}

fn run_replay(
    input: &Path,
    config: Option<&Path>,
    entities: Option<&str>,
    tick_ms: u64,
) -> Result<(), Box<dyn Error>> {
    let config = load_config(config)?;
    let step = config.step;
    let pipeline = Pipeline::from_csv(input, config)?;

    let ids = match entities {
        Some(raw) => parse_entities(raw)?,
        None => pipeline.config().initial_selection(&pipeline.list_entities()),
    };

    let mut playback = Playback::for_series_len(step, pipeline.series().max_len());
    let mut shown = RevealCursor(0);
    info!(entities = ?ids, max_ticks = playback.max_ticks(), "Replaying");

    while playback.advance() {
        let cursor = playback.cursor();
        println!("-- tick {}/{} (cursor {})", playback.ticks(), playback.max_ticks(), cursor.steps());

        for view in pipeline.visible(&ids, cursor) {
            match view.result {
                Ok(points) => {
                    let from = shown.clamp_to(points.len());
                    for p in &points[from..] {
                        let marker = if p.anomalous { " [SPIKE]" } else { "" };
                        println!("  {:>4} {} {:>12.0}{}", view.entity_id, p.date, p.flow_count, marker);
                    }
                }
                Err(e) => println!("  {}", e),
            }
        }

        shown = cursor;
        if tick_ms > 0 {
            std::thread::sleep(Duration::from_millis(tick_ms));
        }
    }

    info!("Replay complete");
    Ok(())
}

fn run_evaluate(
    input: &Path,
    truth: &Path,
    config: Option<&Path>,
    json: bool,
) -> Result<(), Box<dyn Error>> {
    let config = load_config(config)?;
    let configured = config.policy;
    let pipeline = Pipeline::from_csv(input, config)?;

    let truth: Vec<GroundTruth> = serde_json::from_reader(BufReader::new(File::open(truth)?))?;

    let mut policies = vec![
        configured,
        TaggingPolicy::lenient(),
        TaggingPolicy::strict(),
        TaggingPolicy::trailing(),
        TaggingPolicy::lenient().per_slice(),
    ];
    policies.dedup();

    let reports: Vec<DetectionReport> = policies
        .iter()
        .map(|policy| evaluate(&pipeline, &truth, policy))
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
        return Ok(());
    }

    println!(
        "{:<10} {:<10} {:>6} {:>6} {:>6} {:>9} {:>9} {:>9}",
        "strictness", "unit", "tp", "fp", "fn", "precision", "recall", "f1"
    );
    for r in &reports {
        println!(
            "{:<10} {:<10} {:>6} {:>6} {:>6} {:>9.3} {:>9.3} {:>9.3}",
            format!("{:?}", r.policy.strictness),
            format!("{:?}", r.policy.granularity),
            r.true_positives,
            r.false_positives,
            r.false_negatives,
            r.precision,
            r.recall,
            r.f1
        );
    }
    Ok(())
}
