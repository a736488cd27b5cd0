//! Battery CLI - Command-line interface for Cogbattery
//!
//! Commands:
//! - simulate: Run full sessions with a simulated child and emit report documents
//! - analyze: Score a recorded trial batch for one game
//! - score: Score one recorded game outcome
//! - spectrum: Spectral analysis of an RT series
//! - plan: Print the intervention plan for a domain
//! - config: Print or validate a battery configuration

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{info, Level};

use cogbattery::games::{BatteryConfig, GameOutcome};
use cogbattery::metrics::sampling_cycle_ms;
use cogbattery::prescription::{generate_plan_for_label, RETEST_DAYS};
use cogbattery::progress::{ProgressReport, ProgressTracker};
use cogbattery::report::{ReportDocument, ReportEncoder};
use cogbattery::scoring::score_trials;
use cogbattery::signal::analyze_rt;
use cogbattery::simulation::{run_simulated_session, ChildPreset, SimulatedChild};
use cogbattery::store::InMemoryStore;
use cogbattery::types::{Child, GameId, Trial};
use cogbattery::{AssessmentError, SessionOrchestrator, ENGINE_VERSION};

/// Battery - five-game cognitive assessment engine
#[derive(Parser)]
#[command(name = "battery")]
#[command(version = ENGINE_VERSION)]
#[command(about = "Run, score and report the five-game cognitive battery", long_about = None)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run full sessions with a simulated child
    Simulate {
        /// School grade of the simulated child
        #[arg(long, default_value = "4")]
        grade: u8,

        /// Base seed for stimulus schedules and the child model
        #[arg(long, default_value = "1")]
        seed: u64,

        /// Behaviour preset
        #[arg(long, visible_alias = "profile", value_enum, default_value = "typical")]
        preset: Preset,

        /// Child identifier
        #[arg(long, default_value = "sim-child")]
        child_id: String,

        /// Battery configuration JSON (defaults for --grade when omitted)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Number of consecutive sessions; more than one adds a progress report
        #[arg(long, default_value = "1")]
        sessions: u32,

        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,

        /// Output format (pretty on a terminal when omitted)
        #[arg(long, value_enum)]
        output_format: Option<OutputFormat>,
    },

    /// Score a JSON array of recorded trials for one game
    Analyze {
        /// Game id (focus_flow, stop_and_go, memory_steps, steady_speed, switch_smart) or 1-5
        #[arg(long)]
        game: String,

        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Battery configuration the trials were recorded with
        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long, value_enum)]
        output_format: Option<OutputFormat>,
    },

    /// Score one recorded game outcome
    Score {
        /// Outcome JSON file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        #[arg(long, value_enum)]
        output_format: Option<OutputFormat>,
    },

    /// Spectral analysis of a JSON array of RTs (numbers or nulls)
    Spectrum {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Stimulus cycle length in milliseconds
        #[arg(long, default_value = "1500")]
        cycle_ms: f64,

        #[arg(long, value_enum)]
        output_format: Option<OutputFormat>,
    },

    /// Print the intervention plan for a domain label or index name
    Plan {
        /// e.g. "Working Memory" or WME; unknown labels get the flexibility plan
        #[arg(long)]
        domain: String,

        #[arg(long, value_enum)]
        output_format: Option<OutputFormat>,
    },

    /// Print the default configuration for a grade, or validate a file
    Config {
        #[arg(long, default_value = "4")]
        grade: u8,

        /// Validate this configuration file instead
        #[arg(long)]
        validate: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Preset {
    Typical,
    Inattentive,
    Impulsive,
}

impl From<Preset> for ChildPreset {
    fn from(p: Preset) -> Self {
        match p {
            Preset::Typical => ChildPreset::Typical,
            Preset::Inattentive => ChildPreset::Inattentive,
            Preset::Impulsive => ChildPreset::Impulsive,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Compact JSON
    Json,
    /// Pretty-printed JSON
    JsonPretty,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e))
                    .unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn run(cli: Cli) -> Result<(), BatteryCliError> {
    match cli.command {
        Commands::Simulate {
            grade,
            seed,
            preset,
            child_id,
            config,
            sessions,
            output,
            output_format,
        } => cmd_simulate(
            grade,
            seed,
            preset.into(),
            &child_id,
            config.as_deref(),
            sessions,
            &output,
            output_format,
        ),
        Commands::Score {
            input,
            output_format,
        } => {
            let outcome: GameOutcome = serde_json::from_str(&read_input(&input)?)?;
            let result = cogbattery::score_game(&outcome)?;
            info!(game = %result.game_id, index = result.index, "scored game");
            print_json(&result, output_format)
        }
        Commands::Analyze {
            game,
            input,
            config,
            output_format,
        } => {
            let game = parse_game(&game)?;
            let config = match config {
                Some(path) => BatteryConfig::from_json(&read_input(&path)?)?,
                None => BatteryConfig::for_grade(4),
            };
            let trials: Vec<Trial> = serde_json::from_str(&read_input(&input)?)?;
            let cycle = sampling_cycle_ms(game, &trials, &config);
            let result = score_trials(game, &trials, cycle)?;
            info!(game = %game, trials = trials.len(), index = result.index, "scored trial batch");
            print_json(&result, output_format)
        }
        Commands::Spectrum {
            input,
            cycle_ms,
            output_format,
        } => {
            let raw: Vec<Option<f64>> = serde_json::from_str(&read_input(&input)?)?;
            if raw.is_empty() {
                return Err(BatteryCliError::EmptySeries);
            }
            print_json(&analyze_rt(&raw, cycle_ms), output_format)
        }
        Commands::Plan {
            domain,
            output_format,
        } => print_json(&generate_plan_for_label(&domain), output_format),
        Commands::Config { grade, validate } => match validate {
            Some(path) => {
                BatteryConfig::from_json(&read_input(&path)?)?;
                println!("Configuration valid: {}", path.display());
                Ok(())
            }
            None => {
                println!("{}", BatteryConfig::for_grade(grade).to_json()?);
                Ok(())
            }
        },
    }
}

#[derive(Serialize)]
struct SimulationOutput {
    reports: Vec<ReportDocument>,
    #[serde(skip_serializing_if = "Option::is_none")]
    progress: Option<ProgressReport>,
}

#[allow(clippy::too_many_arguments)]
fn cmd_simulate(
    grade: u8,
    seed: u64,
    preset: ChildPreset,
    child_id: &str,
    config: Option<&Path>,
    sessions: u32,
    output: &Path,
    output_format: Option<OutputFormat>,
) -> Result<(), BatteryCliError> {
    let base_config = match config {
        Some(path) => BatteryConfig::from_json(&read_input(path)?)?,
        None => BatteryConfig::for_grade(grade),
    };

    let store = InMemoryStore::new();
    let encoder = ReportEncoder::new();
    let mut reports = Vec::new();

    for n in 0..sessions.max(1) {
        let session_seed = seed.wrapping_add(u64::from(n) * 1_000);
        let mut orchestrator = SessionOrchestrator::new(
            store.clone(),
            Child::new(child_id, grade),
            base_config.clone().with_seed(session_seed),
        )
        .with_app_version(format!("battery-cli/{ENGINE_VERSION}"));

        let child = SimulatedChild::preset(preset, session_seed);
        let report = run_simulated_session(&mut orchestrator, child)?;
        info!(
            session = n + 1,
            priority = %report.plan.primary_focus,
            preset = preset.as_str(),
            "simulated session complete"
        );
        reports.push(encoder.encode_session(&orchestrator)?);
    }

    let progress = if reports.len() > 1 {
        ProgressTracker::default()
            .evaluate_child(&store, child_id, RETEST_DAYS)
            .map_err(AssessmentError::from)?
    } else {
        None
    };

    let body = render_json(&SimulationOutput { reports, progress }, output_format, output)?;
    if output.to_string_lossy() == "-" {
        println!("{body}");
    } else {
        fs::write(output, body)?;
    }
    Ok(())
}

fn parse_game(id: &str) -> Result<GameId, BatteryCliError> {
    GameId::from_str_id(id)
        .or_else(|| {
            id.parse::<u8>()
                .ok()
                .and_then(|n| GameId::ALL.into_iter().find(|g| g.number() == n))
        })
        .ok_or_else(|| BatteryCliError::UnknownGame(id.to_string()))
}

fn read_input(path: &Path) -> Result<String, BatteryCliError> {
    if path.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(path)?)
    }
}

fn render_json<T: Serialize>(
    value: &T,
    format: Option<OutputFormat>,
    output: &Path,
) -> Result<String, BatteryCliError> {
    let to_terminal = output.to_string_lossy() == "-" && atty::is(atty::Stream::Stdout);
    let pretty = match format {
        Some(OutputFormat::JsonPretty) => true,
        Some(OutputFormat::Json) => false,
        None => to_terminal,
    };
    Ok(if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    })
}

fn print_json<T: Serialize>(value: &T, format: Option<OutputFormat>) -> Result<(), BatteryCliError> {
    println!("{}", render_json(value, format, Path::new("-"))?);
    Ok(())
}

// Error types

#[derive(Debug)]
enum BatteryCliError {
    Io(io::Error),
    Assessment(AssessmentError),
    Json(serde_json::Error),
    UnknownGame(String),
    EmptySeries,
}

impl From<io::Error> for BatteryCliError {
    fn from(e: io::Error) -> Self {
        BatteryCliError::Io(e)
    }
}

impl From<AssessmentError> for BatteryCliError {
    fn from(e: AssessmentError) -> Self {
        BatteryCliError::Assessment(e)
    }
}

impl From<serde_json::Error> for BatteryCliError {
    fn from(e: serde_json::Error) -> Self {
        BatteryCliError::Json(e)
    }
}

#[derive(Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<BatteryCliError> for CliError {
    fn from(e: BatteryCliError) -> Self {
        match e {
            BatteryCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            BatteryCliError::Assessment(AssessmentError::InvalidConfig { game, reason }) => {
                CliError {
                    code: "INVALID_CONFIG".to_string(),
                    message: format!("{game}: {reason}"),
                    hint: Some("Run 'battery config' to see a valid configuration".to_string()),
                }
            }
            BatteryCliError::Assessment(e) => CliError {
                code: "ASSESSMENT_ERROR".to_string(),
                message: e.to_string(),
                hint: None,
            },
            BatteryCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            BatteryCliError::UnknownGame(g) => CliError {
                code: "UNKNOWN_GAME".to_string(),
                message: format!("Unknown game: {g}"),
                hint: Some("Use a game id such as focus_flow, or its battery position 1-5".to_string()),
            },
            BatteryCliError::EmptySeries => CliError {
                code: "EMPTY_SERIES".to_string(),
                message: "RT series is empty".to_string(),
                hint: Some("Provide a JSON array of reaction times".to_string()),
            },
        }
    }
}
