//! Command-line front end: detect heatwaves in a JSON temperature cube and
//! classify them into families and subfamilies.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use heatwave_core::magnitude::EventSummary;
use heatwave_core::{HeatwavePipeline, PipelineConfig, TemperatureCube};

#[derive(Parser, Debug)]
#[command(name = "heatwave", about = "Heatwave event detection and taxonomy")]
struct Args {
    /// Pipeline configuration (TOML). Missing keys take their defaults.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// More log output (-v debug, -vv trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log warnings and errors.
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Detect events and write their summaries.
    Detect {
        /// Temperature cube (JSON).
        #[arg(short, long)]
        input: PathBuf,
        /// Output file; stdout if omitted.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Cluster previously detected event summaries.
    Classify {
        /// Event summaries (JSON) as written by `detect`.
        #[arg(short, long)]
        input: PathBuf,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Detect and classify in one go; writes the event table and taxonomy.
    Run {
        #[arg(short, long)]
        input: PathBuf,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Print the default configuration as TOML.
    DefaultConfig,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = match (args.quiet, args.verbose) {
        (true, _) => Level::WARN,
        (false, 0) => Level::INFO,
        (false, 1) => Level::DEBUG,
        (false, _) => Level::TRACE,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = load_config(args.config.as_deref())?;

    match args.command {
        Command::Detect { input, output } => {
            let cube = load_cube(&input)?;
            let pipeline = HeatwavePipeline::new(config).context("invalid configuration")?;
            let detection = pipeline.detect(&cube).context("event detection failed")?;
            info!(n_events = detection.summaries.len(), n_nodes = detection.n_nodes, "detection done");
            write_json(output.as_deref(), &detection.summaries)?;
        }
        Command::Classify { input, output } => {
            let text = fs::read_to_string(&input)
                .with_context(|| format!("reading event summaries from {}", input.display()))?;
            let summaries: Vec<EventSummary> = serde_json::from_str(&text)
                .with_context(|| format!("parsing event summaries in {}", input.display()))?;
            let pipeline = HeatwavePipeline::new(config).context("invalid configuration")?;
            let out = pipeline.classify(summaries).context("classification failed")?;
            write_json(output.as_deref(), &out)?;
        }
        Command::Run { input, output } => {
            let cube = load_cube(&input)?;
            let pipeline = HeatwavePipeline::new(config).context("invalid configuration")?;
            let out = pipeline.run(&cube).context("pipeline failed")?;
            info!(n_events = out.events.len(), "pipeline done");
            write_json(output.as_deref(), &out)?;
        }
        Command::DefaultConfig => {
            let text = toml::to_string_pretty(&PipelineConfig::default())
                .context("serialising default configuration")?;
            print!("{text}");
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    let Some(path) = path else {
        return Ok(PipelineConfig::default());
    };
    let text = fs::read_to_string(path).with_context(|| format!("reading config {}", path.display()))?;
    let config: PipelineConfig =
        toml::from_str(&text).with_context(|| format!("parsing config {}", path.display()))?;
    Ok(config)
}

fn load_cube(path: &Path) -> Result<TemperatureCube> {
    let text = fs::read_to_string(path).with_context(|| format!("reading temperature cube {}", path.display()))?;
    let cube = TemperatureCube::from_json(&text)
        .with_context(|| format!("loading temperature cube {}", path.display()))?;
    info!(
        shape = %cube.axes.shape(),
        n_days = cube.dates.len(),
        "loaded temperature cube"
    );
    Ok(cube)
}

fn write_json<T: Serialize>(path: Option<&Path>, value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("serialising output")?;
    match path {
        Some(p) => fs::write(p, text).with_context(|| format!("writing {}", p.display()))?,
        None => println!("{text}"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn toml_config_overrides_defaults() {
        let text = r#"
            [threshold]
            percentile = 95.0
            mode = "leave_one_out"

            [graph]
            connectivity = "four"
            wrap_longitude = true

            [magnitude]
            base = "annual_max_p25"
            spread_period = { baseline = { first_year = 1981, last_year = 2010 } }

            [family]
            k = 5

            [subfamily]
            cut = { count = 3 }
        "#;
        let config: PipelineConfig = toml::from_str(text).unwrap();
        assert_eq!(config.threshold.percentile, 95.0);
        assert_eq!(config.family.k, 5);
        assert_eq!(config.family.n_init, 10, "unset keys keep defaults");
        assert!(config.graph.wrap_longitude);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn default_config_roundtrips_through_toml() {
        let text = toml::to_string_pretty(&PipelineConfig::default()).unwrap();
        let back: PipelineConfig = toml::from_str(&text).unwrap();
        assert_eq!(back, PipelineConfig::default());
    }
}
