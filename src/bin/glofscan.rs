//! glofscan CLI - GLOF risk assessment from imagery, elevation models and video

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use glofscan::core::terrain_flow::DemOverrides;
use glofscan::core::{DemAnalyzer, GlofPredictor, LakeAnalyzer, MotionDetector};
use glofscan::io::{FrameSource, ImageLoader, ImageSequenceSource, ZipFrameSource};
use glofscan::GlofConfig;

#[derive(Parser)]
#[command(name = "glofscan")]
#[command(author, version, about = "Glacial lake outburst flood risk assessment", long_about = None)]
struct Cli {
    /// YAML configuration file; GLOF_* environment variables override it
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Pretty-print JSON output
    #[arg(long, global = true)]
    pretty: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Segment lake and ice in one optical image
    Lake {
        input: PathBuf,
        /// Ground resolution in metres per pixel
        #[arg(short, long)]
        resolution: Option<f64>,
    },
    /// Analyse a chronological series of optical images
    CompareLakes {
        #[arg(required = true, num_args = 2..)]
        inputs: Vec<PathBuf>,
    },
    /// Water accumulation and downhill flow from an elevation model
    Dem {
        input: PathBuf,
        /// No-data sentinel (defaults to the raster's own, if any)
        #[arg(long)]
        no_data: Option<f64>,
        #[arg(short, long)]
        downscale: Option<usize>,
        #[arg(short, long)]
        percentile: Option<f64>,
    },
    /// Water motion between two frames
    MotionPair { first: PathBuf, second: PathBuf },
    /// Water motion over a video given as a frame directory or zip archive
    MotionVideo {
        input: PathBuf,
        #[arg(long)]
        fps: Option<f64>,
        #[arg(long)]
        max_frames: Option<usize>,
        #[arg(long)]
        frame_skip: Option<usize>,
    },
    /// Tabular prediction from sensor readings (NAME=VALUE); none simulates readings
    Predict { readings: Vec<String> },
}

#[derive(Serialize)]
struct Envelope<T: Serialize> {
    generated_at: chrono::DateTime<chrono::Utc>,
    result: T,
}

fn load_config(path: Option<&Path>) -> Result<GlofConfig> {
    let mut config = match path {
        Some(p) => GlofConfig::load(p).with_context(|| format!("loading config {}", p.display()))?,
        None => GlofConfig::default(),
    };
    config.apply_env_overrides().context("applying environment overrides")?;
    config.validate().context("validating configuration")?;
    Ok(config)
}

fn parse_readings(args: &[String]) -> Result<HashMap<String, f64>> {
    let mut readings = HashMap::new();
    for arg in args {
        let Some((name, value)) = arg.split_once('=') else {
            bail!("expected NAME=VALUE, got '{}'", arg);
        };
        let value: f64 = value
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {}", name))?;
        readings.insert(name.trim().to_string(), value);
    }
    Ok(readings)
}

fn emit<T: Serialize>(result: T, pretty: bool) -> Result<()> {
    let envelope = Envelope {
        generated_at: chrono::Utc::now(),
        result,
    };
    let json = if pretty {
        serde_json::to_string_pretty(&envelope)?
    } else {
        serde_json::to_string(&envelope)?
    };
    println!("{}", json);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .target(env_logger::Target::Stderr)
        .init();

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Lake { input, resolution } => {
            let analysis = LakeAnalyzer::new(config.lake)
                .analyze_path(&input, resolution)
                .with_context(|| format!("analysing {}", input.display()))?;
            emit(analysis.to_presentation(), cli.pretty)
        }
        Commands::CompareLakes { inputs } => {
            let comparison = LakeAnalyzer::new(config.lake).compare_images(&inputs);
            emit(comparison, cli.pretty)
        }
        Commands::Dem {
            input,
            no_data,
            downscale,
            percentile,
        } => {
            let overrides = DemOverrides {
                downscale_factor: downscale,
                water_level_percentile: percentile,
            };
            let analysis = DemAnalyzer::new(config.dem)
                .analyze_path(&input, no_data, overrides)
                .with_context(|| format!("analysing {}", input.display()))?;
            emit(analysis.to_presentation(), cli.pretty)
        }
        Commands::MotionPair { first, second } => {
            let a = ImageLoader::load_rgb_from_path(&first).with_context(|| format!("loading {}", first.display()))?;
            let b =
                ImageLoader::load_rgb_from_path(&second).with_context(|| format!("loading {}", second.display()))?;
            let motion = MotionDetector::new(config.motion).analyze_frame_pair(&a, &b)?;
            emit(motion.to_presentation(), cli.pretty)
        }
        Commands::MotionVideo {
            input,
            fps,
            max_frames,
            frame_skip,
        } => {
            let mut source: Box<dyn FrameSource> = if input.is_dir() {
                Box::new(ImageSequenceSource::open(&input, fps)?)
            } else {
                Box::new(ZipFrameSource::open(&input, fps)?)
            };
            let detector = MotionDetector::new(config.motion);
            let summary = detector
                .analyze_video_with(
                    source.as_mut(),
                    max_frames.unwrap_or(detector.config().max_frames),
                    frame_skip.unwrap_or(detector.config().frame_skip),
                )
                .with_context(|| format!("analysing {}", input.display()))?;
            emit(summary, cli.pretty)
        }
        Commands::Predict { readings } => {
            let input = parse_readings(&readings)?;
            let prediction = GlofPredictor::new(config.predictor).predict(&input)?;
            emit(prediction.to_presentation(), cli.pretty)
        }
    }
}
