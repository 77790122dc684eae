//! Command-line interface for emotion tracking
//!
//! Runs the analysis pass, the render pass or both on a local video or a URL,
//! then prints a short summary.

use std::env;
use std::path::PathBuf;
use std::process;
use std::time::Instant;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use rust_emotiontrack::{
    init_tracing, pipeline, preview,
    pipeline::{AnalysisReport, RenderReport},
    FailurePolicy, PipelineConfig,
};

/// Command-line arguments structure
#[derive(Debug)]
struct Args {
    locator: String,
    interval: Option<u32>,
    margin: Option<i32>,
    output_dir: Option<PathBuf>,
    config_file: Option<PathBuf>,
    person_model: Option<PathBuf>,
    emotion_model: Option<PathBuf>,
    skip_failed_frames: bool,
    max_gap: Option<f64>,
    stages: Stages,
    preview: bool,
    verbose: bool,
    output_format: OutputFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stages {
    Both,
    AnalyzeOnly,
    RenderOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputFormat {
    Simple,
    Json,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            locator: String::new(),
            interval: None,
            margin: None,
            output_dir: None,
            config_file: None,
            person_model: None,
            emotion_model: None,
            skip_failed_frames: false,
            max_gap: None,
            stages: Stages::Both,
            preview: false,
            verbose: false,
            output_format: OutputFormat::Simple,
        }
    }
}

const OPTIONS: &str = "Options:\n\
    --interval <n>           Analyze one frame out of every n (default: 15)\n\
    --margin <px>            Width of the confidence panel (default: 200)\n\
    --output-dir <dir>       Root for videos/, saves/, output/ and demos/ (default: .)\n\
    --config <file>          JSON configuration file\n\
    --person-model <path>    YOLO ONNX model (default: models/yolo11s.onnx)\n\
    --emotion-model <path>   Emotion ONNX model (default: models/emotion-ferplus.onnx)\n\
    --skip-failed-frames     Log and skip frames that fail inference instead of stopping\n\
    --max-gap <seconds>      Leave the panel blank when no record is this close\n\
    --analyze-only           Stop after writing the record table\n\
    --render-only            Render from an existing record table\n\
    --preview                Play the annotated video when done (q quits)\n\
    --format <fmt>           Output format: simple|json (default: simple)\n\
    --verbose                Enable debug logging\n\
    --help                   Show this help message";

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

fn run() -> Result<()> {
    let argv: Vec<String> = env::args().collect();
    let args = parse_args(&argv).map_err(anyhow::Error::msg)?;

    let log_level = if args.verbose { "debug" } else { "info" };
    init_tracing(log_level);

    info!("Emotion tracking CLI v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);

    let config = build_config(&args)?;
    let start_time = Instant::now();

    let video = pipeline::resolve_source(&config, &args.locator).context("resolve source")?;

    let analysis = match args.stages {
        Stages::RenderOnly => None,
        _ => Some(pipeline::analyze(&config, &video).context("analyze")?),
    };

    let replay = match args.stages {
        Stages::AnalyzeOnly => None,
        _ => Some(pipeline::render(&config, &video).context("render")?),
    };

    if args.preview {
        match &replay {
            Some(replay) => {
                preview(&replay.output).context("preview")?;
            }
            None => warn!("--preview ignored with --analyze-only"),
        }
    }

    output_results(&args, analysis.as_ref(), replay.as_ref(), start_time.elapsed())
}

fn usage(program: &str) -> String {
    format!("Usage: {} <video_path|url> [OPTIONS]\n\n{}", program, OPTIONS)
}

fn parse_args(argv: &[String]) -> Result<Args, String> {
    let program = argv.first().map(String::as_str).unwrap_or("rust-emotiontrack");

    if argv.len() < 2 {
        return Err(usage(program));
    }
    if argv[1] == "--help" {
        return Err(format!(
            "Emotion Tracking Tool\n\n\
            Samples a video, records the facial emotion of every detected person\n\
            and renders the confidences next to the original frames.\n\n{}",
            usage(program)
        ));
    }

    let mut parsed = Args {
        locator: argv[1].clone(),
        ..Args::default()
    };

    fn value<'a>(argv: &'a [String], i: usize, flag: &str) -> Result<&'a str, String> {
        argv.get(i + 1)
            .map(String::as_str)
            .ok_or_else(|| format!("{} requires a value", flag))
    }

    let mut i = 2;
    while i < argv.len() {
        let flag = argv[i].as_str();
        match flag {
            "--interval" => {
                parsed.interval = Some(value(argv, i, flag)?.parse()
                    .map_err(|_| "Invalid interval value")?);
                i += 2;
            }
            "--margin" => {
                parsed.margin = Some(value(argv, i, flag)?.parse()
                    .map_err(|_| "Invalid margin value")?);
                i += 2;
            }
            "--max-gap" => {
                parsed.max_gap = Some(value(argv, i, flag)?.parse()
                    .map_err(|_| "Invalid max-gap value")?);
                i += 2;
            }
            "--output-dir" => {
                parsed.output_dir = Some(PathBuf::from(value(argv, i, flag)?));
                i += 2;
            }
            "--config" => {
                parsed.config_file = Some(PathBuf::from(value(argv, i, flag)?));
                i += 2;
            }
            "--person-model" => {
                parsed.person_model = Some(PathBuf::from(value(argv, i, flag)?));
                i += 2;
            }
            "--emotion-model" => {
                parsed.emotion_model = Some(PathBuf::from(value(argv, i, flag)?));
                i += 2;
            }
            "--format" => {
                parsed.output_format = match value(argv, i, flag)? {
                    "simple" => OutputFormat::Simple,
                    "json" => OutputFormat::Json,
                    _ => return Err("Invalid format. Use 'simple' or 'json'".to_string()),
                };
                i += 2;
            }
            "--analyze-only" | "--render-only" => {
                let requested = if flag == "--analyze-only" { Stages::AnalyzeOnly } else { Stages::RenderOnly };
                if parsed.stages != Stages::Both && parsed.stages != requested {
                    return Err("--analyze-only and --render-only are mutually exclusive".to_string());
                }
                parsed.stages = requested;
                i += 1;
            }
            "--skip-failed-frames" => {
                parsed.skip_failed_frames = true;
                i += 1;
            }
            "--preview" => {
                parsed.preview = true;
                i += 1;
            }
            "--verbose" => {
                parsed.verbose = true;
                i += 1;
            }
            "--help" => return Err(usage(program)),
            _ => return Err(format!("Unknown option: {}", flag)),
        }
    }

    Ok(parsed)
}

/// Configuration file (or defaults) with command-line overrides applied
fn build_config(args: &Args) -> Result<PipelineConfig> {
    let mut config = match &args.config_file {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("load config {}", path.display()))?,
        None => PipelineConfig::default(),
    };

    if let Some(interval) = args.interval {
        config.interval = interval;
    }
    if let Some(margin) = args.margin {
        config.margin = margin;
    }
    if let Some(dir) = &args.output_dir {
        config.output_root = dir.clone();
    }
    if let Some(model) = &args.person_model {
        config.person_model = model.clone();
    }
    if let Some(model) = &args.emotion_model {
        config.emotion_model = model.clone();
    }
    if args.skip_failed_frames {
        config.failure_policy = FailurePolicy::SkipFrame;
    }
    if args.max_gap.is_some() {
        config.max_match_gap_seconds = args.max_gap;
    }

    config.validate().context("configuration")?;
    debug!("Configuration: {:?}", config);
    Ok(config)
}

fn output_results(
    args: &Args,
    analysis: Option<&AnalysisReport>,
    replay: Option<&RenderReport>,
    elapsed: std::time::Duration,
) -> Result<()> {
    match args.output_format {
        OutputFormat::Simple => {
            if let Some(analysis) = analysis {
                println!(
                    "Analyzed {} sampled frames ({} skipped), {} records written to {}",
                    analysis.frames_sampled,
                    analysis.summary.frames_skipped,
                    analysis.summary.records_written,
                    analysis.records_path.display()
                );
            }
            if let Some(replay) = replay {
                println!(
                    "Rendered {} frames ({} annotated) to {}",
                    replay.summary.frames_written,
                    replay.summary.frames_annotated,
                    replay.output.display()
                );
            }
        }
        OutputFormat::Json => {
            let json_output = serde_json::json!({
                "source": args.locator,
                "elapsed_ms": elapsed.as_millis(),
                "analysis": analysis,
                "render": replay,
            });
            println!("{}", serde_json::to_string_pretty(&json_output).context("serialize summary")?);
        }
    }

    info!("Completed in {:.2}s", elapsed.as_secs_f64());
    Ok(())
}
