use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use crop_scale::cpu::ResampleFilter;
use smart_crop::config::PipelineConfig;
use smart_crop::core::CleanupOutcome;
use smart_crop::models::http::{HttpObjectDetector, HttpSuperResolutionRuntime};
use smart_crop::{
    CropPosition, ImagePipeline, ImageSource, OutputFormat, ProcessOptions, ProcessedImageResult,
};

/// Resize, crop and smart-crop images, upscaling with a super-resolution
/// model when an image has to grow.
#[derive(Parser, Debug)]
#[command(name = "smartcrop")]
#[command(about = "✂️ Resize, crop and smart-crop images with optional AI upscaling")]
#[command(long_about = "Resize, crop and smart-crop images with optional AI upscaling.
Images that must grow go through a super-resolution model when one is configured,
and fall back to sharpened Lanczos resampling when it is not, fails, or times out.")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fit the longest side to a target dimension
    Resize {
        #[arg(required = true, help = "Input images")]
        inputs: Vec<PathBuf>,
        #[arg(short, long, help = "Target length of the longest side, in pixels")]
        dimension: u32,
    },
    /// Crop at a named position
    Crop {
        #[arg(required = true, help = "Input images")]
        inputs: Vec<PathBuf>,
        #[arg(short = 'W', long)]
        width: u32,
        #[arg(short = 'H', long)]
        height: u32,
        #[arg(short, long, value_enum, default_value_t = CropPosition::Center)]
        position: CropPosition,
    },
    /// Crop around the detected subject
    SmartCrop {
        #[arg(required = true, help = "Input images")]
        inputs: Vec<PathBuf>,
        #[arg(short = 'W', long)]
        width: u32,
        #[arg(short = 'H', long)]
        height: u32,
    },
    /// Crop around the edge-density focal point, without a detector
    SimpleSmartCrop {
        #[arg(required = true, help = "Input images")]
        inputs: Vec<PathBuf>,
        #[arg(short = 'W', long)]
        width: u32,
        #[arg(short = 'H', long)]
        height: u32,
        #[arg(long, value_enum, default_value_t = CropPosition::Center,
              help = "Position used when the image has no edges")]
        fallback_position: CropPosition,
    },
}

impl Command {
    fn inputs(&self) -> &[PathBuf] {
        match self {
            Command::Resize { inputs, .. }
            | Command::Crop { inputs, .. }
            | Command::SmartCrop { inputs, .. }
            | Command::SimpleSmartCrop { inputs, .. } => inputs,
        }
    }

    fn suffix(&self) -> &'static str {
        match self {
            Command::Resize { .. } => "resized",
            Command::Crop { .. } => "cropped",
            Command::SmartCrop { .. } => "smart",
            Command::SimpleSmartCrop { .. } => "simple",
        }
    }
}

#[derive(Args, Debug)]
struct CommonArgs {
    #[arg(long, global = true, help = "JSON config file; unset fields keep their defaults")]
    config: Option<PathBuf>,

    #[arg(short, long, global = true, default_value = ".", help = "Directory for output images")]
    out_dir: PathBuf,

    #[arg(short, long, global = true, value_enum, default_value_t = OutputFormat::Png)]
    format: OutputFormat,

    #[arg(short, long, global = true, default_value_t = 90, help = "JPEG quality (1-100)")]
    quality: u8,

    #[arg(long, global = true, value_enum, default_value_t = ResampleFilter::Lanczos3,
          help = "Kernel for plain downscales")]
    filter: ResampleFilter,

    #[arg(long, global = true, help = "Never use the super-resolution model")]
    no_ai: bool,

    #[arg(long, global = true, help = "Object detection server, e.g. http://localhost:8001")]
    detector_url: Option<String>,

    #[arg(long, global = true, help = "Super-resolution server, e.g. http://localhost:8002")]
    upscaler_url: Option<String>,

    #[arg(long, global = true, help = "Have the super-resolution server work in square patches of this side")]
    patch_size: Option<u32>,

    #[arg(long, global = true, default_value_t = 0, requires = "patch_size",
          help = "Overlap between patches, in input pixels")]
    patch_padding: u32,

    #[arg(long, global = true, default_value_t = 30, help = "HTTP request timeout in seconds")]
    http_timeout: u64,

    #[arg(long, global = true, help = "Dispose every model and reset the detector after the batch")]
    aggressive_cleanup: bool,

    #[arg(long, global = true, help = "Print resource statistics after the batch")]
    stats: bool,

    #[arg(short, long, global = true, action = clap::ArgAction::Count,
          help = "More logging (-v debug, -vv trace); RUST_LOG overrides")]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.common.verbose);

    let config = match &cli.common.config {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };
    let pipeline = build_pipeline(&cli.common, config)?;
    let _monitor = pipeline.resources().spawn_monitor();

    let sources = read_inputs(cli.command.inputs()).await?;
    let options = ProcessOptions {
        format: cli.common.format,
        jpeg_quality: cli.common.quality,
        allow_ai: !cli.common.no_ai,
        filter: cli.common.filter,
    };

    let results = match &cli.command {
        Command::Resize { dimension, .. } => pipeline.resize(&sources, *dimension, &options).await,
        Command::Crop {
            width,
            height,
            position,
            ..
        } => {
            pipeline
                .crop(&sources, *width, *height, *position, &options)
                .await
        }
        Command::SmartCrop { width, height, .. } => {
            pipeline.smart_crop(&sources, *width, *height, &options).await
        }
        Command::SimpleSmartCrop {
            width,
            height,
            fallback_position,
            ..
        } => {
            pipeline
                .simple_smart_crop(&sources, *width, *height, *fallback_position, &options)
                .await
        }
    };

    let failed = write_outputs(&cli.common, cli.command.suffix(), &results).await?;

    if cli.common.aggressive_cleanup {
        match pipeline.aggressive_cleanup() {
            CleanupOutcome::Completed { disposed } => println!("Disposed {} model(s)", disposed),
            other => println!("Aggressive cleanup not performed: {:?}", other),
        }
    }
    if cli.common.stats {
        println!("Resources: {}", pipeline.resources().stats());
    }

    if failed > 0 {
        bail!("{} of {} image(s) failed", failed, results.len());
    }
    Ok(())
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "smart_crop=info",
        1 => "smart_crop=debug",
        _ => "smart_crop=trace,crop_scale=trace",
    };
    let ansi_enabled = std::env::var_os("NO_COLOR").is_none() && std::io::stderr().is_terminal();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_ansi(ansi_enabled)
        .init();
}

fn build_pipeline(common: &CommonArgs, config: PipelineConfig) -> Result<ImagePipeline> {
    let timeout = Duration::from_secs(common.http_timeout.max(1));
    let mut builder = ImagePipeline::builder().with_config(config);
    if let Some(url) = &common.detector_url {
        builder = builder.with_detector(Arc::new(HttpObjectDetector::new(url.clone(), timeout)?));
    }
    if let Some(url) = &common.upscaler_url {
        let mut runtime = HttpSuperResolutionRuntime::new(url.clone(), timeout)?;
        if let Some(patch_size) = common.patch_size {
            runtime = runtime.with_patches(patch_size, common.patch_padding);
        }
        builder = builder.with_runtime(Arc::new(runtime));
    }
    Ok(builder.build()?)
}

async fn read_inputs(paths: &[PathBuf]) -> Result<Vec<ImageSource>> {
    let mut sources = Vec::with_capacity(paths.len());
    for path in paths {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        sources.push(ImageSource::new(path.display().to_string(), bytes));
    }
    Ok(sources)
}

fn output_path(out_dir: &Path, label: &str, suffix: &str, format: OutputFormat) -> PathBuf {
    let stem = Path::new(label)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    out_dir.join(format!("{}-{}.{}", stem, suffix, format.extension()))
}

/// Write successful results and print one line per image. Returns the failure count.
async fn write_outputs(
    common: &CommonArgs,
    suffix: &str,
    results: &[ProcessedImageResult],
) -> Result<usize> {
    tokio::fs::create_dir_all(&common.out_dir)
        .await
        .with_context(|| format!("failed to create {}", common.out_dir.display()))?;

    let mut failed = 0;
    for result in results {
        match (&result.output, &result.error) {
            (Some(bytes), None) => {
                let path = output_path(&common.out_dir, &result.label, suffix, common.format);
                tokio::fs::write(&path, bytes)
                    .await
                    .with_context(|| format!("failed to write {}", path.display()))?;
                println!(
                    "✓ {} → {} ({}x{}{})",
                    result.label,
                    path.display(),
                    result.dimensions.0,
                    result.dimensions.1,
                    if result.used_ai { ", AI upscaled" } else { "" }
                );
            }
            (_, error) => {
                failed += 1;
                println!(
                    "✗ {}: {}",
                    result.label,
                    error.as_deref().unwrap_or("no output produced")
                );
            }
        }
    }
    Ok(failed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_crop_with_position() {
        let cli = Cli::parse_from([
            "smartcrop", "crop", "a.png", "-W", "300", "-H", "200", "--position", "top-left",
            "--format", "jpeg",
        ]);
        match cli.command {
            Command::Crop {
                width,
                height,
                position,
                ..
            } => {
                assert_eq!((width, height), (300, 200));
                assert_eq!(position, CropPosition::TopLeft);
            }
            other => panic!("unexpected command {:?}", other),
        }
        assert_eq!(cli.common.format, OutputFormat::Jpeg);
    }

    #[test]
    fn cli_parses_patch_settings() {
        let cli = Cli::parse_from([
            "smartcrop", "resize", "a.png", "-d", "800", "--upscaler-url", "http://localhost:8002",
            "--patch-size", "256", "--patch-padding", "16",
        ]);
        assert_eq!(cli.common.patch_size, Some(256));
        assert_eq!(cli.common.patch_padding, 16);

        let padding_alone =
            Cli::try_parse_from(["smartcrop", "resize", "a.png", "-d", "800", "--patch-padding", "16"]);
        assert!(padding_alone.is_err());
    }

    #[test]
    fn output_path_uses_stem_and_suffix() {
        let path = output_path(Path::new("out"), "photos/cat.jpeg", "smart", OutputFormat::Png);
        assert_eq!(path, Path::new("out").join("cat-smart.png"));
    }
}
