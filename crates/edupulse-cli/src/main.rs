use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use edupulse_core::face::OnnxFaceExtractor;
use edupulse_core::phone::YoloPhoneDetector;
use edupulse_core::pipeline::{DEFAULT_MATCH_THRESHOLD, DEFAULT_PHONE_RADIUS};
use edupulse_core::{FrameAnalyzer, Roster};

#[derive(Parser)]
#[command(name = "edupulse", about = "EduPulse roster and diagnostics CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rebuild the reference-encoding cache from the students directory
    Encode {
        /// Discard an existing cache first
        #[arg(short, long)]
        force: bool,
    },
    /// List cached student identities
    List,
    /// Run the full analysis pipeline on a single image file
    Analyze {
        /// Path to an image file
        image: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Encode { force } => {
            let cache = encodings_path();
            if cache.exists() {
                if !force {
                    bail!(
                        "encoding cache already exists at {} (use --force to rebuild)",
                        cache.display()
                    );
                }
                fs::remove_file(&cache)
                    .with_context(|| format!("cannot remove {}", cache.display()))?;
            }

            let mut extractor = load_face_extractor()?;
            let roster = Roster::load(&cache, &students_dir(), &mut extractor)?;
            println!("Encoded {} student(s):", roster.len());
            for identity in roster.identities() {
                println!("  {}", identity.name);
            }
        }
        Commands::List => {
            let cache = encodings_path();
            if !cache.exists() {
                println!("No encoding cache at {} (run `edupulse encode`)", cache.display());
                return Ok(());
            }
            let roster = Roster::from_cache(&cache)?;
            for identity in roster.identities() {
                println!("{} ({} dims)", identity.name, identity.embedding.values.len());
            }
        }
        Commands::Analyze { image } => {
            let mut extractor = load_face_extractor()?;
            let phones = YoloPhoneDetector::load(&model_path("yolov8n.onnx"))?;
            let roster = Roster::load(&encodings_path(), &students_dir(), &mut extractor)?;

            let mut analyzer = FrameAnalyzer::new(
                Box::new(extractor),
                Box::new(phones),
                Arc::new(roster),
                DEFAULT_MATCH_THRESHOLD,
                DEFAULT_PHONE_RADIUS,
            );

            let frame = image::open(&image)
                .with_context(|| format!("cannot open {}", image.display()))?
                .to_rgb8();
            let result = analyzer.analyze(&frame)?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
    }

    Ok(())
}

fn load_face_extractor() -> Result<OnnxFaceExtractor> {
    Ok(OnnxFaceExtractor::load(
        &model_path("version-RFB-320.onnx"),
        &model_path("mobilefacenet.onnx"),
    )?)
}

// Same environment conventions as edupulsed.

fn model_path(file: &str) -> String {
    std::env::var("EDUPULSE_MODEL_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| edupulse_core::default_model_dir())
        .join(file)
        .to_string_lossy()
        .into_owned()
}

fn data_dir() -> PathBuf {
    std::env::var("EDUPULSE_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            std::env::var("XDG_DATA_HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|_| {
                    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                    PathBuf::from(home).join(".local/share")
                })
                .join("edupulse")
        })
}

fn students_dir() -> PathBuf {
    std::env::var("EDUPULSE_STUDENTS_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| data_dir().join("students"))
}

fn encodings_path() -> PathBuf {
    std::env::var("EDUPULSE_ENCODINGS_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| data_dir().join("encodings.bin"))
}
