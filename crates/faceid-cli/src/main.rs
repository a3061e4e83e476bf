use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use faceid_engine::{
    CompareResponse, Config, EngineError, IdentityEngine, RecognizeResponse, RegisterResponse,
};
use serde_json::json;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "faceid", about = "Face registration and recognition")]
struct Cli {
    /// Override the acceptance threshold (percent)
    #[arg(long, global = true)]
    threshold: Option<f64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a new identity from an image
    Register {
        /// Unique name for the identity
        name: String,
        /// Image containing the face
        image: PathBuf,
    },
    /// Recognize the face in an image ("-" reads the image from stdin)
    Recognize { image: PathBuf },
    /// Compare the faces of two images
    Compare { first: PathBuf, second: PathBuf },
    /// List registered identities
    List,
    /// Delete a registered identity
    Delete { name: String },
    /// Show recognition statistics
    Stats,
    /// Show recent log entries
    Log {
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = Config::load();
    if let Some(threshold) = cli.threshold {
        config.match_threshold = threshold;
    }

    // Cascade parsing and image work are CPU-bound; keep them off the runtime.
    let engine = tokio::task::spawn_blocking(move || IdentityEngine::from_config(&config))
        .await?
        .context("failed to initialize identity engine")?;
    let engine = Arc::new(engine);

    let output = tokio::task::spawn_blocking(move || run(&engine, cli.command)).await??;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn run(engine: &IdentityEngine, command: Commands) -> Result<serde_json::Value> {
    let value = match command {
        Commands::Register { name, image } => {
            let bytes = std::fs::read(&image).with_context(|| format!("failed to read {}", image.display()))?;
            register(engine, name, &bytes)?
        }
        Commands::Recognize { image } => {
            let recognition = if image.as_os_str() == "-" {
                let mut bytes = Vec::new();
                std::io::stdin()
                    .read_to_end(&mut bytes)
                    .context("failed to read image from stdin")?;
                engine.recognize_upload(&bytes)?
            } else {
                engine.recognize(&image)?
            };
            serde_json::to_value(RecognizeResponse::from(&recognition))?
        }
        Commands::Compare { first, second } => {
            let comparison = engine.compare(&first, &second)?;
            serde_json::to_value(CompareResponse::from(&comparison))?
        }
        Commands::List => serde_json::to_value(engine.list()?)?,
        Commands::Delete { name } => {
            engine.delete(&name)?;
            json!({ "success": true, "name": name })
        }
        Commands::Stats => serde_json::to_value(engine.stats()?)?,
        Commands::Log { limit } => serde_json::to_value(engine.recent_logs(limit)?)?,
    };
    Ok(value)
}

/// Rejections are reported as a JSON response; anything else is a hard error.
fn register(engine: &IdentityEngine, name: String, bytes: &[u8]) -> Result<serde_json::Value> {
    let response = match engine.register_upload(&name, bytes) {
        Ok(reg) => RegisterResponse::from(&reg),
        Err(
            e @ (EngineError::DuplicateName(_)
            | EngineError::InvalidName(_)
            | EngineError::NotAnImage
            | EngineError::NoFaceDetected
            | EngineError::ExtractionFailed(_)),
        ) => RegisterResponse {
            success: false,
            name,
            message: e.to_string(),
        },
        Err(e) => return Err(e.into()),
    };
    Ok(serde_json::to_value(response)?)
}
