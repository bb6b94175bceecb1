mod config;
mod controller;
mod render;
mod repl;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use config::Config;
use controller::{CameraArgs, Controller};
use faceverify_core::{Slot, VerificationClient, VerificationResult};
use faceverify_hw::{list_devices, spawn_camera, V4lBackend};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser)]
#[command(name = "faceverify", version, about = "Two-image face verification client")]
struct Cli {
    /// Verification service base URL (overrides config)
    #[arg(long, global = true)]
    server: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Verify a known face against a new face
    Verify {
        /// Known face: an image file, or `camera`
        #[arg(long, value_parser = parse_source)]
        known: Source,
        /// New face: an image file, or `camera`
        #[arg(long = "new", value_parser = parse_source)]
        new_face: Source,
        #[command(flatten)]
        camera: CameraArgs,
    },
    /// Interactive capture/upload/verify session
    Session {
        #[command(flatten)]
        camera: CameraArgs,
    },
    /// List video capture devices
    Devices,
    /// Capture one still and write it as JPEG (camera diagnostics)
    Test {
        /// Output file
        #[arg(short, long, default_value = "capture.jpg")]
        output: PathBuf,
        #[command(flatten)]
        camera: CameraArgs,
    },
    /// Show the most recently saved face embedding
    Embedding,
    /// List recent verification records
    Records {
        /// Print the records as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Where one of the two images comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Source {
    Camera,
    File(PathBuf),
}

fn parse_source(raw: &str) -> Result<Source, String> {
    match raw {
        "" => Err("expected an image path or `camera`".to_string()),
        "camera" => Ok(Source::Camera),
        path => Ok(Source::File(PathBuf::from(path))),
    }
}

const EXIT_MATCH: u8 = 0;
const EXIT_NO_MATCH: u8 = 1;
const EXIT_UNAVAILABLE: u8 = 2;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let mut config = Config::load()?;
    if let Some(server) = cli.server {
        config.server_url = server;
    }
    tracing::debug!(server = %config.server_url, "configuration loaded");

    match cli.command {
        Commands::Verify {
            known,
            new_face,
            camera,
        } => verify(config, camera, known, new_face).await,
        Commands::Session { camera } => {
            repl::run(Controller::new(config, camera)).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Devices => {
            let devices = list_devices();
            if devices.is_empty() {
                println!("No video capture devices found");
            }
            for dev in devices {
                println!("{}  {} ({}, {})", dev.path, dev.name, dev.driver, dev.bus);
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Test { output, camera } => {
            camera_test(&config, &camera, &output).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Embedding => {
            let client = VerificationClient::over_http(&config.server_url, config.timeout());
            match client.latest_embedding().await? {
                Some(faces) if !faces.is_empty() => {
                    println!("Latest embedding: {} face(s)", faces.len());
                    for (i, face) in faces.iter().enumerate() {
                        let area = face
                            .facial_area
                            .map(|a| format!(" at {}x{}+{}+{}", a.w, a.h, a.x, a.y))
                            .unwrap_or_default();
                        let confidence = face
                            .face_confidence
                            .map(|c| format!(", confidence {c:.2}"))
                            .unwrap_or_default();
                        println!(
                            "  face {}: {} dimensions{area}{confidence}",
                            i + 1,
                            face.embedding.len()
                        );
                        println!("  {}", serde_json::to_string(&face.embedding)?);
                    }
                }
                _ => println!("No embeddings saved yet"),
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Records { json } => {
            let client = VerificationClient::over_http(&config.server_url, config.timeout());
            let records = client.recent_records().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else if records.is_empty() {
                println!("No verification records");
            } else {
                for r in &records {
                    let outcome = if r.is_verified { "match" } else { "no match" };
                    let embedding = r
                        .embedding
                        .map(|id| format!("  embedding #{id}"))
                        .unwrap_or_default();
                    println!(
                        "#{:<5} {}  {:<8}  {} vs {}{embedding}",
                        r.id,
                        r.verification_date.format("%Y-%m-%d %H:%M:%S"),
                        outcome,
                        r.known_image_path,
                        r.new_image_path,
                    );
                }
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// One-shot verification. Exit status: 0 match, 1 no match, 2 not verified.
async fn verify(config: Config, camera: CameraArgs, known: Source, new_face: Source) -> Result<ExitCode> {
    let mut controller = Controller::new(config, camera);
    let needs_camera = known == Source::Camera || new_face == Source::Camera;
    if needs_camera && !controller.start_camera(false, false).await {
        controller.shutdown().await;
        return Ok(ExitCode::from(EXIT_UNAVAILABLE));
    }

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    for (slot, source) in [(Slot::Known, known), (Slot::New, new_face)] {
        let ok = match source {
            Source::Camera => {
                println!("Position the {slot} in front of the camera and press Enter to capture");
                if stdin.next_line().await?.is_none() {
                    controller.shutdown().await;
                    bail!("stdin closed before capturing the {slot}");
                }
                controller.capture(slot).await
            }
            Source::File(path) => controller.upload(slot, &path).await,
        };
        if !ok {
            controller.shutdown().await;
            return Ok(ExitCode::from(EXIT_UNAVAILABLE));
        }
    }

    let result = controller.verify().await;
    controller.shutdown().await;
    let code = match result {
        Some(VerificationResult::Completed { verified: true, .. }) => EXIT_MATCH,
        Some(VerificationResult::Completed { .. }) => EXIT_NO_MATCH,
        Some(VerificationResult::Failed { .. }) | None => EXIT_UNAVAILABLE,
    };
    Ok(ExitCode::from(code))
}

async fn camera_test(config: &Config, camera: &CameraArgs, output: &Path) -> Result<()> {
    println!("Running camera diagnostics...");
    let handle = spawn_camera(V4lBackend).context("failed to start camera thread")?;
    let info = handle
        .open(config.constraints(camera.device.as_deref(), camera.basic))
        .await
        .context("failed to open camera")?;
    println!("Stream: {}x{} {:?}", info.width, info.height, info.format);

    let still = handle.capture_frame().await;
    handle.close().await;
    let still = still.context("failed to capture a still")?;

    tokio::fs::write(output, still.as_bytes())
        .await
        .with_context(|| format!("failed to write {}", output.display()))?;
    println!("Wrote {} ({} bytes, {})", output.display(), still.len(), still.media_type());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_source() {
        assert_eq!(parse_source("camera"), Ok(Source::Camera));
        assert_eq!(
            parse_source("faces/me.jpg"),
            Ok(Source::File(PathBuf::from("faces/me.jpg")))
        );
        assert!(parse_source("").is_err());
    }

    #[test]
    fn test_cli_parses_verify() {
        let cli = Cli::try_parse_from([
            "faceverify",
            "--server",
            "http://10.0.0.5:5001",
            "verify",
            "--known",
            "a.png",
            "--new",
            "camera",
            "--basic",
        ])
        .unwrap();
        assert_eq!(cli.server.as_deref(), Some("http://10.0.0.5:5001"));
        match cli.command {
            Commands::Verify {
                known,
                new_face,
                camera,
            } => {
                assert_eq!(known, Source::File(PathBuf::from("a.png")));
                assert_eq!(new_face, Source::Camera);
                assert!(camera.basic);
                assert!(!camera.try_anyway);
            }
            _ => panic!("expected verify"),
        }
    }
}
