use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facegate::config::{self, Config};
use facegate::service::{error_body, EnrollCameraRequest, VerifyRequest};
use facegate::storage::{IdentityStore, JsonFileStore};
use facegate::FaceService;
use log::{info, warn};

#[derive(Parser)]
#[command(name = "facegate")]
#[command(version, about = "Camera face verification with movement liveness")]
struct Cli {
    /// Config file (defaults to the build-time path)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll a face from the camera
    Enroll {
        /// Identity name to enroll
        #[arg(short, long)]
        name: String,
        /// Samples the identity should hold when done
        #[arg(short, long)]
        samples: Option<usize>,
        /// Seconds to pause between accepted samples
        #[arg(long)]
        sleep: Option<f32>,
    },
    /// Verify whoever is in front of the camera
    Verify {
        #[arg(short, long)]
        threshold: Option<f32>,
        /// Process every Nth frame
        #[arg(short, long)]
        every: Option<u32>,
        /// Seconds before giving up
        #[arg(long)]
        timeout: Option<f32>,
        /// Seconds the subject has to move their head
        #[arg(long)]
        live_window: Option<f32>,
        /// Pixels the face has to travel to count as live
        #[arg(long)]
        move_px: Option<f32>,
    },
    /// List enrolled identities
    List,
    /// Remove all enrolled faces for an identity
    Purge {
        #[arg(short, long)]
        name: String,
    },
    /// Open config file in editor
    Config,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_target(false)
        .format_timestamp(None)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Enroll {
            name,
            samples,
            sleep,
        } => {
            let req = EnrollCameraRequest {
                name,
                samples: samples.unwrap_or(cfg.enroll.samples),
                sleep: sleep.unwrap_or(cfg.enroll.sleep_s),
            };
            enroll(cfg, &req)
        }
        Commands::Verify {
            threshold,
            every,
            timeout,
            live_window,
            move_px,
        } => {
            let defaults = VerifyRequest::from(&cfg.verify);
            let req = VerifyRequest {
                thr: threshold.unwrap_or(defaults.thr),
                every: every.unwrap_or(defaults.every),
                timeout_s: timeout.unwrap_or(defaults.timeout_s),
                live_window: live_window.unwrap_or(defaults.live_window),
                move_px: move_px.unwrap_or(defaults.move_px),
            };
            verify(cfg, &req)
        }
        Commands::List => list(&cfg),
        Commands::Purge { name } => purge(&cfg, &name),
        Commands::Config => open_config(cli.config),
    }
}

fn enroll(cfg: Config, req: &EnrollCameraRequest) -> Result<()> {
    info!("Enrolling {} ({} samples)", req.name, req.samples);
    info!("Opening camera: {}", cfg.camera.device);

    let key = cfg.service.key.clone();
    let service = FaceService::from_config(cfg).context("Failed to initialize face service")?;
    info!("Look at the camera and turn your head slowly. Press Ctrl+C to stop.");

    let result = service.enroll_camera(req, key.as_deref());
    service.shutdown();

    match result {
        Ok(body) => {
            info!(
                "✓ Face enrolled for {}: {} samples ({} new)",
                req.name, body["samples"], body["added"]
            );
            Ok(())
        }
        Err(e) => anyhow::bail!("Enrollment failed: {} ({})", e, e.reason()),
    }
}

fn verify(cfg: Config, req: &VerifyRequest) -> Result<()> {
    info!("Opening camera: {}", cfg.camera.device);

    let key = cfg.service.key.clone();
    let service = FaceService::from_config(cfg).context("Failed to initialize face service")?;
    info!("Look at the camera, then move your head.");

    let result = service.verify_camera(req, key.as_deref());
    service.shutdown();

    let body = result.unwrap_or_else(|e| error_body(&e));
    if body["success"] == true {
        info!(
            "✓ Verified {} (score {}, moved {}px)",
            body["name"], body["score"], body["moved"]
        );
        return Ok(());
    }

    warn!("{}", body);
    anyhow::bail!("Verification failed: {}", body["reason"])
}

fn list(cfg: &Config) -> Result<()> {
    let store = JsonFileStore::new(&cfg.store.path);
    let gallery = store.load().context("Failed to load face store")?;

    if gallery.is_empty() {
        info!("No identities enrolled in {}", store.path().display());
        return Ok(());
    }
    for (name, samples) in gallery.iter() {
        info!("{}: {} samples", name, samples.len());
    }
    Ok(())
}

fn purge(cfg: &Config, name: &str) -> Result<()> {
    info!("Purging enrolled faces for: {}", name);

    let store = JsonFileStore::new(&cfg.store.path);
    let mut gallery = store.load().context("Failed to load face store")?;
    if !gallery.remove(name) {
        warn!("No enrolled faces for: {}", name);
        return Ok(());
    }
    store.save(&gallery).context("Failed to save face store")?;

    info!("✓ All faces purged for: {}", name);
    Ok(())
}

fn open_config(path: Option<PathBuf>) -> Result<()> {
    let config_path = path.unwrap_or_else(|| config::CONFIG_PATH.to_path_buf());
    let editor = env::var("EDITOR").unwrap_or_else(|_| "vi".to_string());

    if !config_path.exists() {
        config::save_config(&Config::default(), Some(&config_path))
            .context("Failed to write default config")?;
    }
    info!("Opening config file: {}", config_path.display());

    let status = std::process::Command::new(editor)
        .arg(&config_path)
        .status()
        .context("Failed to open editor")?;

    if !status.success() {
        anyhow::bail!("Editor exited with non-zero status");
    }

    Ok(())
}
