use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};
use verdacam_engine::{EncoderSettings, EngineTiming, TimelapseEngine};
use verdacam_media::{
    CameraController, CameraSimulator, FfmpegToolkit, MediaToolkit, TermuxCamera,
};
use verdacam_types::config::AppConfig;
use verdacam_updater::{restart_process, UpdaterService};

#[derive(Debug, Parser)]
#[command(name = "verdacam", about = "Self-updating timelapse camera controller")]
struct Cli {
    /// Startup configuration file.
    #[arg(long, env = "VERDACAM_CONFIG", default_value = "configs/verdacam.toml")]
    config: PathBuf,

    /// Overrides the media base directory from the configuration.
    #[arg(long, env = "VERDACAM_MEDIA_DIR")]
    media_dir: Option<PathBuf>,

    /// Run against the in-process camera simulator instead of the
    /// termux camera and ffmpeg.
    #[arg(long, env = "VERDACAM_SIMULATE")]
    simulate: bool,

    /// Working copy synchronized by self-updates.
    #[arg(long, env = "VERDACAM_REPO_ROOT", default_value = ".")]
    repo_root: PathBuf,

    /// Sync the working copy with its remote and restart this process
    /// before starting the capture loops.
    #[arg(long)]
    self_update: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.config);
    init_tracing(&config.ops.log_level)?;

    let updater = UpdaterService::new(
        &cli.repo_root,
        config.update.remote.clone(),
        config.update.branch.clone(),
    );
    if cli.self_update {
        let status = updater.update_repo().await?;
        info!(
            "synced to {} ({}), restarting",
            status.branch, status.last_commit_date
        );
        restart_process()?;
    }

    let (camera, media): (Arc<dyn CameraController>, Arc<dyn MediaToolkit>) = if cli.simulate {
        let simulator = Arc::new(CameraSimulator::new());
        info!("using the camera simulator");
        (simulator.clone(), simulator)
    } else {
        (
            Arc::new(TermuxCamera::new()),
            Arc::new(FfmpegToolkit::new()),
        )
    };

    let base_dir = cli
        .media_dir
        .unwrap_or_else(|| config.media.base_dir.clone());
    let engine = Arc::new(TimelapseEngine::new(
        base_dir,
        camera,
        media,
        config.runtime_defaults(),
        EncoderSettings {
            fps: config.capture.fps,
            codec: config.capture.codec.clone(),
        },
        EngineTiming {
            live_view_interval: Duration::from_secs(config.capture.live_view_interval_seconds),
            ..EngineTiming::default()
        },
    )?);
    engine.start();

    match updater.get_status().await {
        Ok(status) => info!(
            "running branch {} at commit from {}",
            status.branch, status.last_commit_date
        ),
        Err(err) => warn!("repository status unavailable: {err}"),
    }

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    engine.stop().await;
    Ok(())
}

fn load_config(path: &PathBuf) -> AppConfig {
    match AppConfig::from_file(path) {
        Ok(cfg) => {
            if let Err(err) = cfg.validate() {
                eprintln!(
                    "Invalid config in '{}': {err}. Falling back to internal defaults.",
                    path.display()
                );
                AppConfig::default()
            } else {
                cfg
            }
        }
        Err(err) => {
            eprintln!(
                "Failed to load config from '{}': {err}. Falling back to internal defaults.",
                path.display()
            );
            AppConfig::default()
        }
    }
}

fn init_tracing(log_level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(log_level).or_else(|_| EnvFilter::try_new("info"))?;
    fmt().with_env_filter(filter).try_init().map_err(|err| {
        anyhow::anyhow!("tracing init error: {err}")
    })?;
    Ok(())
}
