use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use navbar_crossfade::blend::TEXTURE_SLOTS;
use navbar_crossfade::config::Configuration;
use navbar_crossfade::events::{ImageLoaded, LoadImage};
use navbar_crossfade::layout::PageLayout;
use navbar_crossfade::surfaces::SurfaceRegistry;
use navbar_crossfade::tasks;

#[derive(Debug, Parser)]
#[command(
    name = "navbar-crossfade",
    version,
    about = "Hover-driven shader crossfade between a fixed set of images"
)]
struct Args {
    /// Path to YAML config
    #[arg(value_name = "CONFIG")]
    config: PathBuf,
    /// Override the per-frame shader clock step
    #[arg(long = "time-step", value_name = "STEP")]
    time_step: Option<f32>,
    /// Increase log verbosity (repeatable)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    verbose: u8,
}

fn init_tracing(verbosity: u8) -> Result<()> {
    let default_level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level))
        .add_directive("wgpu=warn".parse().context("invalid wgpu log directive")?)
        .add_directive("winit=warn".parse().context("invalid winit log directive")?)
        .add_directive("naga=warn".parse().context("invalid naga log directive")?);
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let Args {
        config,
        time_step,
        verbose,
    } = Args::parse();
    init_tracing(verbose)?;

    let mut cfg = Configuration::from_yaml_file(&config)
        .with_context(|| format!("failed to load configuration from {}", config.display()))?;
    if let Some(step) = time_step {
        cfg.render.time_step = step;
    }
    let cfg = Arc::new(cfg.validated().context("invalid configuration values")?);
    tracing::info!(
        images = cfg.images.len(),
        links = cfg.links.len(),
        "Loaded configuration from {}",
        config.display()
    );
    tracing::debug!("{cfg:#?}");

    let (load_tx, load_rx) = mpsc::channel::<LoadImage>(TEXTURE_SLOTS); // Main -> Loader
    let (loaded_tx, loaded_rx) = mpsc::channel::<ImageLoaded>(TEXTURE_SLOTS); // Loader -> Viewer

    let cancel = CancellationToken::new();

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::warn!("ctrl-c handler failed: {err}");
                return;
            }
            tracing::info!("ctrl-c received; initiating shutdown");
            cancel.cancel();
        });
    }

    let mut tasks = JoinSet::new();

    // ImageLoader
    tasks.spawn({
        let cancel = cancel.clone();
        let max_in_flight = cfg.loader.max_concurrent_decodes;
        async move {
            tasks::loader::run(load_rx, loaded_tx, cancel, max_in_flight)
                .await
                .context("loader task failed")
        }
    });

    // Queue one decode per texture slot, then close the request side.
    tasks.spawn({
        let requests =
            SurfaceRegistry::load_requests_for(&cfg.images, cfg.loader.max_texture_dimension);
        async move {
            for request in requests {
                load_tx
                    .send(request)
                    .await
                    .context("loader stopped before all images were requested")?;
            }
            Ok::<(), anyhow::Error>(())
        }
    });

    // The windowed viewer owns the main thread until the window closes or cancellation occurs
    let layout = Box::new(PageLayout::from_config(&cfg));
    if let Err(e) = tasks::viewer::run_windowed(cfg.clone(), layout, loaded_rx, cancel.clone())
        .context("viewer failed")
    {
        tracing::error!("{e:?}");
    }
    cancel.cancel();

    while let Some(res) = tasks.join_next().await {
        match res {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!("task error: {e:?}"),
            Err(e) => tracing::error!("join error: {e}"),
        }
    }

    Ok(())
}
