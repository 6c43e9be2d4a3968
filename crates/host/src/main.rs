//! mainthread host
//!
//! Owns a frame loop on the process main thread, paces it at the configured
//! frame rate and lets a handful of background producers schedule work onto
//! it until they all finish.

mod producers;
mod scene;

use std::process::ExitCode;

use crossbeam_channel::{select, tick, unbounded};
use tracing_subscriber::EnvFilter;

use mainthread_core::config::{config_path, ConfigError};
use mainthread_core::{
    ColorBinding, DispatchError, DispatcherConfig, FrameFlags, FrameLoop, Opacity, Palette,
};

use producers::ProducerEvent;
use scene::{Scene, Swatch};

/// Frames to run at least, even if producers finish earlier
const MIN_FRAMES: u64 = 30;

/// Hard stop in case a producer never finishes
const MAX_FRAMES: u64 = 600;

#[derive(Debug, thiserror::Error)]
enum HostError {
    #[error("Dispatcher error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("A producer thread panicked")]
    ProducerPanicked,
}

fn main() -> ExitCode {
    let (config, config_error) = match load_config() {
        Ok(config) => (config, None),
        Err(e) => (DispatcherConfig::default(), Some(e)),
    };

    init_tracing(&config);
    if let Some(e) = config_error {
        tracing::warn!("Using default config: {}", e);
    }

    match run(&config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("Host failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn load_config() -> Result<DispatcherConfig, ConfigError> {
    DispatcherConfig::load_from(&config_path()?)
}

fn init_tracing(config: &DispatcherConfig) {
    let default_level = if config.debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

#[tracing::instrument(skip_all)]
fn run(config: &DispatcherConfig) -> Result<(), HostError> {
    let mut frames = FrameLoop::new(config)?;
    let handle = frames.handle();
    tracing::info!(
        "Frame loop running at {} fps on {:?}",
        config.frame_rate,
        frames.dispatcher().main_thread()
    );

    let scene = Scene::shared();
    let palette = Palette::new(vec![mainthread_core::Color::WHITE; 4]);
    let swatches = [Swatch::shared("title", 1.0), Swatch::shared("badge", 0.5)];
    let _bindings = [
        ColorBinding::bind(&palette, &handle, 1, Opacity::Keep, swatches[0].clone()),
        ColorBinding::bind(&palette, &handle, 2, Opacity::Override(0.8), swatches[1].clone()),
    ];

    let (events_tx, events_rx) = unbounded();
    let (stop_tx, stop_rx) = unbounded::<()>();

    let workers = vec![
        producers::spawn_builder(handle.clone(), scene.clone(), 50, events_tx.clone()),
        producers::spawn_blocking_reader(handle.clone(), scene.clone(), 5, events_tx.clone()),
        producers::spawn_async_reader(handle.clone(), scene.clone(), 5, events_tx.clone()),
        producers::spawn_animator(handle.clone(), scene.clone(), events_tx.clone()),
    ];
    let cycler = producers::spawn_palette_cycler(palette.clone(), stop_rx, events_tx);

    let ticker = tick(config.frame_interval());
    let mut finished = 0;

    while frames.frame_count() < MAX_FRAMES {
        select! {
            recv(ticker) -> _ => {
                frames.run_frame(FrameFlags::SIMULATING | FrameFlags::FIRST_TICK | FrameFlags::LAST_TICK)?;
            }
            recv(events_rx) -> event => match event {
                Ok(ProducerEvent::Observed { producer, value }) => {
                    tracing::info!("{} observed {} scene nodes", producer, value);
                }
                Ok(ProducerEvent::Failed { producer, error }) => {
                    tracing::warn!("{} failed: {}", producer, error);
                }
                Ok(ProducerEvent::Finished(producer)) => {
                    tracing::debug!("{} finished", producer);
                    finished += 1;
                }
                Err(_) => {}
            },
        }

        if finished >= workers.len()
            && frames.frame_count() >= MIN_FRAMES
            && frames.dispatcher().steps().is_empty()
        {
            break;
        }
    }

    drop(stop_tx);
    for worker in workers.into_iter().chain(std::iter::once(cycler)) {
        worker.join().map_err(|_| HostError::ProducerPanicked)?;
    }

    // Flush repaints queued by the last palette changes
    frames.run_frame(FrameFlags::SIMULATING)?;

    {
        let scene = scene.lock();
        tracing::info!(
            "Finished after {} frames: {} scene nodes (last {:?})",
            frames.frame_count(),
            scene.node_count(),
            scene.last_node()
        );
    }
    for swatch in &swatches {
        let swatch = swatch.lock();
        tracing::info!("{} ends as {:?}", swatch.name, swatch.color);
    }

    frames.shutdown();
    Ok(())
}
