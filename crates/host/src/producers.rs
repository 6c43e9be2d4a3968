//! Background threads scheduling work onto the main thread

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;

use mainthread_core::{Color, DispatchHandle, Palette, Sequence, TaskError};

use crate::scene::Scene;

/// Message from a producer to the host loop
#[derive(Debug)]
pub enum ProducerEvent {
    /// A value computed on the main thread came back
    Observed {
        producer: &'static str,
        value: usize,
    },
    /// An awaitable failed
    Failed {
        producer: &'static str,
        error: String,
    },
    /// The producer has nothing left to do
    Finished(&'static str),
}

/// Fire-and-forget: add nodes to the scene from a worker
pub fn spawn_builder(
    handle: DispatchHandle,
    scene: Arc<Mutex<Scene>>,
    nodes: usize,
    events: Sender<ProducerEvent>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        for i in 0..nodes {
            let scene = scene.clone();
            if let Err(e) = handle.enqueue_fn(move || scene.lock().add_node(format!("node-{}", i))) {
                tracing::warn!("Builder stopped: {}", e);
                break;
            }
        }
        let _ = events.send(ProducerEvent::Finished("builder"));
    })
}

/// Blocking await: query the scene and wait for the answer on this thread
pub fn spawn_blocking_reader(
    handle: DispatchHandle,
    scene: Arc<Mutex<Scene>>,
    queries: usize,
    events: Sender<ProducerEvent>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        for _ in 0..queries {
            let scene = scene.clone();
            let outcome = handle
                .enqueue_and_await(move || scene.lock().node_count())
                .map(|completion| completion.wait());
            if !report("blocking-reader", outcome, &events) {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        let _ = events.send(ProducerEvent::Finished("blocking-reader"));
    })
}

/// Cooperative await: the same query driven as a future
pub fn spawn_async_reader(
    handle: DispatchHandle,
    scene: Arc<Mutex<Scene>>,
    queries: usize,
    events: Sender<ProducerEvent>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let events_ref = &events;
        pollster::block_on(async move {
            for _ in 0..queries {
                let scene = scene.clone();
                let outcome = match handle.enqueue_and_await(move || scene.lock().node_count()) {
                    Ok(completion) => Ok(completion.await),
                    Err(e) => Err(e),
                };
                if !report("async-reader", outcome, events_ref) {
                    break;
                }
            }
        });
        let _ = events.send(ProducerEvent::Finished("async-reader"));
    })
}

/// Suspendable work: a sequence of scene edits spread over several ticks
pub fn spawn_animator(
    handle: DispatchHandle,
    scene: Arc<Mutex<Scene>>,
    events: Sender<ProducerEvent>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let (start, middle, end) = (scene.clone(), scene.clone(), scene);
        let sequence = Sequence::new()
            .then(move || start.lock().add_node("fade-start"))
            .wait_ticks(5)
            .then(move || middle.lock().add_node("fade-middle"))
            .wait_for(Duration::from_millis(100))
            .then(move || end.lock().add_node("fade-end"));

        if let Err(e) = handle.enqueue_coroutine(sequence) {
            tracing::warn!("Animator could not start: {}", e);
        }
        let _ = events.send(ProducerEvent::Finished("animator"));
    })
}

/// Palette writer: recolors entries off the main thread until told to stop
pub fn spawn_palette_cycler(
    palette: Palette,
    stop: Receiver<()>,
    events: Sender<ProducerEvent>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let mut step = 0u32;
        loop {
            match stop.recv_timeout(Duration::from_millis(50)) {
                Err(RecvTimeoutError::Timeout) => {}
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }

            step += 1;
            let shade = (step % 10) as f32 / 10.0;
            let index = step as usize % palette.len().max(1);
            palette.set_color(index, Color::rgb(shade, 1.0 - shade, 0.5));
        }
        let _ = events.send(ProducerEvent::Finished("palette-cycler"));
    })
}

/// Forward an awaited outcome, returns `false` when the producer should stop
fn report(
    producer: &'static str,
    outcome: Result<Result<usize, TaskError>, mainthread_core::DispatchError>,
    events: &Sender<ProducerEvent>,
) -> bool {
    let event = match outcome {
        Ok(Ok(value)) => ProducerEvent::Observed { producer, value },
        Ok(Err(error)) => ProducerEvent::Failed {
            producer,
            error: error.to_string(),
        },
        Err(error) => {
            tracing::warn!("{} stopped: {}", producer, error);
            return false;
        }
    };
    events.send(event).is_ok()
}
