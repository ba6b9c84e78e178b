//! Video frame delivery for subscribed streams.
//!
//! Pulls decoded I420 frames from a subscription's frame stream and hands
//! them to a platform sink, one background task per stream. Implements the
//! render-target seam the session attaches the mixed stream to.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use tokio::runtime::{Handle, Runtime};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use mixcall_core::sdk::{VideoFrame, VideoRenderTarget};

/// Receives decoded frames from a renderer task.
///
/// Implementations bridge to a platform surface (SurfaceTexture, CALayer,
/// a desktop callback) and must tolerate being called from a tokio worker.
pub trait FrameSink: Send + Sync {
    fn on_frame(&self, frame: &VideoFrame);
}

/// Per-stream renderer handle. Dropping cancels the background task.
struct StreamRenderer {
    cancel_tx: watch::Sender<bool>,
    _handle: JoinHandle<()>,
}

/// Registry of active renderers, keyed by stream id.
static RENDERERS: OnceLock<Mutex<HashMap<String, StreamRenderer>>> = OnceLock::new();

/// Fallback tokio runtime for frame loops (2 worker threads).
static RT: OnceLock<Runtime> = OnceLock::new();

fn renderers() -> &'static Mutex<HashMap<String, StreamRenderer>> {
    RENDERERS.get_or_init(|| Mutex::new(HashMap::new()))
}

fn runtime() -> &'static Runtime {
    RT.get_or_init(|| {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("mixcall-video")
            .enable_all()
            .build()
            .expect("failed to create mixcall-video runtime")
    })
}

/// Start delivering `frames` for `stream_id` to `sink`.
///
/// Replaces any existing renderer for that id. If `rt_handle` is provided
/// the loop runs on that runtime, otherwise on the crate's fallback
/// runtime; callers should pass the application handle so frame delivery
/// shares a runtime with the session.
pub fn start_stream_renderer(
    stream_id: String,
    frames: BoxStream<'static, VideoFrame>,
    sink: Arc<dyn FrameSink>,
    rt_handle: Option<Handle>,
) {
    stop_stream_renderer(&stream_id);

    let (cancel_tx, cancel_rx) = watch::channel(false);
    let id = stream_id.clone();

    let handle = match rt_handle {
        Some(h) => h.spawn(frame_loop(id, frames, sink, cancel_rx)),
        None => runtime().spawn(frame_loop(id, frames, sink, cancel_rx)),
    };

    renderers()
        .lock()
        .expect("renderer lock poisoned")
        .insert(
            stream_id,
            StreamRenderer {
                cancel_tx,
                _handle: handle,
            },
        );
}

/// Stop and remove the renderer for `stream_id`.
pub fn stop_stream_renderer(stream_id: &str) {
    if let Some(renderer) = renderers()
        .lock()
        .expect("renderer lock poisoned")
        .remove(stream_id)
    {
        let _ = renderer.cancel_tx.send(true);
    }
}

/// Whether a renderer is currently registered for `stream_id`.
pub fn is_rendering(stream_id: &str) -> bool {
    renderers()
        .lock()
        .expect("renderer lock poisoned")
        .contains_key(stream_id)
}

async fn frame_loop(
    stream_id: String,
    mut frames: BoxStream<'static, VideoFrame>,
    sink: Arc<dyn FrameSink>,
    mut cancel_rx: watch::Receiver<bool>,
) {
    tracing::info!(stream_id = %stream_id, "frame loop started");

    let mut frame_count: u64 = 0;
    loop {
        tokio::select! {
            _ = cancel_rx.changed() => {
                tracing::info!(stream_id = %stream_id, "frame loop cancelled");
                break;
            }
            frame_opt = frames.next() => {
                match frame_opt {
                    Some(frame) => {
                        frame_count += 1;
                        if frame_count == 1 {
                            tracing::info!(
                                stream_id = %stream_id,
                                width = frame.width,
                                height = frame.height,
                                "first video frame received"
                            );
                        }
                        sink.on_frame(&frame);
                    }
                    None => {
                        tracing::info!(stream_id = %stream_id, "video stream ended");
                        break;
                    }
                }
            }
        }
    }

    tracing::info!(stream_id = %stream_id, "frame loop exited");
}

/// Render target wiring the session's subscribed stream to a [`FrameSink`].
pub struct SurfaceRenderer {
    sink: Arc<dyn FrameSink>,
    rt_handle: Option<Handle>,
}

impl SurfaceRenderer {
    pub fn new(sink: Arc<dyn FrameSink>, rt_handle: Option<Handle>) -> Self {
        Self { sink, rt_handle }
    }
}

impl VideoRenderTarget for SurfaceRenderer {
    fn attach(&self, stream_id: &str, frames: BoxStream<'static, VideoFrame>) {
        start_stream_renderer(
            stream_id.to_string(),
            frames,
            self.sink.clone(),
            self.rt_handle.clone(),
        );
    }

    fn detach(&self, stream_id: &str) {
        stop_stream_renderer(stream_id);
    }
}
