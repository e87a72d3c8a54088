//! Actix Web preview server: MJPEG stream, still frames, debug images, and
//! the status/tuning surface.
//!
//! The server runs on a dedicated thread so the control loop's hot path never
//! competes with HTTP runtime concerns. Every stream subscriber is an
//! independent generator over the frame mailbox; there is no shared cursor.

use std::{sync::Arc, time::Duration};

use actix_web::{
    App, HttpResponse, HttpServer,
    http::header,
    web::{self, Bytes},
};
use anyhow::{Context, Result};
use async_stream::stream;
use tokio::sync::oneshot;
use tracing::error;
use video_ingest::{CameraSource, Frame, encode_jpeg};

use crate::autopilot::{controller::AutopilotController, data::PidUpdate, telemetry};

/// Target inter-frame interval for the MJPEG stream (~30 Hz).
const STREAM_INTERVAL: Duration = Duration::from_millis(33);

/// Bounded wait for the mailbox inside a stream tick; a contended mailbox
/// must never stall a subscriber.
const STREAM_FRAME_TIMEOUT: Duration = Duration::from_millis(10);

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html>
<head><title>lanekeeper</title></head>
<body style="background:#111;color:#eee;font-family:monospace">
<h2>lanekeeper</h2>
<img src="/stream.mjpg" alt="live feed" />
<p><a href="/status" style="color:#8cf">status</a>
 | <a href="/pid" style="color:#8cf">pid</a>
 | <a href="/debug/threshold.jpg" style="color:#8cf">threshold</a>
 | <a href="/debug/overlay.jpg" style="color:#8cf">overlay</a>
 | <a href="/metrics" style="color:#8cf">metrics</a></p>
</body>
</html>
"#;

/// Shared state backing HTTP handlers.
struct ServerState {
    frames: Arc<CameraSource>,
    controller: Arc<AutopilotController>,
    jpeg_quality: u8,
}

#[derive(Default)]
/// Handle for the preview server thread.
pub struct PreviewServer {
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl PreviewServer {
    /// Signal the server to stop and block until the thread exits.
    pub fn stop(self) {
        if let Some(tx) = self.shutdown {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle {
            let _ = handle.join();
        }
    }
}

/// Spawn the preview server thread and return a handle that can stop it.
pub fn spawn_preview_server(
    frames: Arc<CameraSource>,
    controller: Arc<AutopilotController>,
    jpeg_quality: u8,
    port: u16,
) -> Result<PreviewServer> {
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let handle = std::thread::Builder::new()
        .name("preview-server".into())
        .spawn(move || {
            if let Err(err) = actix_web::rt::System::new().block_on(async move {
                let server = HttpServer::new(move || {
                    App::new()
                        .app_data(web::Data::new(ServerState {
                            frames: frames.clone(),
                            controller: controller.clone(),
                            jpeg_quality,
                        }))
                        .route("/", web::get().to(index_route))
                        .route("/frame.jpg", web::get().to(frame_handler))
                        .route("/stream.mjpg", web::get().to(stream_handler))
                        .route("/debug/{key}.jpg", web::get().to(debug_image_handler))
                        .route("/status", web::get().to(status_handler))
                        .route("/pid", web::get().to(pid_get_handler))
                        .route("/pid", web::post().to(pid_post_handler))
                        .route("/metrics", web::get().to(metrics_handler))
                })
                .bind(("0.0.0.0", port))?
                .run();

                let srv_handle = server.handle();
                actix_web::rt::spawn(async move {
                    let _ = shutdown_rx.await;
                    srv_handle.stop(true).await;
                });

                server.await
            }) {
                error!("HTTP server error: {err}");
            }
        })
        .context("Failed to spawn preview server thread")?;
    Ok(PreviewServer {
        shutdown: Some(shutdown_tx),
        handle: Some(handle),
    })
}

async fn index_route() -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/html; charset=utf-8")
        .body(INDEX_HTML)
}

/// Encode a frame off the async runtime.
async fn encode_off_thread(frame: Frame, quality: u8) -> Option<Vec<u8>> {
    match web::block(move || encode_jpeg(&frame, quality)).await {
        Ok(Ok(jpeg)) => Some(jpeg),
        Ok(Err(err)) => {
            error!("frame encode failed: {err}");
            None
        }
        Err(_) => None,
    }
}

/// Return a single JPEG of the freshest frame.
async fn frame_handler(state: web::Data<ServerState>) -> HttpResponse {
    let Some(frame) = state.frames.get_frame(STREAM_FRAME_TIMEOUT) else {
        return HttpResponse::NoContent().finish();
    };
    match encode_off_thread(frame, state.jpeg_quality).await {
        Some(jpeg) => HttpResponse::Ok().content_type("image/jpeg").body(jpeg),
        None => HttpResponse::NoContent().finish(),
    }
}

/// Stream the MJPEG feed over a multipart response.
///
/// Each tick fetches with a short timeout and re-arms on any failure; a
/// single absent frame or encode error never terminates the stream.
async fn stream_handler(state: web::Data<ServerState>) -> HttpResponse {
    let state = state.clone();
    let stream = stream! {
        let mut interval = actix_web::rt::time::interval(STREAM_INTERVAL);
        loop {
            interval.tick().await;
            let Some(frame) = state.frames.get_frame(STREAM_FRAME_TIMEOUT) else {
                continue;
            };
            let Some(jpeg) = encode_off_thread(frame, state.jpeg_quality).await else {
                continue;
            };
            let mut payload = Vec::with_capacity(jpeg.len() + 64);
            payload.extend_from_slice(b"--frame\r\n");
            payload.extend_from_slice(b"Content-Type: image/jpeg\r\n\r\n");
            payload.extend_from_slice(&jpeg);
            payload.extend_from_slice(b"\r\n");
            yield Ok::<Bytes, actix_web::Error>(Bytes::from(payload));
        }
    };

    HttpResponse::Ok()
        .insert_header((header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"))
        .append_header(("Cache-Control", "no-cache"))
        .append_header((
            "Content-Type",
            "multipart/x-mixed-replace; boundary=frame",
        ))
        .streaming(stream)
}

/// Serve one named debug image; an unknown key is "not available", never an
/// error.
async fn debug_image_handler(
    key: web::Path<String>,
    state: web::Data<ServerState>,
) -> HttpResponse {
    let Some(frame) = state.controller.debug_image(&key) else {
        return HttpResponse::NoContent().finish();
    };
    match encode_off_thread(frame, state.jpeg_quality).await {
        Some(jpeg) => HttpResponse::Ok().content_type("image/jpeg").body(jpeg),
        None => HttpResponse::NoContent().finish(),
    }
}

async fn status_handler(state: web::Data<ServerState>) -> HttpResponse {
    HttpResponse::Ok().json(state.controller.status())
}

async fn pid_get_handler(state: web::Data<ServerState>) -> HttpResponse {
    HttpResponse::Ok().json(state.controller.pid_gains())
}

async fn pid_post_handler(
    update: web::Json<PidUpdate>,
    state: web::Data<ServerState>,
) -> HttpResponse {
    state.controller.update_pid(update.into_inner());
    HttpResponse::Ok().json(state.controller.pid_gains())
}

async fn metrics_handler() -> HttpResponse {
    match telemetry::prometheus_handle() {
        Some(handle) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(handle.render()),
        None => HttpResponse::ServiceUnavailable().finish(),
    }
}
