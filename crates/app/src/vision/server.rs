//! Actix Web routes: pages, the four detection feeds, stop, and the status,
//! alert event and metrics endpoints.
//!
//! Feed handlers select the mode on a blocking thread (opening a camera can
//! take seconds), then stream chunks produced by the feed's worker thread.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use actix_web::{
    App, HttpResponse, HttpServer,
    http::header,
    web::{self, Bytes},
};
use anyhow::{Context, Result};
use async_stream::stream;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{error, info, warn};

use crate::vision::{
    alert::AlertEvent,
    controller::ControllerError,
    data::StatusResponse,
    encoding::MULTIPART_CONTENT_TYPE,
    mode::DetectionMode,
    pipeline::{StreamContext, spawn_stream},
};

/// Shared state backing HTTP handlers.
pub struct ServerState {
    pub stream: Arc<StreamContext>,
    pub alert_events: broadcast::Sender<AlertEvent>,
    pub metrics: Option<PrometheusHandle>,
}

impl ServerState {
    pub fn new(stream: Arc<StreamContext>, alert_events: broadcast::Sender<AlertEvent>) -> Self {
        Self {
            stream,
            alert_events,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}

/// Register every route on an app or test service.
pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/", web::get().to(index_route))
        .route("/full_body", web::get().to(full_body_route))
        .route("/stop_detection", web::get().to(stop_handler))
        .route("/status", web::get().to(status_handler))
        .route("/alert_events", web::get().to(alert_events_handler))
        .route("/metrics", web::get().to(metrics_handler));

    for mode in DetectionMode::STREAMING {
        if let Some(path) = mode.feed_path() {
            cfg.route(
                path,
                web::get().to(move |state: web::Data<ServerState>| feed_handler(mode, state)),
            );
        }
    }
}

/// Run the HTTP server until it is shut down.
pub async fn serve(bind: SocketAddr, state: ServerState) -> Result<()> {
    let data = web::Data::new(state);
    info!("serving detection feeds on http://{bind}");
    HttpServer::new(move || App::new().app_data(data.clone()).configure(routes))
        .bind(bind)
        .with_context(|| format!("failed to bind {bind}"))?
        .run()
        .await
        .context("HTTP server error")
}

async fn feed_handler(mode: DetectionMode, state: web::Data<ServerState>) -> HttpResponse {
    let controller = state.stream.controller.clone();
    let lease = match web::block(move || controller.select(mode)).await {
        Ok(Ok(lease)) => lease,
        Ok(Err(err @ ControllerError::SourceUnavailable { .. })) => {
            warn!("{mode} feed unavailable: {err}");
            return HttpResponse::ServiceUnavailable()
                .content_type("text/plain; charset=utf-8")
                .body(format!("Camera unavailable: {err}"));
        }
        Ok(Err(err @ ControllerError::Superseded { .. })) => {
            info!("{mode} feed request lost to a newer selection");
            return HttpResponse::Conflict()
                .content_type("text/plain; charset=utf-8")
                .body(err.to_string());
        }
        Ok(Err(err)) => {
            error!("{mode} feed selection failed: {err}");
            return HttpResponse::InternalServerError().body(err.to_string());
        }
        Err(err) => {
            error!("{mode} feed selection did not complete: {err}");
            return HttpResponse::InternalServerError().finish();
        }
    };

    let mut rx = match spawn_stream(state.stream.clone(), lease) {
        Ok(rx) => rx,
        Err(err) => {
            error!("{err:#}");
            state.stream.controller.finish(&lease);
            return HttpResponse::InternalServerError().finish();
        }
    };

    let body = stream! {
        while let Some(chunk) = rx.recv().await {
            yield Ok::<Bytes, actix_web::Error>(chunk);
        }
    };

    HttpResponse::Ok()
        .insert_header((header::CACHE_CONTROL, "no-cache, no-store"))
        .insert_header((header::CONTENT_TYPE, MULTIPART_CONTENT_TYPE))
        .streaming(body)
}

async fn stop_handler(state: web::Data<ServerState>) -> HttpResponse {
    let controller = state.stream.controller.clone();
    if let Err(err) = web::block(move || controller.stop()).await {
        error!("stop did not complete: {err}");
        return HttpResponse::InternalServerError().finish();
    }
    HttpResponse::Ok()
        .content_type("text/plain; charset=utf-8")
        .body("Stopped detection")
}

async fn status_handler(state: web::Data<ServerState>) -> HttpResponse {
    let stream = &state.stream;
    HttpResponse::Ok().json(StatusResponse {
        mode: stream.controller.mode(),
        open_handles: stream.controller.open_handles(),
        active_streams: stream.active_streams(),
        restricted_class_ids: stream.processor.restricted().ids().collect(),
        alert_sinks: stream
            .alerts
            .sink_names()
            .into_iter()
            .map(str::to_string)
            .collect(),
    })
}

/// Stream alert events as Server-Sent Events.
async fn alert_events_handler(state: web::Data<ServerState>) -> HttpResponse {
    let mut rx = state.alert_events.subscribe();
    let body = stream! {
        yield Ok::<Bytes, actix_web::Error>(Bytes::from_static(b"retry: 1000\n\n"));
        let mut keep_alive = actix_web::rt::time::interval(Duration::from_secs(15));
        keep_alive.tick().await;
        loop {
            let chunk = tokio::select! {
                event = rx.recv() => match event {
                    Ok(event) => alert_chunk(&event),
                    Err(RecvError::Lagged(skipped)) => {
                        Bytes::from(format!(": skipped {skipped} alert(s)\n\n"))
                    }
                    Err(RecvError::Closed) => break,
                },
                _ = keep_alive.tick() => Bytes::from_static(b": keep-alive\n\n"),
            };
            yield Ok::<Bytes, actix_web::Error>(chunk);
        }
    };

    HttpResponse::Ok()
        .insert_header((header::CACHE_CONTROL, "no-cache"))
        .insert_header((header::CONTENT_TYPE, "text/event-stream"))
        .streaming(body)
}

fn alert_chunk(event: &AlertEvent) -> Bytes {
    match serde_json::to_string(event) {
        Ok(json) => Bytes::from(format!(
            "id: {}\nevent: alert\ndata: {json}\n\n",
            event.sequence
        )),
        Err(err) => Bytes::from(format!("event: error\ndata: {err}\n\n")),
    }
}

async fn metrics_handler(state: web::Data<ServerState>) -> HttpResponse {
    match &state.metrics {
        Some(handle) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(handle.render()),
        None => HttpResponse::NotFound()
            .content_type("text/plain; charset=utf-8")
            .body("metrics are disabled; start with --metrics"),
    }
}

async fn index_route() -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/html; charset=utf-8")
        .body(crate::html::INDEX_HTML)
}

async fn full_body_route() -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/html; charset=utf-8")
        .body(crate::html::FULL_BODY_HTML)
}
