//! HTTPS front of the webhook.
//!
//! The API server posts `AdmissionReview` documents to `/mutate`; every JSON review is
//! answered with a 200 carrying the matching `AdmissionResponse`.

use std::error::Error as StdError;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use axum_server::Handle;
use axum_server::tls_rustls::RustlsConfig;
use kube::core::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview};
use serde_json::Value;
use tokio::signal;
use tracing::{error, info};

use crate::admission::{self, Injector};

const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(10);

pub fn router(injector: Arc<Injector>) -> Router {
    Router::new()
        .route("/mutate", post(mutate_handler))
        .route("/healthz", get(|| async { "ok" }))
        .with_state(injector)
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(';').next())
        .is_some_and(|mime| mime.trim().eq_ignore_ascii_case("application/json"))
}

pub async fn mutate_handler(
    State(injector): State<Arc<Injector>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if body.is_empty() {
        error!("empty body");
        return (StatusCode::BAD_REQUEST, "empty body").into_response();
    }

    if !is_json(&headers) {
        error!(
            { content_type = ?headers.get(CONTENT_TYPE) },
            "unexpected content type, expect application/json"
        );
        return (
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            "invalid Content-Type, expect `application/json`",
        )
            .into_response();
    }

    let mut review: Value = match serde_json::from_slice(&body) {
        Ok(review) => review,
        Err(err) => {
            error!({ err = &err as &dyn StdError }, "can't decode body");
            return Json(unreadable(None, None, err).into_review()).into_response();
        }
    };

    let api_version = review
        .get("apiVersion")
        .and_then(Value::as_str)
        .map(str::to_owned);
    let uid = review
        .pointer("/request/uid")
        .and_then(Value::as_str)
        .map(str::to_owned);

    // Objects stay raw until the injector decodes them, so a malformed pod is admitted.
    let object = review
        .pointer_mut("/request/object")
        .map(Value::take)
        .filter(|object| !object.is_null());
    if let Some(old_object) = review.pointer_mut("/request/oldObject") {
        old_object.take();
    }

    let review = match serde_json::from_value::<AdmissionReview<DynamicObject>>(review) {
        Ok(review) => review,
        Err(err) => {
            error!({ err = &err as &dyn StdError }, "can't decode admission review");
            return Json(unreadable(api_version, uid, err).into_review()).into_response();
        }
    };

    let req: AdmissionRequest<DynamicObject> = match review.try_into() {
        Ok(req) => req,
        Err(err) => {
            error!({ err = &err as &dyn StdError }, "admission review carries no request");
            return Json(unreadable(api_version, None, err).into_review()).into_response();
        }
    };

    Json(admission::mutate(&injector, &req, object.as_ref()).into_review()).into_response()
}

/// Response to a review that could not be decoded. With a request uid to echo the
/// pod is still admitted, otherwise all that can be sent is kube's invalid response.
fn unreadable(
    api_version: Option<String>,
    uid: Option<String>,
    reason: impl ToString,
) -> AdmissionResponse {
    let mut res = AdmissionResponse::invalid(reason);
    if let Some(api_version) = api_version {
        res.types.api_version = api_version;
    }
    if let Some(uid) = uid {
        res.uid = uid;
        res.allowed = true;
    }
    res
}

async fn shutdown_signal(handle: Handle) {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!({ err = &err as &dyn StdError }, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                error!({ err = &err as &dyn StdError }, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("got OS shutdown signal, shutting down webhook server gracefully");
    handle.graceful_shutdown(Some(SHUTDOWN_GRACE_PERIOD));
}

pub async fn serve(addr: SocketAddr, tls: RustlsConfig, injector: Arc<Injector>) -> io::Result<()> {
    let handle = Handle::new();
    tokio::spawn(shutdown_signal(handle.clone()));

    info!({ addr = %addr }, "webhook server is listening");
    axum_server::bind_rustls(addr, tls)
        .handle(handle)
        .serve(router(injector).into_make_service())
        .await
}
