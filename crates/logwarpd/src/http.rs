//! HTTP control surface.
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/` | Links to the export endpoints |
//! | GET | `/json` | JSON metric snapshot |
//! | GET | `/metrics` | Prometheus exposition |
//! | POST | `/quitquitquit` | Graceful shutdown |

use axum::Router;
use axum::extract::State;
use axum::http::{Method, StatusCode, header};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{any, get};
use logwarp_core::ShutdownSignal;
use logwarp_metrics::Exporter;
use tracing::{debug, info};

pub const ROOT_BODY: &str = r#"<a href="/json">json</a>, <a href="/metrics">prometheus metrics</a>"#;
pub const QUIT_BODY: &str = "Exiting...";

#[derive(Clone)]
struct ControlState {
    quit: ShutdownSignal,
}

/// Build the daemon's router: control routes plus the exporter's routes.
pub fn control_router(quit: ShutdownSignal, exporter: &Exporter) -> Router {
    Router::new()
        .route("/", get(handle_root))
        .route("/quitquitquit", any(handle_quit))
        .with_state(ControlState { quit })
        .merge(exporter.router())
}

/// GET /
async fn handle_root() -> Html<&'static str> {
    Html(ROOT_BODY)
}

/// POST /quitquitquit
async fn handle_quit(State(state): State<ControlState>, method: Method) -> Response {
    if method != Method::POST {
        return (StatusCode::METHOD_NOT_ALLOWED, [(header::ALLOW, "POST")]).into_response();
    }

    if state.quit.fire() {
        info!("quit requested over HTTP");
    } else {
        debug!("quit already requested");
    }
    (StatusCode::OK, QUIT_BODY).into_response()
}
