use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::{sink::SinkExt, stream::StreamExt};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::controller::{AutoConfirm, CaptureSessionController};
use crate::error::CaptureError;
use crate::live_status::ControllerSnapshot;
use crate::media::ZoomMode;

const PUSH_INTERVAL: Duration = Duration::from_millis(500);

type AppState = Arc<CaptureSessionController>;

/// Maps controller errors onto HTTP status codes with a JSON body
pub struct ApiError(CaptureError);

impl From<CaptureError> for ApiError {
    fn from(e: CaptureError) -> Self {
        ApiError(e)
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            CaptureError::AlreadyRunning | CaptureError::NotRunning => StatusCode::CONFLICT,
            CaptureError::InsufficientStorage => StatusCode::INSUFFICIENT_STORAGE,
            CaptureError::LowBatteryDeclined => StatusCode::PRECONDITION_REQUIRED,
            CaptureError::TiltOutOfTolerance { .. }
            | CaptureError::BaselineUnset
            | CaptureError::PitchUnknown
            | CaptureError::PositionUnavailable => StatusCode::PRECONDITION_FAILED,
            CaptureError::InvalidParameters(_) => StatusCode::UNPROCESSABLE_ENTITY,
            CaptureError::Media(_) => StatusCode::SERVICE_UNAVAILABLE,
            CaptureError::Network(_) => StatusCode::BAD_GATEWAY,
            CaptureError::Sensor(_) | CaptureError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let body = ErrorBody {
            error: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[derive(Deserialize, Default)]
pub struct StartRequest {
    /// Operator's answer to the low-battery question, asked up front
    #[serde(default)]
    pub confirm_low_battery: bool,
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub struct StartResponse {
    pub session_id: String,
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub struct CaptureResponse {
    pub sequence_number: u32,
    pub filename: String,
}

#[derive(Deserialize)]
pub struct SiteRequest {
    pub site_name: String,
}

#[derive(Deserialize)]
pub struct DateRequest {
    pub date: String,
}

#[derive(Deserialize)]
pub struct ZoomRequest {
    pub mode: ZoomMode,
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub struct ZoomResponse {
    pub mode: ZoomMode,
    pub factor: f64,
}

pub fn router(controller: Arc<CaptureSessionController>) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/ws", get(ws_handler))
        .route("/api/status", get(status_handler))
        .route("/api/start", post(start_handler))
        .route("/api/capture", post(capture_handler))
        .route("/api/stop", post(stop_handler))
        .route("/api/site", post(site_handler))
        .route("/api/date", post(date_handler))
        .route("/api/zoom", post(zoom_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(controller)
}

pub async fn serve(controller: Arc<CaptureSessionController>, port: u16) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;
    info!("[dashboard] operator surface at http://{}", addr);
    axum::serve(listener, router(controller)).await?;
    Ok(())
}

async fn index_handler() -> Html<&'static str> {
    Html(include_str!("operator.html"))
}

async fn status_handler(State(controller): State<AppState>) -> Result<Json<ControllerSnapshot>, ApiError> {
    Ok(Json(controller.snapshot()?))
}

async fn start_handler(
    State(controller): State<AppState>,
    body: Option<Json<StartRequest>>,
) -> Result<Json<StartResponse>, ApiError> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let prompt = AutoConfirm(request.confirm_low_battery);
    let session_id = controller.start(&prompt).await?;
    Ok(Json(StartResponse { session_id }))
}

async fn capture_handler(
    State(controller): State<AppState>,
) -> Result<(StatusCode, Json<CaptureResponse>), ApiError> {
    // Upload keeps running after the response; its result shows up in status
    let ticket = controller.capture().await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(CaptureResponse {
            sequence_number: ticket.sequence_number,
            filename: ticket.filename,
        }),
    ))
}

async fn stop_handler(State(controller): State<AppState>) -> Result<StatusCode, ApiError> {
    controller.stop()?;
    Ok(StatusCode::NO_CONTENT)
}

async fn site_handler(
    State(controller): State<AppState>,
    Json(request): Json<SiteRequest>,
) -> Result<StatusCode, ApiError> {
    controller.set_site_name(&request.site_name)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn date_handler(
    State(controller): State<AppState>,
    Json(request): Json<DateRequest>,
) -> Result<StatusCode, ApiError> {
    controller.set_date(&request.date)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn zoom_handler(
    State(controller): State<AppState>,
    Json(request): Json<ZoomRequest>,
) -> Result<Json<ZoomResponse>, ApiError> {
    let factor = controller.set_zoom_mode(request.mode).await?;
    Ok(Json(ZoomResponse {
        mode: request.mode,
        factor,
    }))
}

async fn ws_handler(ws: WebSocketUpgrade, State(controller): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, controller))
}

async fn handle_socket(socket: WebSocket, controller: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let mut ticker = tokio::time::interval(PUSH_INTERVAL);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let json = match controller.snapshot().map(|s| serde_json::to_string(&s)) {
                    Ok(Ok(json)) => json,
                    _ => break,
                };
                if sender.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    // Inbound frames carry nothing; intents go through the POST routes
                    Some(Ok(_)) => {}
                }
            }
        }
    }
    debug!("[dashboard] websocket client gone");
}
