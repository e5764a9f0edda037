use crate::{
    app::{AppError, AppLocal},
    audit::AuditQuery,
    auth,
    config::Config,
    records::{MediaCreate, MediaQuery, PersonCreate, PersonQuery, PersonUpdate},
    recognition::SearchParams,
    roles::{CallerContext, UserRole},
};
use axum::{
    extract::{DefaultBodyLimit, Path, Query, State},
    http::HeaderMap,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{fmt::Debug, sync::Arc};
use tokio::{signal, sync::RwLock};

#[derive(Clone)]
pub struct SharedState {
    pub app: Arc<RwLock<AppLocal>>,
}

async fn start_app(app: AppLocal, bind_addr: String) {
    let app = Arc::new(RwLock::new(app));

    let signal = shutdown_signal(app.clone());
    let shared_state = Arc::new(SharedState { app: app.clone() });

    async fn shutdown_signal(app: Arc<RwLock<AppLocal>>) {
        let ctrl_c = async {
            signal::ctrl_c()
                .await
                .expect("failed to install Ctrl+C handler");
        };

        let terminate = async {
            signal::unix::signal(signal::unix::SignalKind::terminate())
                .expect("failed to install signal handler")
                .recv()
                .await;
        };

        tokio::select! {
            _ = ctrl_c => {
                let mut app = app.write().await;
                app.shutdown();

                log::warn!("waiting for queues to stop");
                app.wait_task_queue_finish();
            },
            _ = terminate => {},
        }
    }

    let router = router(shared_state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await.unwrap();
    log::info!("listening on {bind_addr}");
    axum::serve(listener, router)
        .with_graceful_shutdown(signal)
        .await
        .unwrap();
}

pub fn router(shared_state: Arc<SharedState>) -> Router {
    Router::new()
        .route("/api/people/search_by_face", post(search_by_face))
        .route("/api/people/create", post(person_create))
        .route("/api/people/search", post(person_search))
        .route("/api/people/:id", get(person_get))
        .route("/api/people/update", post(person_update))
        .route("/api/people/delete", post(person_delete))
        .route("/api/media/create", post(media_create))
        .route("/api/media/search", post(media_search))
        .route("/api/media/:id", get(media_get))
        .route("/api/media/delete", post(media_delete))
        .route("/api/audit", get(audit_list))
        .route("/api/health", get(health))
        .route("/api/task_queue", get(task_queue))
        .route("/api/config", get(get_config))
        .route("/api/config", post(update_config))
        .layer(DefaultBodyLimit::max(20 * 1024 * 1024))
        .layer(
            tower_http::trace::TraceLayer::new_for_http()
                .make_span_with(
                    tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO),
                )
                .on_response(
                    tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO),
                ),
        )
        .with_state(shared_state)
}

pub fn start_daemon(app: AppLocal, bind_addr: String) {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(async { start_app(app, bind_addr).await });
}

// Make our own error that wraps `AppError`.
#[derive(Debug)]
struct HttpError(AppError);

// Tell axum how to convert `AppError` into a response.
impl IntoResponse for HttpError {
    fn into_response(self) -> axum::response::Response {
        match self.0 {
            AppError::NotFound => (
                axum::http::StatusCode::NOT_FOUND,
                json!({"error": self.0.to_string()}).to_string(),
            ),
            AppError::Forbidden(_) => (
                axum::http::StatusCode::FORBIDDEN,
                json!({"error": self.0.to_string()}).to_string(),
            ),
            AppError::Conflict(_) => (
                axum::http::StatusCode::CONFLICT,
                json!({"error": self.0.to_string()}).to_string(),
            ),
            AppError::Validation(_) => (
                axum::http::StatusCode::BAD_REQUEST,
                json!({"error": self.0.to_string()}).to_string(),
            ),
            AppError::Unauthorized(_) => (
                axum::http::StatusCode::UNAUTHORIZED,
                json!({"error": self.0.to_string()}).to_string(),
            ),
            AppError::Unprocessable(_) => (
                axum::http::StatusCode::UNPROCESSABLE_ENTITY,
                json!({"error": self.0.to_string()}).to_string(),
            ),
            AppError::Base64(_) => {
                log::error!("{self:?}");
                (
                    axum::http::StatusCode::BAD_REQUEST,
                    json!({"error": self.0.to_string()}).to_string(),
                )
            }
            AppError::IO(_) => {
                log::error!("{self:?}");
                (
                    axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                    json!({"error": self.0.to_string()}).to_string(),
                )
            }
            AppError::Other(_) => {
                log::error!("{self:?}");
                (
                    axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                    json!({"error": self.0.to_string()}).to_string(),
                )
            }
        }
        .into_response()
    }
}

// This enables using `?` on functions that return `Result<_, AppError>`
// to turn them into `Result<_, HttpError>` without manual wrapping.
impl<E> From<E> for HttpError
where
    E: Into<AppError>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

/// Resolve the caller from trusted gateway headers, checking the optional
/// static API token first.
fn extract_caller(headers: &HeaderMap, config: &Config) -> Result<CallerContext, AppError> {
    if let Some(expected) = &config.api_token {
        let header = headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");

        let token = auth::extract_bearer_token(header).unwrap_or("");
        if !auth::validate_token(token, expected) {
            return Err(AppError::Unauthorized("invalid api token".to_string()));
        }
    }

    let user_id = headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("missing x-user-id header".to_string()))?
        .parse::<u64>()
        .map_err(|_| AppError::Validation("x-user-id must be a number".to_string()))?;

    let role = headers
        .get("x-user-role")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("missing x-user-role header".to_string()))?
        .parse::<UserRole>()
        .map_err(AppError::Validation)?;

    Ok(CallerContext::new(user_id, role))
}

#[derive(Deserialize, Serialize)]
pub struct FaceSearchRequest {
    pub image_b64: String,

    #[serde(default)]
    pub limit: Option<usize>,

    #[serde(default)]
    pub threshold: Option<f32>,
}

impl Debug for FaceSearchRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "FaceSearchRequest {{ image_b64: [REDACTED], limit: {:?}, threshold: {:?} }}",
            self.limit, self.threshold
        )
    }
}

async fn search_by_face(
    State(state): State<Arc<SharedState>>,
    headers: HeaderMap,
    Json(payload): Json<FaceSearchRequest>,
) -> Result<axum::Json<Vec<crate::recognition::FaceMatch>>, HttpError> {
    log::debug!("payload: {payload:?}");

    let app = state.app.clone();

    tokio::task::block_in_place(move || {
        let app = app.blocking_read();
        let caller = extract_caller(&headers, &app.config().read().unwrap())?;

        let image = STANDARD.decode(payload.image_b64)?;

        let params = SearchParams {
            limit: payload.limit,
            threshold: payload.threshold,
        };

        app.search_by_face(&image, params, &caller)
            .map(Into::into)
            .map_err(Into::into)
    })
}

async fn person_create(
    State(state): State<Arc<SharedState>>,
    headers: HeaderMap,
    Json(payload): Json<PersonCreate>,
) -> Result<axum::Json<crate::records::Person>, HttpError> {
    log::debug!("payload: {payload:?}");

    let app = state.app.clone();

    tokio::task::block_in_place(move || {
        let app = app.blocking_read();
        let caller = extract_caller(&headers, &app.config().read().unwrap())?;

        app.create_person(payload, &caller)
            .map(Into::into)
            .map_err(Into::into)
    })
}

async fn person_search(
    State(state): State<Arc<SharedState>>,
    headers: HeaderMap,
    Json(payload): Json<PersonQuery>,
) -> Result<axum::Json<Vec<crate::records::Person>>, HttpError> {
    log::debug!("payload: {payload:?}");

    let app = state.app.clone();

    tokio::task::block_in_place(move || {
        let app = app.blocking_read();
        let caller = extract_caller(&headers, &app.config().read().unwrap())?;

        app.search_people(payload, &caller)
            .map(Into::into)
            .map_err(Into::into)
    })
}

async fn person_get(
    State(state): State<Arc<SharedState>>,
    headers: HeaderMap,
    Path(id): Path<u64>,
) -> Result<axum::Json<crate::records::Person>, HttpError> {
    let app = state.app.clone();

    tokio::task::block_in_place(move || {
        let app = app.blocking_read();
        let caller = extract_caller(&headers, &app.config().read().unwrap())?;

        app.get_person(id, &caller).map(Into::into).map_err(Into::into)
    })
}

#[derive(Debug, Deserialize)]
pub struct PersonUpdateRequest {
    pub id: u64,
    #[serde(flatten)]
    pub update: PersonUpdate,
}

async fn person_update(
    State(state): State<Arc<SharedState>>,
    headers: HeaderMap,
    Json(payload): Json<PersonUpdateRequest>,
) -> Result<axum::Json<crate::records::Person>, HttpError> {
    log::debug!("payload: {payload:?}");

    let app = state.app.clone();

    tokio::task::block_in_place(move || {
        let app = app.blocking_read();
        let caller = extract_caller(&headers, &app.config().read().unwrap())?;

        app.update_person(payload.id, payload.update, &caller)
            .map(Into::into)
            .map_err(Into::into)
    })
}

#[derive(Debug, Deserialize)]
pub struct DeleteRequest {
    pub id: u64,
}

async fn person_delete(
    State(state): State<Arc<SharedState>>,
    headers: HeaderMap,
    Json(payload): Json<DeleteRequest>,
) -> Result<(), HttpError> {
    log::debug!("payload: {payload:?}");

    let app = state.app.clone();

    tokio::task::block_in_place(move || {
        let app = app.blocking_read();
        let caller = extract_caller(&headers, &app.config().read().unwrap())?;

        app.delete_person(payload.id, &caller).map_err(Into::into)
    })
}

async fn media_create(
    State(state): State<Arc<SharedState>>,
    headers: HeaderMap,
    Json(payload): Json<MediaCreate>,
) -> Result<axum::Json<crate::records::Media>, HttpError> {
    log::debug!("payload: {payload:?}");

    let app = state.app.clone();

    tokio::task::block_in_place(move || {
        let app = app.blocking_read();
        let caller = extract_caller(&headers, &app.config().read().unwrap())?;

        app.create_media(payload, &caller)
            .map(Into::into)
            .map_err(Into::into)
    })
}

async fn media_search(
    State(state): State<Arc<SharedState>>,
    headers: HeaderMap,
    Json(payload): Json<MediaQuery>,
) -> Result<axum::Json<Vec<crate::records::Media>>, HttpError> {
    log::debug!("payload: {payload:?}");

    let app = state.app.clone();

    tokio::task::block_in_place(move || {
        let app = app.blocking_read();
        let caller = extract_caller(&headers, &app.config().read().unwrap())?;

        app.search_media(payload, &caller)
            .map(Into::into)
            .map_err(Into::into)
    })
}

async fn media_get(
    State(state): State<Arc<SharedState>>,
    headers: HeaderMap,
    Path(id): Path<u64>,
) -> Result<axum::Json<crate::records::Media>, HttpError> {
    let app = state.app.clone();

    tokio::task::block_in_place(move || {
        let app = app.blocking_read();
        let caller = extract_caller(&headers, &app.config().read().unwrap())?;

        app.get_media(id, &caller).map(Into::into).map_err(Into::into)
    })
}

async fn media_delete(
    State(state): State<Arc<SharedState>>,
    headers: HeaderMap,
    Json(payload): Json<DeleteRequest>,
) -> Result<(), HttpError> {
    log::debug!("payload: {payload:?}");

    let app = state.app.clone();

    tokio::task::block_in_place(move || {
        let app = app.blocking_read();
        let caller = extract_caller(&headers, &app.config().read().unwrap())?;

        app.delete_media(payload.id, &caller).map_err(Into::into)
    })
}

async fn audit_list(
    State(state): State<Arc<SharedState>>,
    headers: HeaderMap,
    Query(query): Query<AuditQuery>,
) -> Result<axum::Json<Vec<crate::audit::AuditEntry>>, HttpError> {
    let app = state.app.clone();

    tokio::task::block_in_place(move || {
        let app = app.blocking_read();
        let _caller = extract_caller(&headers, &app.config().read().unwrap())?;

        app.audit_list(query).map(Into::into).map_err(Into::into)
    })
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub embedding_service_available: bool,
}

async fn health(
    State(state): State<Arc<SharedState>>,
) -> Result<axum::Json<HealthResponse>, HttpError> {
    let app = state.app.clone();

    tokio::task::block_in_place(move || {
        let app = app.blocking_read();
        Ok(HealthResponse {
            embedding_service_available: app.embedding_service_available(),
        }
        .into())
    })
}

async fn task_queue(
    State(state): State<Arc<SharedState>>,
) -> Result<axum::Json<crate::app::task_runner::QueueDump>, HttpError> {
    let app = state.app.clone();

    tokio::task::block_in_place(move || {
        let app = app.blocking_read();
        Ok(app.queue_dump().into())
    })
}

async fn get_config(
    State(state): State<Arc<SharedState>>,
) -> Result<axum::Json<Config>, HttpError> {
    let app = state.app.clone();

    tokio::task::block_in_place(move || {
        let app = app.blocking_read();
        Ok(app.config().read().unwrap().clone().into())
    })
}

async fn update_config(
    State(state): State<Arc<SharedState>>,
    Json(payload): Json<Config>,
) -> Result<axum::Json<Config>, HttpError> {
    let app = state.app.clone();

    tokio::task::block_in_place(move || {
        let app = app.blocking_read();
        *app.config().write().unwrap() = payload.clone();
        Ok(app.config().read().unwrap().clone().into())
    })
}
