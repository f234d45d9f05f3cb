use axum::{
    body::Body,
    debug_handler,
    extract::{
        multipart::{Multipart, MultipartRejection},
        DefaultBodyLimit, Query, State,
    },
    http::{header, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::{io, path::PathBuf, sync::Arc};
use tokio_util::io::ReaderStream;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use utoipa::{OpenApi, ToSchema};
use utoipa_swagger_ui::SwaggerUi;

use crate::cluster::ResolveError;
use crate::transfer::{FileRequest, FileTransferService, StagedUpload, TransferFailure};

const REGISTER_HINT: &str = "Ensure the cluster is registered in ArgoCD";

#[derive(OpenApi)]
#[openapi(
    paths(download_file, upload_file, health_check),
    components(schemas(ErrorBody, UploadForm))
)]
struct ApiDoc;

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    hint: Option<String>,
    /// Combined kubectl output, when kubectl ran
    #[serde(skip_serializing_if = "Option::is_none")]
    output: Option<String>,
}

impl ErrorBody {
    fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            hint: None,
            output: None,
        }
    }

    fn with_hint(mut self, hint: &str) -> Self {
        self.hint = Some(hint.to_string());
        self
    }
}

#[derive(ToSchema)]
#[allow(dead_code)]
struct UploadForm {
    #[schema(value_type = String, format = Binary)]
    file: Vec<u8>,
}

impl IntoResponse for TransferFailure {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            TransferFailure::InvalidRequest(message) => {
                (StatusCode::BAD_REQUEST, ErrorBody::new(message.clone()))
            }
            TransferFailure::MultiClusterDisabled { .. } => (
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorBody::new(self.to_string())
                    .with_hint("The service has no access to cluster secrets; only in-cluster pods are reachable"),
            ),
            TransferFailure::Resolve(ResolveError::Upstream(source)) => {
                error!("cluster secret lookup failed: {}", source);
                (
                    StatusCode::BAD_GATEWAY,
                    ErrorBody::new("failed to get cluster config: cluster secrets are unavailable")
                        .with_hint(REGISTER_HINT),
                )
            }
            TransferFailure::Resolve(_) => (
                StatusCode::NOT_FOUND,
                ErrorBody::new(self.to_string()).with_hint(REGISTER_HINT),
            ),
            TransferFailure::Staging(_) | TransferFailure::Kubeconfig(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorBody::new(self.to_string()),
            ),
            TransferFailure::Exec(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorBody {
                    output: Some(String::new()),
                    ..ErrorBody::new(self.to_string())
                },
            ),
            TransferFailure::CopyFailed { output, .. }
            | TransferFailure::NothingCopied { output, .. } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorBody {
                    output: Some(output.clone()),
                    ..ErrorBody::new(self.to_string())
                },
            ),
        };

        if status.is_server_error() {
            error!(status = status.as_u16(), "{}", self);
        } else {
            warn!(status = status.as_u16(), "{}", self);
        }
        (status, Json(body)).into_response()
    }
}

pub struct WebServerState {
    pub port: u16,
    pub ui_dir: PathBuf,
    pub max_upload_bytes: usize,
    pub service: Arc<FileTransferService>,
}

impl WebServerState {
    pub fn new(
        port: u16,
        ui_dir: PathBuf,
        max_upload_bytes: usize,
        service: Arc<FileTransferService>,
    ) -> Self {
        Self {
            port,
            ui_dir,
            max_upload_bytes,
            service,
        }
    }
}

fn attachment_name(file_name: &str) -> String {
    file_name
        .chars()
        .map(|c| if c.is_ascii_graphic() && c != '"' && c != '\\' { c } else { '_' })
        .collect()
}

/// Copy a file out of a container.
#[utoipa::path(
    get,
    path = "/files",
    params(FileRequest),
    responses(
        (status = 200, description = "File contents", content_type = "application/octet-stream", body = String),
        (status = 400, description = "Missing or invalid parameters", body = ErrorBody),
        (status = 404, description = "Cluster not registered", body = ErrorBody),
        (status = 500, description = "kubectl cp failed", body = ErrorBody)
    )
)]
#[debug_handler]
async fn download_file(
    State(state): State<Arc<WebServerState>>,
    Query(request): Query<FileRequest>,
) -> Response {
    let file = match state.service.download(&request).await {
        Ok(file) => file,
        Err(failure) => return failure.into_response(),
    };

    let headers = [
        (header::CONTENT_TYPE, "application/octet-stream".to_string()),
        (header::CONTENT_LENGTH, file.len.to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", attachment_name(&file.file_name)),
        ),
    ];
    // The staging directory goes away when the body is dropped.
    (StatusCode::OK, headers, Body::from_stream(ReaderStream::new(file))).into_response()
}

/// Copy the uploaded `file` form field into a container.
#[utoipa::path(
    post,
    path = "/files",
    params(FileRequest),
    request_body(content = UploadForm, content_type = "multipart/form-data"),
    responses(
        (status = 201, description = "Uploaded", body = String),
        (status = 400, description = "Missing parameters or file", body = ErrorBody),
        (status = 404, description = "Cluster not registered", body = ErrorBody),
        (status = 413, description = "Upload exceeds the size limit", body = ErrorBody),
        (status = 500, description = "kubectl cp failed", body = ErrorBody)
    )
)]
#[debug_handler]
async fn upload_file(
    State(state): State<Arc<WebServerState>>,
    Query(request): Query<FileRequest>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    // Credentials are checked before the body is read.
    if let Err(failure) = request.validate() {
        return failure.into_response();
    }
    let descriptor = match state.service.resolve(&request).await {
        Ok(descriptor) => descriptor,
        Err(failure) => return failure.into_response(),
    };

    let staged = match receive_file(&state.service, &request, multipart).await {
        Ok(staged) => staged,
        Err(response) => return response,
    };

    match state
        .service
        .upload_staged(&request, &descriptor, staged)
        .await
    {
        Ok(()) => (StatusCode::CREATED, "Uploaded").into_response(),
        Err(failure) => failure.into_response(),
    }
}

fn file_error(status: StatusCode, detail: String) -> Response {
    let message = format!("failed to get file: {}", detail);
    warn!(status = status.as_u16(), "{}", message);
    (status, Json(ErrorBody::new(message))).into_response()
}

/// Writes the `file` form field into staging as it arrives.
async fn receive_file(
    service: &FileTransferService,
    request: &FileRequest,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<StagedUpload, Response> {
    let mut multipart = multipart.map_err(|e| file_error(e.status(), e.body_text()))?;
    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| file_error(e.status(), e.body_text()))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let mut staged = service
            .stage_upload(request)
            .await
            .map_err(IntoResponse::into_response)?;
        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(|e| file_error(e.status(), e.body_text()))?
        {
            staged
                .write(&chunk)
                .await
                .map_err(IntoResponse::into_response)?;
        }
        return Ok(staged);
    }
    Err(file_error(
        StatusCode::BAD_REQUEST,
        "no 'file' field in form".to_string(),
    ))
}

/// Liveness probe.
#[utoipa::path(
    get,
    path = "/",
    responses((status = 200, description = "Service is up", body = String))
)]
async fn health_check() -> &'static str {
    "OK"
}

pub fn router(state: Arc<WebServerState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/files", get(download_file).post(upload_file))
        .nest_service("/ui", ServeDir::new(&state.ui_dir))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(DefaultBodyLimit::max(state.max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        // Added after the trace layer so liveness probes are not traced.
        .route("/", get(health_check))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers([header::CONTENT_TYPE]),
        )
        .with_state(state)
}

pub async fn start_web_server(
    state: Arc<WebServerState>,
    shutdown: tokio::sync::oneshot::Receiver<()>,
) -> io::Result<()> {
    let addr = format!("0.0.0.0:{}", state.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(
        multi_cluster = state.service.multi_cluster_enabled(),
        "Web server listening on {}", addr
    );

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            shutdown.await.ok();
        })
        .await
}
