#![forbid(unsafe_code)]

//! Axum front-end: submit video URLs, browse what has been downloaded, fetch
//! or delete individual files.
//!
//! HTML submissions download synchronously and render the result in the same
//! response. The `/api/batches` endpoints run the same sequential loop in the
//! background and expose per-URL progress while it runs.

use std::{
    collections::HashMap,
    net::{IpAddr, SocketAddr},
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use anyhow::{Context, Result, anyhow};
use axum::{
    Form, Json, Router,
    body::Body,
    extract::{Path as AxumPath, State},
    http::{HeaderValue, Request, StatusCode, header},
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
};
use mime_guess::MimeGuess;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::{fs::File, signal};
use tokio_util::io::ReaderStream;
use vidshelf::{
    batch::{BatchDownloader, DownloadOutcome, normalize_urls, submission_lines},
    catalog::{Catalog, TimestampPolicy, scan_catalog},
    config::{RuntimeOverrides, ensure_download_dir, resolve_runtime_config},
    extractor::YtDlp,
    files::{FileAccessError, delete_file, resolve_file},
    logging::init_tracing,
    page::render_index,
    security::ensure_not_root,
};

#[derive(Debug, Clone)]
struct ServerArgs {
    download_dir: PathBuf,
    listen_host: IpAddr,
    port: u16,
    yt_dlp: String,
    timestamp_policy: TimestampPolicy,
}

impl ServerArgs {
    fn parse() -> Result<Self> {
        Self::from_iter(std::env::args().skip(1))
    }

    fn from_iter<I>(iter: I) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut overrides = RuntimeOverrides::default();
        let mut args = iter.into_iter();
        while let Some(arg) = args.next() {
            let (flag, inline) = match arg.split_once('=') {
                Some((flag, value)) if flag.starts_with("--") => {
                    (flag.to_string(), Some(value.to_string()))
                }
                _ => (arg.clone(), None),
            };
            let mut value = || {
                inline
                    .clone()
                    .or_else(|| args.next())
                    .ok_or_else(|| anyhow!("{flag} requires a value"))
            };

            match flag.as_str() {
                "--download-dir" => overrides.download_dir = Some(PathBuf::from(value()?)),
                "--host" => overrides.host = Some(value()?),
                "--port" => overrides.port = Some(parse_port_arg(&value()?)?),
                "--yt-dlp" => overrides.yt_dlp = Some(value()?),
                "--timestamp-policy" => {
                    overrides.timestamp_policy = Some(parse_policy_arg(&value()?)?)
                }
                "--env-file" => overrides.env_path = Some(PathBuf::from(value()?)),
                _ => return Err(anyhow!("unknown argument: {arg}")),
            }
        }

        let config = resolve_runtime_config(overrides)?;
        Ok(Self {
            listen_host: parse_host_arg(&config.host)?,
            download_dir: config.download_dir,
            port: config.port,
            yt_dlp: config.yt_dlp,
            timestamp_policy: config.timestamp_policy,
        })
    }
}

fn parse_port_arg(value: &str) -> Result<u16> {
    value
        .parse::<u16>()
        .context("expected a numeric port between 0 and 65535")
}

fn parse_host_arg(value: &str) -> Result<IpAddr> {
    value
        .parse::<IpAddr>()
        .context("expected a valid IPv4 or IPv6 address for --host/VIDSHELF_HOST")
}

fn parse_policy_arg(value: &str) -> Result<TimestampPolicy> {
    TimestampPolicy::parse(value)
        .ok_or_else(|| anyhow!("--timestamp-policy must be `modified` or `created`"))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum BatchStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl BatchStatus {
    fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

#[derive(Clone)]
struct BatchJob {
    id: String,
    status: BatchStatus,
    urls: Vec<String>,
    outcomes: Vec<DownloadOutcome>,
    message: Option<String>,
}

#[derive(Deserialize)]
struct StartBatchRequest {
    urls: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BatchJobResponse {
    id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BatchJobStatus {
    id: String,
    status: String,
    total: usize,
    processed: usize,
    outcomes: Vec<DownloadOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

/// Tracks background batches started through the JSON API. Jobs stay in
/// memory for the life of the process.
#[derive(Clone)]
struct BatchManager {
    inner: Arc<BatchManagerInner>,
}

struct BatchManagerInner {
    jobs: Mutex<HashMap<String, BatchJob>>,
    counter: AtomicUsize,
    downloader: BatchDownloader,
}

impl BatchManager {
    fn new(downloader: BatchDownloader) -> Self {
        Self {
            inner: Arc::new(BatchManagerInner {
                jobs: Mutex::new(HashMap::new()),
                counter: AtomicUsize::new(1),
                downloader,
            }),
        }
    }

    fn start(&self, raw_urls: Vec<String>) -> String {
        let urls = normalize_urls(raw_urls);
        let job_id = self.next_job_id();
        self.inner.jobs.lock().insert(
            job_id.clone(),
            BatchJob {
                id: job_id.clone(),
                status: BatchStatus::Queued,
                urls: urls.clone(),
                outcomes: Vec::new(),
                message: None,
            },
        );
        tracing::info!(job = %job_id, urls = urls.len(), "queued batch");

        let inner = self.inner.clone();
        let job_id_clone = job_id.clone();
        tokio::spawn(async move {
            set_job_status(&inner, &job_id_clone, BatchStatus::Running, None);
            let inner_for_run = inner.clone();
            let job_for_run = job_id_clone.clone();
            let result = tokio::task::spawn_blocking(move || {
                inner_for_run.downloader.download_all(&urls, |outcome| {
                    if let Some(job) = inner_for_run.jobs.lock().get_mut(&job_for_run) {
                        job.outcomes.push(outcome.clone());
                    }
                })
            })
            .await;

            match result {
                Ok(result) => set_job_status(
                    &inner,
                    &job_id_clone,
                    BatchStatus::Completed,
                    Some(result.status_message()),
                ),
                Err(err) => {
                    tracing::error!(job = %job_id_clone, error = %err, "batch task crashed");
                    set_job_status(
                        &inner,
                        &job_id_clone,
                        BatchStatus::Failed,
                        Some(format!("Failed: {err}")),
                    );
                }
            }
        });

        job_id
    }

    fn get_status(&self, job_id: &str) -> Option<BatchJobStatus> {
        let job = self.inner.jobs.lock().get(job_id).cloned()?;
        Some(BatchJobStatus {
            id: job.id,
            status: job.status.as_str().to_string(),
            total: job.urls.len(),
            processed: job.outcomes.len(),
            outcomes: job.outcomes,
            message: job.message,
        })
    }

    fn next_job_id(&self) -> String {
        let id = self.inner.counter.fetch_add(1, Ordering::Relaxed);
        format!("batch-{id}")
    }
}

fn set_job_status(
    inner: &BatchManagerInner,
    job_id: &str,
    status: BatchStatus,
    message: Option<String>,
) {
    if let Some(job) = inner.jobs.lock().get_mut(job_id) {
        job.status = status;
        if message.is_some() {
            job.message = message;
        }
    }
}

/// Shared state injected into every handler. The download directory is
/// resolved once at startup and never changes afterwards.
#[derive(Clone)]
struct AppState {
    download_dir: Arc<PathBuf>,
    timestamp_policy: TimestampPolicy,
    downloader: BatchDownloader,
    batches: BatchManager,
}

impl AppState {
    fn new(
        download_dir: PathBuf,
        timestamp_policy: TimestampPolicy,
        downloader: BatchDownloader,
    ) -> Self {
        Self {
            download_dir: Arc::new(download_dir),
            timestamp_policy,
            batches: BatchManager::new(downloader.clone()),
            downloader,
        }
    }

    async fn catalog(&self) -> Result<Catalog> {
        let dir = self.download_dir.clone();
        let policy = self.timestamp_policy;
        tokio::task::spawn_blocking(move || scan_catalog(&dir, policy))
            .await
            .context("catalog scan task")?
    }
}

/// Error for the HTML routes: the message is returned as plain text.
#[derive(Debug)]
struct PageError {
    status: StatusCode,
    message: String,
}

impl PageError {
    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl From<FileAccessError> for PageError {
    fn from(err: FileAccessError) -> Self {
        match err {
            FileAccessError::NotFound => Self::not_found(err.to_string()),
            FileAccessError::Io(_) => Self::internal(err.to_string()),
        }
    }
}

impl IntoResponse for PageError {
    fn into_response(self) -> Response {
        (self.status, self.message).into_response()
    }
}

/// Error for the JSON routes: `{ "error": "..." }`.
#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": self.message,
        });
        (self.status, Json(body)).into_response()
    }
}

type PageResult<T> = Result<T, PageError>;
type ApiResult<T> = Result<T, ApiError>;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let ServerArgs {
        download_dir,
        listen_host,
        port,
        yt_dlp,
        timestamp_policy,
    } = ServerArgs::parse()?;

    ensure_not_root("vidshelf")?;

    let download_dir = ensure_download_dir(&download_dir)?;
    let client = YtDlp::from_command_line(&yt_dlp);
    if let Err(err) = client.ensure_available() {
        tracing::warn!(error = %err, "downloads will fail until yt-dlp is available");
    }

    tracing::info!(
        download_dir = %download_dir.display(),
        timestamp_policy = timestamp_policy.as_str(),
        "serving downloads"
    );
    let downloader = BatchDownloader::new(Arc::new(client), &download_dir);
    let state = AppState::new(download_dir, timestamp_policy, downloader);

    let addr = SocketAddr::new(listen_host, port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {}", addr))?;
    tracing::info!("listening on http://{}", addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running server")?;

    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index).post(submit))
        .route("/download/{filename}", get(download_file))
        .route("/delete/{filename}", get(delete_video).post(delete_video))
        .route("/healthz", get(|| async { "ok" }))
        .route("/api/catalog", get(api_catalog))
        .route("/api/batches", post(start_batch))
        .route("/api/batches/{id}", get(get_batch_status))
        .fallback(fallback)
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to install Ctrl+C handler");
    }
}

async fn fallback(req: Request<Body>) -> Response {
    let path = req.uri().path();
    if path == "/api" || path.starts_with("/api/") {
        return ApiError::not_found("endpoint not found").into_response();
    }
    PageError::not_found("Not found").into_response()
}

#[derive(Debug, Default, Deserialize)]
struct SubmitForm {
    url: Option<String>,
    urls: Option<String>,
}

async fn index(State(state): State<AppState>) -> PageResult<Html<String>> {
    render_page(&state, None).await
}

async fn submit(
    State(state): State<AppState>,
    Form(form): Form<SubmitForm>,
) -> PageResult<Html<String>> {
    let lines = submission_lines(form.url.as_deref(), form.urls.as_deref());
    let downloader = state.downloader.clone();
    let result = tokio::task::spawn_blocking(move || downloader.run(lines))
        .await
        .map_err(|err| PageError::internal(err.to_string()))?;
    let message = result.status_message();
    render_page(&state, Some(&message)).await
}

async fn render_page(state: &AppState, message: Option<&str>) -> PageResult<Html<String>> {
    let catalog = state
        .catalog()
        .await
        .map_err(|err| PageError::internal(format!("{err:#}")))?;
    Ok(Html(render_index(message, &catalog)))
}

async fn download_file(
    State(state): State<AppState>,
    AxumPath(filename): AxumPath<String>,
) -> PageResult<Response> {
    let path = resolve_file(&state.download_dir, &filename)?;
    stream_attachment(&path, &filename).await
}

async fn delete_video(
    State(state): State<AppState>,
    AxumPath(filename): AxumPath<String>,
) -> PageResult<Redirect> {
    delete_file(&state.download_dir, &filename)?;
    Ok(Redirect::to("/"))
}

async fn api_catalog(State(state): State<AppState>) -> ApiResult<Json<Catalog>> {
    let catalog = state
        .catalog()
        .await
        .map_err(|err| ApiError::internal(format!("{err:#}")))?;
    Ok(Json(catalog))
}

async fn start_batch(
    State(state): State<AppState>,
    Json(payload): Json<StartBatchRequest>,
) -> Json<BatchJobResponse> {
    let id = state.batches.start(payload.urls);
    Json(BatchJobResponse { id })
}

async fn get_batch_status(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> ApiResult<Json<BatchJobStatus>> {
    let status = state
        .batches
        .get_status(&id)
        .ok_or_else(|| ApiError::not_found("batch not found"))?;
    Ok(Json(status))
}

/// Streams `path` with a `Content-Disposition: attachment` header so browsers
/// save it instead of playing it inline.
async fn stream_attachment(path: &Path, filename: &str) -> PageResult<Response> {
    let file = File::open(path)
        .await
        .map_err(|_| PageError::not_found("File not found"))?;
    let size = file
        .metadata()
        .await
        .map_err(|err| PageError::internal(err.to_string()))?
        .len();

    let mut response = Body::from_stream(ReaderStream::new(file)).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(size));
    let mime = MimeGuess::from_path(path).first_or_octet_stream();
    if let Ok(value) = HeaderValue::from_str(mime.as_ref()) {
        headers.insert(header::CONTENT_TYPE, value);
    }
    let disposition = HeaderValue::from_str(&content_disposition(filename))
        .map_err(|err| PageError::internal(err.to_string()))?;
    headers.insert(header::CONTENT_DISPOSITION, disposition);

    Ok(response)
}

/// ASCII fallback name plus the RFC 5987 `filename*` form for everything
/// else.
fn content_disposition(filename: &str) -> String {
    let fallback: String = filename
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_ascii_graphic() || c == ' ' => c,
            _ => '_',
        })
        .collect();
    format!(
        "attachment; filename=\"{fallback}\"; filename*=UTF-8''{}",
        urlencoding::encode(filename)
    )
}
