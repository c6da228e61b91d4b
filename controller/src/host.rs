use std::{
    fs,
    io::ErrorKind,
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::Context;
use axum::{
    body::Bytes,
    extract::{RawQuery, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tokio::{net::TcpListener, sync::Mutex};
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{info, warn};

use acremote_common::{
    auth, codec,
    store::{self, STATE_OFFSET, STATE_RECORD_LEN},
    AcController, AuthConfig, BlockingDelay, FrameTransmitter, GreeAc, RuntimeConfig, StateStore,
    Storage, StorageError, TransmitError,
};

use crate::form;

const DEFAULT_HTTP_PORT: u16 = 8080;
// covers the full repeat sequence with headroom
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const STORAGE_SIZE: usize = STATE_OFFSET + STATE_RECORD_LEN;

type HostController = AcController<GreeAc<LogTransmitter>, FileStorage, BlockingDelay>;

#[derive(Clone)]
struct AppState {
    controller: Arc<Mutex<HostController>>,
    auth: Arc<AuthConfig>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

/// Host stand-in for the IR LED: logs each frame.
struct LogTransmitter;

impl FrameTransmitter for LogTransmitter {
    fn transmit(&mut self, timings: &[u16]) -> Result<(), TransmitError> {
        let duration_us: u64 = timings.iter().map(|value| u64::from(*value)).sum();
        info!(
            "IR frame: {} timings, {} us on air",
            timings.len(),
            duration_us
        );
        Ok(())
    }
}

/// EEPROM image kept in a file; a commit replaces the file in one rename.
struct FileStorage {
    path: PathBuf,
    staged: Option<Vec<u8>>,
}

impl FileStorage {
    fn new(path: PathBuf) -> Self {
        Self { path, staged: None }
    }

    fn read_image(&self) -> Result<Option<Vec<u8>>, StorageError> {
        match fs::read(&self.path) {
            Ok(mut image) => {
                image.resize(STORAGE_SIZE, 0xFF);
                Ok(Some(image))
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(StorageError::Read(format!(
                "{}: {err}",
                self.path.display()
            ))),
        }
    }
}

impl Storage for FileStorage {
    fn read(&mut self, offset: usize, len: usize) -> Result<Option<Vec<u8>>, StorageError> {
        check_bounds(offset, len)?;
        Ok(self
            .read_image()?
            .map(|image| image[offset..offset + len].to_vec()))
    }

    fn write(&mut self, offset: usize, bytes: &[u8]) -> Result<(), StorageError> {
        check_bounds(offset, bytes.len())?;
        if self.staged.is_none() {
            let image = self
                .read_image()
                .map_err(|err| StorageError::Write(err.to_string()))?
                .unwrap_or_else(|| vec![0xFF; STORAGE_SIZE]);
            self.staged = Some(image);
        }
        if let Some(image) = self.staged.as_mut() {
            image[offset..offset + bytes.len()].copy_from_slice(bytes);
        }
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StorageError> {
        let Some(image) = self.staged.as_ref() else {
            return Ok(());
        };
        write_atomically(&self.path, image)
            .map_err(|err| StorageError::Commit(format!("{}: {err}", self.path.display())))
    }
}

fn check_bounds(offset: usize, len: usize) -> Result<(), StorageError> {
    if offset.saturating_add(len) > STORAGE_SIZE {
        return Err(StorageError::OutOfBounds {
            offset,
            len,
            capacity: STORAGE_SIZE,
        });
    }
    Ok(())
}

fn write_atomically(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes)?;
    fs::rename(tmp, path)
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let data_dir = std::env::var("ACREMOTE_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./.acremote"));

    let mut runtime = load_runtime_config(&data_dir.join("runtime.json"))
        .await
        .unwrap_or_else(|err| {
            warn!("failed to load runtime config: {err:#}");
            host_default_config()
        });
    apply_env_overrides(&mut runtime, |key| std::env::var(key).ok());
    runtime.sanitize();

    if !runtime.auth.enabled() {
        warn!("no password configured; command endpoint is unauthenticated");
    }

    let port = runtime.network.http_port;
    let state_path = data_dir.join("state.bin");
    let controller = tokio::task::spawn_blocking(move || {
        let store = StateStore::open(FileStorage::new(state_path));
        AcController::new(
            GreeAc::new(LogTransmitter),
            store,
            BlockingDelay,
            runtime.controller,
        )
    })
    .await
    .context("controller init task failed")?;
    info!("restored state {}", codec::encode(controller.state()));

    let app_state = AppState {
        controller: Arc::new(Mutex::new(controller)),
        auth: Arc::new(runtime.auth),
    };

    let app = Router::new()
        .route("/acremote", post(handle_command))
        .route("/api/state", get(handle_get_state))
        .route("/api/status", get(handle_get_status))
        .fallback(handle_not_found)
        .with_state(app_state)
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind controller server at {addr}"))?;

    info!("controller listening on http://{addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for ctrl-c: {err}");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

async fn load_runtime_config(path: &Path) -> anyhow::Result<RuntimeConfig> {
    match tokio::fs::read(path).await {
        Ok(raw) => serde_json::from_slice::<RuntimeConfig>(&raw)
            .with_context(|| format!("invalid runtime config {}", path.display())),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(host_default_config()),
        Err(err) => Err(err.into()),
    }
}

/// Defaults for a host without `runtime.json`: an unprivileged port.
fn host_default_config() -> RuntimeConfig {
    let mut runtime = RuntimeConfig::default();
    runtime.network.http_port = DEFAULT_HTTP_PORT;
    runtime
}

fn apply_env_overrides(runtime: &mut RuntimeConfig, var: impl Fn(&str) -> Option<String>) {
    if let Some(user) = var("ACREMOTE_USER") {
        runtime.auth.username = user;
    }
    if let Some(pass) = var("ACREMOTE_PASS") {
        runtime.auth.password = pass;
    }
    if let Some(port) = var("ACREMOTE_HTTP_PORT") {
        match port.parse::<u16>() {
            Ok(port) => runtime.network.http_port = port,
            Err(err) => warn!("ignoring ACREMOTE_HTTP_PORT `{port}`: {err}"),
        }
    }
}

async fn handle_command(
    State(state): State<AppState>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> Response {
    if let Some(denied) = check_auth(&state, &headers) {
        return denied;
    }
    if body.len() > form::MAX_REQUEST_BODY {
        return error_response(StatusCode::PAYLOAD_TOO_LARGE, "request body too large");
    }

    let Some(text) = form::argument(query.as_deref(), &body, form::COMMAND_ARG) else {
        return error_response(StatusCode::BAD_REQUEST, "Missing 'command' argument");
    };

    let command = codec::decode(&text);
    info!("command `{text}` decoded as {:?}", command.fields());

    let command = match store::validate_command(command) {
        Ok(command) => command,
        Err(err) => {
            warn!("rejected command `{text}`: {err}");
            return error_response(StatusCode::BAD_REQUEST, &err.to_string());
        }
    };

    let controller = state.controller.clone();
    let applied =
        tokio::task::spawn_blocking(move || controller.blocking_lock().apply(command)).await;

    match applied {
        Ok(report) => {
            info!("command applied: {report:?}");
            text_response(StatusCode::OK, "ok".to_string())
        }
        Err(err) => {
            warn!("apply task failed: {err}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to apply command")
        }
    }
}

async fn handle_get_state(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(denied) = check_auth(&state, &headers) {
        return denied;
    }
    let encoded = codec::encode(state.controller.lock().await.state());
    text_response(StatusCode::OK, encoded)
}

async fn handle_get_status(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(denied) = check_auth(&state, &headers) {
        return denied;
    }
    let status = state.controller.lock().await.status();
    Json(status).into_response()
}

async fn handle_not_found(
    method: Method,
    uri: Uri,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> Response {
    let method = if method == Method::GET { "GET" } else { "POST" };
    let args = form::arguments(query.as_deref(), &body);
    text_response(
        StatusCode::NOT_FOUND,
        form::not_found_message(uri.path(), method, &args),
    )
}

fn check_auth(state: &AppState, headers: &HeaderMap) -> Option<Response> {
    let header = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());
    if auth::authorize(&state.auth, header).allowed() {
        return None;
    }

    let mut response = error_response(StatusCode::UNAUTHORIZED, "Authentication required");
    match HeaderValue::from_str(&auth::challenge(&state.auth)) {
        Ok(challenge) => {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, challenge);
        }
        Err(err) => warn!("invalid auth realm: {err}"),
    }
    Some(response)
}

fn text_response(status: StatusCode, body: String) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        body,
    )
        .into_response()
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}
