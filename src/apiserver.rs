// apiserver.rs: HTTP/XML presentation service

use std::path::{Component, Path, PathBuf};

use axum::{
    body::{Body, Bytes},
    extract::{FromRequest, FromRequestParts, Query, Request, State},
    http::{header, request::Parts, HeaderValue, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{any, post, put},
    Form, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use futures::StreamExt;
use tokio::io::AsyncReadExt;

use crate::*;

const STREAM_CHUNK: usize = 1460;
const AUTH_REALM: &str = "Basic realm=\"Login Required\"";

pub fn router(state: Arc<MyState>) -> Router {
    Router::new()
        .route("/", any(h_website))
        .route("/wifi_param", any(h_wifi_param))
        .route("/pushButt", put(h_push_button).fallback(h_web_requests))
        .route("/xml", put(h_xml).fallback(h_web_requests))
        .route("/update", post(h_update).fallback(h_web_requests))
        .fallback(h_web_requests)
        .with_state(state)
}

pub async fn run_api_server(state: Arc<MyState>, addr: net::SocketAddr) -> AppResult<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("API server listening on {addr}");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

/// Proof that the request carried the shared admin credentials.
pub struct AdminAuth;

impl FromRequestParts<Arc<MyState>> for AdminAuth {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<MyState>,
    ) -> Result<Self, Self::Rejection> {
        let presented = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Basic "))
            .and_then(|b64| STANDARD.decode(b64.trim()).ok())
            .and_then(|raw| String::from_utf8(raw).ok());

        match presented.as_deref().and_then(|s| s.split_once(':')) {
            Some((user, pass)) if user == state.web_user && pass == state.web_pass => Ok(AdminAuth),
            _ => {
                info!("Authentication required for {}", parts.uri);
                Err((
                    StatusCode::UNAUTHORIZED,
                    [(header::WWW_AUTHENTICATE, AUTH_REALM)],
                    "Unauthorized",
                )
                    .into_response())
            }
        }
    }
}

/// Query string arguments plus url-encoded form fields, in arrival order.
pub struct RequestArgs(pub Vec<(String, String)>);

impl RequestArgs {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn has(&self, name: &str) -> bool {
        self.get(name).is_some()
    }
}

impl<S: Send + Sync> FromRequest<S> for RequestArgs {
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Query(mut args) = Query::<Vec<(String, String)>>::try_from_uri(req.uri())
            .map_err(IntoResponse::into_response)?;

        let is_form = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"));

        if is_form && req.method() != Method::GET && req.method() != Method::HEAD {
            let Form(body) = Form::<Vec<(String, String)>>::from_request(req, state)
                .await
                .map_err(IntoResponse::into_response)?;
            args.extend(body);
        }
        Ok(RequestArgs(args))
    }
}

fn xml_response(state: &MyState) -> Response {
    let xml = match state.exchange.readings.latest() {
        Some(r) => r.to_xml(),
        None => EMPTY_XML.into(),
    };
    ([(header::CONTENT_TYPE, "text/xml")], xml).into_response()
}

async fn h_xml(State(state): State<Arc<MyState>>) -> Response {
    xml_response(&state)
}

async fn h_website(_auth: AdminAuth) -> Response {
    info!("h_website");
    (StatusCode::FOUND, [(header::LOCATION, "/index.html")]).into_response()
}

async fn h_wifi_param(
    _auth: AdminAuth,
    State(state): State<Arc<MyState>>,
    args: RequestArgs,
) -> Response {
    let ssid = args.get("wifi_ssid").unwrap_or_default();
    let pass = args.get("wifi_pass").unwrap_or_default();
    info!("h_wifi_param: new Wi-Fi SSID {ssid:?}");

    if let Err(e) = state.config.lock().await.update_credentials(ssid, pass) {
        error!("Cannot update Wi-Fi settings: {e}");
        let status = match e {
            AppError::CredentialTooLong { .. } => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        return (status, e.to_string()).into_response();
    }

    state.restart.request();
    (
        [(header::CONTENT_TYPE, "text/html")],
        "Wi-Fi setting is updated, module will be rebooting...",
    )
        .into_response()
}

async fn h_push_button(
    _auth: AdminAuth,
    State(state): State<Arc<MyState>>,
    args: RequestArgs,
) -> Response {
    for (name, value) in &args.0 {
        debug!("h_push_button arg {name}={value}");
    }

    if let Some(cmd) = args.get("buttID").and_then(Command::from_button_id) {
        match state.exchange.commands.send(cmd, COMMAND_SEND_TIMEOUT).await {
            Ok(outcome) => info!("Command {cmd:?}: {outcome:?}"),
            Err(e) => {
                warn!("{e}");
                return (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response();
            }
        }
    }
    xml_response(&state)
}

/// Raw image upload. Polling and file transfer stay suspended until the
/// image is written and verified.
async fn h_update(_auth: AdminAuth, State(state): State<Arc<MyState>>, body: Body) -> Response {
    info!("h_update: firmware upload started");
    let _suspension = state.arbiter.suspend().await;
    let mut firmware = state.firmware.lock().await;
    let mut sink = match firmware.begin() {
        Ok(sink) => sink,
        Err(e) => {
            error!("Cannot start firmware update: {e}");
            return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
        }
    };

    let mut received = 0;
    let mut chunks = body.into_data_stream();
    while let Some(chunk) = chunks.next().await {
        let written = match chunk {
            Ok(bytes) => {
                received += bytes.len();
                sink.write(&bytes)
            }
            Err(e) => Err(AppError::Message(format!("upload interrupted: {e}"))),
        };
        if let Err(e) = written {
            error!("Firmware update failed after {received} bytes: {e}");
            sink.abort();
            return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
        }
    }

    if received == 0 {
        sink.abort();
        return (StatusCode::BAD_REQUEST, "Empty firmware image").into_response();
    }
    if let Err(e) = sink.complete() {
        error!("Firmware image rejected: {e}");
        return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
    }

    info!("Firmware updated ({received} bytes), restarting");
    state.restart.request();
    (
        [(header::CONTENT_TYPE, "text/html")],
        "Update successful, module will be rebooting...",
    )
        .into_response()
}

async fn h_web_requests(
    _auth: AdminAuth,
    State(state): State<Arc<MyState>>,
    method: Method,
    uri: Uri,
    args: RequestArgs,
) -> Response {
    if let Some(resp) = load_from_assets(&state, uri.path(), &args).await {
        return resp;
    }

    info!("File Not Detected: {uri}");
    let mut message = format!(
        "File Not Detected\n\nURI: {}\nMethod: {}\nArguments: {}\n",
        uri.path(),
        method,
        args.0.len()
    );
    for (name, value) in &args.0 {
        message += &format!(" NAME:{name}\n VALUE:{value}\n");
    }
    (
        StatusCode::NOT_FOUND,
        [(header::CONTENT_TYPE, "text/plain")],
        message,
    )
        .into_response()
}

/// Map a request path to a file under the asset root and its content type.
/// Returns `None` for paths that try to leave the root.
pub fn resolve_asset(root: &Path, uri_path: &str) -> Option<(PathBuf, &'static str)> {
    let mut path = uri_path.to_string();
    if path.ends_with('/') {
        path += "index.html";
    }

    let content_type = if let Some(stripped) = path.strip_suffix(".src") {
        path = stripped.to_string();
        "text/plain"
    } else {
        content_type_for(&path)
    };

    let rel = Path::new(path.trim_start_matches('/'));
    if !rel.components().all(|c| matches!(c, Component::Normal(_))) {
        return None;
    }
    Some((root.join(rel), content_type))
}

pub fn content_type_for(path: &str) -> &'static str {
    let ext = path.rsplit_once('.').map(|(_, e)| e).unwrap_or_default();
    match ext {
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" => "application/javascript",
        "png" => "image/png",
        "gif" => "image/gif",
        "jpg" => "image/jpeg",
        "ico" => "image/x-icon",
        "xml" => "text/xml",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        _ => "text/plain",
    }
}

async fn load_from_assets(state: &MyState, uri_path: &str, args: &RequestArgs) -> Option<Response> {
    info!("Request File: {uri_path}");
    let (path, mut content_type) = resolve_asset(&state.assets, uri_path)?;

    // held until the body is fully sent or dropped
    let suspension = if needs_arbitration(content_type) {
        Some(state.arbiter.suspend().await)
    } else {
        None
    };

    let file = match tokio::fs::File::open(&path).await {
        Ok(f) => f,
        Err(e) => {
            debug!("Cannot open {}: {e}", path.display());
            return None;
        }
    };
    let size = match file.metadata().await {
        Ok(m) if m.is_file() => m.len(),
        _ => return None,
    };
    info!("Load File: {} ({size} bytes)", path.display());

    if args.has("download") {
        content_type = "application/octet-stream";
    }

    let stream = futures::stream::unfold((file, suspension), |(mut file, held)| async move {
        let mut buf = vec![0u8; STREAM_CHUNK];
        match file.read(&mut buf).await {
            Ok(0) => None,
            Ok(n) => {
                buf.truncate(n);
                Some((Ok::<_, std::io::Error>(Bytes::from(buf)), (file, held)))
            }
            Err(e) => {
                error!("Asset read error: {e}");
                None
            }
        }
    });

    let mut resp = Body::from_stream(stream).into_response();
    let headers = resp.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(size));
    Some(resp)
}

// EOF
