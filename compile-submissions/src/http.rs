//! Thin HTTP boundary over the core library: `/convert/`, `/stamp/`, and a
//! handful of supporting endpoints. Grounded on
//! `examples/other_examples/.../srsergiolazaro-tachyon-tex`'s
//! axum/tokio service shape (`AppState` + async handlers that unpack into a
//! tempdir, drive compilation, and return the artifact as a blob) — adapted
//! here from its MCP tool-call framing to plain HTTP routes.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Multipart, Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use tempfile::TempDir;
use tracing::{error, info};

use tex2pdf_core::{
    init_from_dir, pack_outcome, unpack_submission, watermark, ConfigManager, ConverterDriver, NoOpResolver, SubprocessInvoker, ZeroZeroReadMe,
};

#[derive(Clone)]
pub struct AppState {
    pub configs: Arc<ConfigManager>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(healthcheck))
        .route("/robots.txt", get(robots))
        .route("/favicon.ico", get(favicon))
        .route("/texlive/info", get(texlive_info))
        .route("/convert/", post(convert))
        .route("/stamp/", post(stamp))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let app = build_router(state);
    info!(%addr, "tex2pdf service listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn healthcheck() -> Html<&'static str> {
    Html("<html><body><h1>tex2pdf</h1><p>ok</p></body></html>")
}

async fn robots() -> &'static str {
    "User-agent: *\nDisallow: /\n"
}

async fn favicon() -> StatusCode {
    StatusCode::NO_CONTENT
}

async fn texlive_info() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({ "texlive_version": "current" }))
}

#[derive(serde::Deserialize, Default)]
struct ConvertParams {
    timeout: Option<u64>,
    use_addon_tree: Option<bool>,
    max_tex_files: Option<usize>,
    max_appending_files: Option<usize>,
    preflight: Option<String>,
    watermark_text: Option<String>,
    watermark_link: Option<String>,
    auto_detect: Option<bool>,
    hide_anc_dir: Option<bool>,
}

async fn convert(State(state): State<AppState>, Query(params): Query<ConvertParams>, mut multipart: Multipart) -> Response {
    let Some(incoming) = extract_field(&mut multipart, "incoming").await else {
        return error_response(StatusCode::BAD_REQUEST, "missing multipart field 'incoming'");
    };

    let work = match TempDir::new() {
        Ok(d) => d,
        Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    };
    let archive_path = work.path().join("incoming.tar.gz");
    if let Err(e) = std::fs::write(&archive_path, &incoming) {
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string());
    }

    let in_dir = work.path().join("in");
    let out_dir = work.path().join("out");
    let _ = std::fs::create_dir_all(&in_dir);
    let _ = std::fs::create_dir_all(&out_dir);

    if let Err(e) = unpack_submission(&archive_path, &in_dir) {
        return error_response(StatusCode::UNPROCESSABLE_ENTITY, &e.to_string());
    }

    let zzrm = init_from_dir(&in_dir).unwrap_or_else(|_| ZeroZeroReadMe::new());
    // auto_detect/hide_anc_dir/preflight shape the preflight/response surface only;
    // the driver itself just needs the merged zzrm + config below.
    let _ = (params.auto_detect, params.hide_anc_dir, params.preflight);

    let pipeline = zzrm.process.compiler.map(|c| c.compiler_string()).unwrap_or_default();
    let mut config = state.configs.get_config(&pipeline).clone();
    if let Some(max) = params.max_tex_files {
        config.max_tex_files = Some(max);
    }
    if let Some(max) = params.max_appending_files {
        config.max_appending_files = Some(max);
    }
    if let Some(use_addon_tree) = params.use_addon_tree {
        config.use_addon_tree = use_addon_tree;
    }
    if let Some(timeout) = params.timeout {
        config.max_time_budget_secs = timeout;
    }

    let invoker = SubprocessInvoker;
    let resolver = NoOpResolver;
    let driver = ConverterDriver::new(&config, &invoker, &resolver);
    let tag = uuid::Uuid::new_v4().to_string();

    let mut outcome = driver.generate_pdf(&in_dir, &out_dir, &zzrm, &tag);

    if outcome.status != "success" {
        error!(tag = %tag, "compilation failed");
        return error_response(StatusCode::UNPROCESSABLE_ENTITY, "compilation failed");
    }

    if let (Some(text), true) = (&params.watermark_text, zzrm.stamp) {
        if let Some(first) = outcome.out_files.first() {
            if let Err(e) = watermark(&out_dir.join(first), text, params.watermark_link.as_deref()) {
                error!(tag = %tag, error = %e, "watermarking failed");
                return error_response(StatusCode::UNPROCESSABLE_ENTITY, &format!("watermarking failed: {e}"));
            }
            outcome.watermark = Some(text.clone());
        }
    }

    let archive = out_dir.join(format!("outcome-{tag}.tar.gz"));
    if let Err(e) = pack_outcome(&outcome, &out_dir, &archive) {
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string());
    }

    match std::fs::read(&archive) {
        Ok(bytes) => ([("content-type", "application/gzip")], bytes).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    }
}

#[derive(serde::Deserialize)]
struct StampParams {
    watermark_text: String,
    watermark_link: Option<String>,
}

async fn stamp(Query(params): Query<StampParams>, mut multipart: Multipart) -> Response {
    let Some(incoming) = extract_field(&mut multipart, "incoming").await else {
        return error_response(StatusCode::BAD_REQUEST, "missing multipart field 'incoming'");
    };

    let work = match TempDir::new() {
        Ok(d) => d,
        Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    };
    let pdf_path = work.path().join("input.pdf");
    if let Err(e) = std::fs::write(&pdf_path, &incoming) {
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string());
    }

    match watermark(&pdf_path, &params.watermark_text, params.watermark_link.as_deref()) {
        Ok(()) => match std::fs::read(&pdf_path) {
            Ok(bytes) => ([("content-type", "application/pdf")], bytes).into_response(),
            Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
        },
        Err(e) => error_response(StatusCode::BAD_REQUEST, &e.to_string()),
    }
}

async fn extract_field(multipart: &mut Multipart, name: &str) -> Option<Bytes> {
    while let Ok(Some(field)) = multipart.next_field().await {
        if field.name() == Some(name) {
            return field.bytes().await.ok();
        }
    }
    None
}

fn error_response(code: StatusCode, message: &str) -> Response {
    let mut map = HashMap::new();
    map.insert("message", message.to_string());
    (code, axum::Json(map)).into_response()
}
