//! HTTP 网关处理器

use axum::{
    Form, Json,
    body::{Body, Bytes},
    extract::{
        FromRequest, Multipart, Path as UrlPath, Query, Request, State,
        multipart::{Field, MultipartError, MultipartRejection},
        ws::{WebSocketUpgrade, rejection::WebSocketUpgradeRejection},
    },
    http::{HeaderValue, StatusCode, header},
    response::{Html, IntoResponse, Response},
};
use chrono::{DateTime, Local};
use futures_util::{StreamExt, future, stream};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;

use super::{AppState, assets};
use crate::fs::{PathError, clean_relative, contained_path, create_unique};
use crate::signaling::run_relay;
use crate::status::{FileAction, best_action_for};

/// 目录列表中跳过的系统元数据文件
const IGNORED_ENTRIES: &[&str] = &[".DS_Store", "Thumbs.db", "desktop.ini"];

const MOD_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// 目录浏览结果中的一项
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    pub name: String,
    pub size: u64,
    pub mod_time: String,
    pub is_directory: bool,
    pub relative_path: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BrowseResponse {
    pub path: String,
    pub files: Vec<FileInfo>,
}

#[derive(Deserialize)]
pub struct BrowseQuery {
    pub path: Option<String>,
}

#[derive(Deserialize)]
pub struct DownloadQuery {
    pub file: Option<String>,
}

fn plain(status: StatusCode, body: &'static str) -> Response {
    (status, body).into_response()
}

fn path_error_response(err: &PathError, unresolvable: &'static str) -> Response {
    match err {
        PathError::Escape => plain(StatusCode::FORBIDDEN, "Access denied"),
        PathError::Unresolvable(_) => plain(StatusCode::BAD_REQUEST, unresolvable),
        PathError::Root(_) => plain(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error"),
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

pub async fn index() -> Html<&'static str> {
    Html(assets::INDEX_HTML)
}

pub async fn static_asset(UrlPath(path): UrlPath<String>) -> Response {
    match assets::lookup(&path) {
        Some(asset) => ([(header::CONTENT_TYPE, asset.content_type)], asset.body).into_response(),
        None => plain(StatusCode::NOT_FOUND, "File not found"),
    }
}

pub async fn version(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "version": state.version }))
}

/// 接收 multipart 上传
///
/// 按请求顺序逐个保存 `file` 字段；任意一个文件保存失败时立即返回 500，
/// 后面的文件不再处理。请求体不完整时返回 400 并删除本次已保存的文件，
/// 所以逐个文件的状态要等请求体读完后才发出。
pub async fn upload(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    let mut multipart = match multipart {
        Ok(m) => m,
        Err(e) => {
            warn!("Rejected upload: {}", e);
            return plain(StatusCode::BAD_REQUEST, "Failed to parse form");
        }
    };

    let mut saved: Vec<PathBuf> = Vec::new();
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                warn!("Malformed multipart body: {}", e);
                discard_uploads(&saved).await;
                return plain(StatusCode::BAD_REQUEST, "Failed to parse form");
            }
        };

        // 没有文件名的同名字段是普通表单值
        let file_name = match (field.name(), field.file_name()) {
            (Some("file"), Some(name)) if !name.is_empty() => name.to_string(),
            _ => continue,
        };

        match save_field(&state.prefs.upload_dir, &file_name, field).await {
            Ok(path) => saved.push(path),
            Err(e) if e.downcast_ref::<MultipartError>().is_some() => {
                warn!("Upload of {} interrupted: {:#}", file_name, e);
                discard_uploads(&saved).await;
                return plain(StatusCode::BAD_REQUEST, "Failed to parse form");
            }
            Err(e) => {
                error!("Failed to save {}: {:#}", file_name, e);
                report_received(&state, &saved);
                return plain(StatusCode::INTERNAL_SERVER_ERROR, "Failed to save file");
            }
        }
    }

    if saved.is_empty() {
        return plain(StatusCode::BAD_REQUEST, "No files uploaded");
    }

    report_received(&state, &saved);
    state
        .bus
        .report(format!("Received {} file(s)", saved.len()));
    notify_upload(&state, &saved);

    plain(StatusCode::OK, "Upload successful")
}

async fn save_field(root: &Path, file_name: &str, mut field: Field<'_>) -> anyhow::Result<PathBuf> {
    let (path, mut file) = create_unique(root, file_name).await?;
    debug!("Saving upload {} to {:?}", file_name, path);

    if let Err(e) = copy_field(&mut field, &mut file).await {
        drop(file);
        let _ = tokio::fs::remove_file(&path).await;
        return Err(e);
    }
    Ok(path)
}

fn report_received(state: &AppState, saved: &[PathBuf]) {
    for path in saved {
        state
            .bus
            .report(format!("Received: {}", file_name_of(path)));
    }
}

/// 请求被拒绝时撤销已落盘的文件
async fn discard_uploads(saved: &[PathBuf]) {
    for path in saved {
        if let Err(e) = tokio::fs::remove_file(path).await {
            warn!("Failed to remove rejected upload {:?}: {}", path, e);
        }
    }
}

async fn copy_field(field: &mut Field<'_>, file: &mut tokio::fs::File) -> anyhow::Result<()> {
    while let Some(chunk) = field.chunk().await? {
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    Ok(())
}

fn notify_upload(state: &AppState, saved: &[PathBuf]) {
    let prefs = &state.prefs;
    if !prefs.show_notifications {
        return;
    }

    if let [path] = saved {
        let action = best_action_for(path);
        state.bus.notify(
            format!("Received file: {}", file_name_of(path)),
            path.clone(),
            action,
        );
        if prefs.auto_open_files {
            state.bus.request_action(path.clone(), action);
        }
    } else {
        state.bus.notify(
            format!("Received {} files", saved.len()),
            prefs.upload_dir.clone(),
            FileAction::Show,
        );
        if prefs.auto_open_files {
            state
                .bus
                .request_action(prefs.upload_dir.clone(), FileAction::OpenFolder);
        }
    }
}

/// 删除上传目录中的文件（浏览器撤销未确认的上传）
pub async fn delete(State(state): State<Arc<AppState>>, req: Request) -> Response {
    let filename = match form_value(req, "filename").await {
        Some(name) if !name.is_empty() => name,
        _ => return plain(StatusCode::BAD_REQUEST, "Filename required"),
    };

    let target = match contained_path(&state.prefs.upload_dir, &filename) {
        Ok(path) => path,
        Err(e) => {
            warn!("Rejected delete of {:?}: {}", filename, e);
            return path_error_response(&e, "Invalid file path");
        }
    };

    match tokio::fs::remove_file(&target).await {
        Ok(()) => {
            info!("Deleted {:?}", target);
            plain(StatusCode::OK, "File deleted successfully")
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => plain(StatusCode::NOT_FOUND, "File not found"),
        Err(e) => {
            error!("Failed to delete {:?}: {}", target, e);
            plain(StatusCode::INTERNAL_SERVER_ERROR, "Failed to delete file")
        }
    }
}

/// 读取表单值：支持 multipart 和 url-encoded 请求体，最后回退到查询串
async fn form_value(req: Request, key: &str) -> Option<String> {
    let is_multipart = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("multipart/form-data"));

    if is_multipart {
        let mut multipart = Multipart::from_request(req, &()).await.ok()?;
        while let Ok(Some(field)) = multipart.next_field().await {
            if field.name() == Some(key) {
                return field.text().await.ok();
            }
        }
        return None;
    }

    let from_query = Query::<HashMap<String, String>>::try_from_uri(req.uri())
        .ok()
        .and_then(|Query(mut query)| query.remove(key));
    match Form::<HashMap<String, String>>::from_request(req, &()).await {
        Ok(Form(mut body)) => body.remove(key).or(from_query),
        Err(_) => from_query,
    }
}

/// 列出共享目录中的文件
pub async fn browse(
    State(state): State<Arc<AppState>>,
    Query(query): Query<BrowseQuery>,
) -> Response {
    let prefs = &state.prefs;
    if !prefs.enable_downloads {
        return plain(StatusCode::FORBIDDEN, "Downloads not enabled");
    }

    let requested = query
        .path
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| ".".to_string());

    if let Err(e) = tokio::fs::create_dir_all(&prefs.shared_dir).await {
        warn!("Failed to create shared directory {:?}: {}", prefs.shared_dir, e);
    }

    let full_path = match contained_path(&prefs.shared_dir, &requested) {
        Ok(path) => path,
        Err(e) => {
            warn!("Rejected browse of {:?}: {}", requested, e);
            return path_error_response(&e, "Invalid path");
        }
    };

    let metadata = match tokio::fs::metadata(&full_path).await {
        Ok(m) => m,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return plain(StatusCode::NOT_FOUND, "Path not found");
        }
        Err(e) => {
            error!("Cannot access {:?}: {}", full_path, e);
            return plain(StatusCode::INTERNAL_SERVER_ERROR, "Cannot access path");
        }
    };

    let base = clean_relative(&requested);
    let mut files = Vec::new();
    if metadata.is_dir() {
        let mut entries = match tokio::fs::read_dir(&full_path).await {
            Ok(entries) => entries,
            Err(e) => {
                error!("Cannot read directory {:?}: {}", full_path, e);
                return plain(StatusCode::INTERNAL_SERVER_ERROR, "Cannot read directory");
            }
        };

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!("Skipping unreadable entry in {:?}: {}", full_path, e);
                    continue;
                }
            };
            let name = entry.file_name().to_string_lossy().into_owned();
            if IGNORED_ENTRIES.contains(&name.as_str()) {
                continue;
            }
            let Ok(info) = entry.metadata().await else {
                continue;
            };

            let relative_path = base.join(&name).to_string_lossy().into_owned();
            files.push(FileInfo {
                name,
                size: info.len(),
                mod_time: format_mod_time(info.modified()),
                is_directory: info.is_dir(),
                relative_path,
            });
        }
    } else {
        files.push(FileInfo {
            name: file_name_of(&full_path),
            size: metadata.len(),
            mod_time: format_mod_time(metadata.modified()),
            is_directory: false,
            relative_path: base.to_string_lossy().into_owned(),
        });
    }

    Json(BrowseResponse {
        path: requested,
        files,
    })
    .into_response()
}

fn format_mod_time(modified: io::Result<SystemTime>) -> String {
    let time: DateTime<Local> = modified.unwrap_or(SystemTime::UNIX_EPOCH).into();
    time.format(MOD_TIME_FORMAT).to_string()
}

/// 从共享目录下载单个文件
pub async fn download(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DownloadQuery>,
) -> Response {
    let prefs = &state.prefs;
    if !prefs.enable_downloads {
        return plain(StatusCode::FORBIDDEN, "Downloads not enabled");
    }

    let Some(requested) = query.file.filter(|f| !f.is_empty()) else {
        return plain(StatusCode::BAD_REQUEST, "File parameter required");
    };

    let full_path = match contained_path(&prefs.shared_dir, &requested) {
        Ok(path) => path,
        Err(e) => {
            warn!("Rejected download of {:?}: {}", requested, e);
            return path_error_response(&e, "Invalid file path");
        }
    };

    let metadata = match tokio::fs::metadata(&full_path).await {
        Ok(m) => m,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return plain(StatusCode::NOT_FOUND, "File not found");
        }
        Err(e) => {
            error!("Cannot access {:?}: {}", full_path, e);
            return plain(StatusCode::INTERNAL_SERVER_ERROR, "Cannot access file");
        }
    };
    if metadata.is_dir() {
        return plain(StatusCode::BAD_REQUEST, "Cannot download directory");
    }

    let file = match tokio::fs::File::open(&full_path).await {
        Ok(file) => file,
        Err(e) => {
            error!("Cannot open {:?}: {}", full_path, e);
            return plain(StatusCode::INTERNAL_SERVER_ERROR, "Cannot open file");
        }
    };

    let name = file_name_of(&full_path);
    state.bus.report(format!("Downloading: {}", name));

    // 流结束后再报告完成
    let bus = state.bus.clone();
    let finished_name = name.clone();
    let done = stream::once(async move {
        bus.report(format!("Downloaded: {}", finished_name));
    })
    .filter_map(|()| future::ready(None::<io::Result<Bytes>>));
    let body = Body::from_stream(ReaderStream::new(file).chain(done));

    let disposition = format!(
        "attachment; filename=\"{}\"",
        name.replace(['"', '\\', '\r', '\n'], "_")
    );
    let disposition = HeaderValue::from_bytes(disposition.as_bytes())
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"));

    (
        [
            (
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/octet-stream"),
            ),
            (header::CONTENT_DISPOSITION, disposition),
            (header::CONTENT_LENGTH, HeaderValue::from(metadata.len())),
        ],
        body,
    )
        .into_response()
}

/// 升级为信令 WebSocket
pub async fn signaling(
    State(state): State<Arc<AppState>>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => {
            warn!("WebSocket upgrade failed: {}", rejection);
            state.bus.report("WebRTC connection failed");
            return rejection.into_response();
        }
    };

    let negotiator = Arc::clone(&state.negotiator);
    let bus = state.bus.clone();
    let failed_bus = state.bus.clone();
    ws.on_failed_upgrade(move |e| {
        warn!("WebSocket upgrade failed: {}", e);
        failed_bus.report("WebRTC connection failed");
    })
    .on_upgrade(move |socket| async move {
        run_relay(socket, negotiator, bus).await;
    })
}
