use std::path::{Path, PathBuf};

use axum::Json;
use axum::body::Body;
use axum::extract::{Path as UrlPath, Query, Request};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower::ServiceExt;
use tower_http::services::ServeFile;
use tracing::debug;

use crate::consts::{DEFAULT_IMAGE_DIR, IMAGE_EXTENSIONS};

/// Relative to the working directory first, then anchored at `/`, so that
/// `/result` followed by an absolute `main_result` path resolves.
fn result_candidates(raw: &str) -> Vec<PathBuf> {
    let path = PathBuf::from(raw);
    if path.is_absolute() {
        vec![path]
    } else {
        vec![path.clone(), Path::new("/").join(path)]
    }
}

async fn first_file(candidates: Vec<PathBuf>) -> Option<PathBuf> {
    for path in candidates {
        if tokio::fs::metadata(&path)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false)
        {
            return Some(path);
        }
    }
    None
}

fn result_not_found(raw: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": "file not found",
            "path": raw,
        })),
    )
        .into_response()
}

/// `GET /result/{*path}`: a produced file, by server-local path. Streamed,
/// with the content type guessed from the extension.
pub async fn result(UrlPath(raw): UrlPath<String>, request: Request) -> Response {
    let Some(path) = first_file(result_candidates(&raw)).await else {
        debug!(path = %raw, "result not found");
        return result_not_found(&raw);
    };

    let served = match ServeFile::new(&path).oneshot(request).await {
        Ok(response) => response,
        Err(never) => match never {},
    };
    if served.status() == StatusCode::NOT_FOUND {
        debug!(path = %path.display(), "result vanished before it was served");
        return result_not_found(&raw);
    }

    let mut response = served.map(Body::new);
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    if let Ok(disposition) = HeaderValue::from_str(&format!("inline; filename=\"{name}\"")) {
        response
            .headers_mut()
            .insert(header::CONTENT_DISPOSITION, disposition);
    }
    response
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    directory: Option<String>,
}

#[derive(Debug, Serialize)]
struct ImageListing {
    directory: String,
    absolute_directory: PathBuf,
    images: Vec<String>,
    full_paths: Vec<PathBuf>,
    absolute_paths: Vec<PathBuf>,
}

fn image_globs() -> Result<GlobSet, globset::Error> {
    let mut builder = GlobSetBuilder::new();
    for ext in IMAGE_EXTENSIONS {
        builder.add(
            GlobBuilder::new(&format!("*.{ext}"))
                .case_insensitive(true)
                .build()?,
        );
    }
    builder.build()
}

/// Sorted image file names directly inside `dir`.
fn image_names(dir: &Path) -> std::io::Result<Vec<String>> {
    let globs = image_globs().map_err(std::io::Error::other)?;
    let mut names: Vec<String> = std::fs::read_dir(dir)?
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| globs.is_match(name))
        .collect();
    names.sort();
    Ok(names)
}

/// `GET /list_images?directory=`: input images available on this host.
pub async fn list_images(Query(query): Query<ListQuery>) -> Response {
    let directory = query
        .directory
        .unwrap_or_else(|| DEFAULT_IMAGE_DIR.to_string());
    let requested = PathBuf::from(&directory);
    let absolute_directory =
        std::path::absolute(&requested).unwrap_or_else(|_| requested.clone());

    if !absolute_directory.is_dir() {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({
                "error": "directory not found",
                "requested_path": directory,
                "absolute_path": absolute_directory.to_string_lossy(),
            })),
        )
            .into_response();
    }

    let lookup_dir = absolute_directory.clone();
    let names = match tokio::task::spawn_blocking(move || image_names(&lookup_dir)).await {
        Ok(Ok(names)) => names,
        Ok(Err(e)) => return listing_error(&directory, e.to_string()),
        Err(e) => return listing_error(&directory, e.to_string()),
    };

    let listing = ImageListing {
        full_paths: names.iter().map(|n| requested.join(n)).collect(),
        absolute_paths: names.iter().map(|n| absolute_directory.join(n)).collect(),
        images: names,
        directory,
        absolute_directory,
    };
    Json(listing).into_response()
}

fn listing_error(directory: &str, message: String) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({
            "error": message,
            "requested_path": directory,
        })),
    )
        .into_response()
}
