//! Static file serving scoped to the OTA image directory.
//!
//! Request paths are percent-decoded and checked lexically, then canonicalized
//! and checked again by prefix against the canonical root, so neither `..`
//! segments nor symlinks can reach files outside it. Regular files are handed
//! to `ServeFile`, which supplies content type, length, conditional and range
//! handling. Directories redirect to their slash form, serve an index file if
//! present, or fall back to a generated listing.

use std::path::{Component, Path, PathBuf};

use axum::{
    body::Body,
    extract::{Request, State},
    http::{header::LOCATION, HeaderValue, StatusCode},
    response::{Html, IntoResponse, Response},
};
use html_escape::{encode_double_quoted_attribute, encode_text};
use tower::ServiceExt;
use tower_http::services::ServeFile;

use crate::config::INDEX_FILES;
use crate::error::RequestError;
use crate::state::AppState;

/// Handler for every GET/HEAD request.
pub async fn serve(
    State(state): State<AppState>,
    request: Request,
) -> Result<Response, RequestError> {
    let root = state.config.root_dir();
    let raw_path = request.uri().path().to_string();

    let relative = normalize_target(&raw_path)?;
    let target = resolve_within(root, &root.join(&relative)).await?;
    let metadata = tokio::fs::metadata(&target).await?;

    if metadata.is_dir() {
        if !raw_path.ends_with('/') {
            return redirect_to_slash(&request);
        }

        for index in INDEX_FILES {
            let candidate = target.join(index);
            let is_file = tokio::fs::metadata(&candidate)
                .await
                .map(|m| m.is_file())
                .unwrap_or(false);
            if is_file {
                let candidate = resolve_within(root, &candidate).await?;
                return serve_file(candidate, request).await;
            }
        }

        return directory_listing(&target, &raw_path).await;
    }

    if !metadata.is_file() || raw_path.ends_with('/') {
        return Err(RequestError::NotFound);
    }

    serve_file(target, request).await
}

/// Turn a raw request path into a path relative to the root.
///
/// Any `..` segment is treated as an escape attempt and reported as not found.
pub fn normalize_target(raw_path: &str) -> Result<PathBuf, RequestError> {
    let decoded = urlencoding::decode(raw_path)
        .map_err(|_| RequestError::BadRequest("request path is not valid UTF-8".to_string()))?;

    if decoded.contains('\0') {
        return Err(RequestError::BadRequest(
            "request path contains a NUL byte".to_string(),
        ));
    }

    let mut normalized = PathBuf::new();
    for component in Path::new(decoded.trim_start_matches('/')).components() {
        match component {
            Component::RootDir | Component::CurDir => {}
            Component::Normal(segment) => normalized.push(segment),
            Component::ParentDir | Component::Prefix(_) => {
                tracing::warn!(path = %raw_path, "Rejected path escaping the image directory");
                return Err(RequestError::NotFound);
            }
        }
    }

    Ok(normalized)
}

/// Canonicalize `path` and confirm it is still under `root` (itself canonical).
pub async fn resolve_within(root: &Path, path: &Path) -> Result<PathBuf, RequestError> {
    let canonical = tokio::fs::canonicalize(path).await?;
    if !canonical.starts_with(root) {
        tracing::warn!(
            path = %path.display(),
            resolved = %canonical.display(),
            "Rejected link resolving outside the image directory"
        );
        return Err(RequestError::NotFound);
    }
    Ok(canonical)
}

async fn serve_file(path: PathBuf, request: Request) -> Result<Response, RequestError> {
    // ServeFile reports open failures as 500, so surface permission errors here.
    tokio::fs::File::open(&path).await?;

    let response = ServeFile::new(&path)
        .oneshot(request)
        .await
        .unwrap_or_else(|never| match never {});

    tracing::debug!(file = %path.display(), status = response.status().as_u16(), "Served file");
    Ok(response.map(Body::new))
}

fn redirect_to_slash(request: &Request) -> Result<Response, RequestError> {
    let uri = request.uri();
    // A leading `//` would make the location scheme-relative, pointing at another host.
    let path = uri.path().trim_start_matches('/');
    let location = match uri.query() {
        Some(query) => format!("/{path}/?{query}"),
        None => format!("/{path}/"),
    };
    let location = HeaderValue::from_str(&location)
        .map_err(|_| RequestError::BadRequest("request path is not a valid header".to_string()))?;

    Ok((StatusCode::MOVED_PERMANENTLY, [(LOCATION, location)]).into_response())
}

struct ListingItem {
    name: String,
    is_dir: bool,
}

async fn directory_listing(dir: &Path, raw_path: &str) -> Result<Response, RequestError> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut items = Vec::new();

    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        let is_dir = tokio::fs::metadata(entry.path())
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);
        items.push(ListingItem { name, is_dir });
    }

    items.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));

    let title = urlencoding::decode(raw_path)
        .map(|path| path.into_owned())
        .unwrap_or_else(|_| raw_path.to_string());
    let title = encode_text(&title);

    let mut body = format!(
        "<!DOCTYPE HTML>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n\
         <title>Directory listing for {title}</title>\n</head>\n<body>\n\
         <h1>Directory listing for {title}</h1>\n<hr>\n<ul>\n"
    );

    for item in items {
        let suffix = if item.is_dir { "/" } else { "" };
        let href = urlencoding::encode(&item.name);
        body.push_str(&format!(
            "<li><a href=\"{}{suffix}\">{}{suffix}</a></li>\n",
            encode_double_quoted_attribute(&href),
            encode_text(&item.name),
        ));
    }

    body.push_str("</ul>\n<hr>\n</body>\n</html>\n");
    Ok(Html(body).into_response())
}
