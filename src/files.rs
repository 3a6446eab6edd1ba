//! 文件下载与目录列表处理器。

use axum::body::Body as AxumBody;
use axum::extract::Extension;
use axum::http::{Request, StatusCode, header};
use axum::response::{Html, IntoResponse, Response};
use percent_encoding::percent_decode_str;
use std::path::Path;
use std::sync::Arc;
use tokio::fs;
use tower::ServiceExt;
use tower_http::services::ServeFile;
use tracing::{debug, info};

use crate::config::FAVICON_PATH;
use crate::error::ApiError;
use crate::listing::Listing;
use crate::storage::{Storage, StorageError};

/// 根目录下的 GET 请求：文件直接下载，目录渲染列表。
pub async fn serve_path(
    Extension(storage): Extension<Arc<Storage>>,
    request: Request<AxumBody>,
) -> Result<Response, ApiError> {
    let raw_path = request.uri().path().to_owned();
    if raw_path == FAVICON_PATH {
        return Ok(StatusCode::NO_CONTENT.into_response());
    }

    let decoded = percent_decode_str(&raw_path)
        .decode_utf8()
        .map_err(|_| ApiError::NotFound)?
        .into_owned();
    let target = storage.resolve_checked(&decoded).await?;
    let metadata = fs::metadata(&target).await.map_err(StorageError::from)?;

    if !metadata.is_dir() {
        debug!(path = %decoded, size = metadata.len(), "serve file");
        return serve_file(&target, request).await;
    }

    if !raw_path.ends_with('/') {
        let location = match request.uri().query() {
            Some(query) => format!("{raw_path}/?{query}"),
            None => format!("{raw_path}/"),
        };
        return Ok((StatusCode::MOVED_PERMANENTLY, [(header::LOCATION, location)]).into_response());
    }

    let listing = Listing::build(&target, &decoded)
        .await
        .map_err(ApiError::DirectoryRead)?;
    let html = listing
        .render()
        .map_err(|err| ApiError::Render(err.to_string()))?;
    info!(path = %decoded, count = listing.entries.len(), "list directory");
    Ok(Html(html).into_response())
}

/// 交给 `ServeFile` 处理 Content-Type、Range 与条件请求。
async fn serve_file(target: &Path, request: Request<AxumBody>) -> Result<Response, ApiError> {
    match ServeFile::new(target).oneshot(request).await {
        Ok(response) => Ok(response.map(AxumBody::new)),
        Err(never) => match never {},
    }
}
