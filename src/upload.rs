//! 多文件表单上传：写入来源页面对应的目录并重定向回去。

use axum::extract::multipart::{Field, MultipartError};
use axum::extract::{Extension, Multipart};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{info, warn};

use crate::atomic::AtomicFile;
use crate::config::UPLOAD_FIELD_NAME;
use crate::error::ApiError;
use crate::http::referer_path;
use crate::storage::{Storage, StorageError};

/// 请求体在文件上限之外为 multipart 边界与字段头预留的空间。
const MULTIPART_OVERHEAD: u64 = 64 * 1024;

#[derive(Debug)]
pub struct UploadConfig {
    pub max_size: u64,
}

impl UploadConfig {
    /// 整个请求体的上限，交给 `DefaultBodyLimit` 使用。
    ///
    /// 单个文件的上限由 `write_field` 按字节检查；请求体上限只兜住多文件总量。
    pub fn body_limit(&self) -> usize {
        usize::try_from(self.max_size.saturating_add(MULTIPART_OVERHEAD)).unwrap_or(usize::MAX)
    }
}

/// 处理 `POST /upload`：逐个写入 `files` 字段中的文件。
///
/// 任一文件出错即停止，之前已写入的文件保留。
pub async fn upload_files(
    Extension(storage): Extension<Arc<Storage>>,
    Extension(upload): Extension<Arc<UploadConfig>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    let destination = resolve_destination(&storage, &headers).await?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| multipart_error(err, upload.max_size))?
    {
        if field.name() != Some(UPLOAD_FIELD_NAME) {
            continue;
        }
        let Some(raw_name) = field.file_name().map(str::to_owned) else {
            continue;
        };
        let file_name = sanitize_file_name(&raw_name)?;
        let content_type = field.content_type().unwrap_or("").to_owned();
        let target = destination.join(file_name);

        let size = write_field(field, &target, upload.max_size).await?;
        info!(
            file = %target.display(),
            size,
            content_type = %content_type,
            "uploaded file"
        );
    }

    let location = headers
        .get(header::REFERER)
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static("/"));
    Ok((StatusCode::FOUND, [(header::LOCATION, location)]).into_response())
}

/// 目标目录：来源页面路径映射到根目录下，且必须已经存在。
async fn resolve_destination(storage: &Storage, headers: &HeaderMap) -> Result<PathBuf, ApiError> {
    let relative =
        referer_path(headers).ok_or_else(|| ApiError::BadRequest("invalid referer".into()))?;
    let destination = storage
        .resolve_checked(&relative)
        .await
        .map_err(|err| match err {
            StorageError::OutsideRoot => ApiError::BadRequest("invalid upload destination".into()),
            StorageError::Io(err) => ApiError::UploadIo(err),
        })?;
    let metadata = fs::metadata(&destination).await.map_err(ApiError::UploadIo)?;
    if !metadata.is_dir() {
        return Err(ApiError::BadRequest("upload destination is not a directory".into()));
    }
    Ok(destination)
}

/// 只保留客户端文件名的最后一段，拒绝空名与 `.`/`..`。
fn sanitize_file_name(raw: &str) -> Result<&str, ApiError> {
    let last = raw.rsplit(['/', '\\']).next().unwrap_or("");
    match Path::new(last).file_name().and_then(|name| name.to_str()) {
        Some(name) if name == last => Ok(name),
        _ => Err(ApiError::BadRequest(format!("invalid file name: {raw:?}"))),
    }
}

async fn write_field(mut field: Field<'_>, target: &Path, max_size: u64) -> Result<u64, ApiError> {
    let mut file = AtomicFile::create(target).await.map_err(ApiError::UploadIo)?;

    loop {
        let chunk = match field.chunk().await {
            Ok(Some(chunk)) => chunk,
            Ok(None) => break,
            Err(err) => {
                file.discard().await;
                return Err(multipart_error(err, max_size));
            }
        };
        if file.written() + chunk.len() as u64 > max_size {
            file.discard().await;
            warn!(file = %target.display(), max_size, "upload exceeds size limit");
            return Err(ApiError::PayloadTooLarge(max_size));
        }
        if let Err(err) = file.write_chunk(&chunk).await {
            file.discard().await;
            return Err(ApiError::UploadIo(err));
        }
    }

    file.persist().await.map_err(ApiError::UploadIo)
}

fn multipart_error(err: MultipartError, max_size: u64) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        warn!(error = %err.body_text(), max_size, "upload body exceeds size limit");
        return ApiError::PayloadTooLarge(max_size);
    }
    ApiError::BadRequest(err.body_text())
}
