//! 路由表与共享状态注入。

use axum::Router;
use axum::extract::{DefaultBodyLimit, Extension};
use axum::routing::{get, post};
use std::sync::Arc;
use tower_http::timeout::RequestBodyTimeoutLayer;

use crate::config::READ_TIMEOUT;
use crate::health::{Health, healthz};
use crate::middleware::{self, RequestIdGenerator};
use crate::files;
use crate::storage::Storage;
use crate::upload::{UploadConfig, upload_files};

/// 组装完整应用：基础路由外包关联 ID 与访问日志中间件。
pub fn build_router(
    storage: Arc<Storage>,
    upload_config: Arc<UploadConfig>,
    health: Arc<Health>,
) -> Router {
    let body_limit = upload_config.body_limit();
    let router = Router::new()
        .route("/", get(files::serve_path))
        .route("/{*path}", get(files::serve_path))
        .route(
            "/upload",
            post(upload_files).layer(DefaultBodyLimit::max(body_limit)),
        )
        .route("/healthz", get(healthz))
        .layer(RequestBodyTimeoutLayer::new(READ_TIMEOUT))
        .layer(Extension(storage))
        .layer(Extension(upload_config))
        .layer(Extension(health));

    middleware::apply(router, RequestIdGenerator::new())
}
