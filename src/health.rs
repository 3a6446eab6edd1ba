//! 进程级健康状态与 `/healthz` 探针。

use axum::extract::Extension;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// 0 表示未就绪，非 0 为就绪时刻（Unix 纪元起的纳秒数）。
#[derive(Debug, Default)]
pub struct Health {
    ready_since: AtomicU64,
}

impl Health {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录当前时间为就绪时刻。
    pub fn mark_ready(&self) {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX))
            .unwrap_or(0);
        self.ready_since.store(now.max(1), Ordering::Release);
    }

    pub fn mark_not_ready(&self) {
        self.ready_since.store(0, Ordering::Release);
    }

    /// 就绪以来经过的时间；未就绪时返回 `None`。
    pub fn uptime(&self) -> Option<Duration> {
        let since = self.ready_since.load(Ordering::Acquire);
        if since == 0 {
            return None;
        }
        let started = UNIX_EPOCH + Duration::from_nanos(since);
        Some(SystemTime::now().duration_since(started).unwrap_or_default())
    }
}

/// 健康检查处理器：未就绪返回 503，就绪返回运行时长。
pub async fn healthz(Extension(health): Extension<Arc<Health>>) -> Response {
    match health.uptime() {
        Some(uptime) => (StatusCode::OK, format!("uptime: {uptime:?}\n")).into_response(),
        None => StatusCode::SERVICE_UNAVAILABLE.into_response(),
    }
}
