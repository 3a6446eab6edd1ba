//! 请求链路中间件：关联 ID 分配与访问日志，以及二者的组合顺序。

use axum::Router;
use axum::body::Body as AxumBody;
use axum::extract::State;
use axum::http::{HeaderName, HeaderValue, Request};
use axum::middleware::{self, Next};
use axum::response::Response;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tower::ServiceBuilder;
use tracing::{Instrument, info, info_span};

use crate::config::REQUEST_ID_HEADER;
use crate::http::{extract_forwarded_ip, remote_addr, user_agent};

const BASE36_DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// 当前请求的关联 ID，由 [`assign_request_id`] 写入请求扩展。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestId(pub String);

/// 基于纳秒时钟生成关联 ID，保证进程内严格递增。
#[derive(Clone, Debug, Default)]
pub struct RequestIdGenerator {
    last_issued: Arc<AtomicU64>,
}

impl RequestIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> String {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX))
            .unwrap_or(0);
        let previous = self
            .last_issued
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
                Some(now.max(last.saturating_add(1)))
            })
            .unwrap_or_else(|last| last);
        encode_base36(now.max(previous.saturating_add(1)))
    }
}

fn encode_base36(mut value: u64) -> String {
    if value == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while value > 0 {
        digits.push(BASE36_DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    digits.reverse();
    String::from_utf8_lossy(&digits).into_owned()
}

/// 按固定顺序包装路由：关联 ID 在最外层，访问日志在其内侧。
pub fn apply(router: Router, generator: RequestIdGenerator) -> Router {
    router.layer(
        ServiceBuilder::new()
            .layer(middleware::from_fn_with_state(generator, assign_request_id))
            .layer(middleware::from_fn(log_requests)),
    )
}

/// 沿用请求中的 `X-Request-Id`，为空时生成新值，并回写到响应头。
pub async fn assign_request_id(
    State(generator): State<RequestIdGenerator>,
    mut request: Request<AxumBody>,
    next: Next,
) -> Response {
    let header_name = HeaderName::from_static(REQUEST_ID_HEADER);
    let value = match request
        .headers()
        .get(&header_name)
        .filter(|value| !value.is_empty())
    {
        Some(value) => value.clone(),
        None => HeaderValue::from_str(&generator.next_id())
            .unwrap_or_else(|_| HeaderValue::from_static("unknown")),
    };

    request
        .headers_mut()
        .insert(header_name.clone(), value.clone());
    request.extensions_mut().insert(RequestId(
        String::from_utf8_lossy(value.as_bytes()).into_owned(),
    ));

    let mut response = next.run(request).await;
    response.headers_mut().insert(header_name, value);
    response
}

/// 访问日志：处理器返回后输出一条包含耗时的记录。
pub async fn log_requests(request: Request<AxumBody>, next: Next) -> Response {
    let start = Instant::now();
    let request_id = request
        .extensions()
        .get::<RequestId>()
        .map(|id| id.0.clone())
        .unwrap_or_else(|| "unknown".to_string());
    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let remote = remote_addr(&request);
    let forwarded_for = extract_forwarded_ip(request.headers()).map(|ip| ip.to_string());
    let agent = user_agent(request.headers()).to_owned();

    let span = info_span!("request", request_id = %request_id);
    let response = next.run(request).instrument(span).await;

    info!(
        request_id = %request_id,
        method = %method,
        path = %path,
        remote_addr = %remote,
        forwarded_for = forwarded_for.as_deref().unwrap_or("-"),
        user_agent = %agent,
        status = response.status().as_u16(),
        elapsed = ?start.elapsed(),
        "request completed"
    );
    response
}
