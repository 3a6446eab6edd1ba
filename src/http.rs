//! HTTP 辅助工具：客户端地址、User-Agent 与来源页面路径解析。

use axum::extract::connect_info::ConnectInfo;
use axum::http::{HeaderMap, Request, Uri, header};
use percent_encoding::percent_decode_str;
use std::net::{IpAddr, SocketAddr};

/// 连接层面的对端地址；测试中没有连接信息时为 `unknown`。
pub fn remote_addr<B>(request: &Request<B>) -> String {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// 从 `x-forwarded-for` 解析客户端 IP。
pub fn extract_forwarded_ip(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .and_then(|value| value.parse::<IpAddr>().ok())
}

pub fn user_agent(headers: &HeaderMap) -> &str {
    headers
        .get(header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("")
}

/// 来源页面在本站内的路径（已解码）。
///
/// 优先去掉与 `Origin` 相同的前缀；否则取 Referer URL 的路径部分。
/// 没有 Referer 时返回 `/`。
pub fn referer_path(headers: &HeaderMap) -> Option<String> {
    let Some(referer) = headers
        .get(header::REFERER)
        .and_then(|value| value.to_str().ok())
    else {
        return Some("/".to_string());
    };
    let origin = headers
        .get(header::ORIGIN)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty() && *value != "null");
    let local = match origin.and_then(|origin| referer.strip_prefix(origin)) {
        Some(rest) if rest.is_empty() => "/",
        Some(rest) => rest,
        None => referer,
    };
    let uri = local.parse::<Uri>().ok()?;
    let decoded = percent_decode_str(uri.path()).decode_utf8().ok()?;
    Some(decoded.into_owned())
}
