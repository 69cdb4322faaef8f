//! 管理接口 Service Key 验证

use axum::http::HeaderMap;
use tracing::warn;

use crate::error::{Result, ServerError};
use crate::http::HttpServerState;

/// 从请求头中提取并验证 Service Key
pub fn verify_service_key(headers: &HeaderMap, state: &HttpServerState) -> Result<()> {
    let expected = state.service_key.as_deref().ok_or_else(|| {
        warn!("管理接口未配置 service_key，拒绝访问");
        ServerError::Forbidden("管理接口未启用".to_string())
    })?;

    let key = headers
        .get("X-Service-Key")
        .ok_or_else(|| {
            warn!("缺少 X-Service-Key 请求头");
            ServerError::Unauthorized("缺少 X-Service-Key 请求头".to_string())
        })?
        .to_str()
        .map_err(|_| {
            warn!("X-Service-Key 格式无效");
            ServerError::Unauthorized("X-Service-Key 格式无效".to_string())
        })?;

    if key != expected {
        warn!("❌ 无效的 service key");
        return Err(ServerError::Unauthorized("无效的 service key".to_string()));
    }

    Ok(())
}
