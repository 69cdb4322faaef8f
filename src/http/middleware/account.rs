//! 调用方账号提取
//!
//! 认证由上游网关完成，网关把已认证的账号写入 `X-Account-Id` 请求头。

use axum::{extract::FromRequestParts, http::request::Parts};

use crate::error::ServerError;
use crate::model::AccountId;

/// 账号请求头
pub const ACCOUNT_ID_HEADER: &str = "X-Account-Id";

/// 已认证的调用方账号
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountIdentity(pub AccountId);

impl<S> FromRequestParts<S> for AccountIdentity
where
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(ACCOUNT_ID_HEADER)
            .ok_or_else(|| ServerError::Unauthorized(format!("缺少 {} 请求头", ACCOUNT_ID_HEADER)))?;

        value
            .to_str()
            .ok()
            .and_then(|s| s.trim().parse::<AccountId>().ok())
            .map(AccountIdentity)
            .ok_or_else(|| ServerError::Unauthorized(format!("{} 格式无效", ACCOUNT_ID_HEADER)))
    }
}
