//! 额度查询路由
//!
//! 路由：GET /api/app/limits

use axum::{extract::State, response::Json, routing::get, Router};
use serde_json::Value;

use crate::error::Result;
use crate::http::middleware::AccountIdentity;
use crate::http::HttpServerState;

pub fn create_route() -> Router<HttpServerState> {
    Router::new().route("/api/app/limits", get(get_limits))
}

/// 当前套餐、本月已用与剩余次数、允许的密度
async fn get_limits(
    State(state): State<HttpServerState>,
    AccountIdentity(account_id): AccountIdentity,
) -> Result<Json<Value>> {
    let limits = state.admission.account_limits(account_id).await?;
    Ok(Json(serde_json::to_value(limits)?))
}
