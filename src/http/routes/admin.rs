//! 管理 API 路由模块
//!
//! 使用 X-Service-Key 进行安全认证：
//! - 查询账号套餐与额度
//! - 创建账号 / 修改套餐
//! - 重置本月配额

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::admission::{AdmissionRejection, QuotaError};
use crate::error::{Result, ServerError};
use crate::http::middleware::verify_service_key;
use crate::http::HttpServerState;
use crate::model::AccountId;

/// 创建管理 API 路由
pub fn create_route() -> Router<HttpServerState> {
    Router::new()
        .route("/api/admin/accounts/{account_id}", get(get_account).put(upsert_account))
        .route("/api/admin/accounts/{account_id}/quota/reset", post(reset_quota))
}

#[derive(Debug, Deserialize)]
struct UpsertAccountRequest {
    plan: String,
}

/// 查询账号套餐与额度
async fn get_account(
    State(state): State<HttpServerState>,
    headers: HeaderMap,
    Path(account_id): Path<AccountId>,
) -> Result<Json<Value>> {
    verify_service_key(&headers, &state)?;
    let limits = state
        .admission
        .account_limits(account_id)
        .await
        .map_err(|e| match e {
            AdmissionRejection::AccountNotFound(id) => ServerError::NotFound(format!("account {}", id)),
            other => other.into(),
        })?;
    Ok(Json(serde_json::to_value(limits)?))
}

/// 创建账号或修改套餐
async fn upsert_account(
    State(state): State<HttpServerState>,
    headers: HeaderMap,
    Path(account_id): Path<AccountId>,
    Json(body): Json<UpsertAccountRequest>,
) -> Result<Json<Value>> {
    verify_service_key(&headers, &state)?;

    let plan = body.plan.trim();
    if !state.admission.plans().contains(plan) {
        return Err(ServerError::Validation(format!("未知套餐: {}", plan)));
    }

    let record = state.admission.store().upsert_account(account_id, plan).await?;
    info!("🛠️ 账号套餐已更新: account_id={}, plan={}", account_id, record.plan_name);

    Ok(Json(json!({
        "account_id": record.account_id,
        "plan": record.plan_name,
        "period_key": record.quota.period_key,
        "used_count": record.quota.used_count,
        "created_at": record.created_at,
    })))
}

/// 重置本月配额
async fn reset_quota(
    State(state): State<HttpServerState>,
    headers: HeaderMap,
    Path(account_id): Path<AccountId>,
) -> Result<Json<Value>> {
    verify_service_key(&headers, &state)?;

    let quota = state
        .admission
        .ledger()
        .reset(account_id)
        .await
        .map_err(|e| match e {
            QuotaError::AccountNotFound(id) => ServerError::NotFound(format!("account {}", id)),
            other => other.into(),
        })?;
    Ok(Json(serde_json::to_value(quota)?))
}
