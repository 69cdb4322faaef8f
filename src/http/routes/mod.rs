//! HTTP 路由模块
//!
//! 路由结构：
//! - `/api/app/*`   - 客户端接口（由网关写入 X-Account-Id）
//!   - `/api/app/decks/generate` - 上传文档并生成卡组
//!   - `/api/app/limits` - 当前套餐与本月额度
//!   - `/api/app/capacity` - 全局生成容量
//! - `/api/admin/*` - 管理接口（使用 X-Service-Key 认证）
//!   - `/api/admin/accounts/{account_id}` - 账号套餐
//!   - `/api/admin/accounts/{account_id}/quota/reset` - 配额重置
//! - `/metrics` - Prometheus 抓取端点

pub mod admin;
pub mod capacity;
pub mod generate;
pub mod limits;
pub mod metrics;

use axum::{Router, routing::get};
use crate::http::HttpServerState;

/// 创建所有路由
pub fn create_routes() -> Router<HttpServerState> {
    Router::new()
        .route("/metrics", get(metrics::metrics_handler))
        .merge(generate::create_route())   // /api/app/decks/generate - 生成卡组
        .merge(limits::create_route())     // /api/app/limits - 额度查询
        .merge(capacity::create_route())   // /api/app/capacity - 容量查询
        .merge(admin::create_route())      // /api/admin/* - 管理 API
}
