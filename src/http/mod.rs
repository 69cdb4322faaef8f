//! HTTP 服务器模块 - 使用 Axum 提供闪卡生成 API
//!
//! 功能包括：
//! - 卡组生成接口（准入 + 生成）
//! - 账号额度与全局容量查询
//! - 管理接口（账号套餐、配额重置）
//! - Prometheus 指标

pub mod routes;
pub mod middleware;
pub mod server;

pub use server::{DeckHttpServer, HttpServerState};
