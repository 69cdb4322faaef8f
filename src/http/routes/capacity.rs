//! 容量查询路由
//!
//! 路由：GET /api/app/capacity
//! 返回值只是观测快照，不能作为准入依据。

use axum::{extract::State, response::Json, routing::get, Router};
use serde_json::{json, Value};

use crate::http::HttpServerState;

pub fn create_route() -> Router<HttpServerState> {
    Router::new().route("/api/app/capacity", get(get_capacity))
}

async fn get_capacity(State(state): State<HttpServerState>) -> Json<Value> {
    let generation = state.admission.generation();
    let llm = state.generator.llm();
    Json(json!({
        "generation": {
            "max": generation.max_permits(),
            "in_flight": generation.in_flight(),
            "available": generation.available_count(),
            "slot_available": generation.is_slot_available(),
            "rejected_total": generation.rejected_total(),
        },
        "llm_calls": {
            "max": llm.max_permits(),
            "in_flight": llm.in_flight(),
            "available": llm.available_count(),
        },
        "accounts_generating": state.admission.tracker().active_count(),
    }))
}
