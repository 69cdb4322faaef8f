//! GET /metrics - Prometheus 抓取端点

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};

use crate::http::HttpServerState;
use crate::infra::metrics;

/// GET /metrics：抓取前先刷新槽位占用，再返回 Prometheus 文本格式指标。
/// 若未初始化指标（init 未调用），返回 503。
pub async fn metrics_handler(State(state): State<HttpServerState>) -> Response {
    if !metrics::is_initialized() {
        return (StatusCode::SERVICE_UNAVAILABLE, "metrics not initialized").into_response();
    }

    let generation = state.admission.generation();
    metrics::record_slot_usage(
        generation.in_flight(),
        state.generator.llm().in_flight(),
        state.admission.tracker().active_count(),
    );
    metrics::record_generation_rejected(generation.rejected_total());

    match metrics::render_metrics() {
        Some(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "metrics not initialized").into_response(),
    }
}
