//! Prometheus 指标：准入结果、槽位占用、配额扣减/退还、LLM 调用延迟等
//!
//! 通过 `init()` 安装全局 Recorder，通过 HTTP GET `/metrics` 暴露抓取端点。
//! 未初始化时记录调用为空操作。

use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::OnceLock;

static HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// 指标名称
const COUNTER_ADMISSIONS_TOTAL: &str = "flashdeck_admissions_total";
const GAUGE_GENERATION_INFLIGHT: &str = "flashdeck_generation_slots_inflight";
const COUNTER_GENERATION_REJECTED: &str = "flashdeck_generation_slots_rejected_total";
const GAUGE_LLM_INFLIGHT: &str = "flashdeck_llm_calls_inflight";
const GAUGE_ACCOUNTS_ACTIVE: &str = "flashdeck_accounts_generating";
const HISTOGRAM_LLM_CALL_DURATION: &str = "flashdeck_llm_call_duration_seconds";
const COUNTER_LLM_CALL_FAILURES: &str = "flashdeck_llm_call_failures_total";
const COUNTER_QUOTA_CONSUMED: &str = "flashdeck_quota_consumed_total";
const COUNTER_QUOTA_REFUNDED: &str = "flashdeck_quota_refunded_total";
const COUNTER_DECKS_GENERATED: &str = "flashdeck_decks_generated_total";
const COUNTER_CARDS_GENERATED: &str = "flashdeck_cards_generated_total";

/// 初始化 Prometheus 指标（安装全局 Recorder）。
/// 仅需在进程内调用一次；重复调用会返回 Err。
pub fn init() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let handle = metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;
    HANDLE
        .set(handle)
        .map_err(|_| "metrics already initialized")?;
    Ok(())
}

/// 是否已初始化（可供 /metrics 使用）
pub fn is_initialized() -> bool {
    HANDLE.get().is_some()
}

/// 渲染当前指标为 Prometheus 文本格式，供 GET /metrics 使用。
pub fn render_metrics() -> Option<String> {
    HANDLE.get().map(|h| h.render())
}

/// 记录一次准入决定（outcome = admitted 或拒绝原因码）
pub fn record_admission(outcome: &'static str) {
    metrics::counter!(COUNTER_ADMISSIONS_TOTAL, "outcome" => outcome).increment(1);
}

/// 更新槽位占用（Gauge）。由定时任务周期调用。
pub fn record_slot_usage(generation_inflight: usize, llm_inflight: usize, accounts_active: usize) {
    metrics::gauge!(GAUGE_GENERATION_INFLIGHT).set(generation_inflight as f64);
    metrics::gauge!(GAUGE_LLM_INFLIGHT).set(llm_inflight as f64);
    metrics::gauge!(GAUGE_ACCOUNTS_ACTIVE).set(accounts_active as f64);
}

/// 记录生成槽位被拒绝次数（Counter）。
pub fn record_generation_rejected(count: u64) {
    metrics::counter!(COUNTER_GENERATION_REJECTED).absolute(count);
}

/// 记录一次 LLM 调用耗时；失败时额外计数
pub fn record_llm_call(duration_secs: f64, success: bool) {
    metrics::histogram!(HISTOGRAM_LLM_CALL_DURATION).record(duration_secs);
    if !success {
        metrics::counter!(COUNTER_LLM_CALL_FAILURES).increment(1);
    }
}

pub fn record_quota_consumed() {
    metrics::counter!(COUNTER_QUOTA_CONSUMED).increment(1);
}

pub fn record_quota_refunded() {
    metrics::counter!(COUNTER_QUOTA_REFUNDED).increment(1);
}

/// 记录一个生成完成的卡组及其卡片数
pub fn record_deck_generated(cards: usize) {
    metrics::counter!(COUNTER_DECKS_GENERATED).increment(1);
    metrics::counter!(COUNTER_CARDS_GENERATED).increment(cards as u64);
}
