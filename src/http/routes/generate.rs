//! 卡组生成路由
//!
//! 路由：POST /api/app/decks/generate
//! 表单：file（必填）、density（可选，默认 low）
//!
//! 先做准入（快速失败），准入通过后在请求内完成生成。客户端断开时
//! handler future 被 drop，租约随之释放全部槽位。

use axum::{
    extract::State,
    response::Json,
    routing::post,
    Router,
};
use axum_extra::extract::Multipart;
use bytes::Bytes;
use serde_json::{json, Value};
use tracing::info;

use crate::admission::AdmissionRequest;
use crate::error::{Result, ServerError};
use crate::http::middleware::AccountIdentity;
use crate::http::HttpServerState;

/// 创建生成路由
pub fn create_route() -> Router<HttpServerState> {
    Router::new().route("/api/app/decks/generate", post(generate_deck))
}

/// 卡组生成处理器
async fn generate_deck(
    State(state): State<HttpServerState>,
    AccountIdentity(account_id): AccountIdentity,
    mut multipart: Multipart,
) -> Result<Json<Value>> {
    let mut file_data: Option<Bytes> = None;
    let mut filename: Option<String> = None;
    let mut density: Option<String> = None;

    // 解析 multipart/form-data：file 必填；density 可选
    while let Some(field) = multipart.next_field().await
        .map_err(|e| ServerError::Validation(format!("解析 multipart 失败: {}", e)))? {
        let field_name = field.name().unwrap_or("").to_string();
        match field_name.as_str() {
            "file" => {
                filename = field.file_name().map(|s| s.to_string());
                let data = field.bytes().await
                    .map_err(|e| ServerError::Validation(format!("读取文件数据失败: {}", e)))?;
                file_data = Some(data);
            }
            "density" => {
                let s = field.text().await
                    .map_err(|e| ServerError::Validation(format!("读取 density 失败: {}", e)))?;
                density = Some(s);
            }
            _ => {}
        }
    }

    // 验证必需字段（准入之前，不消耗配额）
    let file_data = file_data.ok_or_else(|| ServerError::Validation("缺少文件数据".to_string()))?;
    if file_data.is_empty() {
        return Err(ServerError::Validation("文件为空".to_string()));
    }
    if file_data.len() > state.max_upload_bytes {
        return Err(ServerError::Validation(format!(
            "文件大小 {} 超过限制 {} bytes",
            file_data.len(),
            state.max_upload_bytes
        )));
    }
    let filename = filename
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| "document.txt".to_string());

    info!(
        "📤 生成请求: account_id={}, file={} ({} bytes), density={}",
        account_id,
        filename,
        file_data.len(),
        density.as_deref().unwrap_or("-")
    );

    let mut request = AdmissionRequest::new(account_id).with_document(filename, file_data);
    request.density = density;

    let lease = state.admission.check_and_reserve(request).await?;
    let request_id = lease.request_id();

    let generated = state
        .generator
        .run(lease)
        .await
        .map_err(|(e, _settlement)| ServerError::from(e))?;

    Ok(Json(json!({
        "request_id": request_id,
        "deck": generated.deck,
        "card_count": generated.deck.cards.len(),
        "quota_refunded": generated.settlement.quota_refunded,
    })))
}
