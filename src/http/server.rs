//! HTTP 服务器 - 使用 Axum 提供闪卡生成 API

use axum::{extract::DefaultBodyLimit, Router};
use std::future::Future;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::admission::AdmissionController;
use crate::generation::DeckGenerator;
use crate::http::routes;

/// multipart 表单字段（density 等）的额外余量
const FORM_OVERHEAD_BYTES: usize = 64 * 1024;

/// HTTP 服务器共享状态
#[derive(Clone)]
pub struct HttpServerState {
    pub admission: Arc<AdmissionController>,
    pub generator: Arc<DeckGenerator>,
    /// 管理接口密钥
    pub service_key: Option<Arc<str>>,
    /// 单个上传文档的最大字节数
    pub max_upload_bytes: usize,
}

impl HttpServerState {
    pub fn new(
        admission: Arc<AdmissionController>,
        generator: Arc<DeckGenerator>,
        service_key: Option<String>,
        max_upload_bytes: usize,
    ) -> Self {
        Self {
            admission,
            generator,
            service_key: service_key.map(Arc::from),
            max_upload_bytes,
        }
    }
}

/// 构建完整路由（测试中直接使用）
pub fn build_router(state: HttpServerState) -> Router {
    let body_limit = state.max_upload_bytes.saturating_add(FORM_OVERHEAD_BYTES);
    Router::new()
        .merge(routes::create_routes())
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// HTTP 服务器
pub struct DeckHttpServer {
    state: HttpServerState,
    bind_address: String,
}

impl DeckHttpServer {
    pub fn new(state: HttpServerState, bind_address: impl Into<String>) -> Self {
        Self {
            state,
            bind_address: bind_address.into(),
        }
    }

    /// 启动 HTTP 服务器，`shutdown` 完成后优雅退出
    pub async fn start<F>(&self, shutdown: F) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let app = build_router(self.state.clone());

        let listener = tokio::net::TcpListener::bind(&self.bind_address).await?;
        info!("🌐 HTTP 服务器启动在 {}", self.bind_address);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("👋 HTTP 服务器已停止");
        Ok(())
    }
}
