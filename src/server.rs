use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::admission::{
    AccountGenerationTracker, AdmissionController, GenerationSemaphore, LlmCallSemaphore, PlanResolver,
    QuotaLedger,
};
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::generation::{DeckGenerator, HttpGenerationClient, PlainTextPipeline};
use crate::http::{DeckHttpServer, HttpServerState};
use crate::infra::{database::Database, metrics, UploadStore};
use crate::repository::{AccountStore, MemoryAccountStore, PgAccountRepository};

/// 槽位指标上报间隔
const SLOT_METRICS_INTERVAL: Duration = Duration::from_secs(5);

/// 闪卡生成服务器
pub struct DeckServer {
    config: ServerConfig,
    state: HttpServerState,
    database: Option<Arc<Database>>,
}

impl DeckServer {
    /// 构建全部组件：四个资源池在此创建一次，之后通过依赖注入共享
    pub async fn new(config: ServerConfig) -> Result<Self, ServerError> {
        info!("🔧 初始化闪卡生成服务器组件...");

        // 📊 Prometheus 指标
        if config.enable_metrics {
            match metrics::init() {
                Ok(()) => info!("✅ Prometheus 指标已初始化"),
                Err(e) => warn!("⚠️ Prometheus 指标初始化失败: {}", e),
            }
        }

        // 🔌 账号存储：配置了数据库则用 PostgreSQL，否则使用进程内存储
        let (store, database): (Arc<dyn AccountStore>, Option<Arc<Database>>) = match &config.database_url {
            Some(url) => {
                info!("🔌 初始化数据库连接...");
                let database = Database::new(url, config.database_max_connections)
                    .await
                    .map_err(|e| ServerError::Database(format!("数据库连接失败: {}", e)))?;
                let database = Arc::new(database);
                let pool = Arc::new(database.pool().clone());
                (Arc::new(PgAccountRepository::new(pool)), Some(database))
            }
            None => {
                warn!("⚠️ 未配置 database_url，账号与配额保存在内存中，重启后丢失");
                (Arc::new(MemoryAccountStore::new()), None)
            }
        };

        // 👤 预置账号
        for seed in &config.accounts {
            store.upsert_account(seed.account_id, &seed.plan).await?;
            info!("👤 预置账号: account_id={}, plan={}", seed.account_id, seed.plan);
        }

        let plans = Arc::new(PlanResolver::new(config.plans.iter().cloned()));
        info!("📋 已加载套餐: {:?}", plans.plan_names());

        let uploads = UploadStore::local(&config.upload_root).await?;
        info!("📁 上传暂存目录: {}", config.upload_root);

        let ledger = Arc::new(QuotaLedger::with_system_clock(store.clone()));
        let admission = AdmissionController::new(
            store,
            ledger,
            plans,
            GenerationSemaphore::new(config.admission.max_concurrent_generations),
            Arc::new(AccountGenerationTracker::new()),
            uploads.clone(),
        )
        .with_retry_after(config.admission.retry_after())
        .with_refund_policy(config.admission.refund_policy);

        let client = HttpGenerationClient::new(
            config.generation.endpoint.clone(),
            config.generation.api_key.clone(),
            config.generation.model.clone(),
            config.generation.llm_call_timeout(),
        )?;
        let generator = DeckGenerator::new(
            Arc::new(PlainTextPipeline::new(
                config.generation.max_document_chars,
                config.generation.chunk_chars,
            )),
            Arc::new(client),
            LlmCallSemaphore::new(config.admission.max_concurrent_llm_calls),
            uploads,
            config.generation.generator_settings(),
        );

        let state = HttpServerState::new(
            Arc::new(admission),
            Arc::new(generator),
            config.service_key.clone(),
            config.max_upload_bytes,
        );

        info!("✅ 服务器组件初始化完成");
        Ok(Self { config, state, database })
    }

    pub fn state(&self) -> &HttpServerState {
        &self.state
    }

    /// 运行服务器直到收到 Ctrl-C
    pub async fn run(&self) -> Result<(), ServerError> {
        info!("🚀 启动闪卡生成服务器...");
        self.show_config_info();

        self.start_slot_metrics_reporter();

        let server = DeckHttpServer::new(self.state.clone(), self.config.bind_address());
        server
            .start(shutdown_signal())
            .await
            .map_err(|e| ServerError::Internal(format!("HTTP 服务器运行失败: {}", e)))?;

        if let Some(database) = &self.database {
            database.close().await;
            info!("🔌 数据库连接已关闭");
        }
        Ok(())
    }

    /// 显示配置信息
    fn show_config_info(&self) {
        info!("📊 服务器配置信息:");
        info!("  - 监听地址: {}", self.config.bind_address());
        info!("  - 账号存储: {}", if self.database.is_some() { "postgres" } else { "memory" });
        info!("  - 全局生成槽位: {}", self.config.admission.max_concurrent_generations);
        info!("  - 全局 LLM 调用槽位: {}", self.config.admission.max_concurrent_llm_calls);
        info!("  - 单文档 LLM 并发: {}", self.config.generation.max_llm_calls_per_document);
        info!("  - 配额退还策略: {:?}", self.config.admission.refund_policy);
        info!("  - 重试建议: {}秒", self.config.admission.retry_after_secs);
        info!("  - 管理接口: {}", if self.config.service_key.is_some() { "enabled" } else { "disabled" });
    }

    /// 周期上报槽位占用
    fn start_slot_metrics_reporter(&self) {
        let admission = self.state.admission.clone();
        let generator = self.state.generator.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SLOT_METRICS_INTERVAL);
            loop {
                interval.tick().await;
                metrics::record_slot_usage(
                    admission.generation().in_flight(),
                    generator.llm().in_flight(),
                    admission.tracker().active_count(),
                );
                metrics::record_generation_rejected(admission.generation().rejected_total());
            }
        });
    }
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("🛑 收到退出信号，正在关闭..."),
        Err(e) => {
            warn!("⚠️ 监听退出信号失败: {}", e);
            std::future::pending::<()>().await;
        }
    }
}
