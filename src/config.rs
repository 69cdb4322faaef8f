use std::time::Duration;
use std::env;
use std::fs;
use std::path::Path;
use tracing::info;
use serde::{Deserialize, Serialize};
use anyhow::{bail, Context, Result};

use crate::admission::QuotaRefundPolicy;
use crate::generation::GeneratorSettings;
use crate::model::{AccountId, PlanLimits};

/// 默认配置文件名
pub const DEFAULT_CONFIG_FILE: &str = "config.toml";

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// 服务器监听地址
    pub host: String,
    /// 服务器监听端口
    pub port: u16,
    /// 数据库连接字符串（未配置时使用进程内账号存储）
    pub database_url: Option<String>,
    /// 数据库最大连接数
    pub database_max_connections: u32,
    /// 管理接口密钥（X-Service-Key），未配置时管理接口不可用
    pub service_key: Option<String>,
    /// 日志级别
    pub log_level: String,
    /// 上传文档暂存目录
    pub upload_root: String,
    /// 单个上传文档的最大字节数
    pub max_upload_bytes: usize,
    /// 是否启用 Prometheus 指标
    pub enable_metrics: bool,
    /// 准入控制配置
    pub admission: AdmissionConfig,
    /// 生成服务配置
    pub generation: GenerationConfig,
    /// 套餐列表（同名覆盖内置套餐）
    pub plans: Vec<PlanLimits>,
    /// 启动时写入的账号（开发与单机部署）
    pub accounts: Vec<AccountSeed>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            database_url: None,
            database_max_connections: 20,
            service_key: None,
            log_level: "info".to_string(),
            upload_root: "./storage/uploads".to_string(),
            max_upload_bytes: 20 * 1024 * 1024,
            enable_metrics: true,
            admission: AdmissionConfig::default(),
            generation: GenerationConfig::default(),
            plans: vec![PlanLimits::free(), PlanLimits::paid()],
            accounts: vec![],
        }
    }
}

/// 准入控制配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionConfig {
    /// 全局同时进行的生成任务数
    pub max_concurrent_generations: usize,
    /// 全局同时进行的 LLM 调用数
    pub max_concurrent_llm_calls: usize,
    /// 容量类拒绝建议的重试等待（秒）
    pub retry_after_secs: u64,
    /// 任务结束后的配额退还策略
    pub refund_policy: QuotaRefundPolicy,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            max_concurrent_generations: 2,
            max_concurrent_llm_calls: 6,
            retry_after_secs: 60,
            refund_policy: QuotaRefundPolicy::default(),
        }
    }
}

impl AdmissionConfig {
    pub fn retry_after(&self) -> Duration {
        Duration::from_secs(self.retry_after_secs)
    }
}

/// 生成服务配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// 生成服务地址
    pub endpoint: String,
    /// 生成服务密钥
    pub api_key: Option<String>,
    /// 模型名
    pub model: Option<String>,
    /// 单个文档最多处理的文本块数
    pub max_chunks_per_document: usize,
    /// 单个文档同时进行的 LLM 调用数
    pub max_llm_calls_per_document: usize,
    /// 单次 LLM 调用超时（秒）
    pub llm_call_timeout_secs: u64,
    /// 文档最大字符数
    pub max_document_chars: usize,
    /// 单个文本块的目标字符数
    pub chunk_chars: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:9000/v1/flashcards".to_string(),
            api_key: None,
            model: None,
            max_chunks_per_document: 50,
            max_llm_calls_per_document: 20,
            llm_call_timeout_secs: 60,
            max_document_chars: 500_000,
            chunk_chars: 4_000,
        }
    }
}

impl GenerationConfig {
    pub fn llm_call_timeout(&self) -> Duration {
        Duration::from_secs(self.llm_call_timeout_secs)
    }

    pub fn generator_settings(&self) -> GeneratorSettings {
        GeneratorSettings {
            max_chunks_per_document: self.max_chunks_per_document,
            max_llm_calls_per_document: self.max_llm_calls_per_document,
            llm_call_timeout: self.llm_call_timeout(),
        }
    }
}

/// 预置账号
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSeed {
    pub account_id: AccountId,
    #[serde(default = "default_seed_plan")]
    pub plan: String,
}

fn default_seed_plan() -> String {
    "free".to_string()
}

impl ServerConfig {
    /// 创建新的服务器配置
    pub fn new() -> Self {
        Self::default()
    }

    /// 从 TOML 文件加载配置
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("无法读取配置文件: {:?}", path.as_ref()))?;
        Self::from_toml_str(&content)
    }

    /// 从 TOML 文本加载配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let toml_config: TomlConfig = toml::from_str(content)
            .with_context(|| "配置文件格式错误")?;
        Ok(toml_config.into())
    }

    /// 从环境变量加载配置（FLASHDECK_ 前缀）
    pub fn merge_from_env(&mut self) -> Result<()> {
        if let Ok(host) = env::var("FLASHDECK_HOST") {
            self.host = host;
        }
        if let Ok(port) = env::var("FLASHDECK_PORT") {
            self.port = port.parse().unwrap_or(self.port);
        }
        if let Ok(db_url) = env::var("DATABASE_URL") {
            self.database_url = Some(db_url);
        }
        if let Ok(db_url) = env::var("FLASHDECK_DATABASE_URL") {
            self.database_url = Some(db_url);
        }
        if let Ok(key) = env::var("FLASHDECK_SERVICE_KEY") {
            self.service_key = Some(key);
        }
        if let Ok(log_level) = env::var("FLASHDECK_LOG_LEVEL") {
            self.log_level = log_level;
        }
        if let Ok(root) = env::var("FLASHDECK_UPLOAD_ROOT") {
            self.upload_root = root;
        }
        if let Ok(n) = env::var("FLASHDECK_MAX_CONCURRENT_GENERATIONS") {
            self.admission.max_concurrent_generations =
                n.parse().unwrap_or(self.admission.max_concurrent_generations);
        }
        if let Ok(n) = env::var("FLASHDECK_MAX_CONCURRENT_LLM_CALLS") {
            self.admission.max_concurrent_llm_calls =
                n.parse().unwrap_or(self.admission.max_concurrent_llm_calls);
        }
        if let Ok(endpoint) = env::var("FLASHDECK_GENERATION_ENDPOINT") {
            self.generation.endpoint = endpoint;
        }
        if let Ok(key) = env::var("FLASHDECK_GENERATION_API_KEY") {
            self.generation.api_key = Some(key);
        }

        Ok(())
    }

    /// 从命令行参数合并配置
    pub fn merge_from_cli(&mut self, cli: &crate::cli::Cli) {
        if let Some(host) = &cli.host {
            self.host = host.clone();
        }
        if let Some(port) = cli.port {
            self.port = port;
        }
        if let Some(db_url) = &cli.database_url {
            self.database_url = Some(db_url.clone());
        }
        if let Some(key) = &cli.service_key {
            self.service_key = Some(key.clone());
        }
        if let Some(root) = &cli.upload_root {
            self.upload_root = root.clone();
        }
        if let Some(n) = cli.max_generations {
            self.admission.max_concurrent_generations = n;
        }
        if let Some(n) = cli.max_llm_calls {
            self.admission.max_concurrent_llm_calls = n;
        }
        if cli.disable_metrics {
            self.enable_metrics = false;
        }
        if let Some(log_level) = cli.get_log_level() {
            self.log_level = log_level;
        }
    }

    /// 加载配置（按优先级：命令行 > 环境变量 > 配置文件 > 默认值）
    pub fn load(cli: &crate::cli::Cli) -> Result<Self> {
        // 1. 从配置文件加载（如果指定），否则使用默认值
        let mut config = if let Some(config_file) = &cli.config_file {
            if Path::new(config_file).exists() {
                info!("📄 从配置文件加载: {}", config_file);
                Self::from_toml_file(config_file)?
            } else {
                tracing::warn!("⚠️ 配置文件不存在: {}", config_file);
                Self::new()
            }
        } else if Path::new(DEFAULT_CONFIG_FILE).exists() {
            info!("📄 从默认配置文件加载: {}", DEFAULT_CONFIG_FILE);
            Self::from_toml_file(DEFAULT_CONFIG_FILE)?
        } else {
            Self::new()
        };

        // 2. 从环境变量合并（优先级高于配置文件）
        config.merge_from_env()?;

        // 3. 从命令行参数合并（最高优先级）
        config.merge_from_cli(cli);

        config.validate()?;
        Ok(config)
    }

    /// 校验配置一致性
    pub fn validate(&self) -> Result<()> {
        if self.admission.max_concurrent_generations == 0 {
            bail!("admission.max_concurrent_generations 必须大于 0");
        }
        if self.admission.max_concurrent_llm_calls == 0 {
            bail!("admission.max_concurrent_llm_calls 必须大于 0");
        }
        if self.generation.max_llm_calls_per_document == 0 {
            bail!("generation.max_llm_calls_per_document 必须大于 0");
        }
        if self.generation.max_chunks_per_document == 0 {
            bail!("generation.max_chunks_per_document 必须大于 0");
        }
        if let QuotaRefundPolicy::BelowThreshold { min_cards: 0 } = self.admission.refund_policy {
            bail!("admission.refund_policy.min_cards 必须大于 0");
        }
        for plan in &self.plans {
            if plan.name.trim().is_empty() {
                bail!("套餐名称不能为空");
            }
            if plan.allowed_densities.is_empty() {
                bail!("套餐 {} 至少需要一个允许的密度", plan.name);
            }
        }
        for seed in &self.accounts {
            if !self.plans.iter().any(|p| p.name == seed.plan) {
                bail!("账号 {} 引用了未定义的套餐: {}", seed.account_id, seed.plan);
            }
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// 日志配置（在完整配置加载之前读取）
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EarlyLoggingConfig {
    pub level: Option<String>,
    pub format: Option<String>,
    pub file: Option<String>,
}

/// 快速读取配置文件中的 [logging] 段；文件不存在或格式错误时返回空配置
pub fn load_early_logging_config(config_file: Option<&str>) -> EarlyLoggingConfig {
    #[derive(Deserialize)]
    struct LoggingOnly {
        logging: Option<EarlyLoggingConfig>,
    }

    let path = config_file.unwrap_or(DEFAULT_CONFIG_FILE);
    fs::read_to_string(path)
        .ok()
        .and_then(|content| toml::from_str::<LoggingOnly>(&content).ok())
        .and_then(|c| c.logging)
        .unwrap_or_default()
}

/// TOML 配置文件结构（用于反序列化）
#[derive(Debug, Deserialize)]
struct TomlConfig {
    server: Option<TomlServerConfig>,
    database: Option<TomlDatabaseConfig>,
    storage: Option<TomlStorageConfig>,
    admission: Option<TomlAdmissionConfig>,
    generation: Option<TomlGenerationConfig>,
    logging: Option<TomlLoggingConfig>,
    metrics: Option<TomlMetricsConfig>,
    plans: Option<Vec<PlanLimits>>,
    accounts: Option<Vec<AccountSeed>>,
}

#[derive(Debug, Deserialize)]
struct TomlServerConfig {
    host: Option<String>,
    port: Option<u16>,
    service_key: Option<String>,
    max_upload_bytes: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct TomlDatabaseConfig {
    url: Option<String>,
    max_connections: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct TomlStorageConfig {
    upload_root: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TomlAdmissionConfig {
    max_concurrent_generations: Option<usize>,
    max_concurrent_llm_calls: Option<usize>,
    retry_after_secs: Option<u64>,
    refund_policy: Option<QuotaRefundPolicy>,
}

#[derive(Debug, Deserialize)]
struct TomlGenerationConfig {
    endpoint: Option<String>,
    api_key: Option<String>,
    model: Option<String>,
    max_chunks_per_document: Option<usize>,
    max_llm_calls_per_document: Option<usize>,
    llm_call_timeout_secs: Option<u64>,
    max_document_chars: Option<usize>,
    chunk_chars: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct TomlLoggingConfig {
    level: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TomlMetricsConfig {
    enabled: Option<bool>,
}

impl From<TomlConfig> for ServerConfig {
    fn from(toml: TomlConfig) -> Self {
        let mut config = Self::default();

        if let Some(server) = toml.server {
            if let Some(host) = server.host {
                config.host = host;
            }
            if let Some(port) = server.port {
                config.port = port;
            }
            if let Some(key) = server.service_key {
                config.service_key = Some(key);
            }
            if let Some(max) = server.max_upload_bytes {
                config.max_upload_bytes = max;
            }
        }

        if let Some(database) = toml.database {
            if let Some(url) = database.url {
                config.database_url = Some(url);
            }
            if let Some(max) = database.max_connections {
                config.database_max_connections = max;
            }
        }

        if let Some(storage) = toml.storage {
            if let Some(root) = storage.upload_root {
                config.upload_root = root;
            }
        }

        if let Some(admission) = toml.admission {
            if let Some(n) = admission.max_concurrent_generations {
                config.admission.max_concurrent_generations = n;
            }
            if let Some(n) = admission.max_concurrent_llm_calls {
                config.admission.max_concurrent_llm_calls = n;
            }
            if let Some(secs) = admission.retry_after_secs {
                config.admission.retry_after_secs = secs;
            }
            if let Some(policy) = admission.refund_policy {
                config.admission.refund_policy = policy;
            }
        }

        if let Some(generation) = toml.generation {
            if let Some(endpoint) = generation.endpoint {
                config.generation.endpoint = endpoint;
            }
            if let Some(key) = generation.api_key {
                config.generation.api_key = Some(key);
            }
            if let Some(model) = generation.model {
                config.generation.model = Some(model);
            }
            if let Some(n) = generation.max_chunks_per_document {
                config.generation.max_chunks_per_document = n;
            }
            if let Some(n) = generation.max_llm_calls_per_document {
                config.generation.max_llm_calls_per_document = n;
            }
            if let Some(secs) = generation.llm_call_timeout_secs {
                config.generation.llm_call_timeout_secs = secs;
            }
            if let Some(n) = generation.max_document_chars {
                config.generation.max_document_chars = n;
            }
            if let Some(n) = generation.chunk_chars {
                config.generation.chunk_chars = n;
            }
        }

        if let Some(logging) = toml.logging {
            if let Some(level) = logging.level {
                config.log_level = level;
            }
        }

        if let Some(metrics) = toml.metrics {
            if let Some(enabled) = metrics.enabled {
                config.enable_metrics = enabled;
            }
        }

        if let Some(plans) = toml.plans {
            for plan in plans {
                config.plans.retain(|p| p.name != plan.name);
                config.plans.push(plan);
            }
        }

        if let Some(accounts) = toml.accounts {
            config.accounts = accounts;
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DensityTier;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.admission.max_concurrent_generations, 2);
        assert_eq!(config.admission.max_concurrent_llm_calls, 6);
        assert_eq!(config.admission.refund_policy, QuotaRefundPolicy::NoArtifact);
        assert_eq!(config.generation.generator_settings(), GeneratorSettings::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_overrides() {
        let config = ServerConfig::from_toml_str(
            r#"
[server]
port = 9090
service_key = "admin-key"

[admission]
max_concurrent_generations = 4
refund_policy = { mode = "below_threshold", min_cards = 5 }

[[plans]]
name = "free"
display_name = "Free"
pdfs_per_month = 5
allowed_densities = ["low", "medium"]
max_cards_per_deck = 30

[[plans]]
name = "team"
display_name = "Team"
pdfs_per_month = 200
allowed_densities = ["low", "medium", "high"]

[[accounts]]
account_id = 7
plan = "team"
"#,
        )
        .unwrap();

        assert_eq!(config.port, 9090);
        assert_eq!(config.service_key.as_deref(), Some("admin-key"));
        assert_eq!(config.admission.max_concurrent_generations, 4);
        assert_eq!(
            config.admission.refund_policy,
            QuotaRefundPolicy::BelowThreshold { min_cards: 5 }
        );
        // free 被覆盖，paid 保留，team 新增
        assert_eq!(config.plans.len(), 3);
        let free = config.plans.iter().find(|p| p.name == "free").unwrap();
        assert_eq!(free.pdfs_per_month, 5);
        assert_eq!(free.allowed_densities, vec![DensityTier::Low, DensityTier::Medium]);
        assert_eq!(config.accounts, vec![AccountSeed { account_id: 7, plan: "team".into() }]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_unknown_seed_plan() {
        let mut config = ServerConfig::default();
        config.accounts.push(AccountSeed {
            account_id: 1,
            plan: "gold".into(),
        });
        assert!(config.validate().is_err());

        let mut config = ServerConfig::default();
        config.admission.max_concurrent_generations = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_early_logging_config_missing_file() {
        let early = load_early_logging_config(Some("/nonexistent/flashdeck.toml"));
        assert!(early.level.is_none());
        assert!(early.format.is_none());
    }
}
