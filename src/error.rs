use std::fmt;
use std::error::Error as StdError;
use serde::{Serialize, Deserialize};
use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response, Json},
};

use crate::admission::{AdmissionRejection, PlanError, QuotaError};
use crate::generation::GenerationError;
use crate::infra::UploadError;
use crate::repository::StoreError;

/// 服务器错误类型
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ServerError {
    /// 内部错误
    Internal(String),
    /// 验证错误
    Validation(String),
    /// 错误请求
    BadRequest(String),
    /// 未授权
    Unauthorized(String),
    /// 禁止访问
    Forbidden(String),
    /// 资源未找到
    NotFound(String),
    /// 数据库错误
    Database(String),
    /// 序列化错误
    Serialization(String),
    /// 超时错误
    Timeout(String),
    /// 服务不可用
    ServiceUnavailable(String),
    /// 本月配额已用尽
    QuotaExceeded(String),
    /// 全局生成槽位已满
    GlobalCapacitySaturated { message: String, retry_after_secs: u64 },
    /// 账号已有进行中的生成任务
    AccountBusy { message: String, retry_after_secs: u64 },
    /// 账号的套餐未配置
    PlanNotFound(String),
    /// 套餐不允许所请求的选项
    OptionNotPermitted(String),
    /// 配额/上传存储不可用
    StorageUnavailable(String),
    /// 文档无法处理
    UnprocessableDocument(String),
    /// 生成服务失败
    GenerationFailed(String),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerError::Internal(msg) => write!(f, "Internal error: {}", msg),
            ServerError::Validation(msg) => write!(f, "Validation error: {}", msg),
            ServerError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            ServerError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            ServerError::Forbidden(msg) => write!(f, "Forbidden: {}", msg),
            ServerError::NotFound(msg) => write!(f, "Not found: {}", msg),
            ServerError::Database(msg) => write!(f, "Database error: {}", msg),
            ServerError::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            ServerError::Timeout(msg) => write!(f, "Timeout error: {}", msg),
            ServerError::ServiceUnavailable(msg) => write!(f, "Service unavailable: {}", msg),
            ServerError::QuotaExceeded(msg) => write!(f, "Quota exceeded: {}", msg),
            ServerError::GlobalCapacitySaturated { message, .. } => write!(f, "Capacity saturated: {}", message),
            ServerError::AccountBusy { message, .. } => write!(f, "Account busy: {}", message),
            ServerError::PlanNotFound(msg) => write!(f, "Plan not found: {}", msg),
            ServerError::OptionNotPermitted(msg) => write!(f, "Option not permitted: {}", msg),
            ServerError::StorageUnavailable(msg) => write!(f, "Storage unavailable: {}", msg),
            ServerError::UnprocessableDocument(msg) => write!(f, "Unprocessable document: {}", msg),
            ServerError::GenerationFailed(msg) => write!(f, "Generation failed: {}", msg),
        }
    }
}

impl StdError for ServerError {}

impl ServerError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServerError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ServerError::Forbidden(_) | ServerError::QuotaExceeded(_) | ServerError::OptionNotPermitted(_) => {
                StatusCode::FORBIDDEN
            }
            ServerError::Validation(_) | ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::NotFound(_) => StatusCode::NOT_FOUND,
            ServerError::AccountBusy { .. } => StatusCode::CONFLICT,
            ServerError::GlobalCapacitySaturated { .. } => StatusCode::TOO_MANY_REQUESTS,
            ServerError::UnprocessableDocument(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ServerError::GenerationFailed(_) => StatusCode::BAD_GATEWAY,
            ServerError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ServerError::ServiceUnavailable(_) | ServerError::StorageUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// 建议的重试等待秒数
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            ServerError::GlobalCapacitySaturated { retry_after_secs, .. }
            | ServerError::AccountBusy { retry_after_secs, .. } => Some(*retry_after_secs),
            _ => None,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status_code = self.status_code();
        let error_response = ErrorResponse::new(&self);
        let mut response = (status_code, Json(error_response)).into_response();
        if let Some(secs) = self.retry_after_secs() {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

impl From<AdmissionRejection> for ServerError {
    fn from(rejection: AdmissionRejection) -> Self {
        let message = rejection.to_string();
        match rejection {
            AdmissionRejection::QuotaExceeded { .. } => ServerError::QuotaExceeded(message),
            AdmissionRejection::GlobalCapacitySaturated { retry_after } => ServerError::GlobalCapacitySaturated {
                message,
                retry_after_secs: retry_after.as_secs(),
            },
            AdmissionRejection::AccountBusy { retry_after } => ServerError::AccountBusy {
                message,
                retry_after_secs: retry_after.as_secs(),
            },
            AdmissionRejection::PlanNotFound(_) => ServerError::PlanNotFound(message),
            AdmissionRejection::OptionNotPermitted { .. } => ServerError::OptionNotPermitted(message),
            AdmissionRejection::AccountNotFound(_) => ServerError::Unauthorized(message),
            AdmissionRejection::StorageUnavailable(_) => ServerError::StorageUnavailable(message),
        }
    }
}

impl From<GenerationError> for ServerError {
    fn from(err: GenerationError) -> Self {
        let message = err.to_string();
        match err {
            GenerationError::InvalidDocument(_)
            | GenerationError::DocumentTooLarge { .. }
            | GenerationError::EmptyDocument => ServerError::UnprocessableDocument(message),
            GenerationError::Upstream(_) => ServerError::GenerationFailed(message),
            GenerationError::Timeout(_) => ServerError::Timeout(message),
            GenerationError::Capacity(_) => ServerError::ServiceUnavailable(message),
            GenerationError::Storage(_) => ServerError::StorageUnavailable(message),
        }
    }
}

impl From<QuotaError> for ServerError {
    fn from(err: QuotaError) -> Self {
        AdmissionRejection::from(err).into()
    }
}

impl From<PlanError> for ServerError {
    fn from(err: PlanError) -> Self {
        ServerError::PlanNotFound(err.to_string())
    }
}

impl From<StoreError> for ServerError {
    fn from(err: StoreError) -> Self {
        ServerError::StorageUnavailable(err.to_string())
    }
}

impl From<UploadError> for ServerError {
    fn from(err: UploadError) -> Self {
        ServerError::StorageUnavailable(err.to_string())
    }
}

impl From<sqlx::Error> for ServerError {
    fn from(err: sqlx::Error) -> Self {
        ServerError::Database(err.to_string())
    }
}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        ServerError::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for ServerError {
    fn from(err: serde_json::Error) -> Self {
        ServerError::Serialization(err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for ServerError {
    fn from(err: tokio::time::error::Elapsed) -> Self {
        ServerError::Timeout(err.to_string())
    }
}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, ServerError>;

/// 错误代码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    /// 内部错误
    Internal = 1000,
    /// 认证错误
    Authentication = 1001,
    /// 授权错误
    Authorization = 1002,
    /// 验证错误
    Validation = 1003,
    /// 数据库错误
    Database = 2000,
    /// 序列化错误
    Serialization = 2002,
    /// 超时错误
    Timeout = 3002,
    /// 配额用尽
    QuotaExceeded = 3100,
    /// 全局槽位已满
    GlobalCapacitySaturated = 3101,
    /// 账号忙
    AccountBusy = 3102,
    /// 套餐未配置
    PlanNotFound = 3103,
    /// 选项不被套餐允许
    OptionNotPermitted = 3104,
    /// 文档无法处理
    UnprocessableDocument = 4004,
    /// 生成服务失败
    GenerationFailed = 4005,
    /// 服务不可用
    ServiceUnavailable = 5000,
    /// 存储不可用
    StorageUnavailable = 5001,
    /// 错误请求
    BadRequest = 5004,
    /// 资源未找到
    NotFound = 5005,
}

impl From<&ServerError> for ErrorCode {
    fn from(error: &ServerError) -> Self {
        match error {
            ServerError::Internal(_) => ErrorCode::Internal,
            ServerError::Validation(_) => ErrorCode::Validation,
            ServerError::BadRequest(_) => ErrorCode::BadRequest,
            ServerError::Unauthorized(_) => ErrorCode::Authentication,
            ServerError::Forbidden(_) => ErrorCode::Authorization,
            ServerError::NotFound(_) => ErrorCode::NotFound,
            ServerError::Database(_) => ErrorCode::Database,
            ServerError::Serialization(_) => ErrorCode::Serialization,
            ServerError::Timeout(_) => ErrorCode::Timeout,
            ServerError::ServiceUnavailable(_) => ErrorCode::ServiceUnavailable,
            ServerError::QuotaExceeded(_) => ErrorCode::QuotaExceeded,
            ServerError::GlobalCapacitySaturated { .. } => ErrorCode::GlobalCapacitySaturated,
            ServerError::AccountBusy { .. } => ErrorCode::AccountBusy,
            ServerError::PlanNotFound(_) => ErrorCode::PlanNotFound,
            ServerError::OptionNotPermitted(_) => ErrorCode::OptionNotPermitted,
            ServerError::StorageUnavailable(_) => ErrorCode::StorageUnavailable,
            ServerError::UnprocessableDocument(_) => ErrorCode::UnprocessableDocument,
            ServerError::GenerationFailed(_) => ErrorCode::GenerationFailed,
        }
    }
}

/// 错误响应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// 错误代码
    pub code: ErrorCode,
    /// 数值错误代码
    pub code_value: u32,
    /// 错误消息
    pub message: String,
    /// 建议的重试等待秒数
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
    /// 时间戳
    pub timestamp: u64,
}

impl ErrorResponse {
    /// 创建错误响应
    pub fn new(error: &ServerError) -> Self {
        let code = ErrorCode::from(error);
        Self {
            code,
            code_value: code as u32,
            message: error.to_string(),
            retry_after: error.retry_after_secs(),
            timestamp: chrono::Utc::now().timestamp() as u64,
        }
    }
}
