// Infrastructure layer - 基础设施层
// 负责数据库连接、上传文档暂存、监控指标

pub mod database;
pub mod metrics;
pub mod upload_store;

pub use database::Database;
pub use upload_store::{StoredUpload, UploadError, UploadStore};
