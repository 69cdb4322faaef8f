//! 上传文档暂存
//!
//! 基于 OpenDAL Operator：生产环境使用本地 FS，测试使用内存。
//! 准入被拒绝或任务结束后，暂存文件由补偿逻辑删除。

use bytes::Bytes;
use opendal::Operator;
use tracing::{debug, warn};

use crate::model::AccountId;

#[derive(Debug, Clone, thiserror::Error)]
pub enum UploadError {
    #[error("upload storage error: {0}")]
    Storage(String),
}

/// 已暂存的上传文档
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredUpload {
    /// 存储 key（uploads/{account_id}/{uuid}）
    pub key: String,
    /// 客户端提供的原始文件名
    pub filename: String,
    pub size: u64,
}

/// 上传文档存储
#[derive(Clone)]
pub struct UploadStore {
    op: Operator,
}

impl UploadStore {
    /// 本地文件系统（目录不存在时自动创建）
    pub async fn local(root: &str) -> Result<Self, UploadError> {
        let root = root.trim();
        if root.is_empty() {
            return Err(UploadError::Storage("upload root is empty".to_string()));
        }
        let root_path = std::path::Path::new(root);
        if !root_path.exists() {
            tokio::fs::create_dir_all(root_path)
                .await
                .map_err(|e| UploadError::Storage(format!("创建上传目录失败 \"{}\": {}", root, e)))?;
        }
        let abs_root = tokio::fs::canonicalize(root_path)
            .await
            .map_err(|e| UploadError::Storage(format!("无法解析上传目录 \"{}\": {}", root, e)))?
            .to_string_lossy()
            .to_string();

        let builder = opendal::services::Fs::default().root(&abs_root);
        let op = Operator::new(builder)
            .map_err(|e| UploadError::Storage(format!("构建 Fs Operator 失败: {}", e)))?
            .finish();
        Ok(Self { op })
    }

    /// 进程内存储
    pub fn memory() -> Result<Self, UploadError> {
        let op = Operator::new(opendal::services::Memory::default())
            .map_err(|e| UploadError::Storage(format!("构建 Memory Operator 失败: {}", e)))?
            .finish();
        Ok(Self { op })
    }

    pub async fn save(&self, account_id: AccountId, filename: &str, data: Bytes) -> Result<StoredUpload, UploadError> {
        let key = format!("uploads/{}/{}", account_id, uuid::Uuid::new_v4());
        let size = data.len() as u64;
        self.op
            .write(&key, data)
            .await
            .map_err(|e| UploadError::Storage(format!("存储写入失败: {}", e)))?;
        debug!("📥 上传文档已暂存: key={}, size={}", key, size);
        Ok(StoredUpload {
            key,
            filename: filename.to_string(),
            size,
        })
    }

    pub async fn read(&self, upload: &StoredUpload) -> Result<Bytes, UploadError> {
        let buffer = self
            .op
            .read(&upload.key)
            .await
            .map_err(|e| UploadError::Storage(format!("存储读取失败: {}", e)))?;
        Ok(buffer.to_bytes())
    }

    pub async fn exists(&self, upload: &StoredUpload) -> bool {
        self.op.exists(&upload.key).await.unwrap_or(false)
    }

    /// 删除暂存文件；失败只记录日志，不影响调用方
    pub async fn discard(&self, upload: &StoredUpload) {
        match self.op.delete(&upload.key).await {
            Ok(()) => debug!("🗑️ 上传文档已删除: key={}", upload.key),
            Err(e) => warn!("⚠️ 删除上传文档失败: key={}, error={}", upload.key, e),
        }
    }
}
