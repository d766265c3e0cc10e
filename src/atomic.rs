//! 上传落盘：先写入同目录的隐藏临时文件，完成后再原子重命名。

use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::error::ApiError;

/// 带字节上限的临时文件写入器。
pub struct AtomicFile {
    target: PathBuf,
    temp_path: PathBuf,
    file: File,
    written: u64,
    limit: u64,
}

/// 写入被拒绝的原因。
#[derive(Debug)]
pub enum WriteError {
    LimitExceeded,
    Io(io::Error),
}

impl AtomicFile {
    /// 在目标路径同目录创建临时文件。
    pub async fn create(target: &Path, limit: u64) -> Result<Self, ApiError> {
        let parent = target
            .parent()
            .ok_or_else(|| ApiError::Internal("invalid target path".into()))?;
        let base = target
            .file_name()
            .map(|name| name.to_string_lossy())
            .unwrap_or_else(|| "upload".into());
        let temp_path = parent.join(format!(".{base}.tmp.{}", Uuid::new_v4()));
        let file = File::create(&temp_path)
            .await
            .map_err(|err| ApiError::Internal(err.to_string()))?;
        Ok(Self {
            target: target.to_path_buf(),
            temp_path,
            file,
            written: 0,
            limit,
        })
    }

    /// 追加一段数据；累计超过上限时不写入。
    pub async fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), WriteError> {
        let next = self.written + chunk.len() as u64;
        if next > self.limit {
            return Err(WriteError::LimitExceeded);
        }
        self.file.write_all(chunk).await.map_err(WriteError::Io)?;
        self.written = next;
        Ok(())
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    /// 放弃并删除临时文件。
    pub async fn cleanup(self) {
        drop(self.file);
        let _ = fs::remove_file(&self.temp_path).await;
    }

    /// 同步数据并重命名到目标路径。
    pub async fn finalize(self) -> Result<u64, ApiError> {
        let Self {
            target,
            temp_path,
            file,
            written,
            ..
        } = self;

        if let Err(err) = persist(file, &temp_path, &target).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(ApiError::Internal(err.to_string()));
        }
        Ok(written)
    }
}

async fn persist(mut file: File, temp_path: &Path, target: &Path) -> io::Result<()> {
    file.flush().await?;
    file.sync_all().await?;
    drop(file);
    fs::rename(temp_path, target).await
}
