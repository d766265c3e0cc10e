//! 单文件 multipart 上传：按扩展名分类存放，文件名加毫秒时间戳前缀。

use axum::extract::multipart::{Field, MultipartError, MultipartRejection};
use axum::extract::{Extension, Multipart};
use axum::http::StatusCode;
use axum::response::Json as JsonResponse;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::atomic::{AtomicFile, WriteError};
use crate::config::{MULTIPART_OVERHEAD, UPLOAD_FIELD_NAME};
use crate::error::ApiError;
use crate::storage::{Storage, StoredFile, extension_of, sanitize_file_name};

pub const AUDIO_EXTENSIONS: &[&str] = &["wav", "mp3", "ogg", "wma", "m4a"];
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mov", "wmv", "flv", "mkv", "3gp", "webm"];
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "webp"];
pub const DOCUMENT_EXTENSIONS: &[&str] = &["epub"];

const MIB: u64 = 1024 * 1024;

/// 上传策略，进程启动时确定，之后只读。
#[derive(Debug, Clone)]
pub struct UploadPolicy {
    allowed_extensions: Vec<String>,
    max_file_size: u64,
}

#[derive(Serialize)]
pub(crate) struct UploadResponse {
    status: &'static str,
    message: &'static str,
    path: String,
}

impl UploadPolicy {
    /// 默认允许列表：音频、视频、图片与 epub。
    pub fn new(max_file_size: u64) -> Self {
        let allowed = AUDIO_EXTENSIONS
            .iter()
            .chain(VIDEO_EXTENSIONS)
            .chain(IMAGE_EXTENSIONS)
            .chain(DOCUMENT_EXTENSIONS)
            .copied();
        Self::with_extensions(allowed, max_file_size)
    }

    pub fn with_extensions<I, S>(extensions: I, max_file_size: u64) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut allowed_extensions: Vec<String> = Vec::new();
        for ext in extensions {
            let ext = ext.as_ref().to_lowercase();
            if !allowed_extensions.contains(&ext) {
                allowed_extensions.push(ext);
            }
        }
        Self {
            allowed_extensions,
            max_file_size,
        }
    }

    pub fn max_file_size(&self) -> u64 {
        self.max_file_size
    }

    pub fn is_allowed(&self, file_name: &str) -> bool {
        let ext = extension_of(file_name);
        self.allowed_extensions.iter().any(|allowed| *allowed == ext)
    }

    pub fn rejection_message(&self) -> String {
        format!(
            "Only {} files are allowed.",
            self.allowed_extensions.join(", ")
        )
    }

    pub fn too_large_message(&self) -> String {
        let limit = if self.max_file_size >= MIB && self.max_file_size % MIB == 0 {
            format!("{}MB", self.max_file_size / MIB)
        } else {
            format!("{} bytes", self.max_file_size)
        };
        format!("File is too large. Maximum allowed size is {limit}.")
    }

    /// 整个请求体的上限，为 multipart 分隔符与表头预留余量。
    pub fn request_body_limit(&self) -> usize {
        usize::try_from(self.max_file_size.saturating_add(MULTIPART_OVERHEAD)).unwrap_or(usize::MAX)
    }

    fn multipart_error(&self, err: MultipartError) -> ApiError {
        if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ApiError::PayloadTooLarge(self.too_large_message())
        } else {
            ApiError::BadRequest(err.body_text())
        }
    }
}

fn no_file() -> ApiError {
    ApiError::BadRequest("No file uploaded.".into())
}

/// 接收 `file` 字段并写入 `upload/<folder>/<timestamp>-<name>`。
pub async fn upload_file(
    Extension(storage): Extension<Arc<Storage>>,
    Extension(policy): Extension<Arc<UploadPolicy>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<(StatusCode, JsonResponse<UploadResponse>), ApiError> {
    let mut multipart = multipart.map_err(|rejection| {
        debug!(%rejection, "upload request is not multipart");
        no_file()
    })?;

    let mut stored = None;
    if let Err(err) = read_fields(&mut multipart, &storage, &policy, &mut stored).await {
        if let Some(file) = stored.take() {
            discard(&file).await;
        }
        return Err(err);
    }

    let file = stored.ok_or_else(no_file)?;
    Ok((
        StatusCode::CREATED,
        JsonResponse(UploadResponse {
            status: "success",
            message: "File uploaded!",
            path: file.relative_path(),
        }),
    ))
}

async fn read_fields(
    multipart: &mut Multipart,
    storage: &Storage,
    policy: &UploadPolicy,
    stored: &mut Option<StoredFile>,
) -> Result<(), ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| policy.multipart_error(err))?
    {
        // 普通文本字段与未选择文件的空文件名字段直接跳过
        let Some(raw_name) = field
            .file_name()
            .filter(|name| !name.is_empty())
            .map(str::to_string)
        else {
            continue;
        };
        if field.name() != Some(UPLOAD_FIELD_NAME) || stored.is_some() {
            warn!(field = field.name().unwrap_or(""), "unexpected file field");
            return Err(ApiError::BadRequest("Unexpected field".into()));
        }
        *stored = Some(store_field(field, &raw_name, storage, policy).await?);
    }
    Ok(())
}

async fn store_field(
    mut field: Field<'_>,
    raw_name: &str,
    storage: &Storage,
    policy: &UploadPolicy,
) -> Result<StoredFile, ApiError> {
    let original = sanitize_file_name(raw_name)
        .ok_or_else(|| ApiError::BadRequest("Invalid file name.".into()))?;
    if !policy.is_allowed(&original) {
        warn!(name = original, "upload rejected by extension");
        return Err(ApiError::BadRequest(policy.rejection_message()));
    }

    let destination = storage
        .prepare_destination(&original, Utc::now().timestamp_millis())
        .await?;
    let mut atomic = AtomicFile::create(&destination.path, policy.max_file_size).await?;

    loop {
        let chunk = match field.chunk().await {
            Ok(Some(chunk)) => chunk,
            Ok(None) => break,
            Err(err) => {
                atomic.cleanup().await;
                return Err(policy.multipart_error(err));
            }
        };
        if let Err(err) = atomic.write_chunk(&chunk).await {
            let written = atomic.written();
            atomic.cleanup().await;
            return Err(match err {
                WriteError::LimitExceeded => {
                    warn!(
                        name = original,
                        written,
                        limit = policy.max_file_size,
                        "upload exceeds size limit"
                    );
                    ApiError::PayloadTooLarge(policy.too_large_message())
                }
                WriteError::Io(err) => ApiError::Internal(err.to_string()),
            });
        }
    }

    let size = atomic.finalize().await?;
    info!(
        path = destination.relative_path(),
        folder = destination.folder,
        size,
        "file uploaded"
    );
    Ok(destination)
}

async fn discard(file: &StoredFile) {
    if let Err(err) = fs::remove_file(&file.path).await {
        warn!(path = ?file.path, error = %err, "failed to remove rejected upload");
    } else {
        debug!(path = file.relative_path(), "removed upload of rejected request");
    }
}
