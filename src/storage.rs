//! 会话凭证存储模块
//!
//! 持久化存储调用只需要"存在一个凭证并随请求附带"，
//! 这里负责保存和读取这个凭证。
//!
//! ## 存储位置
//! - 桌面端：`dirs::data_local_dir()/messenger-sync/session.json`
//! - 测试：通过 `FileCredentials::at` 指定任意路径
//!
//! 登录与注册流程不在本模块范围内，凭证由外部写入。

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

use crate::store::UserId;

/// 存储错误类型
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Cannot find local data directory")]
    DataDirUnavailable,
}

// ============================================================================
// 凭证提供者
// ============================================================================

/// 凭证提供者
///
/// 每次持久化调用前读取一次；返回 `None` 时请求不附带凭证
pub trait CredentialProvider: Send + Sync {
    fn token(&self) -> Option<String>;

    /// 下线时删除凭证
    fn clear(&self) -> Result<(), StorageError>;
}

/// 固定凭证
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials(Option<String>);

impl StaticCredentials {
    pub fn new(token: impl Into<String>) -> Self {
        Self(Some(token.into()))
    }

    pub fn anonymous() -> Self {
        Self(None)
    }
}

impl CredentialProvider for StaticCredentials {
    fn token(&self) -> Option<String> {
        self.0.clone()
    }

    fn clear(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

// ============================================================================
// 文件凭证
// ============================================================================

/// 已保存的会话凭证
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SavedSession {
    /// 用户 ID
    pub user_id: UserId,
    /// 服务器地址
    pub server_url: String,
    /// 访问令牌
    pub token: String,
    /// 保存时间
    pub saved_at: String,
}

/// 基于文件的凭证存储（内存中缓存一份，避免每次请求都读盘）
pub struct FileCredentials {
    path: PathBuf,
    cached: RwLock<Option<SavedSession>>,
}

/// 获取应用数据目录
fn get_app_data_dir() -> Result<PathBuf, StorageError> {
    let base = dirs::data_local_dir().ok_or(StorageError::DataDirUnavailable)?;
    let app_dir = base.join("messenger-sync");

    if !app_dir.exists() {
        fs::create_dir_all(&app_dir)?;
    }

    Ok(app_dir)
}

impl FileCredentials {
    /// 使用默认位置
    pub fn open_default() -> Result<Self, StorageError> {
        Ok(Self::at(get_app_data_dir()?.join("session.json")))
    }

    /// 使用指定文件，文件存在时立即加载
    pub fn at(path: PathBuf) -> Self {
        let cached = match read_session(&path) {
            Ok(session) => session,
            Err(e) => {
                warn!("[Storage] 凭证文件读取失败，视为未登录: {}", e);
                None
            }
        };

        Self {
            path,
            cached: RwLock::new(cached),
        }
    }

    /// 保存凭证
    pub fn save(
        &self,
        user_id: UserId,
        server_url: String,
        token: String,
    ) -> Result<(), StorageError> {
        let session = SavedSession {
            user_id,
            server_url,
            token,
            saved_at: Utc::now().to_rfc3339(),
        };

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(&session)?;
        fs::write(&self.path, content)?;

        info!("[Storage] 凭证已保存: 用户 {}", session.user_id);
        *self.cached.write() = Some(session);
        Ok(())
    }

    /// 当前会话
    pub fn session(&self) -> Option<SavedSession> {
        self.cached.read().clone()
    }
}

impl CredentialProvider for FileCredentials {
    fn token(&self) -> Option<String> {
        self.cached.read().as_ref().map(|s| s.token.clone())
    }

    /// 删除凭证（文件不存在时忽略）
    fn clear(&self) -> Result<(), StorageError> {
        *self.cached.write() = None;
        match fs::remove_file(&self.path) {
            Ok(()) => {
                info!("[Storage] 凭证已删除");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn read_session(path: &Path) -> Result<Option<SavedSession>, StorageError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    Ok(Some(serde_json::from_str(&content)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_means_no_token() {
        let dir = tempfile::tempdir().unwrap();
        let creds = FileCredentials::at(dir.path().join("session.json"));
        assert!(creds.token().is_none());
        assert!(creds.clear().is_ok());
    }

    #[test]
    fn test_save_then_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");

        let creds = FileCredentials::at(path.clone());
        creds
            .save(UserId(1), "http://localhost:3001".to_string(), "abc".to_string())
            .unwrap();
        assert_eq!(creds.token().as_deref(), Some("abc"));

        let reopened = FileCredentials::at(path);
        assert_eq!(reopened.session().unwrap().user_id, UserId(1));
        assert_eq!(reopened.token().as_deref(), Some("abc"));
    }

    #[test]
    fn test_clear_removes_token() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        let creds = FileCredentials::at(path.clone());
        creds
            .save(UserId(1), "http://x".to_string(), "abc".to_string())
            .unwrap();

        creds.clear().unwrap();
        assert!(creds.token().is_none());
        assert!(!path.exists());
    }

    #[test]
    fn test_corrupt_file_is_treated_as_logged_out() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        fs::write(&path, "not json").unwrap();
        assert!(FileCredentials::at(path).token().is_none());
    }

    #[test]
    fn test_static_credentials() {
        assert_eq!(StaticCredentials::new("t").token().as_deref(), Some("t"));
        assert!(StaticCredentials::anonymous().token().is_none());
    }
}
