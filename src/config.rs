/*!
 * 客户端配置管理模块
 *
 * 管理同步引擎的配置，包括：
 * - 持久化存储地址（REST）
 * - 事件通道地址（WebSocket）
 * - 新会话首条消息的广播延迟与加入确认超时
 * - 请求超时、日志级别
 *
 * 配置文件位于 `<config_dir>/messenger-sync/config.json`，
 * 环境变量 `MESSENGER_API_URL` / `MESSENGER_SOCKET_URL` 覆盖文件中的地址。
 */

use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

// ============================================================================
// 错误类型
// ============================================================================

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("配置文件读写失败: {0}")]
    Io(#[from] std::io::Error),
    #[error("配置文件格式错误: {0}")]
    Json(#[from] serde_json::Error),
    #[error("无效的地址 {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
}

// ============================================================================
// 配置结构
// ============================================================================

/// 环境变量：持久化存储地址
pub const ENV_API_URL: &str = "MESSENGER_API_URL";
/// 环境变量：事件通道地址
pub const ENV_SOCKET_URL: &str = "MESSENGER_SOCKET_URL";

/// 同步引擎配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientConfig {
    /// 持久化存储服务器地址（接口位于 /api 与 /auth 下）
    pub api_url: String,
    /// 事件通道地址（WebSocket）
    pub socket_url: String,
    /// 新会话首条消息的广播延迟（毫秒）
    pub broadcast_delay_ms: u64,
    /// 等待对方加入会话房间的确认超时（毫秒），为空时只使用固定延迟
    pub join_ack_timeout_ms: Option<u64>,
    /// 持久化请求超时（秒）
    pub request_timeout_secs: u64,
    /// 日志级别（可被 RUST_LOG 覆盖）
    pub log_level: String,
    /// 配置版本
    pub version: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:3001".to_string(),
            socket_url: "ws://localhost:3001/ws".to_string(),
            broadcast_delay_ms: 500,
            join_ack_timeout_ms: None,
            request_timeout_secs: 30,
            log_level: "info".to_string(),
            version: "1.0".to_string(),
        }
    }
}

impl ClientConfig {
    pub fn broadcast_delay(&self) -> Duration {
        Duration::from_millis(self.broadcast_delay_ms)
    }

    pub fn join_ack_timeout(&self) -> Option<Duration> {
        self.join_ack_timeout_ms.map(Duration::from_millis)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// 解析持久化存储地址
    pub fn api_base(&self) -> Result<Url, ConfigError> {
        let api = Url::parse(&self.api_url).map_err(|e| ConfigError::InvalidUrl {
            url: self.api_url.clone(),
            reason: e.to_string(),
        })?;
        if !matches!(api.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidUrl {
                url: self.api_url.clone(),
                reason: "持久化存储地址必须是 http/https".to_string(),
            });
        }
        Ok(api)
    }

    /// 校验地址格式
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.api_base()?;

        let socket = Url::parse(&self.socket_url).map_err(|e| ConfigError::InvalidUrl {
            url: self.socket_url.clone(),
            reason: e.to_string(),
        })?;
        if !matches!(socket.scheme(), "ws" | "wss") {
            return Err(ConfigError::InvalidUrl {
                url: self.socket_url.clone(),
                reason: "事件通道地址必须是 ws/wss".to_string(),
            });
        }

        Ok(())
    }

    /// 用环境变量覆盖地址
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_API_URL).filter(|v| !v.is_empty()) {
            self.api_url = url;
        }
        if let Some(url) = lookup(ENV_SOCKET_URL).filter(|v| !v.is_empty()) {
            self.socket_url = url;
        }
    }
}

// ============================================================================
// 全局配置管理
// ============================================================================

/// 全局配置单例
static CONFIG_MANAGER: OnceCell<Arc<RwLock<ConfigManager>>> = OnceCell::new();

/// 配置管理器
pub struct ConfigManager {
    config: ClientConfig,
    config_path: PathBuf,
}

impl ConfigManager {
    /// 从指定路径加载配置（文件不存在或损坏时使用默认值）
    pub fn load_from(config_path: PathBuf) -> Self {
        let mut config = Self::load_or_default(&config_path);
        config.apply_overrides(|key| std::env::var(key).ok());
        Self {
            config,
            config_path,
        }
    }

    /// 加载配置或使用默认值
    fn load_or_default(path: &Path) -> ClientConfig {
        if path.exists() {
            match fs::read_to_string(path) {
                Ok(content) => match serde_json::from_str(&content) {
                    Ok(config) => {
                        info!("[Config] 配置已加载: {:?}", path);
                        return config;
                    }
                    Err(e) => {
                        warn!("[Config] 配置解析失败，使用默认配置: {}", e);
                    }
                },
                Err(e) => {
                    warn!("[Config] 配置读取失败，使用默认配置: {}", e);
                }
            }
        }

        info!("[Config] 使用默认配置");
        ClientConfig::default()
    }

    /// 保存配置
    pub fn save(&self) -> Result<(), ConfigError> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(&self.config)?;
        fs::write(&self.config_path, content)?;

        info!("[Config] 配置已保存: {:?}", self.config_path);
        Ok(())
    }

    /// 获取配置
    pub fn get_config(&self) -> &ClientConfig {
        &self.config
    }

    /// 替换配置（校验通过后写入文件）
    pub fn set_config(&mut self, config: ClientConfig) -> Result<(), ConfigError> {
        config.validate()?;
        self.config = config;
        self.save()
    }
}

/// 获取配置目录
fn get_base_directory() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("messenger-sync")
}

/// 获取配置文件路径
pub fn get_config_file_path() -> PathBuf {
    get_base_directory().join("config.json")
}

/// 获取全局配置管理器
pub fn get_config_manager() -> Arc<RwLock<ConfigManager>> {
    CONFIG_MANAGER
        .get_or_init(|| Arc::new(RwLock::new(ConfigManager::load_from(get_config_file_path()))))
        .clone()
}

/// 获取当前配置的副本
pub fn get_client_config() -> ClientConfig {
    let manager = get_config_manager();
    let config = manager.read();
    config.get_config().clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_broadcast_delay_is_half_second() {
        let config = ClientConfig::default();
        assert_eq!(config.broadcast_delay(), Duration::from_millis(500));
        assert!(config.join_ack_timeout().is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_falls_back_to_defaults() {
        let config: ClientConfig = serde_json::from_str(r#"{"broadcastDelayMs": 800}"#).unwrap();
        assert_eq!(config.broadcast_delay_ms, 800);
        assert_eq!(config.request_timeout_secs, 30);
    }

    #[test]
    fn test_invalid_socket_scheme_rejected() {
        let config = ClientConfig {
            socket_url: "http://localhost:3001".to_string(),
            ..ClientConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidUrl { .. })));
    }

    #[test]
    fn test_overrides_replace_urls() {
        let mut config = ClientConfig::default();
        config.apply_overrides(|key| match key {
            ENV_API_URL => Some("https://chat.example.com".to_string()),
            ENV_SOCKET_URL => Some(String::new()),
            _ => None,
        });
        assert_eq!(config.api_url, "https://chat.example.com");
        assert_eq!(config.socket_url, ClientConfig::default().socket_url);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut manager = ConfigManager {
            config: ClientConfig::default(),
            config_path: path.clone(),
        };
        let updated = ClientConfig {
            join_ack_timeout_ms: Some(2000),
            ..ClientConfig::default()
        };
        manager.set_config(updated.clone()).unwrap();

        assert_eq!(ConfigManager::load_or_default(&path), updated);
    }

    #[test]
    fn test_corrupt_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{not json").unwrap();
        assert_eq!(ConfigManager::load_or_default(&path), ClientConfig::default());
    }
}
