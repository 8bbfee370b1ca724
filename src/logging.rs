//! 日志初始化
//!
//! `RUST_LOG` 存在时优先使用，否则使用配置中的 `log_level`

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::ClientConfig;

/// 构造日志过滤器
pub fn build_filter(config: &ClientConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// 安装全局日志订阅者（重复调用时忽略）
pub fn init_logging(config: &ClientConfig) {
    let result = tracing_subscriber::registry()
        .with(build_filter(config))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init();

    if result.is_err() {
        tracing::debug!("[Logging] 日志订阅者已存在，跳过初始化");
    }
}
