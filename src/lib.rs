//! Messenger Sync 会话同步引擎
//!
//! 双人聊天客户端的核心：在 REST 持久化存储与 WebSocket 事件通道之间，
//! 保持两个独立连接的客户端的消息投递、会话房间成员关系和已读状态一致。
//!
//! ## 功能模块
//! - 会话存储：单写者模型，快照整体发布（`store`）
//! - 同步组件：房间成员、消息发送、已读同步、当前会话（`sync`）
//! - 传输层：持久化存储 HTTP 客户端、事件通道 WebSocket 客户端（`transport`）
//! - 配置：`<config_dir>/messenger-sync/config.json`，环境变量覆盖地址（`config`）
//! - 凭证：`<data_local_dir>/messenger-sync/session.json`（`storage`）
//! - 日志：tracing + EnvFilter（`logging`）
//!
//! ## 更新日志
//! - 2026-10-16: 从桌面客户端后端拆分为独立同步引擎

pub mod config;
pub mod logging;
pub mod storage;
pub mod store;
pub mod sync;
pub mod transport;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

pub use config::ClientConfig;
pub use store::{Conversation, ConversationStore, Message, StoreState};
pub use sync::{SyncClient, SyncError};

/// 无界面客户端入口
///
/// 读取配置与凭证，连接服务器，加载会话后持续处理服务器事件，直到 Ctrl+C
pub async fn run() -> Result<(), SyncError> {
    let config = config::get_client_config();
    logging::init_logging(&config);
    info!("[App] 启动，持久化存储: {}, 事件通道: {}", config.api_url, config.socket_url);

    let credentials = Arc::new(storage::FileCredentials::open_default()?);
    let cancel = CancellationToken::new();

    let (client, events) = SyncClient::connect(&config, credentials, cancel.clone()).await?;

    if client.bootstrap().await?.is_some() {
        client.load_conversations().await?;
    }

    let mut snapshots = client.store().subscribe();
    tokio::spawn(async move {
        while snapshots.changed().await.is_ok() {
            let total = snapshots.borrow_and_update().total_unread();
            info!("[App] 未读消息总数: {}", total);
        }
    });

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("[App] 无法监听退出信号: {}", e);
            return;
        }
        info!("[App] 收到退出信号");
        shutdown.cancel();
    });

    client.run_event_loop(events, cancel).await;
    client.shutdown();
    Ok(())
}
