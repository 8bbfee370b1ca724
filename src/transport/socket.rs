//! 事件通道 WebSocket 客户端
//!
//! 连接建立后由一个后台任务同时负责：
//! - 把 `emit` 投递的 `ClientEvent` 编码后写入 WebSocket
//! - 把收到的文本帧解码为 `ServerEvent` 交给调用方
//!
//! 无法解码的帧记录日志后丢弃，不会中断连接。

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::protocol::{ClientEvent, ServerEvent};
use super::{EventChannel, TransportError};

/// 事件通道客户端
#[derive(Clone)]
pub struct EventSocket {
    outbound: mpsc::UnboundedSender<ClientEvent>,
}

impl EventSocket {
    /// 连接事件通道
    ///
    /// 返回客户端句柄和服务器事件接收端；`cancel` 触发或连接断开后接收端关闭
    pub async fn connect(
        url: &str,
        cancel: CancellationToken,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ServerEvent>), TransportError> {
        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| TransportError::Channel(format!("连接 {} 失败: {}", url, e)))?;
        info!("[Socket] 已连接事件通道: {}", url);

        let (outbound, rx_client) = mpsc::unbounded_channel::<ClientEvent>();
        let (tx_server, rx_server) = mpsc::unbounded_channel::<ServerEvent>();

        tokio::spawn(handle_socket(ws_stream, rx_client, tx_server, cancel));

        Ok((Self { outbound }, rx_server))
    }
}

impl EventChannel for EventSocket {
    fn emit(&self, event: ClientEvent) -> Result<(), TransportError> {
        debug!("[Socket] 发送事件: {}", event.name());
        self.outbound
            .send(event)
            .map_err(|_| TransportError::Channel("事件通道已关闭".to_string()))
    }
}

/// 编码客户端事件
pub fn encode_event(event: &ClientEvent) -> Result<String, TransportError> {
    Ok(serde_json::to_string(event)?)
}

/// 解码服务器文本帧，失败时记录日志并返回 `None`
pub fn decode_frame(text: &str) -> Option<ServerEvent> {
    match serde_json::from_str::<ServerEvent>(text) {
        Ok(event) => Some(event),
        Err(e) => {
            warn!("[Socket] 无法解析的事件帧已丢弃: {} ({})", e, text);
            None
        }
    }
}

async fn handle_socket(
    ws_stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    mut rx_client: mpsc::UnboundedReceiver<ClientEvent>,
    tx_server: mpsc::UnboundedSender<ServerEvent>,
    cancel: CancellationToken,
) {
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = ws_sender.send(Message::Close(None)).await;
                break;
            }
            outgoing = rx_client.recv() => {
                let Some(event) = outgoing else { break };
                let json = match encode_event(&event) {
                    Ok(json) => json,
                    Err(e) => {
                        warn!("[Socket] 事件编码失败: {}", e);
                        continue;
                    }
                };
                if let Err(e) = ws_sender.send(Message::Text(json.into())).await {
                    warn!("[Socket] 发送失败，连接关闭: {}", e);
                    break;
                }
            }
            incoming = ws_receiver.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(event) = decode_frame(text.as_str())
                            && tx_server.send(event).is_err()
                        {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        warn!("[Socket] 读取失败: {}", e);
                        break;
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    info!("[Socket] 事件通道已断开");
}
