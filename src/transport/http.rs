//! 持久化存储 HTTP 客户端
//!
//! 每个请求都会附带 `x-access-token`（存在凭证时），
//! 非 2xx 响应优先使用服务器返回的 `{"error": "..."}` 作为错误信息。

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, Url};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::protocol::{ApiErrorBody, CurrentUser, NewMessageRequest, ReadRequest, SavedMessage};
use super::{DurableStore, TransportError};
use crate::storage::CredentialProvider;
use crate::store::{Conversation, ConversationId};

/// 凭证请求头
pub const TOKEN_HEADER: &str = "x-access-token";

/// 持久化存储客户端
pub struct HttpStore {
    client: Client,
    base: Url,
    credentials: Arc<dyn CredentialProvider>,
}

impl HttpStore {
    pub fn new(
        base: Url,
        timeout: Duration,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Result<Self, TransportError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base,
            credentials,
        })
    }

    /// 拼接接口地址
    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base.as_str().trim_end_matches('/'), path)
    }

    /// 附带凭证
    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        match self.credentials.token() {
            Some(token) => builder.header(TOKEN_HEADER, token),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response, TransportError> {
        let response = self.authorized(builder).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = error_message(&body);
        warn!("[Http] 请求失败: 状态码 {}, {}", status, message);
        Err(TransportError::Status {
            status: status.as_u16(),
            message,
        })
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, TransportError> {
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// 从错误响应体中提取错误信息
fn error_message(body: &str) -> String {
    match serde_json::from_str::<ApiErrorBody>(body) {
        Ok(parsed) => parsed.error,
        Err(_) if body.trim().is_empty() => "Server Error".to_string(),
        Err(_) => body.trim().to_string(),
    }
}

#[async_trait]
impl DurableStore for HttpStore {
    async fn fetch_conversations(&self) -> Result<Vec<Conversation>, TransportError> {
        let response = self
            .send(self.client.get(self.endpoint("/api/conversations")))
            .await?;
        let conversations: Vec<Conversation> = Self::decode(response).await?;
        debug!("[Http] 获取到 {} 个会话", conversations.len());
        Ok(conversations)
    }

    async fn save_message(
        &self,
        request: &NewMessageRequest,
    ) -> Result<SavedMessage, TransportError> {
        let response = self
            .send(self.client.post(self.endpoint("/api/messages")).json(request))
            .await?;
        Self::decode(response).await
    }

    async fn mark_conversation_read(
        &self,
        conversation_id: ConversationId,
    ) -> Result<(), TransportError> {
        let body = ReadRequest { conversation_id };
        self.send(
            self.client
                .patch(self.endpoint("/api/conversations/read"))
                .json(&body),
        )
        .await?;
        Ok(())
    }

    async fn fetch_user(&self) -> Result<CurrentUser, TransportError> {
        let response = self.send(self.client.get(self.endpoint("/auth/user"))).await?;
        Self::decode(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StaticCredentials;

    fn store(base: &str, credentials: StaticCredentials) -> HttpStore {
        HttpStore::new(
            Url::parse(base).unwrap(),
            Duration::from_secs(5),
            Arc::new(credentials),
        )
        .unwrap()
    }

    #[test]
    fn test_endpoint_join_ignores_trailing_slash() {
        let a = store("http://localhost:3001", StaticCredentials::anonymous());
        let b = store("http://localhost:3001/", StaticCredentials::anonymous());
        assert_eq!(a.endpoint("/api/messages"), "http://localhost:3001/api/messages");
        assert_eq!(b.endpoint("/api/messages"), "http://localhost:3001/api/messages");
    }

    #[test]
    fn test_token_header_attached_when_present() {
        let s = store("http://localhost:3001", StaticCredentials::new("secret"));
        let request = s
            .authorized(s.client.get(s.endpoint("/api/conversations")))
            .build()
            .unwrap();
        assert_eq!(request.headers().get(TOKEN_HEADER).unwrap(), "secret");
    }

    #[test]
    fn test_missing_token_is_not_an_error() {
        let s = store("http://localhost:3001", StaticCredentials::anonymous());
        let request = s
            .authorized(s.client.get(s.endpoint("/auth/user")))
            .build()
            .unwrap();
        assert!(request.headers().get(TOKEN_HEADER).is_none());
    }

    #[test]
    fn test_error_message_prefers_server_body() {
        assert_eq!(error_message(r#"{"error":"Unauthorized"}"#), "Unauthorized");
        assert_eq!(error_message(""), "Server Error");
        assert_eq!(error_message("Bad Gateway"), "Bad Gateway");
    }
}
