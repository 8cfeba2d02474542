/// Gmail API 调用模块
///
/// 负责列出未读邮件、获取原始内容以及移除未读标签
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use tokio::sync::Mutex;

use crate::config::MailboxConfig;
use crate::error::MailboxError;
use crate::mail::Mailbox;
use crate::mail::gmail::token::TokenManager;
use crate::mail::gmail::types::{MessageList, ModifyRequest, RawMessage};
use crate::utils::http_client;

/// Gmail API 客户端
pub struct GmailApiClient {
    http: Client,
    base_url: String,
    user_id: String,
    unread_label: String,
    tokens: Mutex<TokenManager>,
}

impl GmailApiClient {
    pub fn new(config: &MailboxConfig, tokens: TokenManager) -> Self {
        Self::with_http_client(config, tokens, http_client::get_client().clone())
    }

    pub fn with_http_client(config: &MailboxConfig, tokens: TokenManager, http: Client) -> Self {
        Self {
            http,
            base_url: config.api_base.trim_end_matches('/').to_string(),
            user_id: config.user_id.clone(),
            unread_label: config.unread_label.clone(),
            tokens: Mutex::new(tokens),
        }
    }

    fn messages_url(&self) -> String {
        format!("{}/gmail/v1/users/{}/messages", self.base_url, self.user_id)
    }

    /// 发送带 Bearer Token 的请求
    ///
    /// 返回 401 时强制刷新 Token 并重试一次
    async fn send_authorized<F>(&self, build: F) -> Result<Response, MailboxError>
    where
        F: Fn() -> RequestBuilder,
    {
        let token = self.tokens.lock().await.get_valid_token().await?;
        let response = build().bearer_auth(&token).send().await?;

        if response.status() != StatusCode::UNAUTHORIZED {
            return check_status(response).await;
        }

        tracing::warn!("Gmail API 返回 401，尝试使用 Refresh Token 刷新后重试");
        let token = {
            let mut tokens = self.tokens.lock().await;
            tokens.force_refresh().await?;
            tokens.get_valid_token().await?
        };

        let response = build().bearer_auth(&token).send().await?;
        check_status(response).await
    }

    /// 列出一页带未读标签的邮件，最多 `max_results` 封
    pub async fn list_unread(
        &self,
        max_results: u32,
        page_token: Option<&str>,
    ) -> Result<MessageList, MailboxError> {
        let url = self.messages_url();
        let max_results = max_results.to_string();

        let mut query = vec![
            ("labelIds", self.unread_label.as_str()),
            ("maxResults", max_results.as_str()),
        ];
        if let Some(token) = page_token {
            query.push(("pageToken", token));
        }

        let response = self
            .send_authorized(|| self.http.get(&url).query(&query))
            .await?;

        let list: MessageList = response.json().await?;
        tracing::debug!(
            "未读邮件: {} 封 (估计总数: {:?}, 下一页: {})",
            list.messages.len(),
            list.result_size_estimate,
            list.next_page_token.is_some()
        );
        for message in &list.messages {
            tracing::debug!("  {} (thread: {:?})", message.id, message.thread_id);
        }

        Ok(list)
    }

    /// 获取邮件原始内容（`format=raw`）
    pub async fn get_raw(&self, id: &str) -> Result<RawMessage, MailboxError> {
        let url = format!("{}/{}", self.messages_url(), id);

        let response = self
            .send_authorized(|| self.http.get(&url).query(&[("format", "raw")]))
            .await?;

        Ok(response.json().await?)
    }

    /// 移除邮件的未读标签
    pub async fn mark_read(&self, id: &str) -> Result<(), MailboxError> {
        let url = format!("{}/{}/modify", self.messages_url(), id);
        let body = ModifyRequest {
            remove_label_ids: vec![self.unread_label.clone()],
            ..Default::default()
        };

        self.send_authorized(|| self.http.post(&url).json(&body)).await?;

        Ok(())
    }
}

impl Mailbox for GmailApiClient {
    async fn list_unread(
        &self,
        max_results: u32,
        page_token: Option<&str>,
    ) -> Result<MessageList, MailboxError> {
        GmailApiClient::list_unread(self, max_results, page_token).await
    }

    async fn fetch_raw(&self, id: &str) -> Result<RawMessage, MailboxError> {
        self.get_raw(id).await
    }

    async fn acknowledge(&self, id: &str) -> Result<(), MailboxError> {
        self.mark_read(id).await
    }
}

async fn check_status(response: Response) -> Result<Response, MailboxError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(MailboxError::Status {
        status: status.as_u16(),
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::client_secret::ClientApp;
    use crate::config::storage::CredentialStore;
    use crate::mail::gmail::types::Credential;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct Fixture {
        client: GmailApiClient,
        _dir: tempfile::TempDir,
    }

    fn fixture(server_uri: &str, access_token: &str) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let app = ClientApp {
            client_id: "client-id".to_string(),
            client_secret: "client-secret".to_string(),
            auth_uri: format!("{}/auth", server_uri),
            token_uri: format!("{}/token", server_uri),
            redirect_uri: "http://localhost".to_string(),
            scopes: Vec::new(),
        };
        let tokens = TokenManager::new(
            Credential::new(access_token.into(), Some("refresh".into()), Some(3600)),
            app,
            CredentialStore::new(dir.path().join("token.json")),
        );
        let config = MailboxConfig {
            api_base: format!("{}/", server_uri),
            ..Default::default()
        };

        Fixture {
            client: GmailApiClient::with_http_client(&config, tokens, Client::new()),
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn test_list_unread() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/messages"))
            .and(query_param("labelIds", "UNREAD"))
            .and(query_param("maxResults", "1"))
            .and(header("authorization", "Bearer good"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "messages": [{"id": "18c1", "threadId": "18c0"}],
                "resultSizeEstimate": 3
            })))
            .expect(1)
            .mount(&server)
            .await;

        let fx = fixture(&server.uri(), "good");
        let list = fx.client.list_unread(1, None).await.unwrap();

        assert_eq!(list.messages.len(), 1);
        assert_eq!(list.messages[0].id, "18c1");
        assert_eq!(list.messages[0].thread_id.as_deref(), Some("18c0"));
        assert!(list.next_page_token.is_none());
    }

    #[tokio::test]
    async fn test_list_unread_follows_page_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/messages"))
            .and(query_param("maxResults", "500"))
            .and(query_param("pageToken", "page-2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "messages": [{"id": "18c9", "threadId": "18c9"}],
                "nextPageToken": "page-3",
                "resultSizeEstimate": 1200
            })))
            .expect(1)
            .mount(&server)
            .await;

        let fx = fixture(&server.uri(), "good");
        let list = fx.client.list_unread(500, Some("page-2")).await.unwrap();

        assert_eq!(list.messages[0].id, "18c9");
        assert_eq!(list.next_page_token.as_deref(), Some("page-3"));
    }

    #[tokio::test]
    async fn test_get_raw() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/messages/18c1"))
            .and(query_param("format", "raw"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "18c1",
                "snippet": "hello there",
                "raw": "U3ViamVjdDogaGkNCg0KYm9keQ=="
            })))
            .mount(&server)
            .await;

        let fx = fixture(&server.uri(), "good");
        let message = fx.client.get_raw("18c1").await.unwrap();

        assert_eq!(message.id, "18c1");
        assert_eq!(message.snippet.as_deref(), Some("hello there"));
        assert!(message.raw.is_some());
    }

    #[tokio::test]
    async fn test_mark_read_removes_unread_label() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/gmail/v1/users/me/messages/18c1/modify"))
            .and(body_json(serde_json::json!({"removeLabelIds": ["UNREAD"]})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "18c1",
                "labelIds": ["INBOX"]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let fx = fixture(&server.uri(), "good");
        fx.client.mark_read("18c1").await.unwrap();
    }

    #[tokio::test]
    async fn test_not_found_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/messages/gone"))
            .respond_with(ResponseTemplate::new(404).set_body_string("Requested entity was not found."))
            .mount(&server)
            .await;

        let fx = fixture(&server.uri(), "good");
        let err = fx.client.get_raw("gone").await.unwrap_err();

        assert!(err.is_not_found());
        assert!(err.to_string().contains("404"));
    }

    #[tokio::test]
    async fn test_unauthorized_refreshes_and_retries_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/messages"))
            .and(header("authorization", "Bearer revoked"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/messages"))
            .and(header("authorization", "Bearer renewed"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "resultSizeEstimate": 0
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "renewed",
                "token_type": "Bearer",
                "expires_in": 3599
            })))
            .expect(1)
            .mount(&server)
            .await;

        let fx = fixture(&server.uri(), "revoked");
        let list = fx.client.list_unread(1, None).await.unwrap();

        assert!(list.messages.is_empty());
    }

    #[tokio::test]
    async fn test_server_error_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/messages"))
            .respond_with(ResponseTemplate::new(503).set_body_string("backend error"))
            .expect(1)
            .mount(&server)
            .await;

        let fx = fixture(&server.uri(), "good");
        let err = fx.client.list_unread(1, None).await.unwrap_err();

        match err {
            MailboxError::Status { status, body } => {
                assert_eq!(status, 503);
                assert_eq!(body, "backend error");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
