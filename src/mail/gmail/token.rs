/// Token 自动刷新管理模块
use oauth2::{
    AuthUrl, ClientId, ClientSecret, RefreshToken, TokenResponse, TokenUrl, basic::BasicClient,
};

use crate::config::client_secret::ClientApp;
use crate::config::storage::CredentialStore;
use crate::error::AuthError;
use crate::mail::gmail::types::Credential;

/// Token 刷新阈值（提前多少分钟刷新）
const REFRESH_THRESHOLD_MINUTES: i64 = 5;

/// Token 管理器
///
/// 负责自动刷新过期的 Access Token，并把刷新结果写回凭据文件
pub struct TokenManager {
    credential: Credential,
    app: ClientApp,
    store: CredentialStore,
}

impl TokenManager {
    pub fn new(credential: Credential, app: ClientApp, store: CredentialStore) -> Self {
        Self {
            credential,
            app,
            store,
        }
    }

    /// 获取有效的 Access Token
    ///
    /// 如果 Token 即将过期（默认提前 5 分钟），则自动刷新
    pub async fn get_valid_token(&mut self) -> Result<String, AuthError> {
        if self.credential.is_token_expiring(REFRESH_THRESHOLD_MINUTES) {
            tracing::info!(
                "Access Token 即将过期（{:?}），自动刷新",
                self.credential.expires_at()
            );
            self.refresh_access_token().await?;
        }

        Ok(self.credential.access_token.clone())
    }

    /// 强制刷新 Access Token
    ///
    /// API 返回 401 时调用
    pub async fn force_refresh(&mut self) -> Result<(), AuthError> {
        self.refresh_access_token().await
    }

    async fn refresh_access_token(&mut self) -> Result<(), AuthError> {
        tracing::debug!("开始刷新 Access Token");

        let refresh_token = self
            .credential
            .refresh_token
            .clone()
            .ok_or(AuthError::NoRefreshToken)?;

        let client = BasicClient::new(
            ClientId::new(self.app.client_id.clone()),
            Some(ClientSecret::new(self.app.client_secret.clone())),
            AuthUrl::new(self.app.auth_uri.clone())?,
            Some(TokenUrl::new(self.app.token_uri.clone())?),
        );

        let token_response = client
            .exchange_refresh_token(&RefreshToken::new(refresh_token.clone()))
            .request_async(oauth2::reqwest::async_http_client)
            .await
            .map_err(|e| {
                let error_msg = e.to_string();
                if error_msg.contains("invalid_grant") {
                    tracing::error!("❌ Token 刷新失败 [授权被拒绝/已过期]: {}", error_msg);
                    tracing::error!("   💡 Refresh Token 已过期或被撤销，请删除凭据文件后重新授权");
                }
                AuthError::Refresh(error_msg)
            })?;

        // 服务端未轮换 Refresh Token 时沿用旧值
        let rotated = token_response
            .refresh_token()
            .map(|t| t.secret().to_string())
            .unwrap_or(refresh_token);

        self.credential = Credential::new(
            token_response.access_token().secret().to_string(),
            Some(rotated),
            token_response.expires_in().map(|d| d.as_secs() as i64),
        );

        self.store.save(&self.credential)?;

        tracing::info!(
            "✅ Access Token 刷新成功（新的过期时间: {:?}）",
            self.credential.expires_at()
        );

        Ok(())
    }
}
