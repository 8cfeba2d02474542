/// 客户端密钥读取模块
///
/// 解析 Google Cloud Console 下载的 `client_secret.json`（`installed` 或 `web` 类型）
use serde::Deserialize;
use std::path::Path;

use crate::error::AuthError;

/// 文件顶层结构：两种应用类型二选一
#[derive(Debug, Deserialize)]
struct SecretFile {
    installed: Option<SecretSection>,
    web: Option<SecretSection>,
}

#[derive(Debug, Deserialize)]
struct SecretSection {
    client_id: String,
    client_secret: String,
    auth_uri: String,
    token_uri: String,
    #[serde(default)]
    redirect_uris: Vec<String>,
}

/// OAuth2 应用身份与端点
#[derive(Debug, Clone)]
pub struct ClientApp {
    pub client_id: String,
    pub client_secret: String,
    pub auth_uri: String,
    pub token_uri: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
}

impl ClientApp {
    /// 读取并解析客户端密钥文件
    pub fn load(path: &Path, scopes: &[String]) -> Result<Self, AuthError> {
        let content = std::fs::read(path).map_err(|source| AuthError::SecretUnreadable {
            path: path.display().to_string(),
            source,
        })?;

        Self::from_json(&content, scopes)
    }

    pub fn from_json(content: &[u8], scopes: &[String]) -> Result<Self, AuthError> {
        let file: SecretFile = serde_json::from_slice(content)
            .map_err(|e| AuthError::SecretMalformed(e.to_string()))?;

        let section = file
            .installed
            .or(file.web)
            .ok_or_else(|| AuthError::SecretMalformed("缺少 installed 或 web 段".to_string()))?;

        let redirect_uri = section
            .redirect_uris
            .into_iter()
            .next()
            .ok_or_else(|| AuthError::SecretMalformed("redirect_uris 为空".to_string()))?;

        Ok(Self {
            client_id: section.client_id,
            client_secret: section.client_secret,
            auth_uri: section.auth_uri,
            token_uri: section.token_uri,
            redirect_uri,
            scopes: scopes.to_vec(),
        })
    }
}
