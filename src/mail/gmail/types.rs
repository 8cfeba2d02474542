/// Gmail 凭据与 API 数据结构
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// OAuth2 凭据
///
/// 字段名与常见的 `token.json` 格式一致，可直接复用已有的缓存文件
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,

    #[serde(default = "default_token_type")]
    pub token_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// 过期时间（UTC）；缺失或零值时间表示永不过期
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<DateTime<Utc>>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl Credential {
    /// 由 Token 交换结果构造
    pub fn new(
        access_token: String,
        refresh_token: Option<String>,
        expires_in_seconds: Option<i64>,
    ) -> Self {
        Self {
            access_token,
            token_type: default_token_type(),
            refresh_token,
            expiry: expires_in_seconds.map(|secs| Utc::now() + chrono::Duration::seconds(secs)),
        }
    }

    /// 有效的过期时间（过滤零值时间 `0001-01-01T00:00:00Z`）
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expiry.filter(|t| t.timestamp() > 0)
    }

    /// 检查 Token 是否即将过期
    ///
    /// # Arguments
    /// * `threshold_minutes` - 提前多少分钟算作"即将过期"
    pub fn is_token_expiring(&self, threshold_minutes: i64) -> bool {
        let threshold = Utc::now() + chrono::Duration::minutes(threshold_minutes);
        self.expires_at().is_some_and(|at| at <= threshold)
    }

    /// 缓存的凭据能否直接使用（无需重新授权）
    ///
    /// 已过期但带 Refresh Token 的凭据会在使用时自动刷新
    pub fn is_usable(&self) -> bool {
        !self.access_token.is_empty()
            && (!self.is_token_expiring(0) || self.refresh_token.is_some())
    }
}

/// `messages.list` 中的单条引用
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRef {
    pub id: String,
    #[serde(default)]
    pub thread_id: Option<String>,
}

/// `messages.list` 响应；没有匹配邮件时 `messages` 字段缺失
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageList {
    #[serde(default)]
    pub messages: Vec<MessageRef>,
    #[serde(default)]
    pub result_size_estimate: Option<u32>,

    /// 还有下一页时存在
    #[serde(default)]
    pub next_page_token: Option<String>,
}

/// `messages.get?format=raw` 响应
#[derive(Debug, Clone, Deserialize)]
pub struct RawMessage {
    pub id: String,
    #[serde(default)]
    pub snippet: Option<String>,

    /// base64url 编码的完整 RFC 822 内容
    #[serde(default)]
    pub raw: Option<String>,
}

/// `messages.modify` 请求体
#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModifyRequest {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub add_label_ids: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub remove_label_ids: Vec<String>,
}
