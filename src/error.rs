/// 错误类型
///
/// 启动阶段（配置、授权）的错误全部致命；轮询循环中的错误按
/// [`DispatchError::is_skippable`] 区分"跳过该邮件"与"终止进程"。
use std::io;

/// 凭据文件读写错误
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("读取凭据文件失败: {0}")]
    Io(#[from] io::Error),

    #[error("凭据文件格式错误（文件可能损坏）: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// OAuth2 授权与 Token 刷新错误
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("无法读取客户端密钥文件 {path}: {source}")]
    SecretUnreadable { path: String, source: io::Error },

    #[error("客户端密钥文件格式错误: {0}")]
    SecretMalformed(String),

    #[error("读取授权码失败: {0}")]
    Prompt(#[source] io::Error),

    #[error("未输入授权码")]
    MissingCode,

    #[error("CSRF 验证失败：state 不匹配")]
    StateMismatch,

    #[error("Token 交换失败: {0}")]
    Exchange(String),

    #[error("Refresh Token 交换失败: {0}")]
    Refresh(String),

    #[error("凭据中没有 Refresh Token，需要重新授权")]
    NoRefreshToken,

    #[error("无效的 OAuth2 端点: {0}")]
    Endpoint(#[from] url::ParseError),

    #[error("保存凭据失败: {0}")]
    Store(#[from] StoreError),
}

/// Gmail API 调用错误
#[derive(Debug, thiserror::Error)]
pub enum MailboxError {
    #[error("请求 Gmail API 失败: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Gmail API 返回错误 {status}: {body}")]
    Status { status: u16, body: String },

    #[error("获取有效 Access Token 失败: {0}")]
    Auth(#[from] AuthError),
}

impl MailboxError {
    /// 邮件已不存在（列出后被删除）
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Status { status: 404, .. })
    }
}

/// 投递进程错误
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("无法启动投递进程 {program}: {source}")]
    Spawn { program: String, source: io::Error },

    #[error("投递进程异常退出 (code={code:?}): {output}")]
    NonZeroExit { code: Option<i32>, output: String },

    #[error("写入投递进程 stdin 失败: {0}")]
    Stdin(#[source] io::Error),

    #[error("等待投递进程结束失败: {0}")]
    Wait(#[source] io::Error),

    #[error("stdin 写入任务异常终止: {0}")]
    Writer(#[from] tokio::task::JoinError),
}

/// 单轮轮询中的错误
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("获取未读邮件列表失败: {0}")]
    List(#[source] MailboxError),

    #[error("获取邮件 {id} 内容失败: {source}")]
    Fetch { id: String, source: MailboxError },

    #[error("邮件 {id} 没有 raw 内容")]
    EmptyContent { id: String },

    #[error("邮件 {id} Base64 解码失败: {source}")]
    Decode {
        id: String,
        source: base64::DecodeError,
    },

    #[error("投递邮件 {id} 失败: {source}")]
    Deliver { id: String, source: DeliveryError },

    #[error("移除邮件 {id} 的未读标签失败: {source}")]
    Acknowledge { id: String, source: MailboxError },
}

impl DispatchError {
    /// 仅与单封邮件有关、且尚未产生任何外部副作用的错误可以跳过
    ///
    /// 投递失败与确认失败一律终止：前者可能已部分投递，后者已投递但未标记。
    pub fn is_skippable(&self) -> bool {
        match self {
            Self::Fetch { source, .. } => source.is_not_found(),
            Self::EmptyContent { .. } | Self::Decode { .. } => true,
            Self::List(_) | Self::Deliver { .. } | Self::Acknowledge { .. } => false,
        }
    }
}
