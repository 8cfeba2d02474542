use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub mod client_secret;
pub mod storage;

/// 当前目录下的配置文件名
const LOCAL_CONFIG_FILE: &str = "gfetch.toml";

/// 完整配置；每个字段缺省时使用内置常量
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub auth: AuthConfig,
    pub mailbox: MailboxConfig,
    pub gateway: GatewayConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Google Cloud Console 下载的客户端密钥文件
    pub client_secret_path: PathBuf,

    /// 缓存 Access/Refresh Token 的文件（权限 0600）
    pub token_path: PathBuf,

    /// 修改 scopes 后需删除已保存的 token 文件
    pub scopes: Vec<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            client_secret_path: PathBuf::from("client_secret.json"),
            token_path: PathBuf::from("token.json"),
            scopes: vec![
                "https://www.googleapis.com/auth/gmail.readonly".to_string(),
                "https://www.googleapis.com/auth/gmail.modify".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MailboxConfig {
    pub api_base: String,
    pub user_id: String,
    pub unread_label: String,

    /// 每轮最多处理的邮件数
    pub max_results: u32,

    /// 两轮之间的空闲时间（秒）
    pub poll_interval_secs: u64,
}

impl Default for MailboxConfig {
    fn default() -> Self {
        Self {
            api_base: "https://gmail.googleapis.com".to_string(),
            user_id: "me".to_string(),
            unread_label: "UNREAD".to_string(),
            max_results: 1,
            poll_interval_secs: 20,
        }
    }
}

impl MailboxConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

/// rt-mailgate 投递参数
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub program: PathBuf,
    pub queue: String,
    pub action: String,
    pub url: String,
    pub debug: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("/opt/rt4/bin/rt-mailgate"),
            queue: "techplus".to_string(),
            action: "correspond".to_string(),
            url: "http://localhost".to_string(),
            debug: true,
        }
    }
}

impl GatewayConfig {
    /// 构造命令行参数：`--queue Q --action A --url U [--debug]`
    pub fn args(&self) -> Vec<String> {
        let mut args = vec![
            "--queue".to_string(),
            self.queue.clone(),
            "--action".to_string(),
            self.action.clone(),
            "--url".to_string(),
            self.url.clone(),
        ];
        if self.debug {
            args.push("--debug".to_string());
        }
        args
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub dir: PathBuf,
    pub file_name: String,

    /// 保留的日志文件数量（按天滚动）
    pub max_files: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("."),
            file_name: "gfetch.log".to_string(),
            max_files: 7,
        }
    }
}

/// 查找配置文件
///
/// 优先级：`./gfetch.toml` > `<config_dir>/gfetch/config.toml`
pub fn config_path() -> Option<PathBuf> {
    let local = PathBuf::from(LOCAL_CONFIG_FILE);
    if local.exists() {
        return Some(local);
    }

    dirs::config_dir()
        .map(|dir| dir.join("gfetch").join("config.toml"))
        .filter(|path| path.exists())
}

/// 加载配置，找不到配置文件时使用默认值
pub fn load() -> Result<Config> {
    match config_path() {
        Some(path) => load_from(&path),
        None => Ok(Config::default()),
    }
}

/// 从指定文件加载配置
pub fn load_from(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("读取配置文件失败: {}", path.display()))?;
    let config: Config = toml::from_str(&content)
        .with_context(|| format!("解析配置文件失败: {}", path.display()))?;
    Ok(config)
}
