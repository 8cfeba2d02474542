use anyhow::{Context, Result};
use tracing::Instrument;
use tracing_appender::non_blocking::WorkerGuard;

mod config;
mod dispatch;
mod error;
mod gateway;
mod mail;
mod utils;

use config::client_secret::ClientApp;
use config::storage::CredentialStore;
use config::{Config, LogConfig};
use dispatch::{Dispatcher, PollSettings};
use gateway::MailGateway;
use mail::gmail::{self, ConsolePrompt, GmailApiClient, TokenManager};

fn main() -> Result<()> {
    // 1. 加载配置（无配置文件时使用默认值）
    let cfg = config::load()?;

    // 2. 初始化日志（guard 必须存活到进程结束，否则文件日志会丢失）
    let _log_guard = init_logger(&cfg.log)?;

    // 3. 创建 Tokio 运行时
    let rt = tokio::runtime::Runtime::new()?;

    let result = rt.block_on(run(cfg));
    if let Err(e) = &result {
        tracing::error!("❌ 致命错误，进程退出: {:#}", e);
    }
    result
}

/// 获取凭据后进入轮询循环；只在出现致命错误时返回
async fn run(cfg: Config) -> Result<()> {
    tracing::info!("gfetch v{} 启动", env!("CARGO_PKG_VERSION"));

    let app = ClientApp::load(&cfg.auth.client_secret_path, &cfg.auth.scopes)
        .context("无法读取客户端密钥文件")?;
    let store = CredentialStore::new(cfg.auth.token_path.clone());

    let credential = gmail::obtain(&app, &store, &ConsolePrompt)
        .instrument(tracing::info_span!("auth"))
        .await
        .context("获取 Gmail 凭据失败")?;

    let mailbox = GmailApiClient::new(&cfg.mailbox, TokenManager::new(credential, app, store));
    let gateway = MailGateway::from_config(&cfg.gateway);

    let settings = PollSettings {
        max_results: cfg.mailbox.max_results.max(1),
        poll_interval: cfg.mailbox.poll_interval(),
    };
    let span = tracing::info_span!("poll", user = %cfg.mailbox.user_id);

    match Dispatcher::new(mailbox, gateway, settings, span).run().await {
        Ok(never) => match never {},
        Err(e) => Err(anyhow::Error::new(e).context("轮询循环终止")),
    }
}

/// 初始化日志系统：控制台 + 按天滚动的日志文件
fn init_logger(log: &LogConfig) -> Result<WorkerGuard> {
    use tracing_appender::rolling::{Builder, Rotation};
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt};

    let appender = Builder::new()
        .rotation(Rotation::DAILY)
        .filename_prefix(log.file_name.clone())
        .max_log_files(log.max_files)
        .build(&log.dir)
        .with_context(|| format!("创建日志文件失败: {}", log.dir.display()))?;
    let (file_writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gfetch=debug,info".into()),
        )
        .with(fmt::layer())
        .with(fmt::layer().with_ansi(false).with_writer(file_writer))
        .init();

    Ok(guard)
}
