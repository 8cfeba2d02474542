/// 全局共享的 HTTP 客户端
///
/// 复用 TCP 连接和连接池，避免每次 API 调用都创建新客户端
use once_cell::sync::Lazy;
use reqwest::Client;
use std::time::Duration;

/// 全局 HTTP 客户端实例（使用懒初始化）
pub static HTTP_CLIENT: Lazy<Client> = Lazy::new(|| {
    Client::builder()
        .pool_max_idle_per_host(4)
        .pool_idle_timeout(Duration::from_secs(90))
        .timeout(Duration::from_secs(30)) // 整体请求超时 30 秒
        .connect_timeout(Duration::from_secs(10))
        .user_agent(concat!("gfetch/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!("构建 HTTP 客户端失败，使用默认配置: {}", e);
            Client::new()
        })
});

/// 获取全局 HTTP 客户端
pub fn get_client() -> &'static Client {
    &HTTP_CLIENT
}
