/// Gmail 模块 - OAuth2 认证与 API 调用
pub mod api;
pub mod oauth;
pub mod token;
pub mod types;

// 重新导出常用类型和函数
pub use api::GmailApiClient;
pub use oauth::{ConsolePrompt, obtain};
pub use token::TokenManager;
