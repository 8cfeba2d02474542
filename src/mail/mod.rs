/// 邮箱访问
pub mod gmail;

use std::future::Future;

use crate::error::MailboxError;
use gmail::types::{MessageList, RawMessage};

/// 轮询循环所需的三个邮箱操作
pub trait Mailbox {
    /// 列出一页未读邮件引用，最多 `max_results` 条
    ///
    /// `page_token` 取自上一页的 `next_page_token`
    fn list_unread(
        &self,
        max_results: u32,
        page_token: Option<&str>,
    ) -> impl Future<Output = Result<MessageList, MailboxError>> + Send;

    /// 获取单封邮件的原始内容
    fn fetch_raw(&self, id: &str) -> impl Future<Output = Result<RawMessage, MailboxError>> + Send;

    /// 移除未读标记
    fn acknowledge(&self, id: &str) -> impl Future<Output = Result<(), MailboxError>> + Send;
}
