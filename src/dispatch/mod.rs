/// 轮询-投递循环
///
/// 每轮：列出未读邮件 → 获取原始内容 → 解码 → 交给投递进程 → 移除未读标签 → 空闲等待
use base64::Engine;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use std::collections::HashSet;
use std::convert::Infallible;
use std::time::Duration;
use tracing::Instrument;

use crate::error::DispatchError;
use crate::gateway::DeliveryAgent;
use crate::mail::Mailbox;

/// Gmail `raw` 字段使用 base64url，填充可有可无
pub const RAW_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(true)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Gmail messages.list 的 maxResults 上限
const MAX_PAGE_SIZE: u32 = 500;

/// 单封邮件的处理结果；终止进程的情况由 `Err(DispatchError)` 表示
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    Delivered,
    Skipped(String),
}

/// 单轮统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub listed: usize,
    pub delivered: usize,
    pub skipped: usize,
}

/// 轮询参数
#[derive(Debug, Clone)]
pub struct PollSettings {
    pub max_results: u32,
    pub poll_interval: Duration,
}

/// 轮询-投递器
pub struct Dispatcher<M, D> {
    mailbox: M,
    gateway: D,
    settings: PollSettings,

    /// 本进程内已跳过的邮件（保持未读，不再重复处理）
    skipped: HashSet<String>,

    span: tracing::Span,
}

impl<M: Mailbox, D: DeliveryAgent> Dispatcher<M, D> {
    /// # Arguments
    /// * `span` - 所有轮次日志挂载的上下文
    pub fn new(mailbox: M, gateway: D, settings: PollSettings, span: tracing::Span) -> Self {
        Self {
            mailbox,
            gateway,
            settings,
            skipped: HashSet::new(),
            span,
        }
    }

    /// 无限循环，仅在出现必须终止进程的错误时返回
    pub async fn run(mut self) -> Result<Infallible, DispatchError> {
        tracing::info!(
            parent: &self.span,
            "🚀 启动轮询（每轮最多 {} 封，间隔: {:?}）",
            self.settings.max_results,
            self.settings.poll_interval
        );

        loop {
            let span = self.span.clone();
            let report = self.run_cycle().instrument(span).await?;

            if report.listed > 0 {
                tracing::info!(
                    parent: &self.span,
                    "✅ 本轮完成: 投递 {} 封，跳过 {} 封",
                    report.delivered,
                    report.skipped
                );
            }

            tokio::time::sleep(self.settings.poll_interval).await;
        }
    }

    /// 执行一轮：列出并依次处理未读邮件
    pub async fn run_cycle(&mut self) -> Result<CycleReport, DispatchError> {
        let ids = self.collect_ids().await?;

        tracing::info!("nummess: {}", ids.len());

        let mut report = CycleReport {
            listed: ids.len(),
            ..Default::default()
        };

        for id in ids {
            match self.process_item(&id).await? {
                ItemOutcome::Delivered => report.delivered += 1,
                ItemOutcome::Skipped(reason) => {
                    tracing::warn!("⚠️ 跳过邮件 {}（保持未读）: {}", id, reason);
                    self.skipped.insert(id);
                    report.skipped += 1;
                }
            }
        }

        Ok(report)
    }

    /// 列出本轮要处理的邮件 id（排除已跳过的）
    ///
    /// 已跳过的邮件仍带未读标签，所以页面放大 `skipped.len()` 条，
    /// 仍不够时沿 `next_page_token` 继续翻页。列表读到末页时，
    /// 不再出现的跳过记录（已被别处标为已读）会被清除
    async fn collect_ids(&mut self) -> Result<Vec<String>, DispatchError> {
        let wanted = self.settings.max_results as usize;
        let page_size = (wanted + self.skipped.len()).min(MAX_PAGE_SIZE as usize) as u32;

        let mut ids = Vec::with_capacity(wanted);
        let mut still_unread = HashSet::new();
        let mut page_token: Option<String> = None;

        loop {
            let page = self
                .mailbox
                .list_unread(page_size, page_token.as_deref())
                .await
                .map_err(DispatchError::List)?;

            for message in page.messages {
                if self.skipped.contains(&message.id) {
                    still_unread.insert(message.id);
                } else if ids.len() < wanted {
                    ids.push(message.id);
                }
            }

            match page.next_page_token {
                None => {
                    let before = self.skipped.len();
                    self.skipped.retain(|id| still_unread.contains(id));
                    if self.skipped.len() < before {
                        tracing::debug!(
                            "清除 {} 条已不再未读的跳过记录",
                            before - self.skipped.len()
                        );
                    }
                    break;
                }
                Some(_) if ids.len() >= wanted => break,
                Some(token) => page_token = Some(token),
            }
        }

        Ok(ids)
    }

    /// 处理单封邮件：获取 → 解码 → 投递 → 确认
    async fn process_item(&self, id: &str) -> Result<ItemOutcome, DispatchError> {
        tracing::info!("ID: {}", id);

        let payload = match self.fetch_payload(id).await {
            Ok(payload) => payload,
            Err(e) if e.is_skippable() => return Ok(ItemOutcome::Skipped(e.to_string())),
            Err(e) => return Err(e),
        };

        let report = self
            .gateway
            .deliver(payload)
            .await
            .map_err(|source| DispatchError::Deliver {
                id: id.to_string(),
                source,
            })?;

        tracing::info!(
            "投递完成 {} ({} 字节):\n{}",
            id,
            report.bytes_written,
            report.output
        );

        self.mailbox
            .acknowledge(id)
            .await
            .map_err(|source| DispatchError::Acknowledge {
                id: id.to_string(),
                source,
            })?;

        tracing::debug!("已移除邮件 {} 的未读标签", id);
        Ok(ItemOutcome::Delivered)
    }

    async fn fetch_payload(&self, id: &str) -> Result<Vec<u8>, DispatchError> {
        let message = self
            .mailbox
            .fetch_raw(id)
            .await
            .map_err(|source| DispatchError::Fetch {
                id: id.to_string(),
                source,
            })?;

        tracing::info!("snip: {}", message.snippet.as_deref().unwrap_or_default());

        let raw = message
            .raw
            .filter(|raw| !raw.is_empty())
            .ok_or_else(|| DispatchError::EmptyContent { id: id.to_string() })?;

        decode_raw(&raw).map_err(|source| DispatchError::Decode {
            id: id.to_string(),
            source,
        })
    }
}

/// 解码 Gmail 的 `raw` 字段
pub fn decode_raw(raw: &str) -> Result<Vec<u8>, base64::DecodeError> {
    RAW_ENGINE.decode(raw.trim())
}
