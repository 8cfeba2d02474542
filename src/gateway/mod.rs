/// 投递进程（rt-mailgate）
///
/// 把解码后的邮件写入外部进程的 stdin，同时等待其输出与退出码
use std::future::Future;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::{ChildStdin, Command};

use crate::config::GatewayConfig;
use crate::error::DeliveryError;

/// 一次成功投递的结果
#[derive(Debug, Clone)]
pub struct DeliveryReport {
    pub bytes_written: usize,

    /// stdout 与 stderr 拼接后的输出
    pub output: String,
}

/// 邮件投递方
pub trait DeliveryAgent {
    fn deliver(
        &self,
        payload: Vec<u8>,
    ) -> impl Future<Output = Result<DeliveryReport, DeliveryError>> + Send;
}

/// 通过外部进程投递
#[derive(Debug, Clone)]
pub struct MailGateway {
    program: PathBuf,
    args: Vec<String>,
}

impl MailGateway {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    pub fn from_config(config: &GatewayConfig) -> Self {
        Self::new(config.program.clone(), config.args())
    }
}

impl DeliveryAgent for MailGateway {
    async fn deliver(&self, payload: Vec<u8>) -> Result<DeliveryReport, DeliveryError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| DeliveryError::Spawn {
                program: self.program.display().to_string(),
                source,
            })?;

        tracing::debug!(
            "投递进程已启动: {} (pid={:?}, {} 字节)",
            self.program.display(),
            child.id(),
            payload.len()
        );

        // stdin 必须在另一任务中写入：邮件超过管道缓冲区时，
        // 子进程要先被读走输出才会继续读 stdin
        let stdin = child.stdin.take().ok_or_else(|| {
            DeliveryError::Stdin(std::io::Error::other("投递进程没有 stdin 管道"))
        })?;
        let writer = tokio::spawn(write_payload(stdin, payload));

        let (written, output) = tokio::join!(writer, child.wait_with_output());

        let output = output.map_err(DeliveryError::Wait)?;
        let combined = combine_output(&output.stdout, &output.stderr);

        if !output.status.success() {
            return Err(DeliveryError::NonZeroExit {
                code: output.status.code(),
                output: combined,
            });
        }

        let bytes_written = written?.map_err(DeliveryError::Stdin)?;

        Ok(DeliveryReport {
            bytes_written,
            output: combined,
        })
    }
}

/// 写入全部内容后关闭 stdin，子进程据此读到 EOF
async fn write_payload(mut stdin: ChildStdin, payload: Vec<u8>) -> std::io::Result<usize> {
    stdin.write_all(&payload).await?;
    stdin.shutdown().await?;
    drop(stdin);
    Ok(payload.len())
}

fn combine_output(stdout: &[u8], stderr: &[u8]) -> String {
    let mut combined = String::from_utf8_lossy(stdout).into_owned();
    if !stderr.is_empty() {
        combined.push_str(&String::from_utf8_lossy(stderr));
    }
    combined
}
