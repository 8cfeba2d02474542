/// 凭据文件存储模块
///
/// 将 OAuth2 Token 持久化为单个 JSON 文件，Unix 下权限为 0600
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::StoreError;
use crate::mail::gmail::types::Credential;

/// 凭据存储（单文件）
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 加载凭据
    ///
    /// 文件不存在时返回 `Ok(None)`；内容损坏时返回 [`StoreError::Corrupt`]
    pub fn load(&self) -> Result<Option<Credential>, StoreError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("凭据文件不存在: {}", self.path.display());
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let credential: Credential = serde_json::from_str(&content)?;
        tracing::debug!("成功加载凭据: {}", self.path.display());
        Ok(Some(credential))
    }

    /// 覆盖式保存凭据
    ///
    /// 先写入临时文件并设置权限，再 rename 到目标路径
    pub fn save(&self, credential: &Credential) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(credential)?;
        let tmp_path = self.path.with_extension("json.tmp");

        write_private(&tmp_path, json.as_bytes())?;
        fs::rename(&tmp_path, &self.path)?;

        tracing::info!("凭据已保存到: {}", self.path.display());
        Ok(())
    }
}

#[cfg(unix)]
fn write_private(path: &Path, content: &[u8]) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;

    // mode() 只作用于新建文件，已存在的临时文件需要显式收紧
    file.set_permissions(fs::Permissions::from_mode(0o600))?;
    file.write_all(content)?;
    file.sync_all()
}

#[cfg(not(unix))]
fn write_private(path: &Path, content: &[u8]) -> std::io::Result<()> {
    fs::write(path, content)
}
