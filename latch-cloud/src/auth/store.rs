// latch-cloud/src/auth/store.rs
// 认证缓存 - 每个 (账号, 区域) 一个 JSON 文件

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// 已持久化的认证材料
///
/// 密码从不落盘：这个结构体没有 password 字段。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredAuth {
    pub username: String,
    pub server_country: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub service_token: String,
    /// 登录返回的安全密钥，按原样保存
    #[serde(default)]
    pub security_key: String,
    pub update_at: DateTime<Utc>,
}

impl StoredAuth {
    pub fn new(
        username: impl Into<String>,
        server_country: impl Into<String>,
        user_id: impl Into<String>,
        service_token: impl Into<String>,
        security_key: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            server_country: server_country.into(),
            user_id: user_id.into(),
            service_token: service_token.into(),
            security_key: security_key.into(),
            update_at: Utc::now(),
        }
    }

    /// 是否携带可用的 token
    pub fn has_token(&self) -> bool {
        !self.service_token.is_empty()
    }
}

/// 认证缓存存储
#[derive(Debug, Clone)]
pub struct AuthStorage {
    path: PathBuf,
}

impl AuthStorage {
    /// 创建认证缓存存储
    ///
    /// `identity` 是 user_id，未登录过时用 username 代替。
    pub fn new(base_path: impl Into<PathBuf>, identity: &str, server_country: &str) -> Self {
        let path = base_path
            .into()
            .join(format!("auth-{}-{}.json", identity, server_country));
        Self { path }
    }

    /// 确保目录存在
    pub fn ensure_dir(&self) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(())
    }

    /// 保存认证材料
    ///
    /// token 没有变化时保留旧的 update_at，重复保存是幂等的;
    /// token 变化时盖上当前时间。返回实际写入的内容。
    pub fn save(&self, auth: &StoredAuth) -> std::io::Result<StoredAuth> {
        let mut record = auth.clone();
        match self.load() {
            Some(old) if old.service_token == record.service_token => {
                record.update_at = old.update_at;
            }
            _ => {
                record.update_at = Utc::now();
            }
        }
        self.ensure_dir()?;
        let json = serde_json::to_string_pretty(&record)?;
        fs::write(&self.path, json)?;
        Ok(record)
    }

    /// 加载认证材料
    ///
    /// 文件缺失或损坏时返回 None，不向调用方报错。
    pub fn load(&self) -> Option<StoredAuth> {
        if !self.path.exists() {
            return None;
        }
        let json = fs::read_to_string(&self.path).ok()?;
        serde_json::from_str(&json).ok()
    }

    /// 检查缓存是否存在
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// 删除缓存
    pub fn delete(&self) -> std::io::Result<()> {
        if self.path.exists() {
            fs::remove_file(&self.path)?;
        }
        Ok(())
    }

    /// 获取路径
    pub fn path(&self) -> &Path {
        &self.path
    }
}
