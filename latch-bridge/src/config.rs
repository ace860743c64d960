use anyhow::bail;
use latch_cloud::push::{DEFAULT_PUSH_HOST, DEFAULT_PUSH_PORT};

/// Lock cloud regions the vendor operates
pub const CLOUD_SERVERS: [(&str, &str); 6] = [
    ("cn", "China"),
    ("de", "Europe"),
    ("i2", "India"),
    ("ru", "Russia"),
    ("sg", "Singapore"),
    ("us", "United States"),
];

/// 桥接进程配置
///
/// # 环境变量
///
/// | 环境变量 | 默认值 | 说明 |
/// |----------|--------|------|
/// | LATCH_USERNAME | - | 云端账号 (手机号) |
/// | LATCH_PASSWORD | - | 云端密码 |
/// | LATCH_SERVER_COUNTRY | cn | 云端区域: cn de i2 ru sg us |
/// | LATCH_WORK_DIR | ./data | 认证与设备快照的缓存目录 |
/// | LATCH_REFRESH_SECS | 0 | 周期拉取设备状态, 0 表示关闭 |
/// | LATCH_CLOUD_URL | - | 覆盖云端 API 地址 (默认用内置地址) |
/// | LATCH_PUSH_HOST | 106.55.145.207 | MQTT 推送 broker |
/// | LATCH_PUSH_PORT | 1883 | MQTT 推送端口 |
/// | LATCH_LOG_LEVEL | info | 日志级别 (由 setup_environment 读取) |
/// | LATCH_LOG_DIR | - | 日志文件目录 (由 setup_environment 读取) |
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// 云端账号
    pub username: String,
    /// 云端密码
    pub password: String,
    /// 云端区域代码
    pub server_country: String,
    /// 工作目录, 存放认证缓存和设备快照
    pub work_dir: String,
    /// 周期刷新间隔 (秒), 0 关闭
    pub refresh_secs: u64,
    /// 云端 API 地址覆盖, None 用内置地址
    pub cloud_url: Option<String>,
    /// 推送 broker 地址
    pub push_host: String,
    /// 推送 broker 端口
    pub push_port: u16,
}

impl BridgeConfig {
    /// 从环境变量加载配置
    ///
    /// 未设置的变量使用默认值, 合法性由 [`validate`](Self::validate) 检查。
    pub fn from_env() -> Self {
        Self {
            username: std::env::var("LATCH_USERNAME").unwrap_or_default(),
            password: std::env::var("LATCH_PASSWORD").unwrap_or_default(),
            server_country: std::env::var("LATCH_SERVER_COUNTRY").unwrap_or_else(|_| "cn".into()),
            work_dir: std::env::var("LATCH_WORK_DIR").unwrap_or_else(|_| "./data".into()),
            refresh_secs: std::env::var("LATCH_REFRESH_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
            cloud_url: std::env::var("LATCH_CLOUD_URL").ok(),
            push_host: std::env::var("LATCH_PUSH_HOST")
                .unwrap_or_else(|_| DEFAULT_PUSH_HOST.into()),
            push_port: std::env::var("LATCH_PUSH_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_PUSH_PORT),
        }
    }

    /// 使用自定义值覆盖部分配置
    ///
    /// 常用于测试场景
    pub fn with_overrides(
        username: impl Into<String>,
        password: impl Into<String>,
        work_dir: impl Into<String>,
    ) -> Self {
        let mut config = Self::from_env();
        config.username = username.into();
        config.password = password.into();
        config.work_dir = work_dir.into();
        config
    }

    /// Reject configurations that cannot possibly log in
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.username.trim().len() < 3 {
            bail!("username must be at least 3 characters");
        }
        if self.password.is_empty() {
            bail!("password must not be empty");
        }
        if !CLOUD_SERVERS
            .iter()
            .any(|(code, _)| *code == self.server_country)
        {
            let known: Vec<&str> = CLOUD_SERVERS.iter().map(|(code, _)| *code).collect();
            bail!(
                "unknown server country '{}', expected one of: {}",
                self.server_country,
                known.join(" ")
            );
        }
        Ok(())
    }

    /// Human-readable name of the configured region
    pub fn server_name(&self) -> &'static str {
        CLOUD_SERVERS
            .iter()
            .find(|(code, _)| *code == self.server_country)
            .map(|(_, name)| *name)
            .unwrap_or("Unknown")
    }
}
