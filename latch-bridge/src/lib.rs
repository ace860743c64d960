//! Latch Bridge - 智能门锁云桥接守护进程
//!
//! # 架构概述
//!
//! 把 fingercrystal 锁云的账号映射成一组实时的锁实体：
//!
//! - **配置** (`config`): 环境变量驱动的桥接配置
//! - **启动流程** (`setup`): 恢复认证、登录、刷新设备目录、建 hub
//! - **Hub** (`hub`): 每账号一个, 管理锁实体和推送通道
//! - **实体** (`entity`): 锁状态与电量, watch channel 广播变更
//!
//! # 模块结构
//!
//! ```text
//! latch-bridge/src/
//! ├── config.rs      # 环境变量配置
//! ├── entity.rs      # 锁实体
//! ├── hub.rs         # hub 与推送通道
//! ├── logger.rs      # 日志
//! └── setup.rs       # 启动流程
//! ```

pub mod config;
pub mod entity;
pub mod hub;
pub mod logger;
pub mod setup;

// Re-export 公共类型
pub use config::{BridgeConfig, CLOUD_SERVERS};
pub use entity::{Lock, LockState, LockStatus};
pub use hub::Hub;
pub use setup::{Bridge, setup_bridge};

// Re-export logger functions
pub use logger::{init_logger, init_logger_with_file};

/// Load `.env` and initialize logging from `LATCH_LOG_LEVEL` / `LATCH_LOG_DIR`
pub fn setup_environment() {
    dotenv::dotenv().ok();
    let level = std::env::var("LATCH_LOG_LEVEL").ok();
    let dir = std::env::var("LATCH_LOG_DIR").ok();
    logger::init_logger_with_file(level.as_deref(), dir.as_deref());
}

pub fn print_banner() {
    println!(
        r#"
    __          __       __
   / /   ____ _/ /______/ /_
  / /   / __ `/ __/ ___/ __ \
 / /___/ /_/ / /_/ /__/ / / /
/_____/\__,_/\__/\___/_/ /_/
    ____       _     __
   / __ )_____(_)___/ /___ ____
  / __  / ___/ / __  / __ `/ _ \
 / /_/ / /  / / /_/ / /_/ /  __/
/_____/_/  /_/\__,_/\__, /\___/
                   /____/
    "#
    );
}
