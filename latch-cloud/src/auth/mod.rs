// latch-cloud/src/auth/mod.rs
// 认证材料的本地持久化模块

pub mod store;

pub use store::{AuthStorage, StoredAuth};
