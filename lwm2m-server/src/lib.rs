//! LwM2M bootstrap and registration servers
//!
//! This crate provides the session registry shared by both servers, the
//! per-session lifetime supervision, and the device operations façade
//! (discover, read, write, delete, finish) used by the operator shell.
//!
//! # TODO
//!
//! ## 会话管理
//! - [x] 会话注册表（注册、更新、注销、过期）
//! - [x] 生命周期定时器（TimerId 防止过期竞争）
//! - [x] 位置路由 `rd/N`、`bs/N`
//! - [ ] 队列模式（Queue Mode，离线缓存请求）
//!
//! ## 设备操作
//! - [x] Discover / Read / Write / Delete / Finish
//! - [x] 每次操作独立超时
//! - [ ] Execute / Write-Attributes
//! - [ ] Observe 通知

pub mod bootstrap;
pub mod config;
pub mod lifetime;
pub mod listener;
mod location;
pub mod operations;
pub mod registration;
pub mod registry;
pub mod session;

#[cfg(test)]
mod testing;

pub use bootstrap::{BootstrapServer, BOOTSTRAP_PATH};
pub use config::{BootstrapConfig, OperationsConfig, RegistrationConfig, ServerConfig};
pub use lifetime::{LifetimeState, LifetimeSupervisor, LifetimeTimer, TimerId};
pub use listener::ServerListener;
pub use operations::DeviceOperations;
pub use registration::{RegistrationServer, REGISTRATION_PATH};
pub use registry::SessionRegistry;
pub use session::{SessionEntry, SessionInfo};
