//! lwm2m - LwM2M bootstrap and registration test server
//!
//! This library emulates the server side of the LwM2M device-management
//! protocol over CoAP, for exercising LwM2M clients during development.
//!
//! # Architecture
//!
//! This library is organized as a workspace with multiple crates:
//!
//! - `lwm2m-core`: Error handling and content formats
//! - `lwm2m-transport`: CoAP codec, route table and UDP endpoint
//! - `lwm2m-server`: Session registry, lifetimes, bootstrap and
//!   registration servers, device operations
//!
//! The `lwm2m-test-server` binary runs both servers and an interactive
//! shell for issuing device operations.
//!
//! # Implementation Status
//!
//! ## ✅ 已完成
//! - CoAP 消息编解码（头部、选项、payload）
//! - UDP 端点（路由分发、CON 交换、分离响应）
//! - 会话注册表与生命周期管理
//! - Bootstrap 服务器（bootstrap 请求、discover/read/write/delete/finish）
//! - 注册服务器（注册、更新、注销、discover/read/write/delete）
//! - 交互式命令行（命令与客户端名称补全）
//!
//! ## 📋 待实现
//! - CON 重传
//! - Block 分块传输
//! - DTLS 安全通道
//!
//! # Usage
//!
//! ```no_run
//! use lwm2m::server::{RegistrationServer, ServerConfig};
//! ```

pub mod cli;
pub mod completion;
pub mod shell;

// Re-export core types
pub use lwm2m_core::{ContentFormat, Lwm2mError, Lwm2mResult};

// Re-export transport API
pub mod transport {
    pub use lwm2m_transport::*;
}

// Re-export server API
pub mod server {
    pub use lwm2m_server::*;
}
