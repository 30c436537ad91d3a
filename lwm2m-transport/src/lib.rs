//! CoAP transport layer for the LwM2M test server
//!
//! This crate provides the CoAP message codec, the path-keyed route table
//! and a UDP endpoint that serves inbound requests and performs outbound
//! confirmable exchanges.
//!
//! # TODO
//!
//! ## 消息编解码
//! - [x] CoAP 头部编码/解码
//! - [x] 选项 delta 编码（13/14 扩展）
//! - [x] Request/Response 高层封装
//! - [ ] Block1/Block2 分块传输
//!
//! ## 传输
//! - [x] UDP 端点（接收循环、路由分发）
//! - [x] CON 请求/响应交换（超时、RST 处理）
//! - [x] 分离响应（empty ACK + CON 响应）
//! - [x] 重复 CON 请求检测（按 peer + message id 缓存应答）
//! - [ ] CON 重传（ACK_TIMEOUT 指数退避）

pub mod code;
pub mod endpoint;
pub mod exchange;
pub mod message;
pub mod option;
pub mod request;
pub mod router;

pub use code::{Code, Method};
pub use endpoint::{CoapEndpoint, Peer, MAX_DATAGRAM_SIZE};
pub use exchange::Exchange;
pub use message::{Message, MessageType};
pub use option::CoapOption;
pub use request::{Request, Response};
pub use router::{RequestHandler, RouteTable};
