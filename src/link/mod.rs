//! 连接管理：Agent Link 的传输、关联与生命周期
//!
//! - **transport**: 传输原语 trait 与 WebSocket 实现
//! - **pending**: 在途请求关联表（thread_id -> oneshot 完成槽）
//! - **manager**: AgentLink 状态机（连接、鉴权、重连、invoke / get_tools）

pub mod manager;
pub mod pending;
pub mod transport;

pub use manager::{AgentLink, LinkConfig, LinkState};
pub use transport::{Transport, TransportEvent, TransportHandle, WsTransport};
