//! Trek - 旅行智能体前端的 Agent Link 客户端
//!
//! 模块划分：
//! - **bridge**: UI 状态桥接（连接标志 / 工具集 / 消息镜像 / 错误 / busy）
//! - **chat**: 对话编排（历史所有权、工具调用解析循环）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **error**: 全链路错误类型
//! - **link**: 连接管理（传输、请求关联、鉴权、重连状态机）
//! - **protocol**: 领域对象与线上信封（含统一校验入口）

pub mod bridge;
pub mod chat;
pub mod config;
pub mod error;
pub mod link;
pub mod protocol;

pub use chat::{ChatConfig, ChatEvent, ChatSession};
pub use error::LinkError;
pub use link::{AgentLink, LinkConfig, LinkState, Transport, TransportEvent, TransportHandle, WsTransport};
pub use protocol::{AgentResponse, AgentState, Envelope, Message, Role, Tool, ToolCall};
