//! 协议层：领域对象与线上信封
//!
//! - **message**: Tool / ToolCall / Message / AgentState / AgentResponse
//! - **envelope**: 按 `type` 标签区分的线上信封（auth / get_tools / tools / invoke / response）
//!
//! 所有入站帧必须先通过 [`Envelope::decode`] 校验再被解释；校验失败的帧直接丢弃。

pub mod envelope;
pub mod message;

pub use envelope::Envelope;
pub use message::{AgentResponse, AgentState, Message, Role, Tool, ToolCall, ToolParameters};
