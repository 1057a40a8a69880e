//! 对话编排：把线性聊天映射为可能携带工具调用的多轮 invoke
//!
//! - **session**: ChatSession（历史所有权、chat / reset、工具调用解析循环）

pub mod session;

pub use session::{ChatConfig, ChatEvent, ChatSession};
