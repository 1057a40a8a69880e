//! 线上信封：按 `type` 标签区分的联合类型
//!
//! 解码顺序固定：先读标签，未知标签立即拒绝，之后才做变体字段校验，
//! 避免部分匹配产生歧义。编码与解码满足往返律：decode(encode(e)) == e。

use serde::{Deserialize, Serialize};

use crate::error::LinkError;
use crate::protocol::message::{AgentState, Message, Tool};

/// 已知信封标签（与 Envelope 变体一一对应）
const KNOWN_TYPES: &[&str] = &["auth", "get_tools", "tools", "invoke", "response"];

/// Agent Link 线上信封
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Envelope {
    /// 客户端 -> 服务端：连接建立后立即发送的凭证（无显式回执）
    Auth {
        #[serde(rename = "apiKey")]
        api_key: String,
    },

    /// 客户端 -> 服务端：请求工具列表
    GetTools,

    /// 服务端 -> 客户端：工具列表
    Tools { tools: Vec<Tool> },

    /// 客户端 -> 服务端：携带完整会话状态的调用
    Invoke {
        state: AgentState,
        thread_id: String,
    },

    /// 服务端 -> 客户端：调用结果，thread_id 回显用于关联
    Response {
        thread_id: String,
        messages: Vec<Message>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl Envelope {
    /// 校验并解码一帧文本
    ///
    /// 失败路径全部归入 SchemaViolation：非 JSON、缺失/非字符串标签、
    /// 未知标签、变体字段缺失或类型错误。
    pub fn decode(text: &str) -> Result<Envelope, LinkError> {
        let value: serde_json::Value = serde_json::from_str(text)
            .map_err(|e| LinkError::SchemaViolation(format!("invalid JSON frame: {}", e)))?;

        let tag = value
            .get("type")
            .and_then(|t| t.as_str())
            .ok_or_else(|| {
                LinkError::SchemaViolation("missing or non-string 'type' tag".to_string())
            })?
            .to_string();

        // 未知标签在字段校验之前拒绝
        if !KNOWN_TYPES.contains(&tag.as_str()) {
            return Err(LinkError::SchemaViolation(format!(
                "unknown envelope type: {}",
                tag
            )));
        }

        serde_json::from_value(value).map_err(|e| {
            LinkError::SchemaViolation(format!("malformed '{}' envelope: {}", tag, e))
        })
    }

    /// 编码为一帧文本
    pub fn encode(&self) -> Result<String, LinkError> {
        serde_json::to_string(self)
            .map_err(|e| LinkError::SchemaViolation(format!("encode failed: {}", e)))
    }
}
