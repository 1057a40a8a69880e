//! 领域对象：消息、工具与会话状态
//!
//! 与服务端约定的 JSON 形状一致（serde 派生即规范）。Message 一旦进入历史即只追加不修改。

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 消息角色（与服务端 API 一致）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// 一次具体的工具调用：id 全局唯一，name 必须指向已知 Tool
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// 参数映射（字符串键到任意 JSON 值）
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

/// 单条消息；tool_calls 存在时表示该消息声明了工具调用意图
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_calls: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            tool_calls: None,
        }
    }

    /// 取出工具调用列表；None 或空列表均视为无调用
    pub fn tool_calls(&self) -> &[ToolCall] {
        self.tool_calls.as_deref().unwrap_or(&[])
    }
}

/// 工具参数 schema（JSON Schema 的子集：type + properties + required）
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolParameters {
    #[serde(rename = "type")]
    pub kind: String,
    pub properties: Map<String, Value>,
    pub required: Vec<String>,
}

/// 服务端通告的远程能力；每次成功连接后刷新已知工具集
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    pub name: String,
    pub description: String,
    pub parameters: ToolParameters,
}

/// 会话状态：有序消息序列 + 可选 thread_id（关联服务端会话）
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
}

impl AgentState {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            thread_id: None,
        }
    }
}

/// 一次 invoke 的结果：服务端返回的消息与可选业务错误
#[derive(Clone, Debug, PartialEq)]
pub struct AgentResponse {
    pub messages: Vec<Message>,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_without_tool_calls_omits_field() {
        let json = serde_json::to_string(&Message::user("你好")).unwrap();
        assert!(!json.contains("tool_calls"));
    }

    #[test]
    fn tool_call_arguments_default_to_empty() {
        let tc: ToolCall =
            serde_json::from_str(r#"{"id": "c1", "name": "geocode"}"#).unwrap();
        assert!(tc.arguments.is_empty());
    }

    #[test]
    fn role_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Role::Assistant).unwrap(), r#""assistant""#);
    }

    #[test]
    fn state_omits_missing_thread_id() {
        let state = AgentState::new(vec![Message::user("hi")]);
        let json = serde_json::to_string(&state).unwrap();
        assert!(!json.contains("thread_id"));
    }
}
