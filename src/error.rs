//! Agent Link 错误类型
//!
//! 整条链路共用一个扁平枚举：协议校验、传输、超时、工具解析、重连耗尽。
//! 除重连外不做任何自动重试；每个错误要么送达对应 pending 请求，要么进入连接级错误通道。

use thiserror::Error;

/// Agent Link 运行过程中可能出现的错误（校验、传输、超时、工具、重连等）
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LinkError {
    /// 帧或配置对象不符合协议形状；丢弃该帧，不触碰任何状态
    #[error("Schema violation: {0}")]
    SchemaViolation(String),

    /// 底层传输报告的失败；意外关闭时触发重连状态机
    #[error("Transport error: {0}")]
    Transport(String),

    /// get_tools / invoke 在时限内未收到匹配响应；仅该请求失败
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// ToolCall 引用了配置工具集中不存在的名称；对话历史保持不变
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// 重连次数耗尽，连接进入终态 failed；需调用方显式重新 connect
    #[error("Max reconnection attempts reached")]
    MaxReconnectExceeded,

    /// 连接在请求等待期间关闭；所有 pending 请求立即收到此错误
    #[error("Connection closed")]
    ConnectionClosed,

    /// 连接未处于 open 状态时发起发送
    #[error("Not connected")]
    NotConnected,

    /// 关联表使用冲突（如 get_tools 同时只允许一个在途、thread_id 重复）
    #[error("Correlation error: {0}")]
    Correlation(String),

    /// 服务端在 response 信封中携带的业务错误
    #[error("Server error: {0}")]
    Server(String),

    /// 工具解析轮数超过上限（防御病态工具链，见 ChatConfig::max_tool_rounds）
    #[error("Tool resolution exceeded {0} rounds")]
    ToolRoundsExceeded(usize),
}
