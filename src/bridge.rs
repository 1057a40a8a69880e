//! UI 状态桥接
//!
//! 把 AgentLink / ChatSession 的状态翻译成前端可订阅的 watch 通道：
//! 连接标志、已知工具集、消息镜像（只追加）、最近错误（统一 code/message 形状）、
//! busy 标志（恰在一轮请求在途期间为 true）。只做订阅、转发与翻译，不含业务逻辑。

use tokio::sync::{broadcast, mpsc, watch};

use crate::chat::ChatEvent;
use crate::error::LinkError;
use crate::link::{AgentLink, LinkState};
use crate::protocol::message::{Message, Role, Tool};

/// 供 UI 渲染的消息镜像
#[derive(Debug, Clone, PartialEq)]
pub struct UiMessage {
    pub role: &'static str,
    pub content: String,
    /// 进入历史的毫秒时间戳
    pub timestamp_ms: i64,
}

/// 统一错误形状
#[derive(Debug, Clone, PartialEq)]
pub struct UiError {
    pub code: &'static str,
    pub message: String,
}

impl UiError {
    fn from_link(error: &LinkError) -> Self {
        Self {
            code: error_code(error),
            message: error.to_string(),
        }
    }
}

/// LinkError -> 稳定错误码
pub fn error_code(error: &LinkError) -> &'static str {
    match error {
        LinkError::SchemaViolation(_) => "schema_violation",
        LinkError::Transport(_) => "transport",
        LinkError::Timeout(_) => "timeout",
        LinkError::UnknownTool(_) => "unknown_tool",
        LinkError::MaxReconnectExceeded => "max_reconnect_exceeded",
        LinkError::ConnectionClosed => "connection_closed",
        LinkError::NotConnected => "not_connected",
        LinkError::Correlation(_) => "correlation",
        LinkError::Server(_) => "server",
        LinkError::ToolRoundsExceeded(_) => "tool_rounds_exceeded",
    }
}

fn role_label(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
    }
}

fn mirror(msg: &Message) -> UiMessage {
    UiMessage {
        role: role_label(msg.role),
        content: msg.content.clone(),
        timestamp_ms: chrono::Utc::now().timestamp_millis(),
    }
}

/// UI 桥接器：spawn 一个转发任务，对外只暴露 watch 接收端
pub struct UiBridge {
    connected_rx: watch::Receiver<bool>,
    tools_rx: watch::Receiver<Vec<Tool>>,
    messages_rx: watch::Receiver<Vec<UiMessage>>,
    last_error_rx: watch::Receiver<Option<UiError>>,
    busy_rx: watch::Receiver<bool>,
}

impl UiBridge {
    pub fn spawn(link: &AgentLink, mut chat_events: mpsc::UnboundedReceiver<ChatEvent>) -> Self {
        let mut state_rx = link.state();
        let mut link_errors = link.errors();
        let tools_rx = link.tools();

        let (connected_tx, connected_rx) =
            watch::channel(*state_rx.borrow() == LinkState::Open);
        let (messages_tx, messages_rx) = watch::channel(Vec::new());
        let (last_error_tx, last_error_rx) = watch::channel(None);
        let (busy_tx, busy_rx) = watch::channel(false);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = state_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let open = *state_rx.borrow_and_update() == LinkState::Open;
                        let _ = connected_tx.send(open);
                    }
                    err = link_errors.recv() => match err {
                        Ok(e) => {
                            let _ = last_error_tx.send(Some(UiError::from_link(&e)));
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "ui bridge lagged behind error channel");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    ev = chat_events.recv() => match ev {
                        Some(ChatEvent::TurnStarted) => {
                            let _ = busy_tx.send(true);
                        }
                        Some(ChatEvent::MessageAppended(msg)) => {
                            messages_tx.send_modify(|list| list.push(mirror(&msg)));
                        }
                        Some(ChatEvent::TurnFinished) => {
                            let _ = busy_tx.send(false);
                        }
                        Some(ChatEvent::TurnFailed { error }) => {
                            let _ = last_error_tx.send(Some(UiError::from_link(&error)));
                            let _ = busy_tx.send(false);
                        }
                        // ToolCall* 事件不映射到任何 UI 状态
                        Some(_) => {}
                        None => break,
                    },
                }
            }
        });

        Self {
            connected_rx,
            tools_rx,
            messages_rx,
            last_error_rx,
            busy_rx,
        }
    }

    /// 连接标志（LinkState::Open）
    pub fn connected(&self) -> watch::Receiver<bool> {
        self.connected_rx.clone()
    }

    /// 最近一次成功获取的工具集
    pub fn tools(&self) -> watch::Receiver<Vec<Tool>> {
        self.tools_rx.clone()
    }

    /// 历史消息镜像（只追加）
    pub fn messages(&self) -> watch::Receiver<Vec<UiMessage>> {
        self.messages_rx.clone()
    }

    /// 最近错误
    pub fn last_error(&self) -> watch::Receiver<Option<UiError>> {
        self.last_error_rx.clone()
    }

    /// 请求在途标志
    pub fn busy(&self) -> watch::Receiver<bool> {
        self.busy_rx.clone()
    }
}
