//! ChatSession：对话编排主循环
//!
//! chat -> 追加用户消息 -> 携全量历史 invoke -> 校验并追加返回消息 ->
//! 若末条消息带工具调用则逐个经独立 invoke 解析、聚合结果写回历史并继续，
//! 直到某轮不再产生工具调用；显式循环 + 轮数上限，防止病态工具链。
//! 任何失败把历史回滚到「本轮用户消息之后」，不留部分污染。
//! 可选 event_tx：向前端推送 TurnStarted / MessageAppended / ToolCall* / TurnFinished。

use serde::Serialize;
use tokio::sync::{mpsc, Mutex};

use crate::error::LinkError;
use crate::link::AgentLink;
use crate::protocol::message::{AgentState, Message, Role, Tool, ToolCall};

/// 单轮对话内工具解析轮数上限的默认值
const DEFAULT_MAX_TOOL_ROUNDS: usize = 8;

/// 编排事件（供 UI 桥接层订阅）
#[derive(Debug, Clone)]
pub enum ChatEvent {
    /// 一轮对话开始（busy 置位点）
    TurnStarted,
    /// 一条消息进入历史
    MessageAppended(Message),
    /// 开始解析一个工具调用
    ToolCallStarted { id: String, name: String },
    /// 一个工具调用解析完成
    ToolCallFinished { id: String, name: String },
    /// 一轮对话正常结束
    TurnFinished,
    /// 一轮对话失败（历史已回滚）
    TurnFailed { error: LinkError },
}

/// 对话配置
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// 可选系统提示词；reset 后历史恢复为仅含它（或为空）
    pub system_prompt: Option<String>,
    /// 配置工具集；ToolCall 引用集合外名称时快速失败
    pub tools: Vec<Tool>,
    /// 工具解析轮数上限
    pub max_tool_rounds: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            system_prompt: None,
            tools: Vec::new(),
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
        }
    }
}

/// 工具调用结果记录（按 id + name 键控，聚合后 JSON 写回历史）
#[derive(Debug, Serialize)]
struct ToolOutcome {
    tool_call_id: String,
    name: String,
    result: Option<String>,
}

/// 对话会话：独占持有历史，连接管理器只在单次 invoke 期间借用其快照
pub struct ChatSession {
    link: AgentLink,
    config: ChatConfig,
    history: Mutex<Vec<Message>>,
    event_tx: Option<mpsc::UnboundedSender<ChatEvent>>,
}

impl ChatSession {
    pub fn new(link: AgentLink, config: ChatConfig) -> Self {
        let mut history = Vec::new();
        if let Some(prompt) = &config.system_prompt {
            history.push(Message::system(prompt.clone()));
        }
        Self {
            link,
            config,
            history: Mutex::new(history),
            event_tx: None,
        }
    }

    /// 设置事件推送通道
    pub fn with_event_tx(mut self, tx: mpsc::UnboundedSender<ChatEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    fn emit(&self, ev: ChatEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(ev);
        }
    }

    /// 提交一条用户输入，返回最终回复文本
    pub async fn chat(&self, text: &str) -> Result<String, LinkError> {
        let mut history = self.history.lock().await;
        self.emit(ChatEvent::TurnStarted);

        let user = Message::user(text);
        history.push(user.clone());
        self.emit(ChatEvent::MessageAppended(user));
        // 回滚点：用户消息保留，其后全部撤销
        let baseline = history.len();

        match self.run_turn(&mut history).await {
            Ok(content) => {
                self.emit(ChatEvent::TurnFinished);
                Ok(content)
            }
            Err(e) => {
                history.truncate(baseline);
                tracing::warn!("chat turn failed: {}", e);
                self.emit(ChatEvent::TurnFailed { error: e.clone() });
                Err(e)
            }
        }
    }

    /// 清空历史回到初始状态（仅系统提示词或空）；与连接状态无关
    pub async fn reset(&self) {
        let mut history = self.history.lock().await;
        history.clear();
        if let Some(prompt) = &self.config.system_prompt {
            history.push(Message::system(prompt.clone()));
        }
    }

    /// 历史快照（插入顺序即对话顺序）
    pub async fn history(&self) -> Vec<Message> {
        self.history.lock().await.clone()
    }

    /// 一轮对话：invoke / 校验 / 追加 / 工具解析，循环到不再产生工具调用
    async fn run_turn(&self, history: &mut Vec<Message>) -> Result<String, LinkError> {
        let mut rounds = 0;
        loop {
            let response = self.link.invoke(AgentState::new(history.clone())).await?;
            if let Some(err) = response.error {
                return Err(LinkError::Server(err));
            }
            if response.messages.is_empty() {
                return Err(LinkError::SchemaViolation(
                    "response carried no messages".to_string(),
                ));
            }

            // 先校验工具名，再追加任何消息：未知工具时历史保持原样
            for msg in &response.messages {
                for call in msg.tool_calls() {
                    if !self.is_known_tool(&call.name) {
                        return Err(LinkError::UnknownTool(call.name.clone()));
                    }
                }
            }

            for msg in &response.messages {
                history.push(msg.clone());
                self.emit(ChatEvent::MessageAppended(msg.clone()));
            }

            let last = history
                .last()
                .cloned()
                .ok_or_else(|| LinkError::SchemaViolation("empty history".to_string()))?;
            let calls = last.tool_calls().to_vec();
            if calls.is_empty() {
                return Ok(last.content);
            }

            rounds += 1;
            if rounds > self.config.max_tool_rounds {
                return Err(LinkError::ToolRoundsExceeded(self.config.max_tool_rounds));
            }

            let outcomes = self.resolve_tool_calls(&calls).await?;
            let summary = Message::assistant(
                serde_json::to_string(&outcomes).map_err(|e| {
                    LinkError::SchemaViolation(format!("tool outcome encode failed: {}", e))
                })?,
            );
            history.push(summary.clone());
            self.emit(ChatEvent::MessageAppended(summary));
        }
    }

    /// 逐个解析工具调用：每个调用包成单消息合成历史，走独立 invoke 往返
    async fn resolve_tool_calls(
        &self,
        calls: &[ToolCall],
    ) -> Result<Vec<ToolOutcome>, LinkError> {
        let mut outcomes = Vec::with_capacity(calls.len());
        for call in calls {
            self.emit(ChatEvent::ToolCallStarted {
                id: call.id.clone(),
                name: call.name.clone(),
            });

            let state = AgentState {
                messages: vec![Message {
                    role: Role::Assistant,
                    content: String::new(),
                    tool_calls: Some(vec![call.clone()]),
                }],
                thread_id: Some(format!("tool_{}", call.id)),
            };
            let response = self.link.invoke(state).await?;
            if let Some(err) = response.error {
                return Err(LinkError::Server(err));
            }

            outcomes.push(ToolOutcome {
                tool_call_id: call.id.clone(),
                name: call.name.clone(),
                result: response.messages.first().map(|m| m.content.clone()),
            });
            self.emit(ChatEvent::ToolCallFinished {
                id: call.id.clone(),
                name: call.name.clone(),
            });
        }
        Ok(outcomes)
    }

    fn is_known_tool(&self, name: &str) -> bool {
        self.config.tools.iter().any(|t| t.name == name)
    }
}
