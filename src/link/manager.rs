//! AgentLink：连接生命周期与请求多路复用
//!
//! 单实例同一时刻最多持有一条物理传输；重连总是整体替换旧传输。
//! 状态机：disconnected -> connecting -> open；open 意外关闭 -> reconnecting
//! （指数退避，1s 起步逐次翻倍，最多 5 次，耗尽进入终态 failed）；
//! 主动 disconnect 抑制重连并立即拒绝所有在途请求。
//! 请求按 thread_id 关联，响应乱序到达不影响匹配。

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::error::LinkError;
use crate::link::pending::PendingTable;
use crate::link::transport::{Transport, TransportEvent, TransportHandle};
use crate::protocol::envelope::Envelope;
use crate::protocol::message::{AgentResponse, AgentState, Tool};

/// 错误通道容量；慢消费者丢最旧（broadcast Lagged）
const ERROR_CHANNEL_CAPACITY: usize = 64;

/// 连接配置
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// 配置后在传输 open 时立即发送 auth 信封（不等回执）
    pub api_key: Option<String>,
    /// get_tools 等待时限
    pub get_tools_timeout: Duration,
    /// invoke 等待时限
    pub invoke_timeout: Duration,
    /// 重连首个退避间隔
    pub initial_backoff: Duration,
    /// 重连次数上限，耗尽后进入 failed
    pub max_reconnect_attempts: u32,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            get_tools_timeout: Duration::from_secs(10),
            invoke_timeout: Duration::from_secs(30),
            initial_backoff: Duration::from_secs(1),
            max_reconnect_attempts: 5,
        }
    }
}

/// 连接状态（watch 通道对外发布）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Open,
    Reconnecting,
    Failed,
}

struct LinkShared {
    config: LinkConfig,
    transport: Arc<dyn Transport>,
    pending: PendingTable,
    state_tx: watch::Sender<LinkState>,
    tools_tx: watch::Sender<Vec<Tool>>,
    error_tx: broadcast::Sender<LinkError>,
    /// 当前活动传输（出站端）；重连时整体替换
    conn: Mutex<Option<TransportHandle>>,
    /// 连接纪元令牌；disconnect 取消它即终止读取与重连任务
    epoch: Mutex<CancellationToken>,
}

/// Agent Link 连接管理器（可廉价克隆，内部共享同一条连接）
#[derive(Clone)]
pub struct AgentLink {
    shared: Arc<LinkShared>,
}

impl AgentLink {
    pub fn new(transport: Arc<dyn Transport>, config: LinkConfig) -> Self {
        let (state_tx, _) = watch::channel(LinkState::Disconnected);
        let (tools_tx, _) = watch::channel(Vec::new());
        let (error_tx, _) = broadcast::channel(ERROR_CHANNEL_CAPACITY);
        Self {
            shared: Arc::new(LinkShared {
                config,
                transport,
                pending: PendingTable::new(),
                state_tx,
                tools_tx,
                error_tx,
                conn: Mutex::new(None),
                epoch: Mutex::new(CancellationToken::new()),
            }),
        }
    }

    /// 订阅连接状态
    pub fn state(&self) -> watch::Receiver<LinkState> {
        self.shared.state_tx.subscribe()
    }

    /// 订阅已知工具集（每次 get_tools 成功后刷新）
    pub fn tools(&self) -> watch::Receiver<Vec<Tool>> {
        self.shared.tools_tx.subscribe()
    }

    /// 订阅连接级错误通道（帧校验失败、传输错误、重连耗尽）
    pub fn errors(&self) -> broadcast::Receiver<LinkError> {
        self.shared.error_tx.subscribe()
    }

    /// 建立连接：打开传输、发送 auth（如配置了 API key）、启动读取任务
    ///
    /// 仅允许从 disconnected / failed 发起；传输在 open 前出错则调用失败，
    /// 初次连接失败不触发自动重连（重连只针对已打开连接的意外关闭）。
    pub async fn connect(&self) -> Result<(), LinkError> {
        {
            let current = *self.shared.state_tx.borrow();
            if !matches!(current, LinkState::Disconnected | LinkState::Failed) {
                return Err(LinkError::Correlation(format!(
                    "connect called while link is {:?}",
                    current
                )));
            }
        }

        self.shared.state_tx.send_replace(LinkState::Connecting);
        let epoch = CancellationToken::new();
        *self.shared.epoch.lock().unwrap() = epoch.clone();

        match LinkShared::open_transport(&self.shared).await {
            Ok(events) => {
                self.shared.state_tx.send_replace(LinkState::Open);
                tracing::info!("agent link open");
                let shared = Arc::clone(&self.shared);
                tokio::spawn(LinkShared::run_link_task(shared, events, epoch));
                Ok(())
            }
            Err(e) => {
                self.shared.state_tx.send_replace(LinkState::Disconnected);
                tracing::warn!("agent link connect failed: {}", e);
                let _ = self.shared.error_tx.send(e.clone());
                Err(e)
            }
        }
    }

    /// 主动断开：抑制重连，关闭传输，立即拒绝所有在途请求
    pub async fn disconnect(&self) {
        self.shared.epoch.lock().unwrap().cancel();
        if let Some(handle) = self.shared.conn.lock().unwrap().take() {
            handle.close();
        }
        self.shared.pending.reject_all(LinkError::ConnectionClosed);
        self.shared.state_tx.send_replace(LinkState::Disconnected);
        tracing::info!("agent link disconnected");
    }

    /// 请求服务端工具列表；同时只允许一个在途 get_tools
    pub async fn get_tools(&self) -> Result<Vec<Tool>, LinkError> {
        self.ensure_open()?;
        let rx = self.shared.pending.begin_tools()?;
        let frame = Envelope::GetTools.encode()?;
        if let Err(e) = self.send_frame(frame) {
            self.shared.pending.discard_tools();
            return Err(e);
        }

        match tokio::time::timeout(self.shared.config.get_tools_timeout, rx).await {
            Ok(Ok(Ok(tools))) => {
                self.shared.tools_tx.send_replace(tools.clone());
                Ok(tools)
            }
            Ok(Ok(Err(e))) => Err(e),
            // 发送端未投递即被释放：连接在等待期间被替换或关闭
            Ok(Err(_)) => Err(LinkError::ConnectionClosed),
            Err(_) => {
                self.shared.pending.discard_tools();
                Err(LinkError::Timeout("get_tools".to_string()))
            }
        }
    }

    /// 发起一次调用并等待关联响应
    ///
    /// state 缺 thread_id 时补一个新 id；监听槽在成功、失败或超时后立即移除，
    /// 不会跨调用泄漏。
    pub async fn invoke(&self, mut state: AgentState) -> Result<AgentResponse, LinkError> {
        self.ensure_open()?;
        let thread_id = state
            .thread_id
            .clone()
            .unwrap_or_else(|| format!("thread_{}", uuid::Uuid::new_v4()));
        state.thread_id = Some(thread_id.clone());

        let rx = self.shared.pending.register_invoke(&thread_id)?;
        let frame = Envelope::Invoke {
            state,
            thread_id: thread_id.clone(),
        }
        .encode()?;
        if let Err(e) = self.send_frame(frame) {
            self.shared.pending.discard_invoke(&thread_id);
            return Err(e);
        }

        match tokio::time::timeout(self.shared.config.invoke_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(LinkError::ConnectionClosed),
            Err(_) => {
                self.shared.pending.discard_invoke(&thread_id);
                Err(LinkError::Timeout(format!("invoke {}", thread_id)))
            }
        }
    }

    fn ensure_open(&self) -> Result<(), LinkError> {
        if *self.shared.state_tx.borrow() == LinkState::Open {
            Ok(())
        } else {
            Err(LinkError::NotConnected)
        }
    }

    fn send_frame(&self, frame: String) -> Result<(), LinkError> {
        match self.shared.conn.lock().unwrap().as_ref() {
            Some(handle) => handle.send(frame),
            None => Err(LinkError::NotConnected),
        }
    }
}

impl LinkShared {
    /// 打开一条新传输：connect、（可选）auth 先于一切业务帧、安装出站端
    async fn open_transport(
        shared: &Arc<LinkShared>,
    ) -> Result<mpsc::UnboundedReceiver<TransportEvent>, LinkError> {
        let mut handle = shared.transport.connect().await?;
        let events = handle
            .take_events()
            .ok_or_else(|| LinkError::Transport("transport yielded no event stream".to_string()))?;

        if let Some(key) = &shared.config.api_key {
            let frame = Envelope::Auth {
                api_key: key.clone(),
            }
            .encode()?;
            handle.send(frame)?;
        }

        *shared.conn.lock().unwrap() = Some(handle);
        Ok(events)
    }

    /// 连接任务主体：读帧阶段 + 意外关闭后的重连阶段，直到主动断开或重连耗尽
    async fn run_link_task(
        shared: Arc<LinkShared>,
        mut events: mpsc::UnboundedReceiver<TransportEvent>,
        epoch: CancellationToken,
    ) {
        loop {
            let deliberate = Self::read_frames(&shared, &mut events, &epoch).await;
            shared.pending.reject_all(LinkError::ConnectionClosed);
            if deliberate {
                // 状态与传输清理由 disconnect() 负责
                return;
            }

            tracing::warn!("agent link closed unexpectedly");
            let _ = shared
                .error_tx
                .send(LinkError::Transport("connection closed unexpectedly".to_string()));
            shared.conn.lock().unwrap().take();
            shared.state_tx.send_replace(LinkState::Reconnecting);

            match Self::reconnect_with_backoff(&shared, &epoch).await {
                Some(new_events) => {
                    events = new_events;
                    shared.state_tx.send_replace(LinkState::Open);
                    tracing::info!("agent link reconnected");
                    // 重连成功后后台刷新已知工具集
                    let link = AgentLink {
                        shared: Arc::clone(&shared),
                    };
                    tokio::spawn(async move {
                        if let Err(e) = link.get_tools().await {
                            tracing::warn!("tool refresh after reconnect failed: {}", e);
                        }
                    });
                }
                None => return,
            }
        }
    }

    /// 逐帧消费事件直到连接结束；返回是否为主动关闭
    async fn read_frames(
        shared: &Arc<LinkShared>,
        events: &mut mpsc::UnboundedReceiver<TransportEvent>,
        epoch: &CancellationToken,
    ) -> bool {
        loop {
            tokio::select! {
                biased;
                _ = epoch.cancelled() => return true,
                ev = events.recv() => match ev {
                    Some(TransportEvent::Message(text)) => Self::dispatch_frame(shared, &text),
                    Some(TransportEvent::Error(e)) => {
                        tracing::warn!("transport error: {}", e);
                        let _ = shared.error_tx.send(LinkError::Transport(e));
                    }
                    Some(TransportEvent::Closed) | None => return false,
                }
            }
        }
    }

    /// 校验并分发一帧；失败的帧丢弃且不触碰关联表
    fn dispatch_frame(shared: &Arc<LinkShared>, text: &str) {
        let envelope = match Envelope::decode(text) {
            Ok(env) => env,
            Err(e) => {
                tracing::warn!("discarding invalid frame: {}", e);
                let _ = shared.error_tx.send(e);
                return;
            }
        };

        match envelope {
            Envelope::Tools { tools } => {
                if !shared.pending.resolve_tools(tools) {
                    tracing::warn!("unsolicited tools envelope dropped");
                }
            }
            Envelope::Response {
                thread_id,
                messages,
                error,
            } => {
                let response = AgentResponse { messages, error };
                if !shared.pending.resolve_invoke(&thread_id, response) {
                    tracing::warn!(thread_id = %thread_id, "response matched no pending invoke");
                }
            }
            Envelope::Auth { .. } | Envelope::GetTools | Envelope::Invoke { .. } => {
                let e = LinkError::SchemaViolation(
                    "client-direction envelope received from server".to_string(),
                );
                tracing::warn!("{}", e);
                let _ = shared.error_tx.send(e);
            }
        }
    }

    /// 指数退避重连；成功返回新事件流，主动断开或次数耗尽返回 None
    async fn reconnect_with_backoff(
        shared: &Arc<LinkShared>,
        epoch: &CancellationToken,
    ) -> Option<mpsc::UnboundedReceiver<TransportEvent>> {
        let mut backoff = shared.config.initial_backoff;
        for attempt in 1..=shared.config.max_reconnect_attempts {
            tokio::select! {
                biased;
                _ = epoch.cancelled() => {
                    shared.state_tx.send_replace(LinkState::Disconnected);
                    return None;
                }
                _ = tokio::time::sleep(backoff) => {}
            }

            tracing::info!(attempt, "reconnecting agent link");
            match Self::open_transport(shared).await {
                Ok(events) => return Some(events),
                Err(e) => {
                    tracing::warn!(attempt, "reconnect attempt failed: {}", e);
                    let _ = shared.error_tx.send(e);
                    backoff *= 2;
                }
            }
        }

        shared.state_tx.send_replace(LinkState::Failed);
        tracing::error!("agent link reconnect attempts exhausted");
        let _ = shared.error_tx.send(LinkError::MaxReconnectExceeded);
        None
    }
}
