//! 集成测试公共设施：脚本化 Mock 传输与服务端侧助手
#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration, Instant};
use tokio_util::sync::CancellationToken;

use trek::protocol::message::{AgentState, Message, Tool, ToolParameters};
use trek::{Envelope, LinkError, Transport, TransportEvent, TransportHandle};

/// 一次成功 connect 产生的服务端视角：可读客户端帧、可注入入站事件
pub struct MockSession {
    /// 客户端发出的帧
    pub sent: mpsc::UnboundedReceiver<String>,
    /// 注入入站事件（Message / Error / Closed）
    pub inject: mpsc::UnboundedSender<TransportEvent>,
    /// 客户端关闭信号（disconnect 时触发）
    pub shutdown: CancellationToken,
}

struct MockState {
    /// 接下来多少次 connect 直接失败
    fail_next: usize,
    /// 每次 connect 尝试的时刻（含失败），配合 paused clock 断言退避间隔
    attempts: Vec<Instant>,
}

/// 通道背书的 Mock 传输：每次成功 connect 向测试侧发出一个 MockSession
pub struct MockTransport {
    state: Mutex<MockState>,
    sessions: mpsc::UnboundedSender<MockSession>,
}

impl MockTransport {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<MockSession>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                state: Mutex::new(MockState {
                    fail_next: 0,
                    attempts: Vec::new(),
                }),
                sessions: tx,
            }),
            rx,
        )
    }

    /// 让接下来 n 次 connect 失败（usize::MAX 表示一直失败）
    pub fn fail_next(&self, n: usize) {
        self.state.lock().unwrap().fail_next = n;
    }

    pub fn attempt_times(&self) -> Vec<Instant> {
        self.state.lock().unwrap().attempts.clone()
    }

    pub fn attempt_count(&self) -> usize {
        self.state.lock().unwrap().attempts.len()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self) -> Result<TransportHandle, LinkError> {
        {
            let mut st = self.state.lock().unwrap();
            st.attempts.push(Instant::now());
            if st.fail_next > 0 {
                st.fail_next = st.fail_next.saturating_sub(1);
                return Err(LinkError::Transport("mock connect refused".to_string()));
            }
        }

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (ev_tx, ev_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let _ = self.sessions.send(MockSession {
            sent: out_rx,
            inject: ev_tx,
            shutdown: shutdown.clone(),
        });
        Ok(TransportHandle::new(out_tx, ev_rx, shutdown))
    }
}

/// 读取客户端下一帧并解码（1 秒守护超时，避免测试悬挂）
pub async fn recv_frame(session: &mut MockSession) -> Envelope {
    let frame = timeout(Duration::from_secs(1), session.sent.recv())
        .await
        .expect("timed out waiting for a client frame")
        .expect("client transport dropped");
    Envelope::decode(&frame).expect("client sent an invalid frame")
}

/// 读取并拆出一次 invoke（返回 thread_id 与会话状态）
pub async fn expect_invoke(session: &mut MockSession) -> (String, AgentState) {
    match recv_frame(session).await {
        Envelope::Invoke { state, thread_id } => (thread_id, state),
        other => panic!("expected invoke envelope, got {:?}", other),
    }
}

/// 注入一帧已编码信封
pub fn inject(session: &MockSession, envelope: &Envelope) {
    let frame = envelope.encode().expect("envelope must encode");
    session
        .inject
        .send(TransportEvent::Message(frame))
        .expect("reader task gone");
}

/// 注入一帧原始文本（用于构造畸形帧）
pub fn inject_raw(session: &MockSession, frame: &str) {
    session
        .inject
        .send(TransportEvent::Message(frame.to_string()))
        .expect("reader task gone");
}

/// 注入意外关闭
pub fn close(session: &MockSession) {
    let _ = session.inject.send(TransportEvent::Closed);
}

/// 以 response 信封应答一次 invoke
pub fn respond(session: &MockSession, thread_id: &str, messages: Vec<Message>) {
    inject(
        session,
        &Envelope::Response {
            thread_id: thread_id.to_string(),
            messages,
            error: None,
        },
    );
}

/// 构造一个最小工具描述
pub fn tool(name: &str) -> Tool {
    Tool {
        name: name.to_string(),
        description: format!("{} capability", name),
        parameters: ToolParameters {
            kind: "object".to_string(),
            properties: serde_json::Map::new(),
            required: Vec::new(),
        },
    }
}
