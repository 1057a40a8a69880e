//! 传输原语
//!
//! Transport trait 抽象一条可建立的双工文本流；AgentLink 对它只做三件事：
//! 发送帧、消费事件流（Message / Error / Closed）、请求关闭。
//! WsTransport 是 tokio-tungstenite 实现：写侧任务把 mpsc 排空到 sink，
//! 读侧任务把入站帧转入事件通道。

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;

use crate::error::LinkError;

/// 传输层事件：入站帧、传输错误、连接关闭
#[derive(Debug)]
pub enum TransportEvent {
    Message(String),
    Error(String),
    Closed,
}

/// 一条已建立的传输：出站帧发送端 + 入站事件流 + 关闭信号
pub struct TransportHandle {
    outbound: mpsc::UnboundedSender<String>,
    events: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    shutdown: CancellationToken,
}

impl TransportHandle {
    pub fn new(
        outbound: mpsc::UnboundedSender<String>,
        events: mpsc::UnboundedReceiver<TransportEvent>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            outbound,
            events: Some(events),
            shutdown,
        }
    }

    /// 发送一帧文本；传输已死时返回 NotConnected
    pub fn send(&self, frame: String) -> Result<(), LinkError> {
        self.outbound
            .send(frame)
            .map_err(|_| LinkError::NotConnected)
    }

    /// 取走事件流（只允许一次，由读取任务独占消费）
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<TransportEvent>> {
        self.events.take()
    }

    /// 请求关闭底层传输
    pub fn close(&self) {
        self.shutdown.cancel();
    }
}

/// 传输原语：建立一条到 Agent Link 服务端的双工连接
///
/// connect 返回即表示传输已 open；打开前出错则整个调用失败。
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self) -> Result<TransportHandle, LinkError>;
}

/// WebSocket 传输
pub struct WsTransport {
    url: String,
}

impl WsTransport {
    /// 创建传输；仅接受 ws:// 与 wss:// 地址
    pub fn new(url: impl Into<String>) -> Result<Self, LinkError> {
        let url = url.into();
        if !url.starts_with("ws://") && !url.starts_with("wss://") {
            return Err(LinkError::Transport(format!(
                "unsupported server url scheme: {}",
                url
            )));
        }
        Ok(Self { url })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn connect(&self) -> Result<TransportHandle, LinkError> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| LinkError::Transport(format!("WebSocket connect failed: {}", e)))?;

        let (mut ws_tx, mut ws_rx) = ws_stream.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let (ev_tx, ev_rx) = mpsc::unbounded_channel::<TransportEvent>();
        let shutdown = CancellationToken::new();

        // 写侧：排空出站队列；收到关闭信号或发送端全部释放时发 Close 帧
        let writer_shutdown = shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = writer_shutdown.cancelled() => {
                        let _ = ws_tx.send(WsMessage::Close(None)).await;
                        break;
                    }
                    frame = out_rx.recv() => match frame {
                        Some(f) => {
                            if ws_tx.send(WsMessage::Text(f)).await.is_err() {
                                break;
                            }
                        }
                        None => {
                            let _ = ws_tx.send(WsMessage::Close(None)).await;
                            break;
                        }
                    }
                }
            }
        });

        // 读侧：文本帧进事件通道，错误上报后结束，结束时总是补一个 Closed
        tokio::spawn(async move {
            while let Some(msg) = ws_rx.next().await {
                match msg {
                    Ok(WsMessage::Text(text)) => {
                        if ev_tx.send(TransportEvent::Message(text)).is_err() {
                            return;
                        }
                    }
                    Ok(WsMessage::Close(_)) => break,
                    // Ping/Pong 由 tungstenite 处理，Binary 不在协议内
                    Ok(_) => {}
                    Err(e) => {
                        let _ = ev_tx.send(TransportEvent::Error(e.to_string()));
                        break;
                    }
                }
            }
            let _ = ev_tx.send(TransportEvent::Closed);
        });

        Ok(TransportHandle::new(out_tx, ev_rx, shutdown))
    }
}
