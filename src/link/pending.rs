//! 在途请求关联表
//!
//! invoke 按 thread_id 建 oneshot 完成槽，响应到达时取出并投递，
//! 每个槽恰好消费一次；get_tools 用单独的单飞槽（同时只允许一个在途）。
//! 关闭连接时 reject_all 把所有槽立即以同一错误完成，不留悬挂请求。

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::oneshot;

use crate::error::LinkError;
use crate::protocol::message::{AgentResponse, Tool};

type InvokeSlot = oneshot::Sender<Result<AgentResponse, LinkError>>;
type ToolsSlot = oneshot::Sender<Result<Vec<Tool>, LinkError>>;

/// 关联表：thread_id -> invoke 槽，外加一个 get_tools 单飞槽
#[derive(Default)]
pub struct PendingTable {
    invokes: Mutex<HashMap<String, InvokeSlot>>,
    tools: Mutex<Option<ToolsSlot>>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记一个 invoke；thread_id 已占用时拒绝，避免两个调用竞争同一响应
    pub fn register_invoke(
        &self,
        thread_id: &str,
    ) -> Result<oneshot::Receiver<Result<AgentResponse, LinkError>>, LinkError> {
        let mut invokes = self.invokes.lock().unwrap();
        if invokes.contains_key(thread_id) {
            return Err(LinkError::Correlation(format!(
                "thread_id already in flight: {}",
                thread_id
            )));
        }
        let (tx, rx) = oneshot::channel();
        invokes.insert(thread_id.to_string(), tx);
        Ok(rx)
    }

    /// 投递匹配 thread_id 的响应；无匹配槽时返回 false，其余槽不受影响
    pub fn resolve_invoke(&self, thread_id: &str, response: AgentResponse) -> bool {
        let slot = self.invokes.lock().unwrap().remove(thread_id);
        match slot {
            Some(tx) => tx.send(Ok(response)).is_ok(),
            None => false,
        }
    }

    /// 丢弃一个 invoke 槽（超时或发送失败后由等待方调用，防止泄漏监听器）
    pub fn discard_invoke(&self, thread_id: &str) {
        self.invokes.lock().unwrap().remove(thread_id);
    }

    /// 登记 get_tools；已有在途请求时拒绝（显式单飞约束）
    pub fn begin_tools(
        &self,
    ) -> Result<oneshot::Receiver<Result<Vec<Tool>, LinkError>>, LinkError> {
        let mut tools = self.tools.lock().unwrap();
        if tools.is_some() {
            return Err(LinkError::Correlation(
                "get_tools already in flight".to_string(),
            ));
        }
        let (tx, rx) = oneshot::channel();
        *tools = Some(tx);
        Ok(rx)
    }

    /// 投递工具列表；无在途 get_tools 时返回 false
    pub fn resolve_tools(&self, tools: Vec<Tool>) -> bool {
        let slot = self.tools.lock().unwrap().take();
        match slot {
            Some(tx) => tx.send(Ok(tools)).is_ok(),
            None => false,
        }
    }

    /// 丢弃 get_tools 槽
    pub fn discard_tools(&self) {
        self.tools.lock().unwrap().take();
    }

    /// 以同一错误立即完成所有在途请求（连接关闭 / 传输失败时调用）
    pub fn reject_all(&self, error: LinkError) {
        let invokes: Vec<InvokeSlot> = {
            let mut map = self.invokes.lock().unwrap();
            map.drain().map(|(_, tx)| tx).collect()
        };
        for tx in invokes {
            let _ = tx.send(Err(error.clone()));
        }
        if let Some(tx) = self.tools.lock().unwrap().take() {
            let _ = tx.send(Err(error));
        }
    }

    #[cfg(test)]
    fn invoke_count(&self) -> usize {
        self.invokes.lock().unwrap().len()
    }
}
