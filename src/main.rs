//! Trek - 旅行智能体前端的 Agent Link 客户端
//!
//! 入口：初始化日志、连接 Agent Link、拉取工具集，并运行终端对话循环。

use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use trek::config::load_config;
use trek::{AgentLink, ChatSession, WsTransport};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 日志：默认 info，可通过 RUST_LOG 覆盖
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .with(fmt::layer())
        .init();

    let cfg = load_config(None).context("Failed to load configuration")?;

    let transport = Arc::new(
        WsTransport::new(&cfg.link.server_url).context("Invalid agent link server url")?,
    );
    let link = AgentLink::new(transport, cfg.link.to_link_config());
    link.connect()
        .await
        .context("Failed to connect to agent link server")?;

    // 工具集拉取失败不阻塞对话，仅降级为无工具
    let tools = match link.get_tools().await {
        Ok(tools) => tools,
        Err(e) => {
            tracing::warn!("get_tools failed, continuing without tools: {}", e);
            Vec::new()
        }
    };
    tracing::info!("agent link ready, {} tools advertised", tools.len());

    let session = ChatSession::new(link.clone(), cfg.chat.to_chat_config(tools));

    println!("Trek 旅行助手已就绪，输入内容开始对话（/reset 清空上下文，/quit 退出）");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        match input {
            "/quit" => break,
            "/reset" => {
                session.reset().await;
                println!("(上下文已清空)");
            }
            _ => match session.chat(input).await {
                Ok(reply) => println!("{}", reply),
                Err(e) => eprintln!("error: {}", e),
            },
        }
    }

    link.disconnect().await;
    Ok(())
}
