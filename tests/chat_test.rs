//! ChatSession 与 UiBridge 集成测试：对话回路、工具解析、回滚与 UI 状态镜像

mod common;

use std::sync::Arc;

use common::*;
use tokio::sync::mpsc;
use trek::bridge::UiBridge;
use trek::protocol::message::{Message, Role, ToolCall};
use trek::{AgentLink, ChatConfig, ChatSession, Envelope, LinkConfig, LinkError};

async fn open_link() -> (Arc<MockTransport>, AgentLink, MockSession) {
    let (transport, mut sessions) = MockTransport::new();
    let link = AgentLink::new(transport.clone(), LinkConfig::default());
    link.connect().await.unwrap();
    let session = sessions.recv().await.unwrap();
    (transport, link, session)
}

fn tool_call(id: &str, name: &str) -> ToolCall {
    ToolCall {
        id: id.to_string(),
        name: name.to_string(),
        arguments: serde_json::Map::new(),
    }
}

fn assistant_with_calls(calls: Vec<ToolCall>) -> Message {
    Message {
        role: Role::Assistant,
        content: String::new(),
        tool_calls: Some(calls),
    }
}

#[tokio::test]
async fn chat_returns_final_content_and_appends_user_and_assistant() {
    let (_transport, link, mut session) = open_link().await;
    let chat = Arc::new(ChatSession::new(link, ChatConfig::default()));

    let turn = {
        let chat = Arc::clone(&chat);
        tokio::spawn(async move { chat.chat("Hello").await })
    };

    let (thread_id, state) = expect_invoke(&mut session).await;
    assert_eq!(state.messages.len(), 1);
    assert_eq!(state.messages[0].role, Role::User);
    assert_eq!(state.messages[0].content, "Hello");
    respond(&session, &thread_id, vec![Message::assistant("Hi there")]);

    assert_eq!(turn.await.unwrap().unwrap(), "Hi there");

    let history = chat.history().await;
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].role, Role::User);
    assert_eq!(history[1].role, Role::Assistant);
    assert_eq!(history[1].content, "Hi there");
}

#[tokio::test]
async fn system_prompt_leads_history_and_every_invoke() {
    let (_transport, link, mut session) = open_link().await;
    let chat = Arc::new(ChatSession::new(
        link,
        ChatConfig {
            system_prompt: Some("你是一个旅行规划助手".to_string()),
            ..ChatConfig::default()
        },
    ));

    let turn = {
        let chat = Arc::clone(&chat);
        tokio::spawn(async move { chat.chat("去京都三天怎么玩").await })
    };

    let (thread_id, state) = expect_invoke(&mut session).await;
    assert_eq!(state.messages[0].role, Role::System);
    assert_eq!(state.messages[1].role, Role::User);
    respond(&session, &thread_id, vec![Message::assistant("行程如下……")]);
    turn.await.unwrap().unwrap();

    assert_eq!(chat.history().await.len(), 3);
}

#[tokio::test]
async fn unknown_tool_fails_fast_and_rolls_history_back() {
    let (_transport, link, mut session) = open_link().await;
    // 未配置任何工具
    let chat = Arc::new(ChatSession::new(link, ChatConfig::default()));

    let turn = {
        let chat = Arc::clone(&chat);
        tokio::spawn(async move { chat.chat("查一下天气").await })
    };

    let (thread_id, _) = expect_invoke(&mut session).await;
    respond(
        &session,
        &thread_id,
        vec![assistant_with_calls(vec![tool_call("c1", "lookup")])],
    );

    assert_eq!(
        turn.await.unwrap().unwrap_err(),
        LinkError::UnknownTool("lookup".to_string())
    );

    // 历史只剩用户消息，未追加任何 assistant 消息
    let history = chat.history().await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].role, Role::User);
    assert_eq!(history[0].content, "查一下天气");
}

#[tokio::test]
async fn tool_calls_are_resolved_via_separate_invokes_until_none_remain() {
    let (_transport, link, mut session) = open_link().await;
    let chat = Arc::new(ChatSession::new(
        link,
        ChatConfig {
            tools: vec![tool("geocode")],
            ..ChatConfig::default()
        },
    ));

    let turn = {
        let chat = Arc::clone(&chat);
        tokio::spawn(async move { chat.chat("京都在哪").await })
    };

    // 第一轮：服务端要求调用 geocode
    let (t1, _) = expect_invoke(&mut session).await;
    respond(
        &session,
        &t1,
        vec![assistant_with_calls(vec![tool_call("c1", "geocode")])],
    );

    // 工具调用走独立 invoke：合成单消息历史，thread_id 前缀 tool_
    let (t_tool, tool_state) = expect_invoke(&mut session).await;
    assert_eq!(t_tool, "tool_c1");
    assert_eq!(tool_state.messages.len(), 1);
    assert_eq!(tool_state.messages[0].tool_calls().len(), 1);
    assert_eq!(tool_state.messages[0].tool_calls()[0].name, "geocode");
    respond(&session, &t_tool, vec![Message::assistant("35.01N,135.77E")]);

    // 第二轮：携带聚合结果的历史再次 invoke，产生最终回复
    let (t2, state) = expect_invoke(&mut session).await;
    let outcome_msg = state.messages.last().unwrap();
    assert_eq!(outcome_msg.role, Role::Assistant);
    assert!(outcome_msg.content.contains("\"tool_call_id\":\"c1\""));
    assert!(outcome_msg.content.contains("35.01N,135.77E"));
    respond(&session, &t2, vec![Message::assistant("京都位于日本关西。")]);

    assert_eq!(turn.await.unwrap().unwrap(), "京都位于日本关西。");

    // 历史：user、带调用的 assistant、聚合结果、最终回复
    let history = chat.history().await;
    assert_eq!(history.len(), 4);
    assert!(history[1].tool_calls.is_some());
}

#[tokio::test]
async fn tool_round_cap_fails_the_turn_and_rolls_back() {
    let (_transport, link, mut session) = open_link().await;
    let chat = Arc::new(ChatSession::new(
        link,
        ChatConfig {
            tools: vec![tool("geocode")],
            max_tool_rounds: 1,
            ..ChatConfig::default()
        },
    ));

    let turn = {
        let chat = Arc::clone(&chat);
        tokio::spawn(async move { chat.chat("hi").await })
    };

    let (t1, _) = expect_invoke(&mut session).await;
    respond(
        &session,
        &t1,
        vec![assistant_with_calls(vec![tool_call("c1", "geocode")])],
    );
    let (t_tool, _) = expect_invoke(&mut session).await;
    respond(&session, &t_tool, vec![Message::assistant("result")]);

    // 第二轮仍然要求工具调用，超过上限
    let (t2, _) = expect_invoke(&mut session).await;
    respond(
        &session,
        &t2,
        vec![assistant_with_calls(vec![tool_call("c2", "geocode")])],
    );

    assert_eq!(
        turn.await.unwrap().unwrap_err(),
        LinkError::ToolRoundsExceeded(1)
    );
    assert_eq!(chat.history().await.len(), 1);
}

#[tokio::test]
async fn server_side_error_field_fails_the_turn() {
    let (_transport, link, mut session) = open_link().await;
    let chat = Arc::new(ChatSession::new(link, ChatConfig::default()));

    let turn = {
        let chat = Arc::clone(&chat);
        tokio::spawn(async move { chat.chat("hi").await })
    };

    let (thread_id, _) = expect_invoke(&mut session).await;
    inject(
        &session,
        &Envelope::Response {
            thread_id,
            messages: vec![],
            error: Some("optimizer unavailable".to_string()),
        },
    );

    assert_eq!(
        turn.await.unwrap().unwrap_err(),
        LinkError::Server("optimizer unavailable".to_string())
    );
    assert_eq!(chat.history().await.len(), 1);
}

#[tokio::test]
async fn reset_restores_initial_history_regardless_of_length() {
    let (_transport, link, mut session) = open_link().await;
    let with_prompt = Arc::new(ChatSession::new(
        link.clone(),
        ChatConfig {
            system_prompt: Some("旅行助手".to_string()),
            ..ChatConfig::default()
        },
    ));

    let turn = {
        let chat = Arc::clone(&with_prompt);
        tokio::spawn(async move { chat.chat("hi").await })
    };
    let (thread_id, _) = expect_invoke(&mut session).await;
    respond(&session, &thread_id, vec![Message::assistant("hello")]);
    turn.await.unwrap().unwrap();
    assert_eq!(with_prompt.history().await.len(), 3);

    with_prompt.reset().await;
    let history = with_prompt.history().await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].role, Role::System);

    // 无系统提示词时 reset 后为空；与连接状态无关
    link.disconnect().await;
    let bare = ChatSession::new(link, ChatConfig::default());
    bare.reset().await;
    assert!(bare.history().await.is_empty());
}

#[tokio::test]
async fn bridge_mirrors_connection_busy_messages_and_errors() {
    let (transport, mut sessions) = MockTransport::new();
    let link = AgentLink::new(transport.clone(), LinkConfig::default());

    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let chat = Arc::new(
        ChatSession::new(link.clone(), ChatConfig::default()).with_event_tx(event_tx),
    );
    let bridge = UiBridge::spawn(&link, event_rx);

    let mut connected = bridge.connected();
    let mut busy = bridge.busy();
    let mut messages = bridge.messages();
    let mut last_error = bridge.last_error();

    assert!(!*connected.borrow());
    link.connect().await.unwrap();
    let mut session = sessions.recv().await.unwrap();
    connected.wait_for(|c| *c).await.unwrap();

    // busy 恰在一轮请求在途期间为 true
    assert!(!*busy.borrow());
    let turn = {
        let chat = Arc::clone(&chat);
        tokio::spawn(async move { chat.chat("Hello").await })
    };
    busy.wait_for(|b| *b).await.unwrap();

    let (thread_id, _) = expect_invoke(&mut session).await;
    respond(&session, &thread_id, vec![Message::assistant("Hi")]);
    turn.await.unwrap().unwrap();
    busy.wait_for(|b| !*b).await.unwrap();

    // 消息镜像只追加：user + assistant
    messages.wait_for(|m| m.len() == 2).await.unwrap();
    {
        let snapshot = messages.borrow();
        assert_eq!(snapshot[0].role, "user");
        assert_eq!(snapshot[1].role, "assistant");
        assert_eq!(snapshot[1].content, "Hi");
    }

    // 畸形帧翻译为统一错误形状
    inject_raw(&session, "garbage");
    last_error
        .wait_for(|e| e.as_ref().map(|e| e.code) == Some("schema_violation"))
        .await
        .unwrap();

    // 断开后连接标志回落
    link.disconnect().await;
    connected.wait_for(|c| !*c).await.unwrap();
}
