//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `TREK__*` 覆盖（双下划线表示嵌套，如 `TREK__LINK__SERVER_URL=wss://...`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::chat::ChatConfig;
use crate::link::LinkConfig;
use crate::protocol::Tool;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub link: LinkSection,
    #[serde(default)]
    pub chat: ChatSection,
}

/// [link] 段：服务端地址、凭证与各超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LinkSection {
    #[serde(default = "default_server_url")]
    pub server_url: String,
    /// 连接建立后随 auth 信封发送；未设置则跳过鉴权帧
    pub api_key: Option<String>,
    #[serde(default = "default_get_tools_timeout_secs")]
    pub get_tools_timeout_secs: u64,
    #[serde(default = "default_invoke_timeout_secs")]
    pub invoke_timeout_secs: u64,
    #[serde(default)]
    pub reconnect: ReconnectSection,
}

impl Default for LinkSection {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            api_key: None,
            get_tools_timeout_secs: default_get_tools_timeout_secs(),
            invoke_timeout_secs: default_invoke_timeout_secs(),
            reconnect: ReconnectSection::default(),
        }
    }
}

fn default_server_url() -> String {
    "ws://127.0.0.1:9001".to_string()
}

fn default_get_tools_timeout_secs() -> u64 {
    10
}

fn default_invoke_timeout_secs() -> u64 {
    30
}

/// [link.reconnect] 段：意外断开后的退避参数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReconnectSection {
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for ReconnectSection {
    fn default() -> Self {
        Self {
            initial_backoff_ms: default_initial_backoff_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

fn default_initial_backoff_ms() -> u64 {
    1000
}

fn default_max_attempts() -> u32 {
    5
}

/// [chat] 段：系统提示词与工具解析轮数上限
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChatSection {
    pub system_prompt: Option<String>,
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: usize,
}

impl Default for ChatSection {
    fn default() -> Self {
        Self {
            system_prompt: None,
            max_tool_rounds: default_max_tool_rounds(),
        }
    }
}

fn default_max_tool_rounds() -> usize {
    8
}

impl LinkSection {
    pub fn to_link_config(&self) -> LinkConfig {
        LinkConfig {
            api_key: self.api_key.clone(),
            get_tools_timeout: Duration::from_secs(self.get_tools_timeout_secs),
            invoke_timeout: Duration::from_secs(self.invoke_timeout_secs),
            initial_backoff: Duration::from_millis(self.reconnect.initial_backoff_ms),
            max_reconnect_attempts: self.reconnect.max_attempts,
        }
    }
}

impl ChatSection {
    /// tools 由调用方传入（通常取自 get_tools 的结果）
    pub fn to_chat_config(&self, tools: Vec<Tool>) -> ChatConfig {
        ChatConfig {
            system_prompt: self.system_prompt.clone(),
            tools,
            max_tool_rounds: self.max_tool_rounds,
        }
    }
}

/// 从 config 目录加载配置，环境变量 TREK__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 TREK__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("TREK")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
