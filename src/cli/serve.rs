// src/cli/serve.rs
//! Serve 命令 - 从 stdin 读取聊天事件流，逐条分发并把回复写到 stdout
//!
//! 每行一个 JSON 事件：`{"id": "...", "actor": 123, "trusted": false, "content": "-register Alpha"}`。
//! 事件并发处理，注册表内部的锁保证每个操作串行执行。

use anyhow::{Context, Result};
use clap::Args;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::config::Config;
use crate::dispatch::{CommandDispatcher, Reply};
use crate::store::DocumentStore;
use crate::team::{MemberId, TeamRegistry};

/// Serve 命令参数
#[derive(Args)]
pub struct ServeArgs {
    /// 覆盖配置中的命令前缀
    #[arg(long)]
    pub prefix: Option<String>,
}

/// 聊天事件（平台层已解析出用户和角色）
#[derive(Debug, Clone, Deserialize)]
pub struct ChatEvent {
    #[serde(default)]
    pub id: Option<String>,
    pub actor: MemberId,
    #[serde(default)]
    pub trusted: bool,
    pub content: String,
}

/// 写回平台层的回复
#[derive(Debug, Clone, Serialize)]
pub struct ChatReply {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub actor: MemberId,
    pub reply: Reply,
}

/// 处理单个事件；非命令消息没有回复
pub fn process_event<S: DocumentStore>(
    registry: &TeamRegistry<S>,
    prefix: &str,
    event: ChatEvent,
) -> Option<ChatReply> {
    let dispatcher = CommandDispatcher::new(registry, prefix);
    dispatcher
        .handle(event.actor, event.trusted, &event.content)
        .map(|reply| ChatReply {
            id: event.id,
            actor: event.actor,
            reply,
        })
}

/// 处理 serve 命令
pub async fn handle_serve(args: ServeArgs, config: &Config) -> Result<()> {
    let registry = Arc::new(
        TeamRegistry::open(config.open_store()).context("failed to open team documents")?,
    );
    let prefix = Arc::new(args.prefix.unwrap_or_else(|| config.prefix.clone()));

    info!(data_dir = %config.data_dir.display(), prefix = %prefix, "Serving chat commands from stdin");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut tasks = JoinSet::new();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let event: ChatEvent = match serde_json::from_str(&line) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "Skipping malformed chat event");
                continue;
            }
        };

        let registry = Arc::clone(&registry);
        let prefix = Arc::clone(&prefix);
        tasks.spawn_blocking(move || {
            if let Some(reply) = process_event(&registry, &prefix, event) {
                match serde_json::to_string(&reply) {
                    Ok(json) => println!("{}", json),
                    Err(e) => warn!(error = %e, "Failed to encode reply"),
                }
            }
        });
    }

    while let Some(result) = tasks.join_next().await {
        if let Err(e) = result {
            warn!(error = %e, "Chat event task failed");
        }
    }

    info!("Input closed, stopping");
    Ok(())
}
