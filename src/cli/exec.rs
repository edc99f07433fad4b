// src/cli/exec.rs
//! Exec 命令 - 以指定用户身份执行一条聊天命令
//!
//! 供聊天平台桥接脚本调用：平台层解析出用户 ID 和角色后，把原始消息交给这里。

use anyhow::{Context, Result};
use clap::Args;

use crate::config::Config;
use crate::dispatch::CommandDispatcher;
use crate::team::{MemberId, TeamRegistry};

/// Exec 命令参数
#[derive(Args)]
pub struct ExecArgs {
    /// 发出命令的用户 ID
    #[arg(long)]
    pub actor: MemberId,

    /// 用户属于受信任角色（允许 kickteam / setmaxplayers / setmaxteams）
    #[arg(long)]
    pub trusted: bool,

    /// 输出 JSON 格式
    #[arg(long)]
    pub json: bool,

    /// 聊天消息，例如 `-register My Team`
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub line: Vec<String>,
}

/// 处理 exec 命令，返回命令是否成功
pub fn handle_exec(args: ExecArgs, config: &Config) -> Result<bool> {
    let registry =
        TeamRegistry::open(config.open_store()).context("failed to open team documents")?;
    let dispatcher = CommandDispatcher::new(&registry, &config.prefix);

    let line = args.line.join(" ");
    let Some(reply) = dispatcher.handle(args.actor, args.trusted, &line) else {
        eprintln!("Not a command (prefix is `{}`): {}", config.prefix, line);
        return Ok(false);
    };

    if args.json {
        println!("{}", super::format_output(&reply));
    } else {
        println!("{}", reply.text);
    }
    Ok(reply.ok)
}
