//! 命令分发 - 解析聊天命令、调用注册表、生成回复文本
//!
//! 平台层负责提供操作者 ID 和是否属于受信任角色；这里把一行聊天消息
//! 解析成 [`Command`]，把提及（`<@123>`）解析成成员 ID，调用一次
//! [`TeamRegistry`] 操作，并把结果或错误渲染成给用户看的文本。

use regex::Regex;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::store::DocumentStore;
use crate::team::{MemberId, Registration, RegistryError, Team, TeamRegistry};

/// 聊天命令
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Register { name: String },
    Invite { target: MemberId },
    Accept { name: String },
    Uninvite { target: MemberId },
    Reject { name: String },
    Leave { name: String },
    Kick { target: MemberId },
    Disband { name: String },
    /// 管理员移除队伍
    KickTeam { name: String },
    SetMaxPlayers(usize),
    SetMaxTeams(usize),
    /// 查看队伍，空名表示自己的队伍
    Team { name: String },
    Teams,
}

impl Command {
    /// 需要受信任角色的命令
    pub fn is_privileged(&self) -> bool {
        matches!(
            self,
            Command::KickTeam { .. } | Command::SetMaxPlayers(_) | Command::SetMaxTeams(_)
        )
    }

    fn verb(&self) -> &'static str {
        match self {
            Command::Register { .. } => "register",
            Command::Invite { .. } => "invite",
            Command::Accept { .. } => "accept",
            Command::Uninvite { .. } => "uninvite",
            Command::Reject { .. } => "reject",
            Command::Leave { .. } => "leave",
            Command::Kick { .. } => "kick",
            Command::Disband { .. } => "disband",
            Command::KickTeam { .. } => "kickteam",
            Command::SetMaxPlayers(_) => "setmaxplayers",
            Command::SetMaxTeams(_) => "setmaxteams",
            Command::Team { .. } => "team",
            Command::Teams => "teams",
        }
    }
}

/// 分发失败原因
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Unknown command `{0}`")]
    UnknownCommand(String),

    #[error("Usage: `{0}`")]
    Usage(String),

    #[error("`{0}` is not a valid user")]
    InvalidUser(String),

    #[error("You do not have permission to use `{0}`")]
    Forbidden(&'static str),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl DispatchError {
    pub fn code(&self) -> &'static str {
        match self {
            DispatchError::UnknownCommand(_) => "UnknownCommand",
            DispatchError::Usage(_) => "Usage",
            DispatchError::InvalidUser(_) => "InvalidUser",
            DispatchError::Forbidden(_) => "Forbidden",
            DispatchError::Registry(e) => e.code(),
        }
    }
}

/// 一条命令的回复
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reply {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub text: String,
}

impl Reply {
    fn success(text: String) -> Self {
        Self {
            ok: true,
            code: None,
            text,
        }
    }

    fn failure(error: &DispatchError) -> Self {
        Self {
            ok: false,
            code: Some(error.code().to_string()),
            text: error.to_string(),
        }
    }
}

/// 命令分发器
pub struct CommandDispatcher<'a, S: DocumentStore> {
    registry: &'a TeamRegistry<S>,
    prefix: String,
    mention: Regex,
}

impl<'a, S: DocumentStore> CommandDispatcher<'a, S> {
    pub fn new(registry: &'a TeamRegistry<S>, prefix: &str) -> Self {
        Self {
            registry,
            prefix: prefix.to_string(),
            mention: Regex::new(r"^<@!?(\d+)>$").unwrap(),
        }
    }

    /// 解析用户参数：`<@123>`、`<@!123>` 或纯数字 ID
    pub fn resolve_member(&self, arg: &str) -> Result<MemberId, DispatchError> {
        let digits = match self.mention.captures(arg) {
            Some(caps) => caps.get(1).map_or("", |m| m.as_str()),
            None => arg,
        };
        digits
            .parse()
            .map_err(|_| DispatchError::InvalidUser(arg.to_string()))
    }

    fn usage(&self, pattern: &str) -> DispatchError {
        DispatchError::Usage(format!("{}{}", self.prefix, pattern))
    }

    /// 解析一行消息；不以命令前缀开头时返回 None
    pub fn parse(&self, line: &str) -> Result<Option<Command>, DispatchError> {
        let Some(body) = line.trim().strip_prefix(&self.prefix) else {
            return Ok(None);
        };

        let mut words = body.split_whitespace();
        let Some(verb) = words.next() else {
            return Ok(None);
        };
        let args: Vec<&str> = words.collect();
        let name = args.join(" ");

        let target = |pattern: &str| -> Result<MemberId, DispatchError> {
            match args.as_slice() {
                [user] => self.resolve_member(user),
                _ => Err(self.usage(pattern)),
            }
        };
        let count = |pattern: &str| -> Result<usize, DispatchError> {
            match args.as_slice() {
                [n] => n.parse().map_err(|_| self.usage(pattern)),
                _ => Err(self.usage(pattern)),
            }
        };

        let command = match verb.to_lowercase().as_str() {
            "register" | "create" => Command::Register { name },
            "invite" | "add" => Command::Invite {
                target: target("invite <user>")?,
            },
            "accept" | "join" => Command::Accept { name },
            "uninvite" => Command::Uninvite {
                target: target("uninvite <user>")?,
            },
            "reject" => Command::Reject { name },
            "leave" => Command::Leave { name },
            "kick" | "remove" => Command::Kick {
                target: target("kick <user>")?,
            },
            "disband" | "abandon" => Command::Disband { name },
            "kickteam" => {
                if name.is_empty() {
                    return Err(self.usage("kickteam <team_name>"));
                }
                Command::KickTeam { name }
            }
            "setmaxplayers" => Command::SetMaxPlayers(count("setmaxplayers <number>")?),
            "setmaxteams" => Command::SetMaxTeams(count("setmaxteams <number>")?),
            "team" => Command::Team { name },
            "teams" => Command::Teams,
            other => return Err(DispatchError::UnknownCommand(other.to_string())),
        };

        Ok(Some(command))
    }

    /// 执行命令并返回成功文本
    pub fn execute(
        &self,
        actor: MemberId,
        trusted: bool,
        command: Command,
    ) -> Result<String, DispatchError> {
        if command.is_privileged() && !trusted {
            return Err(DispatchError::Forbidden(command.verb()));
        }

        let registry = self.registry;
        let text = match command {
            Command::Register { name } => self.render_registration(&registry.register(actor, &name)?),
            Command::Invite { target } => {
                let team = registry.invite(actor, "", target)?;
                format!(
                    "<@{}> has been invited to `{}`\nTo accept this invite, they must run `{}accept {}`",
                    target, team.name, self.prefix, team.name
                )
            }
            Command::Accept { name } => {
                let team = registry.accept(actor, &name)?;
                format!("You have successfully joined `{}`", team.name)
            }
            Command::Uninvite { target } => {
                let team = registry.uninvite(actor, "", target)?;
                format!("<@{}> has been uninvited from `{}`", target, team.name)
            }
            Command::Reject { name } => {
                let team = registry.reject(actor, &name)?;
                format!("You have rejected the invite from `{}`", team.name)
            }
            Command::Leave { name } => {
                let team = registry.leave(actor, &name)?;
                format!("You have successfully left `{}`", team.name)
            }
            Command::Kick { target } => {
                let team = registry.kick(actor, "", target)?;
                format!("<@{}> has been kicked from `{}`", target, team.name)
            }
            Command::Disband { name } => {
                let team = registry.disband(actor, &name)?;
                format!("Successfully disbanded `{}`", team.name)
            }
            Command::KickTeam { name } => {
                let team = registry.admin_remove(&name)?;
                format!(
                    "Removed team `{}` ({} members released)",
                    team.name,
                    team.members.len()
                )
            }
            Command::SetMaxPlayers(n) => {
                registry.set_max_players(n)?;
                format!("Max players per team set to {}", n)
            }
            Command::SetMaxTeams(n) => {
                registry.set_max_teams(n)?;
                format!("Max teams set to {}", n)
            }
            Command::Team { name } => {
                let team = if name.is_empty() {
                    registry
                        .lookup_by_member(actor)
                        .ok_or(RegistryError::NotOnTeam)?
                } else {
                    registry
                        .get(&name)
                        .ok_or_else(|| RegistryError::NotFound(name.clone()))?
                };
                self.render_team(&team)
            }
            Command::Teams => self.render_teams(&registry.teams()),
        };

        Ok(text)
    }

    /// 处理一行消息，错误也渲染成回复；非命令消息返回 None
    pub fn handle(&self, actor: MemberId, trusted: bool, line: &str) -> Option<Reply> {
        let result = match self.parse(line) {
            Ok(Some(command)) => self.execute(actor, trusted, command),
            Ok(None) => return None,
            Err(e) => Err(e),
        };

        Some(match result {
            Ok(text) => Reply::success(text),
            Err(e) => {
                debug!(actor, code = e.code(), "Command failed");
                Reply::failure(&e)
            }
        })
    }

    fn render_registration(&self, registration: &Registration) -> String {
        let team = &registration.team;
        let mut text = format!(
            "Team `{}` created. Add players with:\n{}invite <user>",
            team.name, self.prefix
        );
        if registration.waitlisted {
            text.push_str(&format!(
                "\nThe tournament is full, `{}` is on the waitlist (sign-up #{})",
                team.name,
                team.sign_up_position + 1
            ));
        }
        text
    }

    fn render_team(&self, team: &Team) -> String {
        let members = mentions(&team.members);
        let mut text = format!(
            "**{}** (#{}{})\nLeader: <@{}>\nMembers: {}\nRecord: {}W - {}L",
            team.name,
            team.sign_up_position + 1,
            if self.registry.is_waitlisted(&team.name) == Some(true) {
                ", waitlisted"
            } else {
                ""
            },
            team.leader,
            members,
            team.wins,
            team.losses
        );
        if !team.invites.is_empty() {
            text.push_str(&format!("\nInvited: {}", mentions(&team.invites)));
        }
        text
    }

    fn render_teams(&self, teams: &[Team]) -> String {
        if teams.is_empty() {
            return "No teams have registered yet".to_string();
        }

        let settings = self.registry.settings();
        let mut lines = vec![format!(
            "{} teams registered ({} slots)",
            teams.len(),
            settings.max_teams
        )];
        for team in teams {
            let marker = if team.sign_up_position >= settings.max_teams {
                " (waitlist)"
            } else {
                ""
            };
            lines.push(format!(
                "{}. `{}` - {}{}",
                team.sign_up_position + 1,
                team.name,
                mentions(&team.members),
                marker
            ));
        }
        lines.join("\n")
    }
}

fn mentions(ids: &[MemberId]) -> String {
    ids.iter()
        .map(|id| format!("<@{}>", id))
        .collect::<Vec<_>>()
        .join(" ")
}
