//! 队伍注册错误类型

use thiserror::Error;

use super::record::MemberId;
use crate::store::StoreError;

/// 队伍操作失败原因
///
/// 除 `Storage` 外都是前置条件失败，状态未被修改，可直接展示给用户。
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("You are already on the team `{team}`")]
    AlreadyRegistered { team: String },

    #[error("Please state a team name")]
    EmptyName,

    #[error("A team with the name `{0}` already exists")]
    DuplicateName(String),

    #[error("You are not on a team")]
    NotOnTeam,

    #[error("You are not the leader of `{0}`. Only team leaders can do that")]
    NotLeader(String),

    #[error("<@{member}> has already been invited to `{team}`")]
    AlreadyInvited { team: String, member: MemberId },

    #[error("<@{member}> is already on `{team}`")]
    AlreadyMember { team: String, member: MemberId },

    #[error("`{team}` is full ({max_players} players including pending invites)")]
    TeamFull { team: String, max_players: usize },

    #[error("You are already on the team `{team}`. Leave it before joining another")]
    AlreadyOnTeam { team: String },

    #[error("<@{member}> has no invite from `{team}`")]
    NoInvite { team: String, member: MemberId },

    #[error("You are not in `{0}`")]
    NotInTeam(String),

    #[error("You are the leader of `{0}`. Team leaders must disband the team instead")]
    IsLeader(String),

    #[error("<@{member}> is not in `{team}`")]
    NotMember { team: String, member: MemberId },

    #[error("You are not in team `{0}`")]
    WrongTeam(String),

    #[error("Team `{0}` does not exist")]
    NotFound(String),

    #[error("the change was not saved: {0}")]
    Storage(#[from] StoreError),
}

impl RegistryError {
    /// 稳定的错误标识，用于日志和 JSON 输出
    pub fn code(&self) -> &'static str {
        match self {
            RegistryError::AlreadyRegistered { .. } => "AlreadyRegistered",
            RegistryError::EmptyName => "EmptyName",
            RegistryError::DuplicateName(_) => "DuplicateName",
            RegistryError::NotOnTeam => "NotOnTeam",
            RegistryError::NotLeader(_) => "NotLeader",
            RegistryError::AlreadyInvited { .. } => "AlreadyInvited",
            RegistryError::AlreadyMember { .. } => "AlreadyMember",
            RegistryError::TeamFull { .. } => "TeamFull",
            RegistryError::AlreadyOnTeam { .. } => "AlreadyOnTeam",
            RegistryError::NoInvite { .. } => "NoInvite",
            RegistryError::NotInTeam(_) => "NotInTeam",
            RegistryError::IsLeader(_) => "IsLeader",
            RegistryError::NotMember { .. } => "NotMember",
            RegistryError::WrongTeam(_) => "WrongTeam",
            RegistryError::NotFound(_) => "NotFound",
            RegistryError::Storage(_) => "Storage",
        }
    }

    /// 持久化失败：操作未生效
    pub fn is_fatal(&self) -> bool {
        matches!(self, RegistryError::Storage(_))
    }
}
