//! Team 记录 - teams.json 中每个队伍的持久化结构

use serde::{Deserialize, Serialize};

/// 成员 ID（聊天平台用户 ID）
pub type MemberId = u64;

/// 队伍记录
///
/// 字段名即 teams.json 的交换格式。`members` 与 `invites` 按插入顺序保存，
/// 队长单独记录在 `leader`，不依赖 `members[0]`。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Team {
    pub name: String,
    pub leader: MemberId,
    pub members: Vec<MemberId>,
    #[serde(default)]
    pub invites: Vec<MemberId>,
    #[serde(default)]
    pub wins: u32,
    #[serde(default)]
    pub losses: u32,
    /// 比赛记录，本模块不解析
    #[serde(default)]
    pub games: Vec<serde_json::Value>,
    /// 报名顺序，旧文档缺失时在加载阶段补齐
    #[serde(default)]
    pub sign_up_position: usize,
    #[serde(default)]
    pub id: u64,
}

impl Team {
    /// 创建只有队长一人的新队伍
    pub fn new(name: &str, leader: MemberId, sign_up_position: usize, id: u64) -> Self {
        Self {
            name: name.to_string(),
            leader,
            members: vec![leader],
            invites: Vec::new(),
            wins: 0,
            losses: 0,
            games: Vec::new(),
            sign_up_position,
            id,
        }
    }

    pub fn is_leader(&self, member: MemberId) -> bool {
        self.leader == member
    }

    pub fn is_member(&self, member: MemberId) -> bool {
        self.members.contains(&member)
    }

    pub fn is_invited(&self, member: MemberId) -> bool {
        self.invites.contains(&member)
    }

    /// 已占用名额：成员 + 待接受的邀请
    pub fn roster_size(&self) -> usize {
        self.members.len() + self.invites.len()
    }

    pub(crate) fn remove_invite(&mut self, member: MemberId) -> bool {
        remove_id(&mut self.invites, member)
    }

    pub(crate) fn remove_member(&mut self, member: MemberId) -> bool {
        remove_id(&mut self.members, member)
    }
}

fn remove_id(ids: &mut Vec<MemberId>, member: MemberId) -> bool {
    match ids.iter().position(|m| *m == member) {
        Some(pos) => {
            ids.remove(pos);
            true
        }
        None => false,
    }
}
