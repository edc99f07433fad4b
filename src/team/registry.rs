//! Team Registry - 队伍报名与成员生命周期
//!
//! 负责创建队伍、邀请、接受、退出、踢人、解散以及报名顺序维护。
//!
//! 所有修改操作都在同一把互斥锁内完成：复制当前状态，在副本上校验并修改，
//! 整体写入存储，写入成功后才替换内存状态。任一步失败都不会改变已提交状态。

use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, error, info};

use super::error::RegistryError;
use super::record::{MemberId, Team};
use crate::store::{DocumentStore, Settings, Snapshot, StoreError};

pub type Result<T> = std::result::Result<T, RegistryError>;

/// 报名结果
#[derive(Debug, Clone, PartialEq)]
pub struct Registration {
    pub team: Team,
    /// 队伍数已达上限，本队进入候补
    pub waitlisted: bool,
}

/// 已提交的内存状态
#[derive(Debug, Clone, Default)]
struct RegistryState {
    teams: BTreeMap<String, Team>,
    /// 成员 -> 队伍名，随每次成员变更同步维护
    players: HashMap<MemberId, String>,
    settings: Settings,
}

impl RegistryState {
    fn from_snapshot(snapshot: Snapshot) -> std::result::Result<Self, StoreError> {
        let (snapshot, _) = snapshot.normalize()?;

        let players = snapshot
            .teams
            .values()
            .flat_map(|team| team.members.iter().map(move |m| (*m, team.name.clone())))
            .collect();

        Ok(Self {
            teams: snapshot.teams,
            players,
            settings: snapshot.settings,
        })
    }

    fn to_snapshot(&self) -> Snapshot {
        Snapshot {
            teams: self.teams.clone(),
            players: self
                .players
                .iter()
                .map(|(member, team)| (member.to_string(), team.clone()))
                .collect(),
            settings: self.settings.clone(),
        }
    }

    fn team_of(&self, member: MemberId) -> Option<&String> {
        self.players.get(&member)
    }

    fn team_mut(&mut self, name: &str) -> Result<&mut Team> {
        self.teams
            .get_mut(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    /// 解析队长操作的目标队伍：空名指向操作者自己的队伍
    fn leader_team(&self, actor: MemberId, team_name: &str) -> Result<String> {
        let own = self.team_of(actor).ok_or(RegistryError::NotOnTeam)?;
        let name = if team_name.is_empty() {
            own.clone()
        } else {
            team_name.to_string()
        };

        let team = self
            .teams
            .get(&name)
            .ok_or_else(|| RegistryError::NotFound(name.clone()))?;
        if !team.is_leader(actor) {
            return Err(RegistryError::NotLeader(name));
        }
        Ok(name)
    }

    /// 删除队伍：移出所有成员索引，并把后面的队伍报名顺序前移
    fn remove_team(&mut self, name: &str) -> Result<Team> {
        let team = self
            .teams
            .remove(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;

        for member in &team.members {
            self.players.remove(member);
        }
        for other in self.teams.values_mut() {
            if other.sign_up_position > team.sign_up_position {
                other.sign_up_position -= 1;
            }
        }
        Ok(team)
    }
}

/// 队伍注册表
///
/// 进程启动时构造一次，以引用交给命令层。
pub struct TeamRegistry<S: DocumentStore> {
    store: S,
    state: Mutex<RegistryState>,
}

impl<S: DocumentStore> TeamRegistry<S> {
    /// 从存储加载并建立成员索引
    pub fn open(store: S) -> std::result::Result<Self, StoreError> {
        let state = RegistryState::from_snapshot(store.load()?)?;
        info!(
            teams = state.teams.len(),
            players = state.players.len(),
            "Opened team registry"
        );

        Ok(Self {
            store,
            state: Mutex::new(state),
        })
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// 重新从存储读取（丢弃内存状态）
    pub fn reload(&self) -> std::result::Result<(), StoreError> {
        let fresh = RegistryState::from_snapshot(self.store.load()?)?;
        *self.lock() = fresh;
        debug!("Reloaded team registry");
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        // 状态只在提交成功后整体替换，中毒的锁里依然是一致的已提交状态
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 在锁内执行一次修改并写透到存储
    fn mutate<T, F>(&self, operation: &'static str, change: F) -> Result<T>
    where
        F: FnOnce(&mut RegistryState) -> Result<T>,
    {
        let mut state = self.lock();
        let mut draft = state.clone();

        let output = match change(&mut draft) {
            Ok(output) => output,
            Err(e) => {
                debug!(operation, code = e.code(), "Rejected team operation");
                return Err(e);
            }
        };

        draft.settings.last_updated = Some(Utc::now());
        if let Err(e) = self.store.commit(&draft.to_snapshot()) {
            error!(operation, error = %e, "Failed to persist team documents");
            return Err(e.into());
        }

        *state = draft;
        Ok(output)
    }

    /// 创建队伍，操作者成为队长
    pub fn register(&self, actor: MemberId, team_name: &str) -> Result<Registration> {
        let registration = self.mutate("register", |state| {
            if let Some(current) = state.team_of(actor) {
                return Err(RegistryError::AlreadyRegistered {
                    team: current.clone(),
                });
            }
            if team_name.trim().is_empty() {
                return Err(RegistryError::EmptyName);
            }
            if state.teams.contains_key(team_name) {
                return Err(RegistryError::DuplicateName(team_name.to_string()));
            }

            let position = state.teams.len();
            let id = state.settings.next_id;
            state.settings.next_id += 1;

            let team = Team::new(team_name, actor, position, id);
            state.teams.insert(team.name.clone(), team.clone());
            state.players.insert(actor, team.name.clone());

            Ok(Registration {
                waitlisted: position >= state.settings.max_teams,
                team,
            })
        })?;

        info!(
            actor,
            team = %registration.team.name,
            id = registration.team.id,
            position = registration.team.sign_up_position,
            waitlisted = registration.waitlisted,
            "Registered team"
        );
        Ok(registration)
    }

    /// 队长邀请成员
    pub fn invite(&self, actor: MemberId, team_name: &str, target: MemberId) -> Result<Team> {
        let team = self.mutate("invite", |state| {
            let name = state.leader_team(actor, team_name)?;
            let max_players = state.settings.max_players;
            let team = state.team_mut(&name)?;

            if team.is_invited(target) {
                return Err(RegistryError::AlreadyInvited { team: name, member: target });
            }
            if team.is_member(target) {
                return Err(RegistryError::AlreadyMember { team: name, member: target });
            }
            if team.roster_size() >= max_players {
                return Err(RegistryError::TeamFull { team: name, max_players });
            }

            team.invites.push(target);
            Ok(team.clone())
        })?;

        info!(actor, target, team = %team.name, "Invited player");
        Ok(team)
    }

    /// 接受邀请加入队伍
    pub fn accept(&self, actor: MemberId, team_name: &str) -> Result<Team> {
        let team = self.mutate("accept", |state| {
            if let Some(current) = state.team_of(actor) {
                return Err(RegistryError::AlreadyOnTeam {
                    team: current.clone(),
                });
            }
            if team_name.trim().is_empty() {
                return Err(RegistryError::EmptyName);
            }

            let team = state.team_mut(team_name)?;
            if !team.remove_invite(actor) {
                return Err(RegistryError::NoInvite {
                    team: team_name.to_string(),
                    member: actor,
                });
            }
            team.members.push(actor);
            let team = team.clone();

            state.players.insert(actor, team.name.clone());
            Ok(team)
        })?;

        info!(actor, team = %team.name, "Player joined team");
        Ok(team)
    }

    /// 队长撤回邀请
    pub fn uninvite(&self, actor: MemberId, team_name: &str, target: MemberId) -> Result<Team> {
        let team = self.mutate("uninvite", |state| {
            let name = state.leader_team(actor, team_name)?;
            let team = state.team_mut(&name)?;

            if !team.remove_invite(target) {
                return Err(RegistryError::NoInvite { team: name, member: target });
            }
            Ok(team.clone())
        })?;

        info!(actor, target, team = %team.name, "Withdrew invite");
        Ok(team)
    }

    /// 被邀请者拒绝邀请
    pub fn reject(&self, actor: MemberId, team_name: &str) -> Result<Team> {
        let team = self.mutate("reject", |state| {
            if team_name.trim().is_empty() {
                return Err(RegistryError::EmptyName);
            }
            let team = state.team_mut(team_name)?;

            if !team.remove_invite(actor) {
                return Err(RegistryError::NoInvite {
                    team: team_name.to_string(),
                    member: actor,
                });
            }
            Ok(team.clone())
        })?;

        info!(actor, team = %team.name, "Rejected invite");
        Ok(team)
    }

    /// 成员退出队伍；队长不能退出，只能解散
    pub fn leave(&self, actor: MemberId, team_name: &str) -> Result<Team> {
        let team = self.mutate("leave", |state| {
            let own = state.team_of(actor).ok_or(RegistryError::NotOnTeam)?;
            let name = if team_name.is_empty() {
                own.clone()
            } else {
                team_name.to_string()
            };

            let team = state.team_mut(&name)?;
            if !team.is_member(actor) {
                return Err(RegistryError::NotInTeam(name));
            }
            if team.is_leader(actor) {
                return Err(RegistryError::IsLeader(name));
            }

            team.remove_member(actor);
            let team = team.clone();
            state.players.remove(&actor);
            Ok(team)
        })?;

        info!(actor, team = %team.name, "Player left team");
        Ok(team)
    }

    /// 队长踢出成员
    pub fn kick(&self, actor: MemberId, team_name: &str, target: MemberId) -> Result<Team> {
        let team = self.mutate("kick", |state| {
            let name = state.leader_team(actor, team_name)?;
            let team = state.team_mut(&name)?;

            if !team.is_member(target) {
                return Err(RegistryError::NotMember { team: name, member: target });
            }
            if team.is_leader(target) {
                return Err(RegistryError::IsLeader(name));
            }

            team.remove_member(target);
            let team = team.clone();
            state.players.remove(&target);
            Ok(team)
        })?;

        info!(actor, target, team = %team.name, "Kicked player");
        Ok(team)
    }

    /// 队长解散自己的队伍，返回被删除的队伍
    pub fn disband(&self, actor: MemberId, team_name: &str) -> Result<Team> {
        let team = self.mutate("disband", |state| {
            let own = state.team_of(actor).ok_or(RegistryError::NotOnTeam)?.clone();
            // 必须写出自己的队名，空名不算确认
            if team_name != own {
                return Err(RegistryError::WrongTeam(team_name.to_string()));
            }

            let is_leader = state
                .teams
                .get(&own)
                .is_some_and(|team| team.is_leader(actor));
            if !is_leader {
                return Err(RegistryError::NotLeader(own));
            }

            state.remove_team(&own)
        })?;

        info!(actor, team = %team.name, members = team.members.len(), "Disbanded team");
        Ok(team)
    }

    /// 管理员移除队伍（权限由调用方校验），返回被删除的队伍
    pub fn admin_remove(&self, team_name: &str) -> Result<Team> {
        let team = self.mutate("admin_remove", |state| state.remove_team(team_name))?;

        info!(team = %team.name, members = team.members.len(), "Removed team");
        Ok(team)
    }

    /// 设置每队人数上限（含待接受邀请）
    pub fn set_max_players(&self, max_players: usize) -> Result<Settings> {
        let settings = self.mutate("set_max_players", |state| {
            state.settings.max_players = max_players;
            Ok(state.settings.clone())
        })?;
        info!(max_players, "Updated max players");
        Ok(settings)
    }

    /// 设置队伍数上限
    pub fn set_max_teams(&self, max_teams: usize) -> Result<Settings> {
        let settings = self.mutate("set_max_teams", |state| {
            state.settings.max_teams = max_teams;
            Ok(state.settings.clone())
        })?;
        info!(max_teams, "Updated max teams");
        Ok(settings)
    }

    /// 查询成员所在队伍
    pub fn lookup_by_member(&self, member: MemberId) -> Option<Team> {
        let state = self.lock();
        state
            .team_of(member)
            .and_then(|name| state.teams.get(name))
            .cloned()
    }

    pub fn team_name_of(&self, member: MemberId) -> Option<String> {
        self.lock().team_of(member).cloned()
    }

    pub fn exists(&self, team_name: &str) -> bool {
        self.lock().teams.contains_key(team_name)
    }

    pub fn get(&self, team_name: &str) -> Option<Team> {
        self.lock().teams.get(team_name).cloned()
    }

    /// 按报名顺序列出所有队伍
    pub fn teams(&self) -> Vec<Team> {
        let mut teams: Vec<Team> = self.lock().teams.values().cloned().collect();
        teams.sort_by_key(|t| t.sign_up_position);
        teams
    }

    /// 队伍当前是否在候补区（报名顺序超出队伍上限）
    pub fn is_waitlisted(&self, team_name: &str) -> Option<bool> {
        let state = self.lock();
        state
            .teams
            .get(team_name)
            .map(|t| t.sign_up_position >= state.settings.max_teams)
    }

    pub fn settings(&self) -> Settings {
        self.lock().settings.clone()
    }

    /// 当前已提交状态的快照
    pub fn snapshot(&self) -> Snapshot {
        self.lock().to_snapshot()
    }

    /// 检查成员索引、队长、邀请、人数、报名顺序和 ID 的一致性
    ///
    /// 返回所有违规描述，为空表示一致。
    pub fn invariant_violations(&self) -> Vec<String> {
        let state = self.lock();
        let mut violations = Vec::new();

        let mut seen: HashMap<MemberId, &str> = HashMap::new();
        for team in state.teams.values() {
            if !team.is_member(team.leader) {
                violations.push(format!("leader of `{}` is not a member", team.name));
            }
            if team.invites.iter().any(|m| team.is_member(*m)) {
                violations.push(format!("`{}` has an invite for an existing member", team.name));
            }
            if team.roster_size() > state.settings.max_players {
                violations.push(format!(
                    "`{}` holds {} players and invites, limit is {}",
                    team.name,
                    team.roster_size(),
                    state.settings.max_players
                ));
            }
            for member in &team.members {
                if let Some(other) = seen.insert(*member, team.name.as_str()) {
                    violations.push(format!(
                        "member {} is on both `{}` and `{}`",
                        member, other, team.name
                    ));
                }
                if state.players.get(member) != Some(&team.name) {
                    violations.push(format!("member {} of `{}` is not indexed", member, team.name));
                }
            }
        }
        for (member, name) in &state.players {
            if seen.get(member) != Some(&name.as_str()) {
                violations.push(format!("index maps {} to `{}` but it is not a member", member, name));
            }
        }

        let mut ordered: Vec<&Team> = state.teams.values().collect();
        ordered.sort_by_key(|t| t.sign_up_position);
        for (expected, team) in ordered.iter().enumerate() {
            if team.sign_up_position != expected {
                violations.push(format!(
                    "`{}` has sign-up position {}, expected {}",
                    team.name, team.sign_up_position, expected
                ));
            }
            if team.id >= state.settings.next_id {
                violations.push(format!("`{}` has id {} beyond the counter", team.name, team.id));
            }
        }
        for pair in ordered.windows(2) {
            if pair[0].id >= pair[1].id {
                violations.push(format!(
                    "ids out of sign-up order: `{}` ({}) before `{}` ({})",
                    pair[0].name, pair[0].id, pair[1].name, pair[1].id
                ));
            }
        }

        violations
    }
}
