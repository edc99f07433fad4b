//! 文档存储 - teams.json / players.json / settings.json 的整体读写
//!
//! 存储位置：`~/.config/tourney-registry/`（可由 `TOURNEY_DATA_DIR` 覆盖）
//!
//! 每次提交都完整重写文档：先写 `*.tmp`，再 `rename` 原子替换。
//! teams.json 的替换是提交点，players.json 是它的派生索引，加载时若两者不一致
//! 以 teams.json 为准重建。

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use thiserror::Error;
use tracing::{debug, warn};

use crate::team::record::{MemberId, Team};

pub const TEAMS_DOCUMENT: &str = "teams.json";
pub const PLAYERS_DOCUMENT: &str = "players.json";
pub const SETTINGS_DOCUMENT: &str = "settings.json";

const LOCK_FILE: &str = "store.lock";

/// 默认每队人数上限（含待接受邀请）
pub const DEFAULT_MAX_PLAYERS: usize = 2;
/// 默认队伍数上限，超出的报名进入候补
pub const DEFAULT_MAX_TEAMS: usize = 64;

/// 存储错误
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed {document}: {source}")]
    Malformed {
        document: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid {document}: {reason}")]
    Invalid {
        document: &'static str,
        reason: String,
    },

    #[error("failed to encode {document}: {source}")]
    Encode {
        document: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

fn invalid(document: &'static str, reason: String) -> StoreError {
    StoreError::Invalid { document, reason }
}

/// 运行时可调整的设置（settings.json）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub max_players: usize,
    pub max_teams: usize,
    /// 下一个队伍 ID，只增不减
    pub next_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_players: DEFAULT_MAX_PLAYERS,
            max_teams: DEFAULT_MAX_TEAMS,
            next_id: 1,
            last_updated: None,
        }
    }
}

/// 一次完整的持久化快照
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    /// 队伍名 -> 队伍
    pub teams: BTreeMap<String, Team>,
    /// 成员 ID 字符串 -> 队伍名
    pub players: BTreeMap<String, String>,
    pub settings: Settings,
}

impl Snapshot {
    /// 由 teams 推导出的成员索引
    pub fn derived_players(&self) -> BTreeMap<String, String> {
        self.teams
            .values()
            .flat_map(|team| {
                team.members
                    .iter()
                    .map(move |member| (member.to_string(), team.name.clone()))
            })
            .collect()
    }

    /// 校验并修复加载到的快照
    ///
    /// 结构性错误（队长不在成员中、成员属于多个队伍等）直接拒绝；
    /// 旧文档缺失的 ID / 报名顺序、与 teams 不一致的 players 会被修复。
    /// 返回值第二项表示是否做过修复。
    pub fn normalize(mut self) -> Result<(Self, bool), StoreError> {
        let mut repaired = false;
        let mut owner: BTreeMap<MemberId, &str> = BTreeMap::new();
        let mut ids = HashSet::new();

        for (key, team) in &self.teams {
            if key != &team.name {
                return Err(invalid(
                    TEAMS_DOCUMENT,
                    format!("team keyed as `{}` is named `{}`", key, team.name),
                ));
            }
            if !team.is_member(team.leader) {
                return Err(invalid(
                    TEAMS_DOCUMENT,
                    format!("leader {} of `{}` is not a member", team.leader, key),
                ));
            }
            let mut seen = HashSet::new();
            for member in &team.members {
                if !seen.insert(*member) {
                    return Err(invalid(
                        TEAMS_DOCUMENT,
                        format!("member {} listed twice in `{}`", member, key),
                    ));
                }
                if let Some(other) = owner.insert(*member, key.as_str()) {
                    return Err(invalid(
                        TEAMS_DOCUMENT,
                        format!("member {} is on both `{}` and `{}`", member, other, key),
                    ));
                }
            }
            let mut seen_invites = HashSet::new();
            for invite in &team.invites {
                if seen.contains(invite) {
                    return Err(invalid(
                        TEAMS_DOCUMENT,
                        format!("member {} of `{}` also has a pending invite", invite, key),
                    ));
                }
                if !seen_invites.insert(*invite) {
                    return Err(invalid(
                        TEAMS_DOCUMENT,
                        format!("invite for {} listed twice in `{}`", invite, key),
                    ));
                }
            }
            if team.id != 0 && !ids.insert(team.id) {
                return Err(invalid(
                    TEAMS_DOCUMENT,
                    format!("team id {} is used more than once", team.id),
                ));
            }
        }

        // 报名顺序：按 (position, id, name) 排序后必须恰好是 0..n
        let mut order: Vec<(usize, u64, String)> = self
            .teams
            .values()
            .map(|t| (t.sign_up_position, t.id, t.name.clone()))
            .collect();
        order.sort();

        let max_id = self.teams.values().map(|t| t.id).max().unwrap_or(0);
        let mut next_id = self.settings.next_id.max(max_id + 1);

        // 已有 ID 必须随报名顺序递增；缺 ID 的队伍取前一个 ID 之后的空位，
        // 排在所有已有 ID 之后的则从计数器取号
        let mut previous_id = 0;
        for (index, (_, id, name)) in order.iter().enumerate() {
            if *id != 0 {
                if *id <= previous_id {
                    return Err(invalid(
                        TEAMS_DOCUMENT,
                        format!("id {} of `{}` is out of sign-up order", id, name),
                    ));
                }
                previous_id = *id;
                continue;
            }

            let ceiling = order[index + 1..]
                .iter()
                .map(|(_, id, _)| *id)
                .find(|id| *id != 0);
            let assigned = match ceiling {
                Some(ceiling) if previous_id + 1 >= ceiling => {
                    return Err(invalid(
                        TEAMS_DOCUMENT,
                        format!("no free id for `{}` before id {}", name, ceiling),
                    ));
                }
                Some(_) => previous_id + 1,
                None => {
                    let assigned = next_id.max(previous_id + 1);
                    next_id = assigned + 1;
                    assigned
                }
            };
            if let Some(team) = self.teams.get_mut(name) {
                team.id = assigned;
            }
            previous_id = assigned;
            repaired = true;
        }

        for (position, (_, _, name)) in order.iter().enumerate() {
            if let Some(team) = self.teams.get_mut(name) {
                if team.sign_up_position != position {
                    team.sign_up_position = position;
                    repaired = true;
                }
            }
        }
        if next_id != self.settings.next_id {
            self.settings.next_id = next_id;
            repaired = true;
        }

        let derived = self.derived_players();
        if derived != self.players {
            warn!(
                indexed = self.players.len(),
                expected = derived.len(),
                "players.json disagrees with teams.json, rebuilding index"
            );
            self.players = derived;
            repaired = true;
        }

        if repaired {
            warn!(teams = self.teams.len(), "Repaired legacy team documents");
        }

        Ok((self, repaired))
    }
}

/// 文档存储接口
pub trait DocumentStore: Send + Sync {
    /// 读取全部文档
    fn load(&self) -> Result<Snapshot, StoreError>;

    /// 整体写入全部文档；返回 Ok 之前修改不算生效
    fn commit(&self, snapshot: &Snapshot) -> Result<(), StoreError>;
}

/// JSON 文件存储
pub struct JsonFileStore {
    data_dir: PathBuf,
    default_settings: Settings,
}

impl JsonFileStore {
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            default_settings: Settings::default(),
        }
    }

    /// settings.json 不存在时使用的初始设置
    pub fn with_default_settings(mut self, settings: Settings) -> Self {
        self.default_settings = settings;
        self
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn document_path(&self, document: &str) -> PathBuf {
        self.data_dir.join(document)
    }

    fn lock_file_path(&self) -> PathBuf {
        self.data_dir.join(LOCK_FILE)
    }

    /// 在文件锁保护下执行操作（跨进程）
    fn with_lock<F, T>(&self, exclusive: bool, operation: F) -> Result<T, StoreError>
    where
        F: FnOnce() -> Result<T, StoreError>,
    {
        fs::create_dir_all(&self.data_dir)?;

        let lock_file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(self.lock_file_path())?;

        if exclusive {
            lock_file.lock_exclusive()?;
        } else {
            lock_file.lock_shared()?;
        }

        let result = operation();

        let _ = lock_file.unlock();

        result
    }

    /// 读取单个文档，不存在时返回 None
    fn read_document<T: DeserializeOwned>(
        &self,
        document: &'static str,
    ) -> Result<Option<T>, StoreError> {
        let path = self.document_path(document);
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&path)?;
        let value = serde_json::from_str(&content)
            .map_err(|source| StoreError::Malformed { document, source })?;
        Ok(Some(value))
    }

    /// 写入临时文件并刷盘，返回临时文件路径
    fn write_temp<T: Serialize>(
        &self,
        document: &'static str,
        value: &T,
    ) -> Result<PathBuf, StoreError> {
        let content = serde_json::to_string_pretty(value)
            .map_err(|source| StoreError::Encode { document, source })?;

        let temp_path = self.document_path(document).with_extension("json.tmp");
        let mut file = File::create(&temp_path)?;
        file.write_all(content.as_bytes())?;
        file.sync_all()?;
        Ok(temp_path)
    }
}

impl DocumentStore for JsonFileStore {
    fn load(&self) -> Result<Snapshot, StoreError> {
        self.with_lock(false, || {
            let teams = self.read_document(TEAMS_DOCUMENT)?.unwrap_or_default();
            let players = self.read_document(PLAYERS_DOCUMENT)?.unwrap_or_default();
            let settings = self
                .read_document(SETTINGS_DOCUMENT)?
                .unwrap_or_else(|| self.default_settings.clone());

            debug!(data_dir = %self.data_dir.display(), "Loaded team documents");

            Ok(Snapshot {
                teams,
                players,
                settings,
            })
        })
    }

    fn commit(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        self.with_lock(true, || {
            let settings_tmp = self.write_temp(SETTINGS_DOCUMENT, &snapshot.settings)?;
            let players_tmp = self.write_temp(PLAYERS_DOCUMENT, &snapshot.players)?;
            let teams_tmp = self.write_temp(TEAMS_DOCUMENT, &snapshot.teams)?;

            // settings 先行：ID 计数器宁可跳号也不能回退
            fs::rename(&settings_tmp, self.document_path(SETTINGS_DOCUMENT))?;
            fs::rename(&teams_tmp, self.document_path(TEAMS_DOCUMENT))?;

            // teams.json 已替换即视为提交成功，过期的 players.json 会在下次加载时重建
            if let Err(e) = fs::rename(&players_tmp, self.document_path(PLAYERS_DOCUMENT)) {
                warn!(error = %e, "Failed to replace players.json, index will be rebuilt on load");
                let _ = fs::remove_file(&players_tmp);
            }

            debug!(teams = snapshot.teams.len(), "Committed team documents");
            Ok(())
        })
    }
}

/// 内存存储，用于测试和不需要落盘的调用方
#[derive(Default)]
pub struct MemoryStore {
    snapshot: Mutex<Snapshot>,
    fail_next_commit: AtomicBool,
    commits: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(snapshot: Snapshot) -> Self {
        Self {
            snapshot: Mutex::new(snapshot),
            ..Default::default()
        }
    }

    /// 让下一次 commit 以 I/O 错误失败
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }

    /// 成功提交的次数
    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    /// 最近一次提交的内容
    pub fn stored(&self) -> Snapshot {
        self.snapshot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl DocumentStore for MemoryStore {
    fn load(&self) -> Result<Snapshot, StoreError> {
        Ok(self.stored())
    }

    fn commit(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        if self.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "injected commit failure",
            )));
        }

        *self
            .snapshot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = snapshot.clone();
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn team(name: &str, leader: MemberId, position: usize, id: u64) -> Team {
        Team::new(name, leader, position, id)
    }

    fn snapshot_of(teams: Vec<Team>) -> Snapshot {
        let mut snapshot = Snapshot::default();
        for t in teams {
            snapshot.teams.insert(t.name.clone(), t);
        }
        snapshot.players = snapshot.derived_players();
        snapshot
    }

    #[test]
    fn test_load_missing_documents_is_empty() {
        let temp = tempdir().unwrap();
        let store = JsonFileStore::new(temp.path().join("data"));

        let snapshot = store.load().unwrap();
        assert!(snapshot.teams.is_empty());
        assert!(snapshot.players.is_empty());
        assert_eq!(snapshot.settings, Settings::default());
    }

    #[test]
    fn test_default_settings_only_apply_to_fresh_store() {
        let temp = tempdir().unwrap();
        let custom = Settings {
            max_players: 4,
            max_teams: 8,
            ..Settings::default()
        };
        let store = JsonFileStore::new(temp.path().to_path_buf()).with_default_settings(custom);
        assert_eq!(store.load().unwrap().settings.max_players, 4);

        let mut snapshot = store.load().unwrap();
        snapshot.settings.max_players = 3;
        store.commit(&snapshot).unwrap();

        assert_eq!(store.load().unwrap().settings.max_players, 3);
    }

    #[test]
    fn test_commit_then_load() {
        let temp = tempdir().unwrap();
        let store = JsonFileStore::new(temp.path().to_path_buf());

        let mut alpha = team("Alpha", 1, 0, 1);
        alpha.members.push(2);
        alpha.invites.push(3);
        let mut snapshot = snapshot_of(vec![alpha, team("Beta", 4, 1, 2)]);
        snapshot.settings.next_id = 3;

        store.commit(&snapshot).unwrap();
        let loaded = store.load().unwrap();
        assert_eq!(loaded, snapshot);

        // 不留下临时文件
        assert!(!temp.path().join("teams.json.tmp").exists());
        assert!(!temp.path().join("players.json.tmp").exists());
    }

    #[test]
    fn test_players_document_uses_string_keys() {
        let temp = tempdir().unwrap();
        let store = JsonFileStore::new(temp.path().to_path_buf());
        store.commit(&snapshot_of(vec![team("Alpha", 42, 0, 1)])).unwrap();

        let content = fs::read_to_string(temp.path().join(PLAYERS_DOCUMENT)).unwrap();
        let players: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert_eq!(players["42"], "Alpha");
    }

    #[test]
    fn test_malformed_document_is_rejected() {
        let temp = tempdir().unwrap();
        fs::write(temp.path().join(TEAMS_DOCUMENT), r#"{"Alpha": {"name": "Alpha"}}"#).unwrap();
        let store = JsonFileStore::new(temp.path().to_path_buf());

        let err = store.load().unwrap_err();
        assert!(matches!(
            err,
            StoreError::Malformed {
                document: TEAMS_DOCUMENT,
                ..
            }
        ));
    }

    #[test]
    fn test_normalize_rejects_leader_outside_members() {
        let mut broken = team("Alpha", 1, 0, 1);
        broken.members = vec![2];
        let err = snapshot_of(vec![broken]).normalize().unwrap_err();
        assert!(matches!(err, StoreError::Invalid { .. }));
    }

    #[test]
    fn test_normalize_rejects_member_on_two_teams() {
        let mut beta = team("Beta", 2, 1, 2);
        beta.members.push(1);
        let err = snapshot_of(vec![team("Alpha", 1, 0, 1), beta])
            .normalize()
            .unwrap_err();
        assert!(err.to_string().contains("is on both"));
    }

    #[test]
    fn test_normalize_rejects_mismatched_key() {
        let mut snapshot = Snapshot::default();
        snapshot.teams.insert("Alpha".to_string(), team("Beta", 1, 0, 1));
        assert!(snapshot.normalize().is_err());
    }

    #[test]
    fn test_normalize_repairs_legacy_documents() {
        // 旧 bot 的文档：无 id、无报名顺序、players 缺项
        let mut snapshot = snapshot_of(vec![team("Beta", 2, 0, 0), team("Alpha", 1, 0, 0)]);
        snapshot.players.remove("2");

        let (fixed, repaired) = snapshot.normalize().unwrap();
        assert!(repaired);
        assert_eq!(fixed.teams["Alpha"].sign_up_position, 0);
        assert_eq!(fixed.teams["Beta"].sign_up_position, 1);
        assert_eq!(fixed.teams["Alpha"].id, 1);
        assert_eq!(fixed.teams["Beta"].id, 2);
        assert_eq!(fixed.settings.next_id, 3);
        assert_eq!(fixed.players.get("2").map(String::as_str), Some("Beta"));
    }

    #[test]
    fn test_normalize_closes_position_gaps_in_order() {
        let snapshot = snapshot_of(vec![
            team("A", 1, 0, 1),
            team("C", 3, 4, 3),
            team("B", 2, 2, 2),
        ]);
        let (fixed, repaired) = snapshot.normalize().unwrap();
        assert!(repaired);
        assert_eq!(fixed.teams["A"].sign_up_position, 0);
        assert_eq!(fixed.teams["B"].sign_up_position, 1);
        assert_eq!(fixed.teams["C"].sign_up_position, 2);
    }

    #[test]
    fn test_normalize_keeps_next_id_ahead_of_removed_teams() {
        let mut snapshot = snapshot_of(vec![team("A", 1, 0, 3)]);
        snapshot.settings.next_id = 10;
        let (fixed, repaired) = snapshot.normalize().unwrap();
        assert!(!repaired);
        assert_eq!(fixed.settings.next_id, 10);
    }

    #[test]
    fn test_normalize_fills_legacy_ids_in_sign_up_order() {
        // 中间混入带 ID 的队伍：前面的空位够用，后面的从计数器取号
        let mut snapshot = snapshot_of(vec![
            team("A", 1, 0, 0),
            team("B", 2, 1, 5),
            team("C", 3, 2, 0),
        ]);
        snapshot.settings.next_id = 6;

        let (fixed, repaired) = snapshot.normalize().unwrap();
        assert!(repaired);
        assert_eq!(fixed.teams["A"].id, 1);
        assert_eq!(fixed.teams["B"].id, 5);
        assert_eq!(fixed.teams["C"].id, 6);
        assert_eq!(fixed.settings.next_id, 7);
    }

    #[test]
    fn test_normalize_rejects_legacy_team_without_free_id() {
        let snapshot = snapshot_of(vec![team("A", 1, 0, 0), team("B", 2, 1, 1)]);
        let err = snapshot.normalize().unwrap_err();
        assert!(err.to_string().contains("no free id"));
    }

    #[test]
    fn test_normalize_rejects_ids_out_of_sign_up_order() {
        let snapshot = snapshot_of(vec![team("A", 1, 0, 2), team("B", 2, 1, 1)]);
        let err = snapshot.normalize().unwrap_err();
        assert!(err.to_string().contains("out of sign-up order"));
    }

    #[test]
    fn test_commit_survives_failed_players_rename() {
        let temp = tempdir().unwrap();
        let store = JsonFileStore::new(temp.path().to_path_buf());

        // players.json 被占成非空目录，rename 必然失败
        let blocker = temp.path().join(PLAYERS_DOCUMENT);
        fs::create_dir_all(blocker.join("occupied")).unwrap();

        let snapshot = snapshot_of(vec![team("Alpha", 1, 0, 1)]);
        store.commit(&snapshot).unwrap();

        let content = fs::read_to_string(temp.path().join(TEAMS_DOCUMENT)).unwrap();
        assert!(content.contains("Alpha"));
        assert!(!temp.path().join("players.json.tmp").exists());

        fs::remove_dir_all(&blocker).unwrap();
        let (loaded, repaired) = store.load().unwrap().normalize().unwrap();
        assert!(repaired);
        assert_eq!(loaded.players.get("1").map(String::as_str), Some("Alpha"));
    }

    #[test]
    fn test_memory_store_failure_injection() {
        let store = MemoryStore::new();
        store.fail_next_commit();
        assert!(store.commit(&Snapshot::default()).is_err());
        assert_eq!(store.commits(), 0);
        store.commit(&Snapshot::default()).unwrap();
        assert_eq!(store.commits(), 1);
    }
}
