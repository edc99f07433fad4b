//! Team 模块 - 锦标赛队伍报名和成员管理
//!
//! 提供队伍的创建、邀请、加入、退出、踢人、解散以及报名顺序维护。
//!
//! ## 子模块
//!
//! - `record` - 队伍记录（teams.json 的数据结构）
//! - `error` - 队伍操作的失败原因
//! - `registry` - 队伍注册表，维护成员索引并写透到存储
//!
//! ## 数据存储
//!
//! 数据存储在 `~/.config/tourney-registry/` 目录：
//! - `teams.json` - 队伍名 -> 队伍记录
//! - `players.json` - 成员 ID -> 队伍名
//! - `settings.json` - 人数上限、队伍数上限和 ID 计数器

pub mod error;
pub mod record;
pub mod registry;

pub use error::RegistryError;
pub use record::{MemberId, Team};
pub use registry::{Registration, TeamRegistry};
