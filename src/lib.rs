//! Tourney Registry - 锦标赛队伍报名与成员管理

pub mod cli;
pub mod config;
pub mod dispatch;
pub mod store;
pub mod team;

pub use config::Config;
pub use dispatch::{Command, CommandDispatcher, DispatchError, Reply};
pub use store::{DocumentStore, JsonFileStore, MemoryStore, Settings, Snapshot, StoreError};
pub use team::{MemberId, Registration, RegistryError, Team, TeamRegistry};
