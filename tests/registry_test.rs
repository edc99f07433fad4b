use std::fs;

use tempfile::tempdir;
use tourney_registry::{
    CommandDispatcher, Config, DocumentStore, JsonFileStore, RegistryError, TeamRegistry,
};

fn open(dir: &std::path::Path) -> TeamRegistry<JsonFileStore> {
    TeamRegistry::open(JsonFileStore::new(dir.to_path_buf())).unwrap()
}

#[test]
fn test_state_survives_reopen() {
    let temp = tempdir().unwrap();

    let registry = open(temp.path());
    registry.set_max_players(3).unwrap();
    registry.register(1, "Alpha").unwrap();
    registry.register(2, "Beta").unwrap();
    registry.invite(1, "Alpha", 10).unwrap();
    registry.accept(10, "Alpha").unwrap();
    registry.invite(1, "Alpha", 11).unwrap();
    let before = registry.snapshot();
    drop(registry);

    // 重新打开后 teams / players / settings 完全一致
    let reopened = open(temp.path());
    assert_eq!(reopened.snapshot(), before);
    assert_eq!(reopened.team_name_of(10), Some("Alpha".to_string()));
    assert_eq!(reopened.get("Alpha").unwrap().invites, vec![11]);
    assert!(reopened.invariant_violations().is_empty());

    // 再次写入后依然一致
    reopened.reject(11, "Alpha").unwrap();
    let again = open(temp.path());
    assert_eq!(again.snapshot(), reopened.snapshot());
}

#[test]
fn test_id_counter_survives_reopen_after_disband() {
    let temp = tempdir().unwrap();

    let registry = open(temp.path());
    registry.register(1, "Alpha").unwrap();
    let beta = registry.register(2, "Beta").unwrap();
    registry.disband(2, "Beta").unwrap();
    drop(registry);

    let reopened = open(temp.path());
    let gamma = reopened.register(3, "Gamma").unwrap();
    assert!(gamma.team.id > beta.team.id);
}

#[test]
fn test_duplicate_name_leaves_documents_unchanged() {
    let temp = tempdir().unwrap();
    let registry = open(temp.path());
    registry.register(1, "Alpha").unwrap();
    let teams_before = fs::read_to_string(temp.path().join("teams.json")).unwrap();

    let err = registry.register(2, "Alpha").unwrap_err();
    assert_eq!(err.code(), "DuplicateName");

    let teams_after = fs::read_to_string(temp.path().join("teams.json")).unwrap();
    assert_eq!(teams_before, teams_after);
}

#[test]
fn test_two_registries_see_each_others_writes_after_reload() {
    let temp = tempdir().unwrap();
    let first = open(temp.path());
    let second = open(temp.path());

    first.register(1, "Alpha").unwrap();
    assert!(!second.exists("Alpha"));

    second.reload().unwrap();
    assert!(second.exists("Alpha"));
}

#[test]
fn test_legacy_documents_are_loaded() {
    let temp = tempdir().unwrap();
    // 旧 bot 的数据格式：无 id / sign_up_position，无 settings.json
    fs::write(
        temp.path().join("teams.json"),
        r#"{
            "Alpha": {"name": "Alpha", "leader": 1, "members": [1, 2], "invites": [], "wins": 0, "losses": 0, "games": []},
            "Beta": {"name": "Beta", "leader": 3, "members": [3], "invites": [4], "wins": 2, "losses": 1, "games": []}
        }"#,
    )
    .unwrap();
    fs::write(temp.path().join("players.json"), r#"{"1": "Alpha", "2": "Alpha", "3": "Beta"}"#)
        .unwrap();

    let registry = open(temp.path());
    assert!(registry.invariant_violations().is_empty());
    assert_eq!(registry.get("Beta").unwrap().wins, 2);
    assert_eq!(registry.get("Alpha").unwrap().sign_up_position, 0);
    assert_eq!(registry.get("Beta").unwrap().sign_up_position, 1);

    registry.accept(4, "Beta").unwrap();
    assert_eq!(registry.team_name_of(4), Some("Beta".to_string()));
}

#[test]
fn test_structurally_invalid_documents_are_rejected() {
    let temp = tempdir().unwrap();
    fs::write(
        temp.path().join("teams.json"),
        r#"{
            "Alpha": {"name": "Alpha", "leader": 1, "members": [1, 2]},
            "Beta": {"name": "Beta", "leader": 3, "members": [3, 2]}
        }"#,
    )
    .unwrap();

    let result = TeamRegistry::open(JsonFileStore::new(temp.path().to_path_buf()));
    assert!(result.is_err());
}

#[test]
fn test_dispatcher_against_file_store() {
    let temp = tempdir().unwrap();
    let config = Config::load_from(temp.path().to_path_buf()).unwrap();
    let registry = TeamRegistry::open(config.open_store()).unwrap();
    let dispatcher = CommandDispatcher::new(&registry, &config.prefix);

    for (actor, line) in [
        (1, "-register Night Owls"),
        (1, "-invite <@2>"),
        (2, "-accept Night Owls"),
        (1, "-kick <@2>"),
    ] {
        let reply = dispatcher.handle(actor, false, line).unwrap();
        assert!(reply.ok, "{} failed: {}", line, reply.text);
    }

    let reply = dispatcher.handle(1, false, "-kick <@2>").unwrap();
    assert_eq!(reply.code.as_deref(), Some("NotMember"));

    let stored = config.open_store().load().unwrap();
    assert_eq!(stored.teams["Night Owls"].members, vec![1]);
    assert!(!stored.players.contains_key("2"));
}

#[test]
fn test_team_full_with_default_limit() {
    let temp = tempdir().unwrap();
    let registry = open(temp.path());
    registry.register(1, "Alpha").unwrap();
    registry.invite(1, "Alpha", 2).unwrap();

    assert!(matches!(
        registry.invite(1, "Alpha", 3),
        Err(RegistryError::TeamFull { max_players: 2, .. })
    ));
}

#[test]
fn test_players_rename_failure_still_commits() {
    let temp = tempdir().unwrap();
    let registry = open(temp.path());

    // players.json 被占成非空目录，teams.json 仍能替换
    let blocker = temp.path().join("players.json");
    fs::create_dir_all(blocker.join("occupied")).unwrap();

    let registration = registry.register(1, "Alpha").unwrap();
    assert_eq!(registration.team.name, "Alpha");
    assert!(registry.exists("Alpha"));
    assert_eq!(registry.team_name_of(1), Some("Alpha".to_string()));

    let teams = fs::read_to_string(temp.path().join("teams.json")).unwrap();
    assert!(teams.contains("\"Alpha\""));

    // 内存与磁盘一致：重新打开后同样存在，players 由 teams 重建
    fs::remove_dir_all(&blocker).unwrap();
    let reopened = open(temp.path());
    assert_eq!(reopened.snapshot().teams, registry.snapshot().teams);
    assert_eq!(reopened.team_name_of(1), Some("Alpha".to_string()));
    assert!(reopened.invariant_violations().is_empty());
}

#[test]
fn test_mixed_legacy_ids_pass_check() {
    let temp = tempdir().unwrap();
    fs::write(
        temp.path().join("teams.json"),
        r#"{
            "Alpha": {"name": "Alpha", "leader": 1, "members": [1], "sign_up_position": 0},
            "Beta": {"name": "Beta", "leader": 2, "members": [2], "sign_up_position": 1, "id": 4},
            "Gamma": {"name": "Gamma", "leader": 3, "members": [3], "sign_up_position": 2}
        }"#,
    )
    .unwrap();

    let registry = open(temp.path());
    let ids: Vec<u64> = registry.teams().iter().map(|t| t.id).collect();
    assert_eq!(ids, vec![1, 4, 5]);
    assert!(registry.invariant_violations().is_empty());
}
