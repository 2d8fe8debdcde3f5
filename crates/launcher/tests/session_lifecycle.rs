mod common;

use std::sync::Arc;

use anyhow::{ensure, Context};
use common::{collaborators, config, credentials, new_launcher, ScriptedSpawner};
use safe_launcher::{
    AccessRights, Collaborators, DirectoryId, DiskStore, Launcher, LauncherConfig, LauncherError,
    Locality, MemoryStore, StoreError,
};

fn names(entries: Vec<safe_launcher::AppEntry>) -> Vec<String> {
    entries.into_iter().map(|e| e.name.to_string()).collect()
}

#[tokio::test]
async fn clean_session_save_issues_no_writes() {
    let (launcher, store, _spawner) = new_launcher("m1", 5_000, 5_000).await;
    let writes = store.put_count();

    assert!(!launcher.save_session(false).await.unwrap());
    assert_eq!(store.put_count(), writes);

    assert!(launcher.save_session(true).await.unwrap());
    assert_eq!(store.put_count(), writes + 1);
}

#[tokio::test]
async fn add_then_save_clears_unsaved_changes() {
    let (launcher, store, _spawner) = new_launcher("m1", 5_000, 5_000).await;
    assert!(!launcher.has_unsaved_changes().await.unwrap());

    launcher
        .add_app("Foo", "/apps/foo", vec![], vec![], false)
        .await
        .unwrap();
    assert!(launcher.has_unsaved_changes().await.unwrap());
    assert_eq!(names(launcher.apps(Locality::Local).await.unwrap()), ["Foo"]);
    assert!(launcher.apps(Locality::NonLocal).await.unwrap().is_empty());

    let writes = store.put_count();
    assert!(launcher.save_session(false).await.unwrap());
    assert_eq!(store.put_count(), writes + 1);
    assert!(!launcher.has_unsaved_changes().await.unwrap());
}

#[tokio::test]
async fn network_failure_on_save_is_retryable_and_changes_nothing() {
    let (launcher, store, _spawner) = new_launcher("m1", 5_000, 5_000).await;
    launcher
        .add_app("Foo", "/apps/foo", vec![], vec![], false)
        .await
        .unwrap();
    let stored = store.blob(&credentials("alice", "correct horse").locator());

    store.fail_next_put(StoreError::Unavailable("timeout".into()));
    let err = launcher.save_session(false).await.unwrap_err();
    assert!(err.is_retryable());
    assert!(launcher.has_unsaved_changes().await.unwrap());
    assert_eq!(
        store.blob(&credentials("alice", "correct horse").locator()),
        stored
    );
    assert_eq!(names(launcher.apps(Locality::Local).await.unwrap()), ["Foo"]);

    assert!(launcher.save_session(false).await.unwrap());
    assert!(!launcher.has_unsaved_changes().await.unwrap());
}

#[tokio::test]
async fn rejected_save_is_fatal() {
    let (launcher, store, _spawner) = new_launcher("m1", 5_000, 5_000).await;
    launcher
        .add_app("Foo", "/apps/foo", vec![], vec![], false)
        .await
        .unwrap();
    store.fail_next_put(StoreError::Rejected("quota exceeded".into()));
    let err = launcher.save_session(false).await.unwrap_err();
    assert!(matches!(err, LauncherError::Storage(_)));
    assert!(!err.is_retryable());
    assert!(launcher.has_unsaved_changes().await.unwrap());
}

#[tokio::test]
async fn revert_without_changes_is_a_no_op() {
    let (launcher, _store, _spawner) = new_launcher("m1", 5_000, 5_000).await;
    launcher
        .add_app("Foo", "/apps/foo", vec![], vec![], false)
        .await
        .unwrap();
    launcher.save_session(false).await.unwrap();
    let before = launcher.apps(Locality::Local).await.unwrap();

    launcher.revert_to_last_saved_session().await.unwrap();
    assert_eq!(launcher.apps(Locality::Local).await.unwrap(), before);
    assert!(!launcher.has_unsaved_changes().await.unwrap());
}

#[tokio::test]
async fn revert_undoes_a_run_of_mutations() {
    let (launcher, _store, _spawner) = new_launcher("m1", 5_000, 5_000).await;
    launcher
        .add_app("Keep", "/apps/keep", vec![], vec![], false)
        .await
        .unwrap();
    launcher.save_session(false).await.unwrap();
    let saved = launcher.apps(Locality::Local).await.unwrap();

    launcher
        .add_app("Temp", "/apps/temp", vec![], vec![], true)
        .await
        .unwrap();
    launcher.update_app_name("Keep", "Renamed").await.unwrap();
    launcher
        .update_app_safe_drive_access("Renamed", AccessRights::ReadWrite)
        .await
        .unwrap();
    // A failing call in the middle of the run changes nothing.
    assert!(launcher.remove_app_locally("Nope").await.is_err());

    launcher.revert_to_last_saved_session().await.unwrap();
    assert_eq!(launcher.apps(Locality::Local).await.unwrap(), saved);
    assert!(!launcher.has_unsaved_changes().await.unwrap());
}

#[tokio::test]
async fn failed_mutators_leave_the_registry_untouched() {
    let (launcher, _store, _spawner) = new_launcher("m1", 5_000, 5_000).await;
    launcher
        .add_app("A", "/apps/a", vec![], vec![], false)
        .await
        .unwrap();
    launcher
        .add_app("B", "/apps/b", vec![], vec![], false)
        .await
        .unwrap();
    launcher.save_session(false).await.unwrap();
    let before = launcher.apps(Locality::Local).await.unwrap();

    let failures = vec![
        launcher.add_app("A", "/elsewhere", vec![], vec![], false).await,
        launcher.add_app(" ", "/blank", vec![], vec![], false).await,
        launcher.link_app("A", "/apps/a", vec![], false).await,
        launcher.link_app("Missing", "/x", vec![], false).await,
        launcher.update_app_name("A", "B").await,
        launcher.update_app_path("Missing", "/x").await,
        launcher.update_app_args("Missing", vec![]).await,
        launcher.update_app_icon("Missing", vec![1]).await,
        launcher.update_app_auto_start("Missing", true).await,
        launcher
            .update_app_directory_access("Missing", DirectoryId::safe_drive(), None)
            .await,
        launcher.remove_app_from_network("A").await,
    ];
    for result in failures {
        assert!(result.is_err());
    }

    assert_eq!(launcher.apps(Locality::Local).await.unwrap(), before);
    assert!(launcher.apps(Locality::NonLocal).await.unwrap().is_empty());
    assert!(!launcher.has_unsaved_changes().await.unwrap());
}

#[tokio::test]
async fn login_errors_are_classified() {
    let store = Arc::new(MemoryStore::new());
    let spawner = ScriptedSpawner::new();
    Launcher::create_account(
        config("m1", 5_000, 5_000),
        collaborators(&store, &spawner),
        credentials("bob", "secret"),
    )
    .await
    .unwrap();

    let wrong = Launcher::login(
        config("m1", 5_000, 5_000),
        collaborators(&store, &spawner),
        credentials("bob", "guess"),
    )
    .await;
    assert!(matches!(wrong, Err(LauncherError::Authentication)));

    let unknown = Launcher::login(
        config("m1", 5_000, 5_000),
        collaborators(&store, &spawner),
        credentials("carol", "secret"),
    )
    .await;
    assert!(matches!(unknown, Err(LauncherError::AccountNotFound)));

    let again = Launcher::create_account(
        config("m1", 5_000, 5_000),
        collaborators(&store, &spawner),
        credentials("bob", "other password"),
    )
    .await;
    assert!(matches!(again, Err(LauncherError::AccountExists)));

    store.fail_next_fetch(StoreError::Unavailable("offline".into()));
    let offline = Launcher::login(
        config("m1", 5_000, 5_000),
        collaborators(&store, &spawner),
        credentials("bob", "secret"),
    )
    .await;
    assert!(matches!(offline, Err(ref e) if e.is_retryable()));

    let zero = Launcher::login(
        config("m1", 0, 5_000),
        collaborators(&store, &spawner),
        credentials("bob", "secret"),
    )
    .await;
    assert!(matches!(zero, Err(LauncherError::Config(_))));
}

#[tokio::test]
async fn apps_from_another_machine_must_be_linked() {
    let store = Arc::new(MemoryStore::new());
    let spawner = ScriptedSpawner::new();
    let laptop = Launcher::create_account(
        config("laptop", 5_000, 5_000),
        collaborators(&store, &spawner),
        credentials("dana", "pw"),
    )
    .await
    .unwrap();
    laptop
        .add_app("Bar", "/laptop/bar", vec![], vec![7, 7], false)
        .await
        .unwrap();
    laptop
        .update_app_safe_drive_access("Bar", AccessRights::ReadOnly)
        .await
        .unwrap();
    laptop
        .add_app("Baz", "/laptop/baz", vec![], vec![], false)
        .await
        .unwrap();
    laptop.logout_and_stop().await.unwrap();

    let desktop = Launcher::login(
        config("desktop", 5_000, 5_000),
        collaborators(&store, &spawner),
        credentials("dana", "pw"),
    )
    .await
    .unwrap();
    assert!(desktop.apps(Locality::Local).await.unwrap().is_empty());
    assert_eq!(
        names(desktop.apps(Locality::NonLocal).await.unwrap()),
        ["Bar", "Baz"]
    );
    assert!(matches!(
        desktop.launch_app("Bar").await,
        Err(LauncherError::NotFound(_))
    ));
    assert!(matches!(
        desktop.add_app("Bar", "/desktop/bar", vec![], vec![], false).await,
        Err(LauncherError::DuplicateApp(_))
    ));

    desktop
        .link_app("Bar", "/desktop/bar", vec!["--fast".into()], true)
        .await
        .unwrap();
    let local = desktop.apps(Locality::Local).await.unwrap();
    assert_eq!(names(local.clone()), ["Bar"]);
    assert_eq!(local[0].path.to_str(), Some("/desktop/bar"));
    assert_eq!(local[0].icon, vec![7, 7]);
    assert_eq!(
        local[0].permitted_dirs.get(&DirectoryId::safe_drive()),
        Some(&AccessRights::ReadOnly)
    );
    assert_eq!(
        names(desktop.apps(Locality::NonLocal).await.unwrap()),
        ["Baz"]
    );
    assert!(matches!(
        desktop.link_app("Bar", "/desktop/bar", vec![], false).await,
        Err(LauncherError::AlreadyLocal(_))
    ));
    assert!(matches!(
        desktop.remove_app_from_network("Bar").await,
        Err(LauncherError::NotFound(_))
    ));

    desktop.remove_app_from_network("Baz").await.unwrap();
    desktop.launch_app("Bar").await.unwrap();
    desktop.logout_and_stop().await.unwrap();

    let laptop = Launcher::login(
        config("laptop", 5_000, 5_000),
        collaborators(&store, &spawner),
        credentials("dana", "pw"),
    )
    .await
    .unwrap();
    // Linking on the desktop does not take the app away from the laptop.
    let local = laptop.apps(Locality::Local).await.unwrap();
    assert_eq!(names(local.clone()), ["Bar"]);
    assert_eq!(local[0].path.to_str(), Some("/laptop/bar"));
    assert!(!local[0].auto_start);
    assert!(laptop.apps(Locality::NonLocal).await.unwrap().is_empty());
    laptop.launch_app("Bar").await.unwrap();

    laptop.remove_app_locally("Bar").await.unwrap();
    assert_eq!(
        names(laptop.apps(Locality::NonLocal).await.unwrap()),
        ["Bar"]
    );
    laptop.logout_and_stop().await.unwrap();

    let desktop = Launcher::login(
        config("desktop", 5_000, 5_000),
        collaborators(&store, &spawner),
        credentials("dana", "pw"),
    )
    .await
    .unwrap();
    let local = desktop.apps(Locality::Local).await.unwrap();
    assert_eq!(names(local.clone()), ["Bar"]);
    assert_eq!(local[0].path.to_str(), Some("/desktop/bar"));
    assert_eq!(local[0].args, vec!["--fast"]);
}

#[tokio::test]
async fn logout_saves_and_invalidates() {
    let (launcher, store, spawner) = new_launcher("m1", 5_000, 5_000).await;
    launcher
        .add_app("Foo", "/apps/foo", vec![], vec![], false)
        .await
        .unwrap();

    store.fail_next_put(StoreError::Unavailable("flaky".into()));
    assert!(launcher.logout_and_stop().await.unwrap_err().is_retryable());
    assert!(launcher.has_unsaved_changes().await.unwrap());

    launcher.logout_and_stop().await.unwrap();
    assert!(matches!(
        launcher.apps(Locality::Local).await,
        Err(LauncherError::Stopped)
    ));
    assert!(matches!(
        launcher.save_session(true).await,
        Err(LauncherError::Stopped)
    ));
    assert!(matches!(
        launcher.logout_and_stop().await,
        Err(LauncherError::Stopped)
    ));

    let again = Launcher::login(
        config("m1", 5_000, 5_000),
        collaborators(&store, &spawner),
        credentials("alice", "correct horse"),
    )
    .await
    .unwrap();
    assert_eq!(names(again.apps(Locality::Local).await.unwrap()), ["Foo"]);
}

#[tokio::test]
async fn disk_store_round_trips_an_account() {
    let dir = tempfile::tempdir().unwrap();
    let spawner = ScriptedSpawner::new();
    let disk = || {
        Collaborators::new(Arc::new(DiskStore::new(dir.path().join("accounts"))))
            .with_spawner(spawner.clone())
    };

    let launcher = Launcher::create_account(
        config("m1", 5_000, 5_000),
        disk(),
        credentials("erin", "pw"),
    )
    .await
    .unwrap();
    launcher
        .add_app("Notes", "/apps/notes", vec!["-q".into()], vec![1, 2, 3], true)
        .await
        .unwrap();
    launcher
        .update_app_directory_access("Notes", DirectoryId::new("Docs"), Some(AccessRights::ReadWrite))
        .await
        .unwrap();
    launcher.save_session(false).await.unwrap();
    let saved = launcher.apps(Locality::Local).await.unwrap();
    launcher.logout_and_stop().await.unwrap();

    let restored = Launcher::login(config("m1", 5_000, 5_000), disk(), credentials("erin", "pw"))
        .await
        .unwrap();
    assert_eq!(restored.apps(Locality::Local).await.unwrap(), saved);
    assert!(matches!(
        Launcher::login(config("m1", 5_000, 5_000), disk(), credentials("erin", "nope")).await,
        Err(LauncherError::Authentication)
    ));
}

#[tokio::test]
async fn configured_store_dir_backs_the_default_collaborators() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let store_dir = dir.path().join("accounts");
    let file = LauncherConfig {
        connect_timeout_ms: 4_000,
        machine_id: Some("configured-host".into()),
        store_dir: Some(store_dir.clone()),
        ..LauncherConfig::default()
    };
    let config_path = dir.path().join("launcher.toml");
    std::fs::write(&config_path, toml::to_string(&file)?)?;

    let loaded = LauncherConfig::load(Some(&config_path));
    ensure!(loaded.connect_timeout_ms == 4_000, "file value ignored: {loaded:?}");
    let spawner = ScriptedSpawner::new();
    let defaults = || -> anyhow::Result<Collaborators> {
        Ok(Collaborators::from_config(&loaded)?.with_spawner(spawner.clone()))
    };

    let launcher =
        Launcher::create_account(loaded.clone(), defaults()?, credentials("fay", "pw")).await?;
    launcher
        .add_app("Journal", "/apps/journal", vec![], vec![], false)
        .await?;
    launcher.logout_and_stop().await?;

    let written = std::fs::read_dir(&store_dir)
        .context("store directory was not created")?
        .filter_map(Result::ok)
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "account"))
        .count();
    ensure!(written == 1, "expected one account file, found {written}");

    let again = Launcher::login(loaded.clone(), defaults()?, credentials("fay", "pw")).await?;
    ensure!(again.machine_id().as_str() == "configured-host");
    ensure!(names(again.apps(Locality::Local).await?) == ["Journal"]);
    Ok(())
}

#[tokio::test]
async fn unusable_store_root_is_not_reported_as_retryable() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let root = dir.path().join("plain-file");
    std::fs::write(&root, b"not a directory")?;

    let result = Launcher::create_account(
        config("m1", 5_000, 5_000),
        Collaborators::new(Arc::new(DiskStore::new(root))).with_spawner(ScriptedSpawner::new()),
        credentials("gus", "pw"),
    )
    .await;
    match result {
        Err(err) => {
            ensure!(matches!(err, LauncherError::Storage(_)), "got {err:?}");
            ensure!(!err.is_retryable());
        }
        Ok(_) => anyhow::bail!("account created on a file root"),
    }
    Ok(())
}

#[tokio::test]
async fn login_against_a_missing_store_leaves_no_trace() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let root = dir.path().join("never").join("made");

    let result = Launcher::login(
        config("m1", 5_000, 5_000),
        Collaborators::new(Arc::new(DiskStore::new(&root))).with_spawner(ScriptedSpawner::new()),
        credentials("hal", "pw"),
    )
    .await;
    ensure!(matches!(result, Err(LauncherError::AccountNotFound)));
    ensure!(!dir.path().join("never").exists());
    Ok(())
}
