#![cfg(unix)]

mod common;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use common::{config, credentials};
use safe_launcher::{
    AccessRights, Collaborators, DirectoryGrant, DirectoryId, Launcher, MemoryStore,
};
use tokio::time::{sleep, Instant};

fn find_stub_binary() -> Option<PathBuf> {
    // target/debug/deps/<test-bin>
    let exe = std::env::current_exe().ok()?;
    let target_dir = exe.parent().and_then(|p| p.parent())?;
    let candidate = target_dir.join("launcher-app-stub");
    candidate.is_file().then_some(candidate)
}

#[tokio::test]
async fn real_process_completes_the_handshake() {
    let Some(stub) = find_stub_binary() else {
        eprintln!("launcher-app-stub not built; run `cargo build --workspace` first. Skipping.");
        return;
    };
    let out_dir = tempfile::tempdir().unwrap();
    let grants_out = out_dir.path().join("grants.json");

    let launcher = Launcher::create_account(
        config("stub-host", 10_000, 5_000),
        Collaborators::new(Arc::new(MemoryStore::new())),
        credentials("stub", "pw"),
    )
    .await
    .unwrap();
    launcher
        .add_app(
            "Stub",
            stub.clone(),
            vec!["--grants-out".into(), grants_out.display().to_string()],
            vec![],
            false,
        )
        .await
        .unwrap();
    launcher
        .update_app_safe_drive_access("Stub", AccessRights::ReadWrite)
        .await
        .unwrap();

    launcher.launch_app("Stub").await.unwrap();

    // The stub writes its grants only after the launcher hangs up.
    let deadline = Instant::now() + Duration::from_secs(5);
    while !grants_out.is_file() && Instant::now() < deadline {
        sleep(Duration::from_millis(25)).await;
    }
    sleep(Duration::from_millis(50)).await;
    let body = std::fs::read_to_string(&grants_out).expect("stub wrote its grants");
    let grants: Vec<DirectoryGrant> = serde_json::from_str(&body).unwrap();
    assert_eq!(
        grants,
        vec![DirectoryGrant::new(
            DirectoryId::safe_drive(),
            AccessRights::ReadWrite
        )]
    );
}
