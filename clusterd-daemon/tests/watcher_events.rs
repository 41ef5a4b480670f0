use std::fs;
use std::path::Path;
use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::broadcast;
use tokio::time::{sleep, Instant};

use clusterd_core::{FileId, FileStatus, ManagerId, ResponseMode};
use clusterd_daemon::protocol::parse_rows;
use clusterd_daemon::{send_command, watcher, Command, DaemonConfig, Dispatcher};
use clusterd_store::StatusStore;

const WATCH_LIST: &str = r#"{
    "/etc/": { "source": "master", "files": ["client.keys"] },
    "/etc/shared/": { "source": "all" },
    "/queue/agent-info/": { "source": "client" }
}"#;

fn layout(root: &Path) {
    fs::create_dir_all(root.join("etc/shared")).unwrap();
    fs::create_dir_all(root.join("queue/agent-info")).unwrap();
    fs::create_dir_all(root.join("framework/wazuh")).unwrap();
    fs::write(root.join("framework/wazuh/cluster.json"), WATCH_LIST).unwrap();
    fs::write(root.join("etc/shared/agent.conf"), "<agent_config/>").unwrap();
    fs::write(root.join("etc/client.keys"), "001 agent any key\n").unwrap();
}

async fn status_of(config: &DaemonConfig, manager: &str, file: &str) -> Option<FileStatus> {
    let reply = send_command(
        &config.socket_path,
        config.response_mode,
        &Command::Select {
            manager_id: ManagerId::from(manager),
            limit: 100,
            offset: 0,
        },
    )
    .await
    .expect("select");
    parse_rows(&reply)
        .expect("rows")
        .into_iter()
        .find(|(id, _)| id.as_str() == file)
        .map(|(_, status)| status)
}

async fn mark_synchronized(config: &DaemonConfig, manager: &str, file: &str) {
    for command in [
        Command::Insert {
            manager_id: ManagerId::from(manager),
            file_id: FileId::from(file),
        },
        Command::Update2 {
            status: FileStatus::Synchronized,
            manager_id: ManagerId::from(manager),
            file_id: FileId::from(file),
        },
    ] {
        send_command(&config.socket_path, config.response_mode, &command)
            .await
            .expect("seed");
    }
}

/// Keep touching `path` until `manager`'s copy of `file` reads pending.
async fn touch_until_pending(config: &DaemonConfig, path: &Path, manager: &str, file: &str) {
    let deadline = Instant::now() + Duration::from_secs(10);
    let mut round = 0;
    loop {
        round += 1;
        fs::write(path, format!("revision {round}\n")).unwrap();
        sleep(Duration::from_millis(100)).await;
        if status_of(config, manager, file).await == Some(FileStatus::Pending) {
            return;
        }
        assert!(
            Instant::now() < deadline,
            "{file} never went back to pending"
        );
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn modified_files_are_marked_pending_for_every_manager() {
    let root = TempDir::new().unwrap();
    layout(root.path());
    let mut config = DaemonConfig::for_root(root.path());
    config.node_role = "master".to_string();
    assert_eq!(config.response_mode, ResponseMode::PerRead);

    let store = StatusStore::open(&config.db_path).unwrap();
    let dispatcher = Dispatcher::bind(&config.socket_path, store, config.response_mode).unwrap();
    let (shutdown, _) = broadcast::channel(4);
    let dispatcher_task = tokio::spawn(dispatcher.run(shutdown.subscribe()));
    let watcher_task = tokio::spawn(watcher::run(config.clone(), shutdown.subscribe()));

    mark_synchronized(&config, "node01", "/etc/shared/agent.conf").await;
    mark_synchronized(&config, "node02", "/etc/shared/agent.conf").await;
    mark_synchronized(&config, "node01", "/etc/client.keys").await;
    mark_synchronized(&config, "node01", "/etc/ossec.conf").await;

    touch_until_pending(
        &config,
        &root.path().join("etc/shared/agent.conf"),
        "node01",
        "/etc/shared/agent.conf",
    )
    .await;
    assert_eq!(
        status_of(&config, "node02", "/etc/shared/agent.conf").await,
        Some(FileStatus::Pending)
    );

    // Writes under /etc/ other than the credential file are filtered out.
    fs::write(root.path().join("etc/ossec.conf"), "<ossec_config/>").unwrap();
    touch_until_pending(
        &config,
        &root.path().join("etc/client.keys"),
        "node01",
        "/etc/client.keys",
    )
    .await;
    assert_eq!(
        status_of(&config, "node01", "/etc/ossec.conf").await,
        Some(FileStatus::Synchronized)
    );

    let _ = shutdown.send(());
    watcher_task.await.unwrap().unwrap();
    dispatcher_task.await.unwrap().unwrap();
}

#[tokio::test]
async fn missing_watch_list_stops_the_watcher() {
    let root = TempDir::new().unwrap();
    let config = DaemonConfig::for_root(root.path());
    let (shutdown, _) = broadcast::channel::<()>(1);

    let err = watcher::run(config, shutdown.subscribe())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("cluster.json"), "got: {err}");
}
