use clusterd_core::{FileId, FileStatus, ManagerId};
use clusterd_store::{StatusStore, StoreError};
use rstest::rstest;
use tempfile::TempDir;

fn m(s: &str) -> ManagerId {
    ManagerId::from(s)
}

fn f(s: &str) -> FileId {
    FileId::from(s)
}

fn seeded(tmp: &TempDir) -> StatusStore {
    let mut store = StatusStore::open(&tmp.path().join("var/db/cluster_db")).expect("open store");
    store
        .with_batch(|b| {
            for manager in ["node01", "node02"] {
                for file in ["/etc/client.keys", "/etc/shared/default/agent.conf"] {
                    b.upsert(&m(manager), &f(file))?;
                }
            }
            b.set_status(FileStatus::Synchronized, &m("node01"), &f("/etc/client.keys"))?;
            b.set_status(FileStatus::Failed, &m("node02"), &f("/etc/client.keys"))?;
            b.set_status(
                FileStatus::Synchronized,
                &m("node02"),
                &f("/etc/shared/default/agent.conf"),
            )?;
            Ok(())
        })
        .expect("seed");
    store
}

fn status_of(store: &mut StatusStore, manager: &str, file: &str) -> Option<FileStatus> {
    store
        .with_batch(|b| b.query(&m(manager), 1000, 0))
        .expect("query")
        .into_iter()
        .find(|r| r.file_id.as_str() == file)
        .map(|r| r.status)
}

#[test]
fn open_creates_parent_directories() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("var/db/cluster_db");
    let store = StatusStore::open(&path).expect("open");
    assert_eq!(store.path(), Some(path.as_path()));
    assert!(path.parent().unwrap().is_dir());
}

#[test]
fn rows_survive_reopen() {
    let tmp = TempDir::new().unwrap();
    drop(seeded(&tmp));

    let mut reopened = StatusStore::open(&tmp.path().join("var/db/cluster_db")).expect("reopen");
    assert_eq!(reopened.with_batch(|b| b.count(&m("node01"))).unwrap(), 2);
    assert_eq!(
        status_of(&mut reopened, "node02", "/etc/client.keys"),
        Some(FileStatus::Failed)
    );
}

#[test]
fn set_all_pending_by_file_touches_every_manager_and_nothing_else() {
    let tmp = TempDir::new().unwrap();
    let mut store = seeded(&tmp);

    let affected = store
        .with_batch(|b| b.set_all_pending_by_file(&f("/etc/client.keys")))
        .unwrap();
    assert_eq!(affected, 2);

    assert_eq!(
        status_of(&mut store, "node01", "/etc/client.keys"),
        Some(FileStatus::Pending)
    );
    assert_eq!(
        status_of(&mut store, "node02", "/etc/client.keys"),
        Some(FileStatus::Pending)
    );
    assert_eq!(
        status_of(&mut store, "node02", "/etc/shared/default/agent.conf"),
        Some(FileStatus::Synchronized),
        "other files keep their status"
    );
}

#[test]
fn set_all_pending_for_unknown_file_is_a_no_op() {
    let tmp = TempDir::new().unwrap();
    let mut store = seeded(&tmp);
    let affected = store
        .with_batch(|b| b.set_all_pending_by_file(&f("/etc/unknown")))
        .unwrap();
    assert_eq!(affected, 0);
}

#[rstest]
#[case(1000, 0, 2)]
#[case(1, 0, 1)]
#[case(1, 1, 1)]
#[case(10, 2, 0)]
#[case(0, 0, 0)]
fn query_pages_through_a_manager(
    #[case] limit: u32,
    #[case] offset: u32,
    #[case] expected: usize,
) {
    let tmp = TempDir::new().unwrap();
    let mut store = seeded(&tmp);
    let rows = store
        .with_batch(|b| b.query(&m("node01"), limit, offset))
        .unwrap();
    assert_eq!(rows.len(), expected);
    assert!(rows.iter().all(|r| r.manager_id == m("node01")));
}

#[test]
fn paging_visits_each_row_once() {
    let tmp = TempDir::new().unwrap();
    let mut store = seeded(&tmp);
    let first = store.with_batch(|b| b.query(&m("node02"), 1, 0)).unwrap();
    let second = store.with_batch(|b| b.query(&m("node02"), 1, 1)).unwrap();
    assert_ne!(first[0].file_id, second[0].file_id);
}

#[test]
fn count_for_unknown_manager_is_zero() {
    let tmp = TempDir::new().unwrap();
    let mut store = seeded(&tmp);
    assert_eq!(store.with_batch(|b| b.count(&m("node99"))).unwrap(), 0);
}

#[test]
fn failing_closure_does_not_commit() {
    let tmp = TempDir::new().unwrap();
    let mut store = seeded(&tmp);

    let result: Result<(), StoreError> = store.with_batch(|b| {
        b.upsert(&m("node03"), &f("/etc/client.keys"))?;
        Err(StoreError::Sqlite(rusqlite::Error::QueryReturnedNoRows))
    });
    assert!(result.is_err());
    assert_eq!(store.with_batch(|b| b.count(&m("node03"))).unwrap(), 0);
}
