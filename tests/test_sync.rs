//! Multi-device flows over a shared filesystem remote: convergence,
//! update-beats-delete, note dedup, idempotent push.

use saddlebag::{NewTask, TaskPatch, TaskPriority, TaskService, TaskStatus};
use saddlebag_sync::{FilesystemRemote, SyncEngine, SyncReport};
use std::path::Path;
use tempfile::TempDir;

fn device() -> TaskService {
    TaskService::open_in_memory().unwrap()
}

fn sync(device: &mut TaskService, remote_path: &Path) -> SyncReport {
    let remote = FilesystemRemote::open(remote_path).unwrap();
    let mut engine = SyncEngine::new(device.store_mut(), Box::new(remote));
    let report = engine.sync().unwrap();
    engine.close().unwrap();
    report
}

/// Raw `tasks` rows, for the byte-level convergence check. Every column
/// is TEXT (or NULL), so this is the table as stored.
fn raw_tasks(device: &TaskService) -> Vec<Vec<Option<String>>> {
    let conn = device.store().conn();
    let mut stmt = conn.prepare("SELECT * FROM tasks ORDER BY id").unwrap();
    let cols = stmt.column_count();
    stmt.query_map([], |row| {
        (0..cols)
            .map(|i| row.get::<_, Option<String>>(i))
            .collect::<Result<Vec<_>, _>>()
    })
    .unwrap()
    .collect::<Result<_, _>>()
    .unwrap()
}

/// S1: three devices, field-level LWW, full convergence.
#[test]
fn test_three_device_convergence() {
    let tmp = TempDir::new().unwrap();
    let remote = tmp.path().join("shared/oplog.db");
    let (mut d1, mut d2, mut d3) = (device(), device(), device());

    let task = d1
        .add(NewTask {
            title: "Shared work".into(),
            priority: Some(TaskPriority::Low),
            ..Default::default()
        })
        .unwrap();

    assert_eq!(sync(&mut d1, &remote).pushed, 1);
    assert_eq!(sync(&mut d2, &remote).pulled, 1);
    assert_eq!(sync(&mut d3, &remote).pulled, 1);

    d2.update(
        &task.id,
        TaskPatch {
            status: Some(TaskStatus::InProgress),
            ..Default::default()
        },
    )
    .unwrap()
    .unwrap();
    sync(&mut d2, &remote);

    sync(&mut d3, &remote);
    d3.update(
        &task.id,
        TaskPatch {
            priority: Some(TaskPriority::Urgent),
            ..Default::default()
        },
    )
    .unwrap()
    .unwrap();
    sync(&mut d3, &remote);

    sync(&mut d1, &remote);
    sync(&mut d2, &remote);
    sync(&mut d3, &remote);

    for d in [&d1, &d2, &d3] {
        let t = d.get(&task.id).unwrap().unwrap();
        assert_eq!(t.status, TaskStatus::InProgress);
        assert_eq!(t.priority, TaskPriority::Urgent);
    }
    assert_eq!(raw_tasks(&d1), raw_tasks(&d2));
    assert_eq!(raw_tasks(&d2), raw_tasks(&d3));
}

/// S2: a delete loses to an update stamped at or after it.
#[test]
fn test_update_beats_delete_across_devices() {
    let tmp = TempDir::new().unwrap();
    let remote = tmp.path().join("oplog.db");
    let (mut da, mut db) = (device(), device());

    let task = da
        .add(NewTask {
            title: "Contested".into(),
            ..Default::default()
        })
        .unwrap();
    sync(&mut da, &remote);
    sync(&mut db, &remote);

    // A deletes first; B edits afterwards without having seen the delete.
    assert!(da.delete(&task.id).unwrap());
    db.update(
        &task.id,
        TaskPatch {
            status: Some(TaskStatus::Done),
            ..Default::default()
        },
    )
    .unwrap()
    .unwrap();

    sync(&mut da, &remote);
    sync(&mut db, &remote);
    sync(&mut da, &remote);

    for d in [&da, &db] {
        let t = d.get(&task.id).unwrap().expect("task must be restored");
        assert_eq!(t.status, TaskStatus::Done);
        assert!(!t.is_deleted());
    }
    assert_eq!(raw_tasks(&da), raw_tasks(&db));
}

/// S3: the same note added on two devices survives exactly once.
#[test]
fn test_note_dedup_across_devices() {
    let tmp = TempDir::new().unwrap();
    let remote = tmp.path().join("oplog.db");
    let (mut d1, mut d2) = (device(), device());

    let task = d1
        .add(NewTask {
            title: "Noted twice".into(),
            ..Default::default()
        })
        .unwrap();
    sync(&mut d1, &remote);
    sync(&mut d2, &remote);

    d1.add_note(&task.id, "X").unwrap();
    d2.add_note(&task.id, "X").unwrap();

    sync(&mut d1, &remote);
    sync(&mut d2, &remote);
    sync(&mut d1, &remote);

    for d in [&d1, &d2] {
        let t = d.get(&task.id).unwrap().unwrap();
        assert_eq!(t.notes, vec!["X"]);
    }
}

/// S4: push is idempotent and the remote holds each entry once.
#[test]
fn test_idempotent_push() {
    let tmp = TempDir::new().unwrap();
    let remote_path = tmp.path().join("oplog.db");
    let mut d1 = device();

    let task = d1
        .add(NewTask {
            title: "Counted".into(),
            ..Default::default()
        })
        .unwrap();
    d1.update(
        &task.id,
        TaskPatch {
            status: Some(TaskStatus::Done),
            ..Default::default()
        },
    )
    .unwrap()
    .unwrap();

    let remote = FilesystemRemote::open(&remote_path).unwrap();
    let mut engine = SyncEngine::new(d1.store_mut(), Box::new(remote));
    assert_eq!(engine.push().unwrap(), 2);
    assert_eq!(engine.push().unwrap(), 0);
    engine.close().unwrap();

    let mut inspect = FilesystemRemote::open(&remote_path).unwrap();
    let batch = saddlebag_sync::RemoteBackend::pull(&mut inspect, None).unwrap();
    assert_eq!(batch.entries.len(), 2);
}

/// A device that appears late still converges from the full log.
#[test]
fn test_late_joiner_catches_up() {
    let tmp = TempDir::new().unwrap();
    let remote = tmp.path().join("oplog.db");
    let mut d1 = device();

    let task = d1
        .add(NewTask {
            title: "History".into(),
            ..Default::default()
        })
        .unwrap();
    d1.add_note(&task.id, "first").unwrap();
    d1.update(
        &task.id,
        TaskPatch {
            status: Some(TaskStatus::InReview),
            ..Default::default()
        },
    )
    .unwrap()
    .unwrap();
    sync(&mut d1, &remote);

    let mut late = device();
    let report = sync(&mut late, &remote);
    assert_eq!(report.pulled, 3);

    let t = late.get(&task.id).unwrap().unwrap();
    assert_eq!(t.title, "History");
    assert_eq!(t.status, TaskStatus::InReview);
    assert_eq!(t.notes, vec!["first"]);
    assert_eq!(raw_tasks(&d1), raw_tasks(&late));
}

/// Pulls resume from the persisted cursor even with a tiny batch size.
#[test]
fn test_pull_pages_through_small_batches() {
    let tmp = TempDir::new().unwrap();
    let remote_path = tmp.path().join("oplog.db");
    let mut d1 = device();

    for i in 0..5 {
        d1.add(NewTask {
            title: format!("task {i}"),
            ..Default::default()
        })
        .unwrap();
    }
    sync(&mut d1, &remote_path);

    let mut late = device();
    let mut total = 0;
    loop {
        let remote = FilesystemRemote::open_with_batch_size(&remote_path, 2).unwrap();
        let mut engine = SyncEngine::new(late.store_mut(), Box::new(remote));
        let pulled = engine.pull().unwrap();
        engine.close().unwrap();
        if pulled == 0 {
            break;
        }
        total += pulled;
    }
    assert_eq!(total, 5);
    assert_eq!(late.list(&Default::default()).unwrap().len(), 5);
}
