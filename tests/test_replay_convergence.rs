//! Replay laws over whole batches: order-independence, idempotence, and
//! out-of-order delivery to a fresh device.

use saddlebag::oplog::{replay, Op, OplogEntry};
use saddlebag::store::repository;
use saddlebag::{ListFilter, Store, TaskStatus};

fn entry(id: &str, task: &str, op: Op, ts: &str) -> OplogEntry {
    OplogEntry {
        id: id.into(),
        task_id: task.into(),
        device_id: "dev-a".into(),
        op,
        timestamp: ts.into(),
    }
}

fn create(id: &str, task: &str, title: &str, ts: &str) -> OplogEntry {
    let value = serde_json::json!({
        "id": task,
        "title": title,
        "status": "todo",
        "priority": "medium",
        "owner": null,
        "due_at": null,
        "blocked_by": [],
        "labels": [],
        "notes": [],
        "metadata": {},
        "created_at": ts,
        "updated_at": ts,
        "deleted_at": null,
    })
    .to_string();
    entry(id, task, Op::Create { value }, ts)
}

fn update(id: &str, task: &str, field: &str, value: &str, ts: &str) -> OplogEntry {
    entry(
        id,
        task,
        Op::Update {
            field: field.into(),
            value: Some(value.into()),
        },
        ts,
    )
}

fn snapshot(store: &Store) -> Vec<saddlebag::Task> {
    repository::list(
        store.conn(),
        &ListFilter {
            sort: saddlebag::SortKey::Created,
            ..Default::default()
        },
    )
    .unwrap()
}

/// Every permutation of the batch must converge on identical state.
#[test]
fn test_all_permutations_converge() {
    let batch = vec![
        create("e1", "t1", "Permuted", "2026-01-01T00:00:00.000Z"),
        update("e2", "t1", "status", "in_progress", "2026-01-01T00:00:01.000Z"),
        entry("e3", "t1", Op::Delete, "2026-01-01T00:00:02.000Z"),
        update("e4", "t1", "status", "done", "2026-01-01T00:00:03.000Z"),
    ];

    let mut reference: Option<Vec<saddlebag::Task>> = None;
    for permutation in permutations(&batch) {
        let mut store = Store::open_in_memory().unwrap();
        replay::apply(store.conn_mut(), &permutation).unwrap();
        let state = snapshot(&store);
        match &reference {
            None => reference = Some(state),
            Some(expected) => assert_eq!(&state, expected),
        }
    }

    // The later update out-ranks the delete, so the task survives as done.
    let tasks = reference.unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].status, TaskStatus::Done);
    assert!(!tasks[0].is_deleted());
}

/// Splitting one history across arbitrary batch boundaries must not
/// change the outcome either.
#[test]
fn test_batch_boundaries_do_not_matter() {
    let batch = vec![
        create("e1", "t1", "Split", "2026-01-01T00:00:00.000Z"),
        update("e2", "t1", "priority", "urgent", "2026-01-01T00:00:01.000Z"),
        update("e3", "t1", "notes", "left half", "2026-01-01T00:00:02.000Z"),
        update("e4", "t1", "notes", "right half", "2026-01-01T00:00:03.000Z"),
    ];

    let mut whole = Store::open_in_memory().unwrap();
    replay::apply(whole.conn_mut(), &batch).unwrap();

    for split in 0..=batch.len() {
        let mut piecewise = Store::open_in_memory().unwrap();
        replay::apply(piecewise.conn_mut(), &batch[..split]).unwrap();
        replay::apply(piecewise.conn_mut(), &batch[split..]).unwrap();
        assert_eq!(snapshot(&piecewise), snapshot(&whole), "split at {split}");
    }
}

#[test]
fn test_replaying_twice_changes_nothing() {
    let batch = vec![
        create("e1", "t1", "Twice", "2026-01-01T00:00:00.000Z"),
        update("e2", "t1", "notes", "only once", "2026-01-01T00:00:01.000Z"),
        update("e3", "t1", "labels", r#"["a","b"]"#, "2026-01-01T00:00:02.000Z"),
    ];

    let mut store = Store::open_in_memory().unwrap();
    replay::apply(store.conn_mut(), &batch).unwrap();
    let first = snapshot(&store);
    let outcome = replay::apply(store.conn_mut(), &batch).unwrap();
    assert_eq!(outcome.inserted, 0);
    assert_eq!(snapshot(&store), first);
    assert_eq!(first[0].notes, vec!["only once"]);
}

/// A fresh device receiving [update@t2, create@t0, update@t1] ends up at
/// the t2 state.
#[test]
fn test_out_of_order_delivery_to_fresh_device() {
    let mut store = Store::open_in_memory().unwrap();
    let scrambled = vec![
        update("e3", "t1", "status", "done", "2026-01-01T00:00:02.000Z"),
        create("e1", "t1", "Fresh", "2026-01-01T00:00:00.000Z"),
        update("e2", "t1", "status", "in_progress", "2026-01-01T00:00:01.000Z"),
    ];
    replay::apply(store.conn_mut(), &scrambled).unwrap();

    let task = repository::get(store.conn(), "t1").unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Done);
}

/// A single bad record cannot poison the batch it arrives in.
#[test]
fn test_malformed_create_is_absorbed_silently() {
    let mut store = Store::open_in_memory().unwrap();
    let batch = vec![
        entry(
            "e1",
            "t-broken",
            Op::Create { value: "][".into() },
            "2026-01-01T00:00:00.000Z",
        ),
        create("e2", "t-good", "Healthy", "2026-01-01T00:00:00.000Z"),
        update("e3", "t-good", "status", "in_review", "2026-01-01T00:00:01.000Z"),
    ];
    let outcome = replay::apply(store.conn_mut(), &batch).unwrap();
    assert_eq!(outcome.inserted, 3);
    assert_eq!(outcome.rebuilt, 1);

    let tasks = snapshot(&store);
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].id, "t-good");
    assert_eq!(tasks[0].status, TaskStatus::InReview);
}

fn permutations(batch: &[OplogEntry]) -> Vec<Vec<OplogEntry>> {
    let mut out = Vec::new();
    let mut items: Vec<OplogEntry> = batch.to_vec();
    let n = items.len();
    permute(&mut items, n, &mut out);
    out
}

fn permute(items: &mut Vec<OplogEntry>, k: usize, out: &mut Vec<Vec<OplogEntry>>) {
    if k <= 1 {
        out.push(items.clone());
        return;
    }
    for i in 0..k {
        permute(items, k - 1, out);
        if k % 2 == 0 {
            items.swap(i, k - 1);
        } else {
            items.swap(0, k - 1);
        }
    }
}
