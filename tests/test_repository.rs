//! Repository behavior through the service: filters, sort orders, prefix
//! resolution, soft-delete visibility.

use saddlebag::{
    ListFilter, NewTask, SaddlebagError, SortKey, TaskPatch, TaskPriority, TaskService,
    TaskStatus,
};

fn service() -> TaskService {
    TaskService::open_in_memory().unwrap()
}

fn add(service: &mut TaskService, title: &str) -> saddlebag::Task {
    service
        .add(NewTask {
            title: title.into(),
            ..Default::default()
        })
        .unwrap()
}

fn add_with(service: &mut TaskService, input: NewTask) -> saddlebag::Task {
    service.add(input).unwrap()
}

#[test]
fn test_get_by_unique_prefix() {
    let mut svc = service();
    let task = add(&mut svc, "Solo");

    let by_prefix = svc.get(&task.id[..6]).unwrap().unwrap();
    assert_eq!(by_prefix.id, task.id);
    assert!(svc.get("zzzzzz").unwrap().is_none());
}

#[test]
fn test_ambiguous_prefix_lists_all_matches() {
    let mut svc = service();
    let a = add_with(
        &mut svc,
        NewTask {
            id: Some("aaaa1111-0000-7000-8000-000000000001".into()),
            title: "First".into(),
            ..Default::default()
        },
    );
    let b = add_with(
        &mut svc,
        NewTask {
            id: Some("aaaa2222-0000-7000-8000-000000000002".into()),
            title: "Second".into(),
            ..Default::default()
        },
    );

    let err = svc.get("aaaa").unwrap_err();
    match err {
        SaddlebagError::AmbiguousPrefix { prefix, matches } => {
            assert_eq!(prefix, "aaaa");
            assert_eq!(matches, vec![a.id, b.id]);
        }
        other => panic!("expected AmbiguousPrefix, got {other:?}"),
    }
}

#[test]
fn test_exact_id_beats_prefix_of_longer_id() {
    let mut svc = service();
    add_with(
        &mut svc,
        NewTask {
            id: Some("aaaa".into()),
            title: "Short id".into(),
            ..Default::default()
        },
    );
    add_with(
        &mut svc,
        NewTask {
            id: Some("aaaa1111-0000-7000-8000-000000000001".into()),
            title: "Long id".into(),
            ..Default::default()
        },
    );

    let task = svc.get("aaaa").unwrap().unwrap();
    assert_eq!(task.title, "Short id");
}

#[test]
fn test_deleted_tasks_invisible_to_reads() {
    let mut svc = service();
    let task = add(&mut svc, "Doomed");
    assert!(svc.delete(&task.id).unwrap());

    assert!(svc.get(&task.id).unwrap().is_none());
    assert!(svc.list(&ListFilter::default()).unwrap().is_empty());
    // Deleting again is a no-op on an already-invisible task.
    assert!(!svc.delete(&task.id).unwrap());
}

#[test]
fn test_list_filters_combine() {
    let mut svc = service();
    add_with(
        &mut svc,
        NewTask {
            title: "Fix the flaky test".into(),
            priority: Some(TaskPriority::High),
            owner: Some("ana".into()),
            labels: vec!["ci".into()],
            ..Default::default()
        },
    );
    add_with(
        &mut svc,
        NewTask {
            title: "Write release notes".into(),
            owner: Some("ana".into()),
            ..Default::default()
        },
    );
    add_with(
        &mut svc,
        NewTask {
            title: "Fix the login flow".into(),
            labels: vec!["auth".into()],
            ..Default::default()
        },
    );

    let by_owner = svc
        .list(&ListFilter {
            owner: Some("ana".into()),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(by_owner.len(), 2);

    let by_label = svc
        .list(&ListFilter {
            label: Some("ci".into()),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(by_label.len(), 1);

    let by_search = svc
        .list(&ListFilter {
            search: Some("FIX".into()),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(by_search.len(), 2);

    let combined = svc
        .list(&ListFilter {
            search: Some("fix".into()),
            priority: Some(TaskPriority::High),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(combined.len(), 1);
    assert_eq!(combined[0].title, "Fix the flaky test");
}

#[test]
fn test_default_sort_priority_then_created() {
    let mut svc = service();
    add_with(
        &mut svc,
        NewTask {
            title: "low".into(),
            priority: Some(TaskPriority::Low),
            ..Default::default()
        },
    );
    add_with(
        &mut svc,
        NewTask {
            title: "urgent-late".into(),
            priority: Some(TaskPriority::Urgent),
            ..Default::default()
        },
    );
    add_with(
        &mut svc,
        NewTask {
            title: "medium".into(),
            ..Default::default()
        },
    );

    let titles: Vec<_> = svc
        .list(&ListFilter::default())
        .unwrap()
        .into_iter()
        .map(|t| t.title)
        .collect();
    assert_eq!(titles, vec!["urgent-late", "medium", "low"]);
}

#[test]
fn test_sort_by_due_puts_undated_last() {
    let mut svc = service();
    add_with(
        &mut svc,
        NewTask {
            title: "no due".into(),
            ..Default::default()
        },
    );
    add_with(
        &mut svc,
        NewTask {
            title: "later".into(),
            due_at: due_at("2026-09-01T09:00:00"),
            ..Default::default()
        },
    );
    add_with(
        &mut svc,
        NewTask {
            title: "sooner".into(),
            due_at: due_at("2026-08-15T09:00:00"),
            ..Default::default()
        },
    );

    let titles: Vec<_> = svc
        .list(&ListFilter {
            sort: SortKey::Due,
            ..Default::default()
        })
        .unwrap()
        .into_iter()
        .map(|t| t.title)
        .collect();
    assert_eq!(titles, vec!["sooner", "later", "no due"]);
}

#[test]
fn test_sort_by_title_case_insensitive() {
    let mut svc = service();
    add(&mut svc, "zebra");
    add(&mut svc, "Apple");
    add(&mut svc, "mango");

    let titles: Vec<_> = svc
        .list(&ListFilter {
            sort: SortKey::Title,
            ..Default::default()
        })
        .unwrap()
        .into_iter()
        .map(|t| t.title)
        .collect();
    assert_eq!(titles, vec!["Apple", "mango", "zebra"]);
}

#[test]
fn test_actionable_excludes_tasks_with_open_blockers() {
    let mut svc = service();
    let blocker = add(&mut svc, "Blocker");
    add_with(
        &mut svc,
        NewTask {
            title: "Blocked".into(),
            blocked_by: vec![blocker.id.clone()],
            ..Default::default()
        },
    );
    add_with(
        &mut svc,
        NewTask {
            title: "Ghost-blocked".into(),
            blocked_by: vec!["no-such-task".into()],
            ..Default::default()
        },
    );

    let actionable = |svc: &TaskService| -> Vec<String> {
        svc.list(&ListFilter {
            actionable: true,
            ..Default::default()
        })
        .unwrap()
        .into_iter()
        .map(|t| t.title)
        .collect()
    };

    // An unknown blocker id does not block; a live todo blocker does.
    let now = actionable(&svc);
    assert!(now.contains(&"Blocker".to_string()));
    assert!(now.contains(&"Ghost-blocked".to_string()));
    assert!(!now.contains(&"Blocked".to_string()));

    svc.update(
        &blocker.id,
        TaskPatch {
            status: Some(TaskStatus::Done),
            ..Default::default()
        },
    )
    .unwrap()
    .unwrap();
    assert!(actionable(&svc).contains(&"Blocked".to_string()));
}

#[test]
fn test_limit_and_offset_paginate_after_sort() {
    let mut svc = service();
    for i in 0..5 {
        add(&mut svc, &format!("task {i}"));
    }
    let page = svc
        .list(&ListFilter {
            sort: SortKey::Created,
            limit: Some(2),
            offset: 2,
            ..Default::default()
        })
        .unwrap();
    assert_eq!(page.len(), 2);
    assert_eq!(page[0].title, "task 2");
    assert_eq!(page[1].title, "task 3");
}

fn due_at(s: &str) -> Option<chrono::NaiveDateTime> {
    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S").ok()
}
