/// Optimistic concurrency tests
///
/// Two sessions on one database file; the version column detects
/// conflicting updates and deletes.
/// Run with: cargo test --test concurrency_tests
mod common;

use common::*;
use rustdbo::prelude::*;
use tempfile::tempdir;

#[test]
fn test_concurrent_update_is_stale() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("stale.db");

    let mut first = blog_session_at(&path, true);
    let mut second = blog_session_at(&path, false);

    let id = {
        let mut t = first.transaction();
        let joe = t.add(user("joe")).unwrap();
        t.flush().unwrap();
        let id = Session::id(&mut t, &joe).unwrap().unwrap();
        t.commit().unwrap();
        id
    };

    let theirs = {
        let mut t = second.transaction();
        let joe = t.load::<User>(id.clone()).unwrap();
        t.commit().unwrap();
        joe
    };

    {
        let mut t = first.transaction();
        let joe = t.load::<User>(id.clone()).unwrap();
        t.modify(&joe).unwrap().karma = 1;
        t.commit().unwrap();
    }

    let mut t = second.transaction();
    t.modify(&theirs).unwrap().karma = 2;
    let err = t.commit().unwrap_err();
    assert!(err.is_stale());
    assert_eq!(second.version(&theirs).unwrap(), 0);

    second.discard_unflushed();
    let mut t = second.transaction();
    assert_eq!(t.get(&theirs).unwrap().karma, 1);
    t.commit().unwrap();
    assert_eq!(second.version(&theirs).unwrap(), 1);
}

#[test]
fn test_stale_update_can_be_retried_after_reload() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("retry.db");

    let mut first = blog_session_at(&path, true);
    let mut second = blog_session_at(&path, false);

    let id = {
        let mut t = first.transaction();
        let joe = t.add(user("joe")).unwrap();
        t.flush().unwrap();
        let id = Session::id(&mut t, &joe).unwrap().unwrap();
        t.commit().unwrap();
        id
    };

    let theirs = {
        let mut t = second.transaction();
        let joe = t.load::<User>(id.clone()).unwrap();
        t.commit().unwrap();
        joe
    };

    {
        let mut t = first.transaction();
        let joe = t.load::<User>(id.clone()).unwrap();
        t.modify(&joe).unwrap().karma += 10;
        t.commit().unwrap();
    }

    let mut t = second.transaction();
    t.modify(&theirs).unwrap().karma += 5;
    assert!(t.commit().unwrap_err().is_stale());

    second.discard_unflushed();
    let mut t = second.transaction();
    t.modify(&theirs).unwrap().karma += 5;
    t.commit().unwrap();

    let mut t = first.transaction();
    assert_eq!(count(&mut t, "select \"karma\" from \"user\""), 15);
    assert_eq!(count(&mut t, "select \"version\" from \"user\""), 2);
    t.commit().unwrap();
}

#[test]
fn test_concurrent_delete_is_stale() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("delete.db");

    let mut first = blog_session_at(&path, true);
    let mut second = blog_session_at(&path, false);

    let id = {
        let mut t = first.transaction();
        let tag = t.add(tag("rust")).unwrap();
        t.flush().unwrap();
        let id = Session::id(&mut t, &tag).unwrap().unwrap();
        t.commit().unwrap();
        id
    };

    let theirs = {
        let mut t = second.transaction();
        let tag = t.load::<Tag>(id.clone()).unwrap();
        t.commit().unwrap();
        tag
    };

    {
        let mut t = first.transaction();
        let tag = t.load::<Tag>(id.clone()).unwrap();
        t.modify(&tag).unwrap().name = "go".to_string();
        t.commit().unwrap();
    }

    let mut t = second.transaction();
    t.remove(&theirs).unwrap();
    assert!(t.commit().unwrap_err().is_stale());

    let mut t = first.transaction();
    assert_eq!(count(&mut t, "select count(*) from \"tag\""), 1);
    t.commit().unwrap();
}
