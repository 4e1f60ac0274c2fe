/// Relation tests
///
/// Many-to-one and many-to-many collections, their pending edits across
/// commit and rollback, and one-to-one weak pointers.
/// Run with: cargo test --test relation_tests
mod common;

use common::*;
use rustdbo::prelude::*;
use tempfile::tempdir;

#[test]
fn test_many_to_many_is_visible_from_both_sides() {
    let mut session = blog_session();
    let mut t = session.transaction();

    let hello = t.add(post("hello")).unwrap();
    let rust = t.add(tag("rust")).unwrap();
    let orm = t.add(tag("orm")).unwrap();

    let mut tags = t.collection(&hello, |p| &p.tags).unwrap();
    tags.insert(&mut t, rust).unwrap();
    tags.insert(&mut t, orm).unwrap();

    assert_eq!(tags.size(&mut t).unwrap(), 2);
    assert!(tags.contains(&mut t, &rust).unwrap());

    let posts = t.collection(&rust, |tag| &tag.posts).unwrap();
    assert_eq!(posts.to_vec(&mut t).unwrap(), vec![hello]);

    tags.erase(&mut t, orm).unwrap();
    assert_eq!(tags.size(&mut t).unwrap(), 1);
    assert!(!tags.contains(&mut t, &orm).unwrap());

    t.commit().unwrap();

    let mut t = session.transaction();
    assert_eq!(count(&mut t, "select count(*) from \"post_tag\""), 1);
    t.commit().unwrap();
}

#[test]
fn test_insert_then_erase_cancels_out() {
    let mut session = blog_session();
    let mut t = session.transaction();

    let hello = t.add(post("hello")).unwrap();
    let rust = t.add(tag("rust")).unwrap();

    let mut tags = t.collection(&hello, |p| &p.tags).unwrap();
    tags.insert(&mut t, rust).unwrap();
    tags.erase(&mut t, rust).unwrap();

    let pending = t.get(&hello).unwrap().tags.activity().is_none_or(|a| a.is_empty());
    assert!(pending);

    t.commit().unwrap();

    let mut t = session.transaction();
    assert_eq!(count(&mut t, "select count(*) from \"post_tag\""), 0);
    t.commit().unwrap();
}

#[test]
fn test_rollback_keeps_collection_edits_pending() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("rollback.db");
    let mut session = blog_session_at(&path, true);

    let (hello, rust) = {
        let mut t = session.transaction();
        let hello = t.add(post("hello")).unwrap();
        let rust = t.add(tag("rust")).unwrap();
        t.commit().unwrap();
        (hello, rust)
    };

    {
        let mut t = session.transaction();
        let mut tags = t.collection(&hello, |p| &p.tags).unwrap();
        tags.insert(&mut t, rust).unwrap();
        assert_eq!(tags.size(&mut t).unwrap(), 1);
        t.rollback().unwrap();
    }

    let activity = session.get(&hello).unwrap().tags.activity().unwrap();
    assert!(activity.inserted().contains(&rust));
    assert!(activity.transaction_inserted().is_empty());
    assert_eq!(session.status(&hello).unwrap(), DboStatus::Dirty);

    let mut other = blog_session_at(&path, false);
    let mut t = other.transaction();
    assert_eq!(count(&mut t, "select count(*) from \"post_tag\""), 0);
    t.commit().unwrap();

    let mut t = session.transaction();
    let tags = t.collection(&hello, |p| &p.tags).unwrap();
    assert_eq!(tags.size(&mut t).unwrap(), 1);
    t.commit().unwrap();
}

#[test]
fn test_rollback_after_flushed_erase_and_reinsert_keeps_join_row() {
    let mut session = blog_session();

    let (hello, rust) = {
        let mut t = session.transaction();
        let hello = t.add(post("hello")).unwrap();
        let rust = t.add(tag("rust")).unwrap();
        let mut tags = t.collection(&hello, |p| &p.tags).unwrap();
        tags.insert(&mut t, rust).unwrap();
        t.commit().unwrap();
        (hello, rust)
    };

    {
        let mut t = session.transaction();
        let mut tags = t.collection(&hello, |p| &p.tags).unwrap();
        tags.erase(&mut t, rust).unwrap();
        t.flush().unwrap();
        assert_eq!(count(&mut t, "select count(*) from \"post_tag\""), 0);
        tags.insert(&mut t, rust).unwrap();
        t.rollback().unwrap();
    }

    let idle = session
        .get(&hello)
        .unwrap()
        .tags
        .activity()
        .is_none_or(|a| a.is_empty() && a.transaction_erased().is_empty());
    assert!(idle);

    let mut t = session.transaction();
    assert_eq!(count(&mut t, "select count(*) from \"post_tag\""), 1);
    t.commit().unwrap();

    let mut t = session.transaction();
    let tags = t.collection(&hello, |p| &p.tags).unwrap();
    assert_eq!(tags.to_vec(&mut t).unwrap(), vec![rust]);
    t.commit().unwrap();
}

#[test]
fn test_rollback_after_flushed_insert_and_erase_leaves_no_join_row() {
    let mut session = blog_session();

    let (hello, orm) = {
        let mut t = session.transaction();
        let hello = t.add(post("hello")).unwrap();
        let orm = t.add(tag("orm")).unwrap();
        t.commit().unwrap();
        (hello, orm)
    };

    {
        let mut t = session.transaction();
        let mut tags = t.collection(&hello, |p| &p.tags).unwrap();
        tags.insert(&mut t, orm).unwrap();
        t.flush().unwrap();
        assert_eq!(count(&mut t, "select count(*) from \"post_tag\""), 1);
        tags.erase(&mut t, orm).unwrap();
        t.rollback().unwrap();
    }

    let mut t = session.transaction();
    assert_eq!(count(&mut t, "select count(*) from \"post_tag\""), 0);
    t.commit().unwrap();

    let mut t = session.transaction();
    let tags = t.collection(&hello, |p| &p.tags).unwrap();
    assert!(tags.is_empty(&mut t).unwrap());
    t.commit().unwrap();
}

#[test]
fn test_many_to_one_erase_clears_reference() {
    let mut session = blog_session();
    let mut t = session.transaction();

    let joe = t.add(user("joe")).unwrap();
    let first = t.add(post("first")).unwrap();
    let second = t.add(post("second")).unwrap();

    let mut posts = t.collection(&joe, |u| &u.posts).unwrap();
    posts.insert(&mut t, first).unwrap();
    posts.insert(&mut t, second).unwrap();
    assert_eq!(posts.front(&mut t).unwrap(), Some(first));

    posts.erase(&mut t, first).unwrap();
    assert!(t.get(&first).unwrap().author.is_null());
    assert_eq!(posts.to_vec(&mut t).unwrap(), vec![second]);

    t.commit().unwrap();
}

#[test]
fn test_cursor_walks_query_results() {
    let mut session = blog_session();
    let mut t = session.transaction();

    for name in ["ann", "bob", "cid"] {
        t.add(user(name)).unwrap();
    }

    let found = t.find::<User>("\"name\" <> ?", vec!["bob".into()]).unwrap();
    let mut cursor = found.cursor(&mut t).unwrap();
    let mut names = Vec::new();
    while let Some(u) = cursor.fetch_next(&mut t).unwrap() {
        names.push(t.get(&u).unwrap().name.clone());
    }
    assert!(!cursor.is_open());
    assert_eq!(names, vec!["ann".to_string(), "cid".to_string()]);

    // every pass runs the query again
    t.add(user("dee")).unwrap();
    assert_eq!(found.iter(&mut t).unwrap().count(), 3);

    t.commit().unwrap();
}

#[test]
fn test_weak_ptr_follows_reciprocal_reference() {
    let mut session = blog_session();
    let mut t = session.transaction();

    let joe = t.add(user("joe")).unwrap();
    let bio = t
        .add(Profile {
            bio: "writes things".to_string(),
            ..Default::default()
        })
        .unwrap();

    let profile = t.weak(&joe, |u| &u.profile).unwrap();
    assert_eq!(profile.query(&mut t).unwrap(), None);

    profile.reset(&mut t, Some(bio)).unwrap();
    assert_eq!(t.get(&bio).unwrap().user, joe);
    assert_eq!(profile.query(&mut t).unwrap(), Some(bio));

    let other = t.add(Profile::default()).unwrap();
    profile.reset(&mut t, Some(other)).unwrap();
    assert!(t.get(&bio).unwrap().user.is_null());
    assert_eq!(profile.query(&mut t).unwrap(), Some(other));

    profile.reset(&mut t, None).unwrap();
    assert_eq!(profile.query(&mut t).unwrap(), None);

    t.commit().unwrap();
}

#[test]
fn test_loaded_relation_is_lazy() {
    let mut session = blog_session();

    let joe = {
        let mut t = session.transaction();
        let joe = t.add(user("joe")).unwrap();
        let mut posts = t.collection(&joe, |u| &u.posts).unwrap();
        for title in ["a", "b"] {
            let p = t.add(post(title)).unwrap();
            posts.insert(&mut t, p).unwrap();
        }
        t.commit().unwrap();
        joe
    };

    session.reread_all(Some("user")).unwrap();
    assert!(!session.is_loaded(&joe));

    let mut t = session.transaction();
    let posts = t.collection(&joe, |u| &u.posts).unwrap();
    assert!(posts.is_bound());
    assert_eq!(posts.size(&mut t).unwrap(), 2);

    let first = posts.front(&mut t).unwrap().unwrap();
    assert_eq!(t.get(&first).unwrap().author, joe);
    t.commit().unwrap();
}
