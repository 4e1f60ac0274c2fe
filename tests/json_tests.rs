/// JSON tests
///
/// Objects written as JSON with their ids, columns, references and
/// one-to-one and many-to-one relations.
/// Run with: cargo test --test json_tests
mod common;

use common::*;
use rustdbo::prelude::*;
use serde_json::json;

#[test]
fn test_object_with_relations_to_json() {
    let mut session = blog_session();

    let joe = {
        let mut t = session.transaction();
        let joe = t.add(user("joe")).unwrap();
        let mut posts = t.collection(&joe, |u| &u.posts).unwrap();
        for title in ["a", "b"] {
            let p = t.add(post(title)).unwrap();
            posts.insert(&mut t, p).unwrap();
        }
        let rust = t.add(tag("rust")).unwrap();
        let first = posts.front(&mut t).unwrap().unwrap();
        let mut tags = t.collection(&first, |p| &p.tags).unwrap();
        tags.insert(&mut t, rust).unwrap();

        t.add(Profile {
            bio: "writes things".to_string(),
            user: joe,
        })
        .unwrap();
        t.commit().unwrap();
        joe
    };

    let mut t = session.transaction();
    let value = t.to_json(&joe).unwrap();
    assert_eq!(
        value,
        json!({
            "id": 1,
            "name": "joe",
            "karma": 0,
            "posts_author": [
                {"id": 1, "title": "a", "body": null, "author": 1},
                {"id": 2, "title": "b", "body": null, "author": 1}
            ],
            "profile_user": {"id": 1, "bio": "writes things", "user": 1}
        })
    );
    t.commit().unwrap();
}

#[test]
fn test_query_collection_to_json() {
    let mut session = blog_session();
    let mut t = session.transaction();

    let rust = t.add(tag("rust")).unwrap();
    let orm = t.add(tag("orm")).unwrap();

    let all = t.find_all::<Tag>().unwrap();
    let expected = json!([
        {"id": 1, "name": "rust"},
        {"id": 2, "name": "orm"}
    ]);
    assert_eq!(all.to_json(&mut t).unwrap(), expected);
    assert_eq!(t.to_json_list(&[rust, orm]).unwrap(), expected);

    let none = t.find::<Tag>("\"name\" = ?", vec!["go".into()]).unwrap();
    assert_eq!(none.to_json(&mut t).unwrap(), json!([]));
    t.commit().unwrap();
}

#[test]
fn test_unflushed_object_has_null_id() {
    let mut session = blog_session();
    session.set_flush_mode(FlushMode::Manual).unwrap();

    let mut t = session.transaction();
    let joe = t.add(user("joe")).unwrap();
    let p = t.add(post("draft")).unwrap();
    t.modify(&p).unwrap().author = joe;

    assert_eq!(
        t.to_json(&p).unwrap(),
        json!({"id": null, "title": "draft", "body": null, "author": null})
    );

    t.flush().unwrap();
    assert_eq!(
        t.to_json(&p).unwrap(),
        json!({"id": 1, "title": "draft", "body": null, "author": 1})
    );
    t.commit().unwrap();
}
