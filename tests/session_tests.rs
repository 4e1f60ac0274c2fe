/// Session tests
///
/// Identity map, unit of work, versions, flush modes and error cases.
/// Run with: cargo test --test session_tests
mod common;

use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime};
use common::*;
use rustdbo::prelude::*;

#[derive(Default, Persist)]
struct Sample {
    flag: bool,
    count: i64,
    ratio: f64,
    label: Option<String>,
    day: Option<NaiveDate>,
    at: Option<NaiveDateTime>,
    data: Vec<u8>,
}

#[derive(Default, Persist)]
struct Grid {
    cells: Json<BTreeMap<(i32, i32), i32>>,
}

#[derive(Default, Persist)]
struct Unmapped {
    name: String,
}

#[test]
fn test_identity_map_returns_same_pointer() {
    let mut session = blog_session();
    let mut t = session.transaction();

    let joe = t.add(user("joe")).unwrap();
    t.flush().unwrap();
    let id = Session::id(&mut t, &joe).unwrap().unwrap();

    let loaded = t.load::<User>(id.clone()).unwrap();
    assert_eq!(loaded, joe);

    let found = t
        .find_one::<User>("\"name\" = ?", vec!["joe".into()])
        .unwrap()
        .unwrap();
    assert_eq!(found, joe);

    let lazy = t.load_lazy::<User>(id).unwrap();
    assert_eq!(lazy, joe);

    t.commit().unwrap();
}

#[test]
fn test_scalar_fields_round_trip() {
    let mut session = Session::new(Sqlite3::open_in_memory().unwrap());
    session.map_class::<Sample>("sample").unwrap();
    session.create_tables().unwrap();

    let day = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
    let at = day.and_hms_milli_opt(13, 45, 7, 250).unwrap();

    let sample = {
        let mut t = session.transaction();
        let sample = t
            .add(Sample {
                flag: true,
                count: 1 << 40,
                ratio: 2.5,
                label: None,
                day: Some(day),
                at: Some(at),
                data: vec![0, 1, 255],
            })
            .unwrap();
        t.commit().unwrap();
        sample
    };

    session.reread_all(None).unwrap();
    assert!(!session.is_loaded(&sample));

    let mut t = session.transaction();
    let s = t.get(&sample).unwrap();
    assert!(s.flag);
    assert_eq!(s.count, 1 << 40);
    assert_eq!(s.ratio, 2.5);
    assert_eq!(s.label, None);
    assert_eq!(s.day, Some(day));
    assert_eq!(s.at, Some(at));
    assert_eq!(s.data, vec![0, 1, 255]);
    t.commit().unwrap();
}

#[test]
fn test_collection_size_follows_inserts_and_removes() {
    let mut session = blog_session();
    let mut t = session.transaction();

    let joe = t.add(user("joe")).unwrap();
    let mut posts = t.collection(&joe, |u| &u.posts).unwrap();

    let mut added = Vec::new();
    for title in ["one", "two", "three"] {
        let p = t.add(post(title)).unwrap();
        posts.insert(&mut t, p).unwrap();
        added.push(p);
    }
    assert_eq!(posts.size(&mut t).unwrap(), 3);
    assert_eq!(t.get(&added[0]).unwrap().author, joe);

    t.remove(&added[1]).unwrap();
    assert_eq!(posts.size(&mut t).unwrap(), 2);

    let titles: Vec<String> = posts
        .to_vec(&mut t)
        .unwrap()
        .iter()
        .map(|p| t.get(p).unwrap().title.clone())
        .collect();
    assert_eq!(titles, vec!["one".to_string(), "three".to_string()]);

    t.commit().unwrap();
}

#[test]
fn test_referenced_object_is_inserted_first() {
    let mut session = blog_session();
    let mut t = session.transaction();

    let p = t.add(post("early")).unwrap();
    let joe = t.add(user("joe")).unwrap();
    t.modify(&p).unwrap().author = joe;
    t.commit().unwrap();

    let mut t = session.transaction();
    let joe_id = Session::id(&mut t, &joe).unwrap().unwrap();
    let author_id = t
        .query("select \"author_id\" from \"post\"", Vec::new())
        .unwrap()
        .scalar()
        .cloned()
        .unwrap();
    assert_eq!(author_id, joe_id);
    t.commit().unwrap();
}

#[test]
fn test_version_increments_on_each_committed_update() {
    let mut session = blog_session();

    let joe = {
        let mut t = session.transaction();
        let joe = t.add(user("joe")).unwrap();
        assert_eq!(t.version(&joe).unwrap(), -1);
        assert_eq!(t.status(&joe).unwrap(), DboStatus::New);
        t.commit().unwrap();
        joe
    };
    assert_eq!(session.version(&joe).unwrap(), 0);
    assert_eq!(session.status(&joe).unwrap(), DboStatus::Clean);

    for expected in 1..=3 {
        let mut t = session.transaction();
        t.modify(&joe).unwrap().karma += 1;
        assert_eq!(t.status(&joe).unwrap(), DboStatus::Dirty);
        t.commit().unwrap();
        assert_eq!(session.version(&joe).unwrap(), expected);
    }

    let t = session.transaction();
    t.commit().unwrap();
    assert_eq!(session.version(&joe).unwrap(), 3);

    let mut t = session.transaction();
    let stored = count(&mut t, "select \"version\" from \"user\"");
    assert_eq!(stored, 3);
    t.commit().unwrap();
}

#[test]
fn test_schema_orders_referenced_tables_first() {
    #[derive(Default, Persist)]
    struct Author {
        name: String,
        #[dbo(has_many = "author")]
        articles: Collection<Article>,
    }

    #[derive(Default, Persist)]
    struct Article {
        title: String,
        #[dbo(belongs_to = "author", not_null, on_delete = "cascade")]
        author: Ptr<Author>,
    }

    let mut session = Session::new(Sqlite3::open_in_memory().unwrap());
    session.map_class::<Article>("article").unwrap();
    session.map_class::<Author>("author").unwrap();

    let sql = session.table_creation_sql().unwrap();
    assert_eq!(sql.matches("create table").count(), 2);
    assert!(!sql.contains("create index"));

    let author = sql.find("create table \"author\"").unwrap();
    let article = sql.find("create table \"article\"").unwrap();
    assert!(author < article);
    assert!(sql.contains("\"author_id\" integer not null"));
    assert!(sql.contains("on delete cascade"));

    assert_eq!(session.table_creation_sql().unwrap(), sql);
    session.create_tables().unwrap();

    let fields = session.fields("article").unwrap();
    let names: Vec<&str> = fields.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["title", "author_id"]);
}

#[test]
fn test_join_table_is_created_once() {
    let mut session = Session::new(Sqlite3::open_in_memory().unwrap());
    map_blog(&mut session);

    let sql = session.table_creation_sql().unwrap();
    assert_eq!(sql.matches("create table").count(), 5);
    assert_eq!(sql.matches("create table \"post_tag\"").count(), 1);
    assert_eq!(sql.matches("create index").count(), 2);

    session.create_tables().unwrap();
    session.drop_tables().unwrap();
    session.create_tables().unwrap();
}

#[test]
fn test_values_and_set_value() {
    let mut session = blog_session();
    let mut t = session.transaction();

    let rust = t.add(tag("rust")).unwrap();
    let values = t.values(&rust).unwrap();
    assert_eq!(values.len(), 3);
    assert_eq!(values[2], SqlValue::from("rust"));

    t.set_value(&rust, 2, "go".into()).unwrap();
    assert_eq!(t.get(&rust).unwrap().name, "go");

    let err = t.set_value(&rust, 0, SqlValue::Integer(9)).unwrap_err();
    assert!(matches!(err, DboError::Usage(_)));
    let err = t.set_value(&rust, 7, SqlValue::Null).unwrap_err();
    assert!(matches!(err, DboError::Usage(_)));

    t.commit().unwrap();
}

#[test]
fn test_manual_flush_mode_defers_writes() {
    let mut session = blog_session();
    session.set_flush_mode(FlushMode::Manual).unwrap();
    assert_eq!(session.flush_mode(), FlushMode::Manual);

    let mut t = session.transaction();
    t.add(user("joe")).unwrap();

    let all = t.find_all::<User>().unwrap();
    assert_eq!(all.size(&mut t).unwrap(), 0);

    t.flush().unwrap();
    assert_eq!(all.size(&mut t).unwrap(), 1);
    t.commit().unwrap();
}

#[test]
fn test_discard_unflushed_drops_pending_changes() {
    let mut session = blog_session();

    let joe = {
        let mut t = session.transaction();
        let joe = t.add(user("joe")).unwrap();
        t.commit().unwrap();
        joe
    };

    let mut t = session.transaction();
    t.modify(&joe).unwrap().name = "changed".to_string();
    let fresh = t.add(tag("fresh")).unwrap();

    t.discard_unflushed();
    assert_eq!(t.status(&fresh).unwrap(), DboStatus::Purged);
    assert!(!t.is_loaded(&joe));
    assert_eq!(t.get(&joe).unwrap().name, "joe");

    let tags = t.find_all::<Tag>().unwrap();
    assert_eq!(tags.size(&mut t).unwrap(), 0);
    t.commit().unwrap();
}

#[test]
fn test_nested_commit_only_ends_the_level() {
    let mut session = blog_session();

    let mut outer = session.transaction();
    let outer_id = outer.id();
    {
        let mut inner = outer.nested();
        assert_eq!(inner.id(), outer_id);
        inner.add(tag("rust")).unwrap();
        inner.commit().unwrap();
    }
    assert!(outer.is_active());
    outer.commit().unwrap();

    let mut t = session.transaction();
    assert_eq!(count(&mut t, "select count(*) from \"tag\""), 1);
    t.commit().unwrap();
}

#[test]
fn test_nested_rollback_aborts_enclosing_transaction() {
    let mut session = blog_session();

    let mut outer = session.transaction();
    outer.add(tag("rust")).unwrap();
    outer.flush().unwrap();
    {
        let inner = outer.nested();
        inner.rollback().unwrap();
    }
    assert!(!outer.is_active());
    let err = outer.commit().unwrap_err();
    assert!(matches!(err, DboError::Transaction(_)));

    session.discard_unflushed();
    let mut t = session.transaction();
    assert_eq!(count(&mut t, "select count(*) from \"tag\""), 0);
    t.commit().unwrap();
}

#[test]
fn test_dropped_transaction_rolls_back() {
    let mut session = blog_session();
    {
        let mut t = session.transaction();
        t.add(tag("lost")).unwrap();
        t.flush().unwrap();
    }

    session.discard_unflushed();
    let mut t = session.transaction();
    assert_eq!(count(&mut t, "select count(*) from \"tag\""), 0);
    t.commit().unwrap();
}

#[test]
fn test_operations_outside_transaction_fail() {
    let mut session = blog_session();

    let err = session.load::<User>(1).unwrap_err();
    assert!(matches!(err, DboError::NoTransaction));

    let err = session.query("select 1", Vec::new()).unwrap_err();
    assert!(matches!(err, DboError::NoTransaction));

    let joe = session.add(user("joe")).unwrap();
    let err = session.modify(&joe).unwrap_err();
    assert!(matches!(err, DboError::NoTransaction));
}

#[test]
fn test_unknown_class_and_late_mapping_fail() {
    let mut session = blog_session();

    let err = session.add(Unmapped::default()).unwrap_err();
    assert!(matches!(err, DboError::NotMapped(_)));

    let err = session.map_class::<Unmapped>("unmapped").unwrap_err();
    assert!(matches!(err, DboError::Mapping(_)));
}

#[test]
fn test_duplicate_mapping_fails() {
    let mut session = Session::new(Sqlite3::open_in_memory().unwrap());
    session.map_class::<User>("user").unwrap();

    assert!(matches!(
        session.map_class::<User>("person").unwrap_err(),
        DboError::Mapping(_)
    ));
    assert!(matches!(
        session.map_class::<Tag>("user").unwrap_err(),
        DboError::Mapping(_)
    ));
}

#[test]
fn test_load_missing_row_is_not_found() {
    let mut session = blog_session();
    let mut t = session.transaction();

    let err = t.load::<User>(42).unwrap_err();
    assert!(err.is_not_found());
    t.commit().unwrap();
}

#[test]
fn test_unserializable_json_field_fails_flush() {
    let mut session = Session::new(Sqlite3::open_in_memory().unwrap());
    session.map_class::<Grid>("grid").unwrap();
    session.create_tables().unwrap();

    let mut cells = BTreeMap::new();
    cells.insert((0, 0), 1);

    let mut t = session.transaction();
    let grid = t.add(Grid { cells: Json(cells) }).unwrap();
    let err = t.flush().unwrap_err();
    assert!(matches!(err, DboError::Serialization(_)));
    assert!(matches!(t.values(&grid).unwrap_err(), DboError::Serialization(_)));
    t.rollback().unwrap();

    session.discard_unflushed();
    let mut t = session.transaction();
    assert_eq!(count(&mut t, "select count(*) from \"grid\""), 0);
    t.commit().unwrap();
}
