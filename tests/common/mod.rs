#![allow(dead_code)]

use rustdbo::prelude::*;

#[derive(Default, Persist)]
#[derive(Debug)]
pub struct User {
    #[dbo(size = 40)]
    pub name: String,
    pub karma: i32,
    #[dbo(has_many = "author")]
    pub posts: Collection<Post>,
    #[dbo(has_one = "user")]
    pub profile: WeakPtr<Profile>,
}

#[derive(Default, Persist)]
pub struct Post {
    pub title: String,
    pub body: Option<String>,
    #[dbo(belongs_to = "author")]
    pub author: Ptr<User>,
    #[dbo(many_to_many = "post_tag")]
    pub tags: Collection<Tag>,
}

#[derive(Default, Persist)]
pub struct Tag {
    pub name: String,
    #[dbo(many_to_many = "post_tag")]
    pub posts: Collection<Post>,
}

#[derive(Default, Persist)]
pub struct Profile {
    pub bio: String,
    #[dbo(belongs_to = "user")]
    pub user: Ptr<User>,
}

pub fn user(name: &str) -> User {
    User {
        name: name.to_string(),
        ..Default::default()
    }
}

pub fn post(title: &str) -> Post {
    Post {
        title: title.to_string(),
        ..Default::default()
    }
}

pub fn tag(name: &str) -> Tag {
    Tag {
        name: name.to_string(),
        ..Default::default()
    }
}

pub fn map_blog(session: &mut Session) {
    session.map_class::<User>("user").unwrap();
    session.map_class::<Post>("post").unwrap();
    session.map_class::<Tag>("tag").unwrap();
    session.map_class::<Profile>("profile").unwrap();
}

/// Blog classes mapped on a fresh in-memory database with the tables created.
pub fn blog_session() -> Session {
    let mut session = Session::new(Sqlite3::open_in_memory().unwrap());
    map_blog(&mut session);
    session.create_tables().unwrap();
    session
}

/// Blog classes mapped on a database file; tables are created when `create`.
pub fn blog_session_at(path: &std::path::Path, create: bool) -> Session {
    let config = ConnectionConfig::new(path.to_str().unwrap());
    let mut session = Session::open(&config).unwrap();
    map_blog(&mut session);
    if create {
        session.create_tables().unwrap();
    }
    session
}

pub fn count(session: &mut Session, sql: &str) -> i64 {
    session
        .query(sql, Vec::new())
        .unwrap()
        .scalar()
        .and_then(|v| v.as_i64())
        .unwrap()
}
