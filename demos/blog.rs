//! Blog walkthrough: users, posts and tags mapped to SQLite.
//!
//! Run with: cargo run --example blog -- --show-queries
//!
//! Statements are logged on target `rustdbo::sql`; `RUST_LOG` overrides the
//! default filter.

use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use rustdbo::prelude::*;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "blog")]
#[command(about = "Walks through sessions, relations and transactions on a small blog")]
struct Cli {
    /// Database file, or :memory:
    #[arg(long, default_value = ":memory:")]
    db: String,

    /// Log every executed statement
    #[arg(long)]
    show_queries: bool,

    /// Drop and recreate the tables of an existing database file
    #[arg(long)]
    reset: bool,
}

#[derive(Default, Persist)]
struct User {
    #[dbo(size = 40)]
    name: String,
    karma: i32,
    #[dbo(has_many = "author")]
    posts: Collection<Post>,
}

#[derive(Default, Persist)]
struct Post {
    title: String,
    #[dbo(belongs_to = "author", on_delete = "cascade")]
    author: Ptr<User>,
    #[dbo(many_to_many = "post_tag")]
    tags: Collection<Tag>,
}

#[derive(Default, Persist)]
struct Tag {
    name: String,
    #[dbo(many_to_many = "post_tag")]
    posts: Collection<Post>,
}

fn init_logging(show_queries: bool) {
    let default = if show_queries { "warn,rustdbo::sql=info" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.show_queries);

    let fresh = cli.db == ":memory:" || !Path::new(&cli.db).exists();
    let config = ConnectionConfig::new(&cli.db).show_queries(cli.show_queries);
    let mut session = Session::open(&config).with_context(|| format!("opening {}", cli.db))?;

    session.map_class::<User>("user")?;
    session.map_class::<Post>("post")?;
    session.map_class::<Tag>("tag")?;

    if cli.reset && !fresh {
        session.drop_tables().context("dropping tables")?;
    }
    if cli.reset || fresh {
        println!("{}", session.table_creation_sql()?);
        session.create_tables().context("creating tables")?;
    }

    println!("{}", "=".repeat(60));
    println!("Writing a user with three posts");
    println!("{}", "=".repeat(60));

    let joe = {
        let mut t = session.transaction();
        let joe = t.add(User {
            name: "Joe".to_string(),
            ..Default::default()
        })?;
        let rust = t.add(Tag {
            name: "rust".to_string(),
            ..Default::default()
        })?;

        let mut posts = t.collection(&joe, |u| &u.posts)?;
        for title in ["Ownership", "Borrowing", "Lifetimes"] {
            let post = t.add(Post {
                title: title.to_string(),
                ..Default::default()
            })?;
            posts.insert(&mut t, post)?;

            let mut tags = t.collection(&post, |p| &p.tags)?;
            tags.insert(&mut t, rust)?;
        }

        println!("Joe has {} posts", posts.size(&mut t)?);
        t.commit()?;
        joe
    };

    println!("{}", "=".repeat(60));
    println!("Reading them back");
    println!("{}", "=".repeat(60));

    session.reread_all(None)?;
    {
        let mut t = session.transaction();
        let posts = t.collection(&joe, |u| &u.posts)?;
        for post in posts.to_vec(&mut t)? {
            let tags = t.collection(&post, |p| &p.tags)?;
            let count = tags.size(&mut t)?;
            println!("  {} ({} tags)", t.get(&post)?.title, count);
        }

        let report = t.query(
            "select u.\"name\", count(p.\"id\") as posts from \"user\" u \
             left join \"post\" p on p.\"author_id\" = u.\"id\" group by u.\"id\"",
            Vec::new(),
        )?;
        report.print();

        let json = t.to_json(&joe)?;
        println!("{}", serde_json::to_string_pretty(&json)?);
        t.commit()?;
    }

    println!("{}", "=".repeat(60));
    println!("Rolling back a change");
    println!("{}", "=".repeat(60));

    {
        let mut t = session.transaction();
        t.modify(&joe)?.karma += 100;
        t.flush()?;
        t.rollback()?;
    }
    session.discard_unflushed();
    {
        let mut t = session.transaction();
        println!("Karma after rollback: {}", t.get(&joe)?.karma);
        println!("Version: {}", t.version(&joe)?);
        t.commit()?;
    }

    Ok(())
}
