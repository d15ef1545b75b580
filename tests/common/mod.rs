#![allow(dead_code)]

use criteriacrate::{
    AttributeKind, AttributeSchema, Criteria, FilterFactory, QueryDriver,
    driver::{
        memory::{MemoryCollection, MemoryDriver, Record},
        sea::{SeaQueryDriver, SeaTable},
    },
};
use sea_orm::{
    ConnectionTrait, Database, DatabaseConnection, DbErr,
    sea_query::{Alias, ColumnDef, Query, SimpleExpr, Table},
};
use serde_json::{Value as Json, json};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

//
// Blog fixture: posts with an author and comments, comments with an author
//

pub struct PostRow {
    pub id: i64,
    pub title: &'static str,
    pub status: &'static str,
    pub views: Option<i64>,
    pub rating: Option<f64>,
    pub author_id: Option<i64>,
}

pub const USERS: [(i64, &str); 2] = [(1, "Ann"), (2, "Bob")];

pub const POSTS: [PostRow; 5] = [
    PostRow { id: 1, title: "Rust traits", status: "published", views: Some(120), rating: Some(4.5), author_id: Some(1) },
    PostRow { id: 2, title: "Go channels", status: "draft", views: Some(15), rating: None, author_id: Some(2) },
    PostRow { id: 3, title: "Rust async", status: "published", views: Some(300), rating: Some(3.0), author_id: Some(1) },
    PostRow { id: 4, title: "Python 100% typed", status: "review", views: None, rating: Some(5.0), author_id: None },
    PostRow { id: 5, title: "Zig comptime", status: "published", views: Some(42), rating: Some(2.5), author_id: Some(2) },
];

/// (id, post_id, user_id, body, approved, score)
pub const COMMENTS: [(i64, i64, i64, &str, bool, i64); 4] = [
    (10, 1, 2, "nice", true, 4),
    (11, 3, 2, "spam", false, 1),
    (12, 3, 1, "great read", true, 5),
    (13, 5, 1, "meh", false, 2),
];

pub fn blog_schema() -> AttributeSchema {
    let users = AttributeSchema::strict()
        .with_attribute("id", AttributeKind::Integer)
        .with_attribute("name", AttributeKind::Text);
    let comments = AttributeSchema::strict()
        .with_attribute("id", AttributeKind::Integer)
        .with_attribute("post_id", AttributeKind::Integer)
        .with_attribute("user_id", AttributeKind::Integer)
        .with_attribute("body", AttributeKind::Text)
        .with_attribute("approved", AttributeKind::Boolean)
        .with_attribute("score", AttributeKind::Integer)
        .with_relation("author", users.clone());
    AttributeSchema::strict()
        .with_attribute("id", AttributeKind::Integer)
        .with_attribute("title", AttributeKind::Text)
        .with_attribute("status", AttributeKind::Text)
        .with_attribute("views", AttributeKind::Integer)
        .with_attribute("rating", AttributeKind::Float)
        .with_attribute("author_id", AttributeKind::Integer)
        .with_relation("author", users)
        .with_relation("comments", comments)
}

pub fn blog_factory() -> FilterFactory {
    FilterFactory::standard().with_schema(blog_schema())
}

fn user_json(id: Option<i64>) -> Json {
    USERS
        .iter()
        .find(|(user, _)| Some(*user) == id)
        .map_or(Json::Null, |(id, name)| json!({"id": id, "name": name}))
}

pub fn posts_collection() -> MemoryCollection {
    let records: Vec<Record> = POSTS
        .iter()
        .map(|post| {
            let comments: Vec<Json> = COMMENTS
                .iter()
                .filter(|comment| comment.1 == post.id)
                .map(|(id, post_id, user_id, body, approved, score)| {
                    json!({
                        "id": id, "post_id": post_id, "user_id": user_id, "body": body,
                        "approved": approved, "score": score, "author": user_json(Some(*user_id)),
                    })
                })
                .collect();
            let record = json!({
                "id": post.id, "title": post.title, "status": post.status,
                "views": post.views, "rating": post.rating, "author_id": post.author_id,
                "author": user_json(post.author_id), "comments": comments,
            });
            serde_json::from_value(record).unwrap()
        })
        .collect();

    MemoryCollection::new(records)
        .with_relation("author")
        .with_relation_path("comments.author")
}

pub fn posts_table() -> SeaTable {
    let users = SeaTable::new("users", "id");
    let comments = SeaTable::new("comments", "id").belongs_to("author", users.clone(), "user_id");
    SeaTable::new("posts", "id")
        .belongs_to("author", users, "author_id")
        .has_many("comments", comments, "post_id")
}

/// In-memory SQLite holding the same blog fixture as `posts_collection`.
pub async fn setup_blog_db() -> Result<DatabaseConnection, DbErr> {
    let db = Database::connect("sqlite::memory:").await?;
    let backend = db.get_database_backend();

    let users = Table::create()
        .table(Alias::new("users"))
        .col(ColumnDef::new(Alias::new("id")).integer().not_null().primary_key())
        .col(ColumnDef::new(Alias::new("name")).string().not_null())
        .to_owned();
    let posts = Table::create()
        .table(Alias::new("posts"))
        .col(ColumnDef::new(Alias::new("id")).integer().not_null().primary_key())
        .col(ColumnDef::new(Alias::new("title")).string().not_null())
        .col(ColumnDef::new(Alias::new("status")).string().not_null())
        .col(ColumnDef::new(Alias::new("views")).integer())
        .col(ColumnDef::new(Alias::new("rating")).double())
        .col(ColumnDef::new(Alias::new("author_id")).integer())
        .to_owned();
    let comments = Table::create()
        .table(Alias::new("comments"))
        .col(ColumnDef::new(Alias::new("id")).integer().not_null().primary_key())
        .col(ColumnDef::new(Alias::new("post_id")).integer().not_null())
        .col(ColumnDef::new(Alias::new("user_id")).integer().not_null())
        .col(ColumnDef::new(Alias::new("body")).string().not_null())
        .col(ColumnDef::new(Alias::new("approved")).boolean().not_null())
        .col(ColumnDef::new(Alias::new("score")).integer().not_null())
        .to_owned();
    for table in [users, posts, comments] {
        db.execute(backend.build(&table)).await?;
    }

    let insert = |table: &str, columns: &[&str], rows: Vec<Vec<SimpleExpr>>| {
        let mut statement = Query::insert();
        statement
            .into_table(Alias::new(table))
            .columns(columns.iter().map(|column| Alias::new(*column)));
        for row in rows {
            statement.values_panic(row);
        }
        backend.build(&statement)
    };

    db.execute(insert(
        "users",
        &["id", "name"],
        USERS.iter().map(|(id, name)| vec![(*id).into(), (*name).into()]).collect(),
    ))
    .await?;
    db.execute(insert(
        "posts",
        &["id", "title", "status", "views", "rating", "author_id"],
        POSTS
            .iter()
            .map(|post| {
                vec![
                    post.id.into(),
                    post.title.into(),
                    post.status.into(),
                    post.views.into(),
                    post.rating.into(),
                    post.author_id.into(),
                ]
            })
            .collect(),
    ))
    .await?;
    db.execute(insert(
        "comments",
        &["id", "post_id", "user_id", "body", "approved", "score"],
        COMMENTS
            .iter()
            .map(|(id, post_id, user_id, body, approved, score)| {
                vec![
                    (*id).into(),
                    (*post_id).into(),
                    (*user_id).into(),
                    (*body).into(),
                    (*approved).into(),
                    (*score).into(),
                ]
            })
            .collect(),
    ))
    .await?;

    Ok(db)
}

/// Ids returned by the in-memory driver, in result order.
pub fn memory_ids(criteria: &Criteria) -> Vec<i64> {
    MemoryDriver
        .compile(&posts_collection(), criteria)
        .unwrap()
        .fetch()
        .unwrap()
        .iter()
        .map(|record| record["id"].as_i64().unwrap())
        .collect()
}

/// Ids returned by running the compiled select against `db`, in result order.
pub async fn sql_ids(db: &DatabaseConnection, criteria: &Criteria) -> Vec<i64> {
    let query = SeaQueryDriver.compile(&posts_table(), criteria).unwrap();
    let rows = db
        .query_all(query.statement(db.get_database_backend()))
        .await
        .unwrap();
    rows.iter()
        .map(|row| row.try_get::<i64>("", "id").unwrap())
        .collect()
}

pub fn criteria_with_filters(raw: &str) -> Criteria {
    let mut criteria = Criteria::new();
    criteria.set_filters_raw(raw, &blog_factory()).unwrap();
    criteria
}
