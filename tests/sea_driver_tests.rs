// SQLite-backed tests for the sea-query driver. Every statement is executed
// against the blog fixture and its rows compared with what the in-memory
// driver returns for the same criteria.

mod common;

use common::{
    criteria_with_filters, init_tracing, memory_ids, posts_collection, posts_table, setup_blog_db,
    sql_ids,
};
use criteriacrate::{
    Criteria, FilterFactory, Pagination, QueryDriver, Sorting, TextSearch,
    driver::{
        memory::MemoryDriver,
        sea::{SeaLoadKind, SeaQueryDriver},
    },
};
use sea_orm::{ConnectionTrait, DatabaseConnection};
use std::collections::BTreeMap;

async fn assert_drivers_agree(db: &DatabaseConnection, criteria: &Criteria) -> Vec<i64> {
    let expected = memory_ids(criteria);
    let actual = sql_ids(db, criteria).await;
    assert_eq!(actual, expected, "drivers disagree for {criteria:?}");
    actual
}

fn filtered_by_id(raw: &str) -> Criteria {
    let mut criteria = criteria_with_filters(raw);
    criteria.set_sorting(Some(Sorting::asc("id")));
    criteria
}

#[tokio::test]
async fn test_comparison_operators_agree() {
    init_tracing();
    let db = setup_blog_db().await.unwrap();

    let cases: [(&str, &[i64]); 10] = [
        ("status|eq|published", &[1, 3, 5]),
        ("views|gt|100", &[1, 3]),
        ("views|ne|15", &[1, 3, 5]),
        ("views|null", &[4]),
        ("views|!null", &[1, 2, 3, 5]),
        ("rating|gt|3", &[1, 4]),
        ("rating|between|2.5,4.5", &[1, 3, 5]),
        ("rating|!between|3,4", &[1, 4, 5]),
        ("status|in|draft,review", &[2, 4]),
        ("status|!in|draft,review", &[1, 3, 5]),
    ];
    for (raw, expected) in cases {
        let ids = assert_drivers_agree(&db, &filtered_by_id(raw)).await;
        assert_eq!(ids, expected, "{raw}");
    }
}

#[tokio::test]
async fn test_like_is_case_insensitive_and_escaped() {
    let db = setup_blog_db().await.unwrap();

    let cases: [(&str, &[i64]); 4] = [
        ("title|like|rust", &[1, 3]),
        ("title|!like|rust", &[2, 4, 5]),
        (r#"title|like|"100%""#, &[4]),
        (r#"title|like|"%""#, &[4]),
    ];
    for (raw, expected) in cases {
        let ids = assert_drivers_agree(&db, &filtered_by_id(raw)).await;
        assert_eq!(ids, expected, "{raw}");
    }
}

#[tokio::test]
async fn test_left_to_right_grouping_agrees() {
    let db = setup_blog_db().await.unwrap();

    // ((id = 1 OR id = 2) AND views > 100)
    let ids = assert_drivers_agree(&db, &filtered_by_id("id|eq|1,or|id|eq|2,and|views|gt|100")).await;
    assert_eq!(ids, [1]);

    // id = 2 OR (id = 1 AND views > 100)
    let ids = assert_drivers_agree(&db, &filtered_by_id("id|eq|2,or|[id|eq|1,and|views|gt|100]")).await;
    assert_eq!(ids, [1, 2]);
}

#[tokio::test]
async fn test_relation_filters_agree() {
    let db = setup_blog_db().await.unwrap();

    let cases: [(&str, &[i64]); 6] = [
        ("has|comments[approved|eq|true]", &[1, 3]),
        ("!has|comments[]", &[2, 4]),
        ("comments.author.name|eq|Ann", &[3, 5]),
        ("author|exists|[name|eq|Bob]", &[2, 5]),
        ("author|!exists", &[4]),
        ("has|comments[score|gte|4,and|author.name|eq|Bob]", &[1]),
    ];
    for (raw, expected) in cases {
        let ids = assert_drivers_agree(&db, &filtered_by_id(raw)).await;
        assert_eq!(ids, expected, "{raw}");
    }
}

#[tokio::test]
async fn test_sorting_puts_nulls_first_ascending() {
    let db = setup_blog_db().await.unwrap();

    let mut criteria = Criteria::new();
    criteria.set_sorting(Some(Sorting::asc("views")));
    assert_eq!(assert_drivers_agree(&db, &criteria).await, [4, 2, 5, 1, 3]);

    criteria.set_sorting(Some(Sorting::desc("rating")));
    assert_eq!(assert_drivers_agree(&db, &criteria).await, [4, 1, 3, 5, 2]);
}

#[tokio::test]
async fn test_sorting_by_related_attribute() {
    let db = setup_blog_db().await.unwrap();

    let mut criteria = Criteria::new();
    criteria.set_sorting(Some(Sorting::asc("author.name")));

    // Ties between posts of the same author have no defined order in SQL.
    let ids = sql_ids(&db, &criteria).await;
    assert_eq!(ids[0], 4);
    let mut ann: Vec<i64> = ids[1..3].to_vec();
    ann.sort_unstable();
    assert_eq!(ann, [1, 3]);
    assert_eq!(memory_ids(&criteria)[0], 4);
}

#[tokio::test]
async fn test_pagination_agrees() {
    let db = setup_blog_db().await.unwrap();

    let mut criteria = Criteria::new();
    criteria
        .set_sorting(Some(Sorting::desc("id")))
        .set_pagination(Some(Pagination::new(1, 2)));
    assert_eq!(assert_drivers_agree(&db, &criteria).await, [4, 3]);
}

#[tokio::test]
async fn test_text_search_agrees() {
    let db = setup_blog_db().await.unwrap();

    let mut criteria = Criteria::new();
    criteria
        .set_sorting(Some(Sorting::asc("id")))
        .set_text_search(Some(TextSearch::new("RUST", ["title", "status"])));
    assert_eq!(assert_drivers_agree(&db, &criteria).await, [1, 3]);

    criteria.set_text_search(Some(TextSearch::new("bob", ["comments.author.name"])));
    assert_eq!(assert_drivers_agree(&db, &criteria).await, [1, 3]);
}

#[tokio::test]
async fn test_count_ignores_pagination() {
    let db = setup_blog_db().await.unwrap();

    let mut criteria = criteria_with_filters("status|eq|published");
    criteria.set_pagination(Some(Pagination::new(0, 1)));

    let query = SeaQueryDriver.compile(&posts_table(), &criteria).unwrap();
    let backend = db.get_database_backend();
    let row = db
        .query_one(backend.build(query.count()))
        .await
        .unwrap()
        .unwrap();
    let count: i64 = row.try_get("", "count").unwrap();

    let memory = MemoryDriver.compile(&posts_collection(), &criteria).unwrap();
    assert_eq!(count, 3);
    assert_eq!(usize::try_from(count).unwrap(), memory.count());
    assert_eq!(memory.fetch().unwrap().len(), 1);
}

#[tokio::test]
async fn test_eager_loads_match_embedded_relations() {
    let db = setup_blog_db().await.unwrap();
    let backend = db.get_database_backend();

    let mut approved = Criteria::new();
    approved
        .set_filters_raw("approved|eq|true", &FilterFactory::standard())
        .unwrap();
    let mut criteria = Criteria::new();
    criteria
        .set_sorting(Some(Sorting::asc("id")))
        .add_relation("comments", Some(approved))
        .add_relation_count("comments", None);

    let query = SeaQueryDriver.compile(&posts_table(), &criteria).unwrap();
    let parents = sql_ids(&db, &criteria).await;
    let keys = || parents.iter().map(|id| sea_orm::Value::from(*id));

    let mut counts: BTreeMap<i64, i64> = BTreeMap::new();
    let mut comment_ids: Vec<i64> = Vec::new();
    for load in query.eager() {
        assert_eq!(load.relation, "comments");
        let rows = db.query_all(backend.build(&load.for_keys(keys()))).await.unwrap();
        match &load.kind {
            SeaLoadKind::Count(_) => {
                for row in rows {
                    let post: i64 = row.try_get("", "post_id").unwrap();
                    let count: i64 = row.try_get("", "comments_count").unwrap();
                    counts.insert(post, count);
                }
            }
            SeaLoadKind::Records(_) => {
                comment_ids.extend(rows.iter().map(|row| row.try_get::<i64>("", "id").unwrap()));
            }
        }
    }
    comment_ids.sort_unstable();

    let fetched = MemoryDriver
        .compile(&posts_collection(), &criteria)
        .unwrap()
        .fetch()
        .unwrap();
    let mut embedded: Vec<i64> = Vec::new();
    for record in &fetched {
        let id = record["id"].as_i64().unwrap();
        let count = record["comments_count"].as_i64().unwrap();
        assert_eq!(counts.get(&id).copied().unwrap_or(0), count, "post {id}");
        embedded.extend(
            record["comments"]
                .as_array()
                .unwrap()
                .iter()
                .map(|comment| comment["id"].as_i64().unwrap()),
        );
    }
    embedded.sort_unstable();

    assert_eq!(comment_ids, [10, 12]);
    assert_eq!(comment_ids, embedded);
}

#[tokio::test]
async fn test_projection_keeps_load_keys() {
    let db = setup_blog_db().await.unwrap();

    let mut criteria = Criteria::new();
    criteria
        .set_attributes(["title"])
        .add_relation("author", None)
        .set_sorting(Some(Sorting::asc("title")));

    let query = SeaQueryDriver.compile(&posts_table(), &criteria).unwrap();
    let rows = db
        .query_all(query.statement(db.get_database_backend()))
        .await
        .unwrap();
    assert_eq!(rows.len(), 5);

    let first_author: Option<i64> = rows[0].try_get("", "author_id").unwrap();
    let first_title: String = rows[0].try_get("", "title").unwrap();
    assert_eq!(first_title, "Go channels");
    assert_eq!(first_author, Some(2));
}
