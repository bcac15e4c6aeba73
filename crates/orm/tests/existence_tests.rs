mod common;

use common::*;
use relmap::{QueryFilters, RelationQueries};
use serde_json::json;
use sqlparser::dialect::SQLiteDialect;
use sqlparser::parser::Parser;

async fn seeded() -> (std::sync::Arc<dyn relmap::QueryClient>, StatementLog) {
    let (client, log) = database().await;
    seed(
        &client,
        &[
            "INSERT INTO users (id, name) VALUES (1, 'ada'), (2, 'grace'), (3, 'alan')",
            "INSERT INTO posts (id, user_id, title) VALUES (10, 1, 'a'), (11, 1, 'b'), \
             (12, 2, 'c')",
        ],
    )
    .await;
    log.reset();
    (client, log)
}

#[tokio::test]
async fn test_has_and_doesnt_have() {
    let (client, log) = seeded().await;

    let with_posts = USER.query(client.clone()).has("posts").unwrap().exec().await.unwrap();
    assert_eq!(ids(&with_posts), vec![1, 2]);

    let without = USER.query(client.clone()).doesnt_have("posts").unwrap().exec().await.unwrap();
    assert_eq!(ids(&without), vec![3]);

    assert_eq!(log.count(), 2);
    assert!(log.statements()[0]
        .contains("WHERE EXISTS (SELECT * FROM posts WHERE posts.user_id = users.id)"));
}

#[tokio::test]
async fn test_count_comparison() {
    let (client, log) = seeded().await;

    let prolific = USER
        .query(client.clone())
        .has_count("posts", ">", 1)
        .unwrap()
        .exec()
        .await
        .unwrap();
    assert_eq!(ids(&prolific), vec![1]);
    assert!(log.statements()[0]
        .contains("(SELECT COUNT(*) FROM posts WHERE posts.user_id = users.id) > ?"));

}

#[tokio::test]
async fn test_where_has_refines_the_subquery() {
    let (client, _log) = seeded().await;

    let users = USER
        .query(client.clone())
        .where_has("posts", |query| Ok(query.where_eq("posts.title", "c")))
        .unwrap()
        .exec()
        .await
        .unwrap();
    assert_eq!(ids(&users), vec![2]);

    let users = USER
        .query(client.clone())
        .where_eq("users.name", "alan")
        .or_has("posts")
        .unwrap()
        .exec()
        .await
        .unwrap();
    assert_eq!(ids(&users), vec![1, 2, 3]);
}

#[tokio::test]
async fn test_with_count_adds_a_count_column() {
    let (client, _log) = seeded().await;

    let users = USER
        .query(client.clone())
        .order_by("users.id")
        .with_count("posts")
        .unwrap()
        .exec()
        .await
        .unwrap();

    let counts: Vec<_> = users.iter().map(|user| user.extra("posts_count").cloned()).collect();
    assert_eq!(counts, vec![Some(json!(2)), Some(json!(1)), Some(json!(0))]);
    assert_eq!(users[0].get("name"), Some(&json!("ada")));
}

#[tokio::test]
async fn test_self_referencing_existence_is_valid_sql() {
    let (client, _log) = database().await;
    seed(
        &client,
        &["INSERT INTO categories (id, parent_id, name) VALUES \
           (1, NULL, 'root'), (2, 1, 'child'), (3, 2, 'grandchild'), \
           (4, NULL, 'lonely'), (5, 4, 'leaf')"],
    )
    .await;

    let query = CATEGORY.query(client.clone()).has("children.children").unwrap();
    let sql = query.to_sql();
    assert!(sql.contains("categories AS self_join_0"));
    assert!(sql.contains("categories AS self_join_1"));
    assert!(Parser::parse_sql(&SQLiteDialect {}, &sql).is_ok());

    let categories = query.exec().await.unwrap();
    assert_eq!(ids(&categories), vec![1]);
}

#[tokio::test]
async fn test_nested_doesnt_have_negates_the_outer_hop() {
    let (client, _log) = database().await;
    seed(
        &client,
        &["INSERT INTO categories (id, parent_id, name) VALUES \
           (1, NULL, 'root'), (2, 1, 'child'), (3, 2, 'grandchild'), \
           (4, NULL, 'lonely'), (5, 4, 'leaf')"],
    )
    .await;

    let query = CATEGORY.query(client.clone()).doesnt_have("children.children").unwrap();
    assert!(query.to_sql().starts_with("SELECT * FROM categories WHERE NOT EXISTS"));
    let categories = query.exec().await.unwrap();
    assert_eq!(ids(&categories), vec![2, 3, 4, 5]);
}

#[tokio::test]
async fn test_relation_query_existence() {
    let (client, _log) = database().await;
    seed(
        &client,
        &[
            "INSERT INTO users (id, name) VALUES (1, 'ada')",
            "INSERT INTO posts (id, user_id, title) VALUES (10, 1, 'a'), (11, 1, 'b')",
            "INSERT INTO comments (id, body, commentable_type, commentable_id) VALUES \
             (1, 'x', 'Post', 11)",
        ],
    )
    .await;

    let user = USER.query(client.clone()).find(1).await.unwrap().unwrap();
    let commented = user
        .related_query("posts", client.clone())
        .unwrap()
        .has("comments")
        .unwrap()
        .exec()
        .await
        .unwrap();
    assert_eq!(ids(&commented), vec![11]);
}

#[tokio::test]
async fn test_morph_to_many_existence_checks_the_owner_type() {
    let (client, _log) = database().await;
    seed(
        &client,
        &[
            "INSERT INTO articles (id, title) VALUES (1, 'a'), (2, 'b')",
            "INSERT INTO videos (id, title) VALUES (2, 'clip')",
            "INSERT INTO tags (id, name) VALUES (1, 'rust')",
            "INSERT INTO taggables (taggable_id, taggable_type, tag_id) VALUES \
             (1, 'Article', 1), (2, 'Video', 1)",

        ],
    )
    .await;

    let query = ARTICLE.query(client.clone()).has("tags").unwrap();
    assert!(query.to_sql().contains("taggables.taggable_type = 'Article'"));
    assert_eq!(ids(&query.exec().await.unwrap()), vec![1]);

    let videos = VIDEO.query(client.clone()).has("tags").unwrap().exec().await.unwrap();
    assert_eq!(ids(&videos), vec![2]);
}
