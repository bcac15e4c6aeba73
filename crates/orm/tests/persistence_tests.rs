mod common;

use std::sync::Arc;

use common::*;
use relmap::{
    ClientMode, ModelError, OrmConfig, QueryClient, QueryFilters, Record, RelationQueries,
    SqliteClient, SyncChanges,
};
use serde_json::{json, Value};

async fn user(client: &Arc<dyn QueryClient>, id: i64) -> Record {
    USER.query(client.clone()).find(id).await.unwrap().unwrap()
}

#[tokio::test]
async fn test_has_many_create_stamps_the_foreign_key() {
    let (client, _log) = database().await;
    seed(&client, &["INSERT INTO users (id, name) VALUES (1, 'ada')"]).await;

    let mut ada = user(&client, 1).await;
    let post = ada
        .related_client("posts", client.clone())
        .unwrap()
        .into_has_one_or_many()
        .unwrap()
        .create(json!({ "title": "hello" }))
        .await
        .unwrap();

    assert!(post.is_persisted());
    assert!(post.primary_key_value().is_some());
    assert_eq!(post.get("user_id"), Some(&json!(1)));

    let stored = ada.related_query("posts", client.clone()).unwrap().exec().await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].get("title"), Some(&json!("hello")));
}

#[tokio::test]
async fn test_failed_create_rolls_back_parent_and_child() {
    let (client, _log) = database().await;

    let mut parent = Record::make(USER.clone(), json!({ "name": "new" })).unwrap();
    let result = parent
        .related_client("posts", client.clone())
        .unwrap()
        .into_has_one_or_many()
        .unwrap()
        .create(json!({}))
        .await;

    assert!(result.is_err());
    assert!(!parent.is_persisted());
    assert!(parent.get("id").is_none());
    assert_eq!(USER.query(client.clone()).count().await.unwrap(), 0);
    assert_eq!(POST.query(client.clone()).count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_saving_under_a_new_parent_persists_both() {
    let (client, _log) = database().await;

    let mut parent = Record::make(USER.clone(), json!({ "name": "new" })).unwrap();
    let mut profile = Record::make(PROFILE.clone(), json!({ "bio": "hi" })).unwrap();
    parent
        .related_client("profile", client.clone())
        .unwrap()
        .into_has_one_or_many()
        .unwrap()
        .save(&mut profile)
        .await
        .unwrap();

    assert!(parent.is_persisted());
    assert_eq!(profile.get("user_id"), parent.primary_key_value());
    let loaded = parent.related_query("profile", client.clone()).unwrap().first().await.unwrap();
    assert_eq!(loaded.map(|p| p.get("bio").cloned()), Some(Some(json!("hi"))));
}

#[tokio::test]
async fn test_first_or_create_and_update_or_create() {
    let (client, _log) = database().await;
    seed(
        &client,
        &[
            "INSERT INTO users (id, name) VALUES (1, 'ada')",
            "INSERT INTO posts (id, user_id, title) VALUES (10, 1, 'a')",
        ],
    )
    .await;

    let mut ada = user(&client, 1).await;
    let mut posts = ada
        .related_client("posts", client.clone())
        .unwrap()
        .into_has_one_or_many()
        .unwrap();

    let existing = posts.first_or_create(json!({ "title": "a" }), json!({})).await.unwrap();
    assert_eq!(id(&existing), 10);

    let created = posts.first_or_create(json!({ "title": "b" }), json!({})).await.unwrap();
    assert_ne!(id(&created), 10);

    let updated = posts
        .update_or_create(json!({ "title": "a" }), json!({ "title": "a2" }))
        .await
        .unwrap();
    assert_eq!(id(&updated), 10);

    let stored = POST.query(client.clone()).find(10).await.unwrap().unwrap();
    assert_eq!(stored.get("title"), Some(&json!("a2")));
    assert_eq!(POST.query(client.clone()).count().await.unwrap(), 2);
}

#[tokio::test]
async fn test_associate_and_dissociate() {
    let (client, _log) = database().await;
    seed(&client, &["INSERT INTO users (id, name) VALUES (2, 'grace')"]).await;

    let mut grace = user(&client, 2).await;
    let mut post = Record::make(POST.clone(), json!({ "title": "orphan" })).unwrap();
    post.save(client.as_ref()).await.unwrap();
    let post_id = id(&post);

    {
        let mut owner = post
            .related_client("user", client.clone())
            .unwrap()
            .into_belongs_to()
            .unwrap();

        owner.associate(&mut grace).await.unwrap();
    }
    assert_eq!(post.get("user_id"), Some(&json!(2)));
    assert_eq!(post.related_one("user").map(id), Some(2));

    let stored = POST.query(client.clone()).find(post_id).await.unwrap().unwrap();
    assert_eq!(stored.get("user_id"), Some(&json!(2)));

    {
        let mut owner = post
            .related_client("user", client.clone())
            .unwrap()
            .into_belongs_to()
            .unwrap();

        owner.dissociate().await.unwrap();
    }
    assert_eq!(post.get("user_id"), Some(&Value::Null));
    assert!(post.is_loaded("user"));
    assert!(post.related_one("user").is_none());

    let stored = POST.query(client.clone()).find(post_id).await.unwrap().unwrap();
    assert_eq!(stored.get("user_id"), Some(&Value::Null));
}

#[tokio::test]
async fn test_attach_detach_and_sync() {
    let (client, _log) = database().await;
    seed(
        &client,
        &[
            "INSERT INTO users (id, name) VALUES (1, 'ada')",
            "INSERT INTO roles (id, name) VALUES (1, 'admin'), (2, 'editor'), (3, 'viewer')",
        ],
    )
    .await;

    let mut ada = user(&client, 1).await;
    let mut roles = ada
        .related_client("roles", client.clone())
        .unwrap()
        .into_many_to_many()
        .unwrap();

    roles
        .attach_with(vec![(json!(1), json!({ "granted_by": "root" })), (json!(2), Value::Null)])
        .await
        .unwrap();
    assert_eq!(roles.pivot_query().unwrap().exec_raw().await.unwrap().len(), 2);

    let changes = roles
        .sync_with(
            vec![(json!(2), json!({ "granted_by": "ops" })), (json!(3), json!({}))],
            true,
        )
        .await
        .unwrap();
    assert_eq!(
        changes,
        SyncChanges {
            attached: vec![json!(3)],
            detached: vec![json!(1)],
            updated: vec![json!(2)],
        }
    );

    assert_eq!(roles.detach(Some(vec![json!(3)])).await.unwrap(), 1);

    let changes = roles.sync_without_detaching(vec![json!(1), json!(2)]).await.unwrap();
    assert_eq!(changes.attached, vec![json!(1)]);
    assert!(changes.detached.is_empty());
    assert!(changes.updated.is_empty());

    let attached = roles.query().unwrap().order_by("roles.id").exec().await.unwrap();
    assert_eq!(ids(&attached), vec![1, 2]);
    assert_eq!(attached[1].extra("pivot_granted_by"), Some(&json!("ops")));

    assert_eq!(roles.detach(None).await.unwrap(), 2);
    assert!(roles.pivot_query().unwrap().exec_raw().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_morph_many_create_writes_the_type_tag() {
    let (client, _log) = database().await;
    seed(&client, &["INSERT INTO videos (id, title) VALUES (7, 'clip')"]).await;

    let mut video = VIDEO.query(client.clone()).find(7).await.unwrap().unwrap();
    let comment = video
        .related_client("comments", client.clone())
        .unwrap()
        .into_has_one_or_many()
        .unwrap()
        .create(json!({ "body": "nice" }))
        .await
        .unwrap();

    assert_eq!(comment.get("commentable_type"), Some(&json!("Video")));
    assert_eq!(comment.get("commentable_id"), Some(&json!(7)));

    let stored = COMMENT
        .query(client.clone())
        .preload("commentable")
        .unwrap()
        .first_or_fail()
        .await
        .unwrap();
    let target = stored.related_one("commentable").unwrap();
    assert_eq!(target.schema().name(), "Video");
    assert_eq!(id(target), 7);
}

#[tokio::test]
async fn test_relation_query_writes_and_pagination() {
    let (client, _log) = database().await;
    seed(
        &client,
        &[
            "INSERT INTO users (id, name) VALUES (1, 'ada'), (2, 'grace')",
            "INSERT INTO posts (id, user_id, title) VALUES (10, 1, 'a'), (11, 1, 'b'), \
             (12, 2, 'c')",
        ],
    )
    .await;
    let ada = user(&client, 1).await;

    let page = ada
        .related_query("posts", client.clone())
        .unwrap()
        .order_by("posts.id")
        .paginate(1, 2)
        .unwrap()
        .exec()
        .await
        .unwrap();
    assert_eq!(ids(&page), vec![11]);

    let changed = ada
        .related_query("posts", client.clone())
        .unwrap()
        .update(json!({ "title": "z" }))
        .await
        .unwrap();
    assert_eq!(changed, 2);

    let removed = ada.related_query("posts", client.clone()).unwrap().delete().await.unwrap();
    assert_eq!(removed, 2);
    let left = POST.query(client.clone()).exec().await.unwrap();
    assert_eq!(ids(&left), vec![12]);
    assert_eq!(left[0].get("title"), Some(&json!("c")));

    let err = ada
        .related_query("profile", client.clone())
        .unwrap()
        .paginate(1, 1)
        .unwrap_err();
    assert!(matches!(err, ModelError::UnsupportedOperation(_)));
}

#[tokio::test]
async fn test_missing_parent_key_fails_without_sql() {
    let (client, log) = database().await;
    log.reset();

    let unsaved = Record::make(USER.clone(), json!({ "name": "draft" })).unwrap();
    let err = unsaved
        .related_query("posts", client.clone())
        .unwrap()
        .exec()
        .await
        .unwrap_err();
    assert!(matches!(err, ModelError::MissingForeignKeyValue { .. }));
    assert_eq!(log.count(), 0);
}

#[tokio::test]
async fn test_read_only_client_rejects_writes() {
    let sqlite = SqliteClient::in_memory(OrmConfig::default())
        .await
        .unwrap()
        .with_mode(ClientMode::Read);
    let client: Arc<dyn QueryClient> = Arc::new(sqlite);

    let mut draft = Record::make(USER.clone(), json!({ "name": "draft" })).unwrap();
    let err = draft.save(client.as_ref()).await.unwrap_err();
    assert!(matches!(err, ModelError::UnsupportedOperation(_)));
}

#[tokio::test]
async fn test_wrong_client_shape_is_rejected() {
    let (client, _log) = database().await;
    seed(&client, &["INSERT INTO users (id, name) VALUES (1, 'ada')"]).await;
    let mut ada = user(&client, 1).await;

    let err = ada
        .related_client("posts", client.clone())
        .unwrap()
        .into_many_to_many()
        .err()
        .unwrap();
    assert!(matches!(err, ModelError::UnsupportedOperation(_)));

    let has_posts = USER.query(client.clone()).has("posts").unwrap().exec().await.unwrap();
    assert!(has_posts.is_empty());
}

#[tokio::test]
async fn test_morph_to_many_attach_and_sync_leave_other_owner_types_alone() {
    let (client, _log) = database().await;
    seed(
        &client,
        &[
            "INSERT INTO articles (id, title) VALUES (1, 'a')",
            "INSERT INTO videos (id, title) VALUES (1, 'clip')",
            "INSERT INTO tags (id, name) VALUES (1, 'rust'), (2, 'sql'), (3, 'orm')",
            "INSERT INTO taggables (taggable_id, taggable_type, tag_id) VALUES (1, 'Video', 1), \
             (1, 'Video', 3)",
        ],
    )
    .await;

    let mut article = ARTICLE.query(client.clone()).find(1).await.unwrap().unwrap();
    let mut tags = article
        .related_client("tags", client.clone())
        .unwrap()
        .into_many_to_many()
        .unwrap();

    tags.attach(vec![json!(1), json!(2)]).await.unwrap();
    let pivots = tags.pivot_query().unwrap().exec_raw().await.unwrap();
    assert_eq!(pivots.len(), 2);
    assert!(pivots.iter().all(|row| row.get("taggable_type") == Some(&json!("Article"))));

    let changes = tags.sync(vec![json!(2)]).await.unwrap();
    assert_eq!(
        changes,
        SyncChanges {
            attached: vec![],
            detached: vec![json!(1)],
            updated: vec![],
        }
    );
    assert_eq!(ids(&tags.query().unwrap().exec().await.unwrap()), vec![2]);

    let video = VIDEO.query(client.clone()).find(1).await.unwrap().unwrap();
    let video_tags = video.related_query("tags", client.clone()).unwrap().exec().await.unwrap();
    assert_eq!(ids(&video_tags), vec![1, 3]);
}
