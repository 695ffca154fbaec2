use std::sync::Arc;

use outbox::{EngagementService, OutboxError};
use reelz_api::{
    ErrorKind, EventType, FollowStatus, MediaUpload, OneOrMany, PostCounter, PostId, PostStore, UserCounter,
    UserId,
};
use storage_memory::MemoryStore;

fn service(store: &Arc<MemoryStore>) -> Arc<EngagementService> {
    Arc::new(EngagementService::new(store.clone(), store.clone()))
}

fn image(url: &str) -> MediaUpload {
    MediaUpload { url: url.to_string(), media_type: "image".to_string() }
}

async fn setup_post(svc: &EngagementService) -> (UserId, PostId) {
    let author = svc.create_user("author", "A", "B").await.unwrap();
    let post = svc
        .create_post(author, Some("first".into()), OneOrMany::SingleItem(image("s3://a")))
        .await
        .unwrap();
    (author, post)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_likes_match_outbox_rows() {
    let store = Arc::new(MemoryStore::new());
    let svc = service(&store);
    let (_, post) = setup_post(&svc).await;

    let mut users = Vec::new();
    for i in 0..16 {
        users.push(svc.create_user(&format!("fan{i}"), "F", "N").await.unwrap());
    }

    // every user likes twice; the second like of each pair must fail
    let tasks: Vec<_> = users
        .iter()
        .chain(users.iter())
        .map(|user| {
            let svc = svc.clone();
            let user = *user;
            tokio::spawn(async move { svc.like_post(user, post).await })
        })
        .collect();
    let results = futures::future::join_all(tasks).await;

    let ok = results.iter().filter(|r| matches!(r, Ok(Ok(())))).count();
    let duplicates = results
        .iter()
        .filter(|r| matches!(r, Ok(Err(e)) if e.kind() == ErrorKind::Constraint))
        .count();
    assert_eq!(ok, 16);
    assert_eq!(duplicates, 16);

    let liked_events = store
        .outbox()
        .await
        .iter()
        .filter(|o| o.event.event_type == EventType::PostLiked)
        .count();
    assert_eq!(liked_events, ok);
    assert_eq!(store.like_count_rows().await, ok);
    assert_eq!(store.post_counter(post, PostCounter::Likes).await, Some(ok as i64));
}

#[tokio::test]
async fn outbox_failure_rolls_back_business_write() {
    let store = Arc::new(MemoryStore::new());
    let svc = service(&store);
    let (author, post) = setup_post(&svc).await;
    let before = store.outbox().await.len();

    store.fail_outbox_inserts(true);
    let err = svc.like_post(author, post).await.unwrap_err();
    assert!(matches!(err, OutboxError::Record { event_type: EventType::PostLiked, .. }));

    assert_eq!(store.outbox().await.len(), before);
    assert_eq!(store.like_count_rows().await, 0);
    assert_eq!(store.post_counter(post, PostCounter::Likes).await, Some(0));

    store.fail_outbox_inserts(false);
    svc.like_post(author, post).await.unwrap();
    assert_eq!(store.post_counter(post, PostCounter::Likes).await, Some(1));
}

#[tokio::test]
async fn create_post_accepts_one_or_many_media() {
    let store = Arc::new(MemoryStore::new());
    let svc = service(&store);
    let author = svc.create_user("poster", "P", "Q").await.unwrap();

    let post = svc
        .create_post(author, None, OneOrMany::MultipleItems(vec![image("s3://1"), image("s3://2"), image("s3://3")]))
        .await
        .unwrap();

    let loaded = store.load_posts(&[post]).await.unwrap();
    let urls: Vec<&str> = loaded[0].post.media_items.iter().map(|m| m.media_url.as_str()).collect();
    assert_eq!(urls, vec!["s3://1", "s3://2", "s3://3"]);
    assert_eq!(store.user_counter(author, UserCounter::Posts).await, Some(1));

    let err = svc.create_post(author, None, OneOrMany::MultipleItems(Vec::new())).await.unwrap_err();
    assert!(matches!(err, OutboxError::Invalid(_)));
}

#[tokio::test]
async fn follow_records_bootstrap_weight_and_counters() {
    let store = Arc::new(MemoryStore::new());
    let svc = service(&store);
    let a = svc.create_user("a", "A", "A").await.unwrap();
    let b = svc.create_user("b", "B", "B").await.unwrap();

    let outcome = svc.follow(a, b).await.unwrap();
    assert_eq!(outcome.status, FollowStatus::Follows);
    assert_eq!(outcome.edge.weight, 0.1);
    assert_eq!(store.user_counter(a, UserCounter::Following).await, Some(1));
    assert_eq!(store.user_counter(b, UserCounter::Followers).await, Some(1));

    let outbox = store.outbox().await;
    let event = &outbox.last().unwrap().event;
    assert_eq!(event.event_type, EventType::UserFollowed);
    assert_eq!(event.payload["weight"], 0.1);
    assert_eq!(event.payload["followerId"], a.to_string());

    assert_eq!(svc.follow(a, b).await.unwrap_err().kind(), ErrorKind::Constraint);

    assert_eq!(svc.unfollow(a, b).await.unwrap(), FollowStatus::Follows);
    assert_eq!(store.user_counter(b, UserCounter::Followers).await, Some(0));
    assert_eq!(store.user_counter(a, UserCounter::Following).await, Some(0));
    assert_eq!(svc.unfollow(a, b).await.unwrap_err().kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn self_follow_is_rejected_without_writes() {
    let store = Arc::new(MemoryStore::new());
    let svc = service(&store);
    let a = svc.create_user("solo", "S", "O").await.unwrap();
    let before = store.outbox().await.len();

    let err = svc.follow(a, a).await.unwrap_err();
    assert!(matches!(err, OutboxError::Invalid(_)));
    let err = svc.unfollow(a, a).await.unwrap_err();
    assert!(matches!(err, OutboxError::Invalid(_)));
    assert_eq!(store.outbox().await.len(), before);
}

#[tokio::test]
async fn following_private_account_records_request_only() {
    let store = Arc::new(MemoryStore::new());
    let svc = service(&store);
    let fan = svc.create_user("fan", "F", "F").await.unwrap();
    let star = svc.register_user("star", "S", "S", true).await.unwrap();

    let outcome = svc.follow(fan, star).await.unwrap();
    assert_eq!(outcome.status, FollowStatus::Requested);
    assert_eq!(store.follow_status(fan, star).await, Some(FollowStatus::Requested));
    assert_eq!(store.user_counter(star, UserCounter::Followers).await, Some(0));
    assert_eq!(store.user_counter(fan, UserCounter::Following).await, Some(0));

    let event = store.outbox().await.last().unwrap().event.clone();
    assert_eq!(event.event_type, EventType::FollowRequested);
    assert_eq!(event.payload["status"], "REQUESTED");

    // a second request is a duplicate like a second follow
    assert_eq!(svc.follow(fan, star).await.unwrap_err().kind(), ErrorKind::Constraint);
}

#[tokio::test]
async fn withdrawing_request_leaves_counters() {
    let store = Arc::new(MemoryStore::new());
    let svc = service(&store);
    let fan = svc.create_user("fan", "F", "F").await.unwrap();
    let public = svc.create_user("pub", "P", "P").await.unwrap();
    let star = svc.register_user("star", "S", "S", true).await.unwrap();

    svc.follow(fan, public).await.unwrap();
    svc.follow(fan, star).await.unwrap();
    assert_eq!(store.user_counter(fan, UserCounter::Following).await, Some(1));

    assert_eq!(svc.unfollow(fan, star).await.unwrap(), FollowStatus::Requested);
    assert_eq!(store.follow_status(fan, star).await, None);
    assert_eq!(store.user_counter(fan, UserCounter::Following).await, Some(1));
    assert_eq!(store.user_counter(star, UserCounter::Followers).await, Some(0));

    let event = store.outbox().await.last().unwrap().event.clone();
    assert_eq!(event.event_type, EventType::UserUnfollowed);
    assert_eq!(event.payload["status"], "REQUESTED");
}

#[tokio::test]
async fn follow_of_unknown_user_is_not_found() {
    let store = Arc::new(MemoryStore::new());
    let svc = service(&store);
    let fan = svc.create_user("fan", "F", "F").await.unwrap();
    let before = store.outbox().await.len();

    let err = svc.follow(fan, UserId::new()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(store.outbox().await.len(), before);
}

#[tokio::test]
async fn comments_validate_parent_and_count() {
    let store = Arc::new(MemoryStore::new());
    let svc = service(&store);
    let (author, post) = setup_post(&svc).await;

    let root = svc.comment_on_post(author, post, "nice", None).await.unwrap();
    svc.comment_on_post(author, post, "reply", Some(root)).await.unwrap();
    let err = svc
        .comment_on_post(author, post, "orphan", Some(uuid::Uuid::new_v4()))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(matches!(svc.comment_on_post(author, post, "  ", None).await, Err(OutboxError::Invalid(_))));

    assert_eq!(store.post_counter(post, PostCounter::Comments).await, Some(2));
}

#[tokio::test]
async fn mark_viewed_is_idempotent_and_not_outboxed() {
    let store = Arc::new(MemoryStore::new());
    let svc = service(&store);
    let (author, post) = setup_post(&svc).await;
    let before = store.outbox().await.len();

    assert!(svc.mark_viewed(author, post).await.unwrap());
    assert!(!svc.mark_viewed(author, post).await.unwrap());
    assert_eq!(store.outbox().await.len(), before);
}

#[tokio::test]
async fn duplicate_username_is_constraint() {
    let store = Arc::new(MemoryStore::new());
    let svc = service(&store);
    svc.create_user("taken", "T", "T").await.unwrap();
    let err = svc.create_user("taken", "X", "Y").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Constraint);
    assert_eq!(store.outbox().await.len(), 1);
}
