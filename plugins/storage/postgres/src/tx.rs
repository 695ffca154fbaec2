use std::future::Future;
use std::pin::Pin;

use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use reelz_api::{
    BackendError, ChangeEvent, FollowStatus, Mutation, OutboxTx, PostCounter, StoreTx, UserCounter, UserId,
};

use crate::map_sqlx;

const SQL_INSERT_USER: &str = include_str!("../sql/insert_user.sql");
const SQL_INSERT_POST: &str = include_str!("../sql/insert_post.sql");
const SQL_INSERT_MEDIA: &str = include_str!("../sql/insert_media.sql");
const SQL_INSERT_LIKE: &str = include_str!("../sql/insert_like.sql");
const SQL_INSERT_COMMENT: &str = include_str!("../sql/insert_comment.sql");
const SQL_INSERT_FOLLOW: &str = include_str!("../sql/insert_follow.sql");
const SQL_DELETE_FOLLOW: &str = include_str!("../sql/delete_follow.sql");
const SQL_INSERT_OUTBOX: &str = include_str!("../sql/insert_outbox.sql");
const SQL_USER_IS_PRIVATE: &str = include_str!("../sql/user_is_private.sql");
const SQL_FOLLOW_STATUS: &str = include_str!("../sql/follow_status.sql");

fn post_counter_column(counter: PostCounter) -> &'static str {
    match counter {
        PostCounter::Likes => "like_count",
        PostCounter::Comments => "comment_count",
    }
}

fn user_counter_column(counter: UserCounter) -> &'static str {
    match counter {
        UserCounter::Followers => "follower_count",
        UserCounter::Following => "following_count",
        UserCounter::Posts => "post_count",
    }
}

/// Column names come from the fixed match above, never from input.
fn counter_update(table: &str, column: &str) -> String {
    format!("UPDATE {table} SET {column} = GREATEST({column} + $2, 0) WHERE _id = $1")
}

/// Открытая транзакция Postgres. Drop без commit откатывает её
/// (поведение `sqlx::Transaction`).
pub struct PgTx {
    tx: Transaction<'static, Postgres>,
}

impl PgTx {
    pub(crate) fn new(tx: Transaction<'static, Postgres>) -> Self {
        Self { tx }
    }

    async fn bump(&mut self, sql: String, id: Uuid, delta: i64, what: &str) -> Result<(), BackendError> {
        let done = sqlx::query(&sql)
            .bind(id)
            .bind(delta)
            .execute(&mut *self.tx)
            .await
            .map_err(map_sqlx)?;
        if done.rows_affected() == 0 {
            return Err(BackendError::not_found(format!("{what} {id}")));
        }
        Ok(())
    }
}

impl OutboxTx for PgTx {
    fn insert_outbox<'a>(&'a mut self, event: &'a ChangeEvent)
        -> Pin<Box<dyn Future<Output = Result<(), BackendError>> + Send + 'a>>
    {
        Box::pin(async move {
            sqlx::query(SQL_INSERT_OUTBOX)
                .bind(event.event_type.as_str())
                .bind(&event.payload)
                .bind(event.created_at)
                .execute(&mut *self.tx)
                .await
                .map_err(|e| map_sqlx(e).with_context("outbox insert"))?;
            Ok(())
        })
    }
}

impl StoreTx for PgTx {
    fn apply<'a>(&'a mut self, mutation: &'a Mutation)
        -> Pin<Box<dyn Future<Output = Result<(), BackendError>> + Send + 'a>>
    {
        Box::pin(async move {
            match mutation {
                Mutation::InsertUser { id, username, first_name, last_name, is_private } => {
                    sqlx::query(SQL_INSERT_USER)
                        .bind(id.0)
                        .bind(username.as_str())
                        .bind(first_name.as_str())
                        .bind(last_name.as_str())
                        .bind(*is_private)
                        .execute(&mut *self.tx)
                        .await
                        .map_err(map_sqlx)?;
                }
                Mutation::InsertPost { id, user_id, caption } => {
                    sqlx::query(SQL_INSERT_POST)
                        .bind(id.0)
                        .bind(user_id.0)
                        .bind(caption.as_deref())
                        .execute(&mut *self.tx)
                        .await
                        .map_err(map_sqlx)?;
                }
                Mutation::InsertMedia { post_id, items } => {
                    for item in items {
                        sqlx::query(SQL_INSERT_MEDIA)
                            .bind(Uuid::new_v4())
                            .bind(post_id.0)
                            .bind(item.url.as_str())
                            .bind(item.media_type.as_str())
                            .execute(&mut *self.tx)
                            .await
                            .map_err(map_sqlx)?;
                    }
                }
                Mutation::InsertLike { user_id, post_id } => {
                    sqlx::query(SQL_INSERT_LIKE)
                        .bind(user_id.0)
                        .bind(post_id.0)
                        .execute(&mut *self.tx)
                        .await
                        .map_err(map_sqlx)?;
                }
                Mutation::InsertComment { id, user_id, post_id, text, parent_id } => {
                    sqlx::query(SQL_INSERT_COMMENT)
                        .bind(*id)
                        .bind(user_id.0)
                        .bind(post_id.0)
                        .bind(text.as_str())
                        .bind(*parent_id)
                        .execute(&mut *self.tx)
                        .await
                        .map_err(map_sqlx)?;
                }
                Mutation::InsertFollow { follower, followed, status } => {
                    sqlx::query(SQL_INSERT_FOLLOW)
                        .bind(follower.0)
                        .bind(followed.0)
                        .bind(status.as_str())
                        .execute(&mut *self.tx)
                        .await
                        .map_err(map_sqlx)?;
                }
                Mutation::DeleteFollow { follower, followed } => {
                    let done = sqlx::query(SQL_DELETE_FOLLOW)
                        .bind(follower.0)
                        .bind(followed.0)
                        .execute(&mut *self.tx)
                        .await
                        .map_err(map_sqlx)?;
                    if done.rows_affected() == 0 {
                        return Err(BackendError::not_found(format!("follow {follower} -> {followed}")));
                    }
                }
                Mutation::BumpPostCounter { post_id, counter, delta } => {
                    let sql = counter_update("posts", post_counter_column(*counter));
                    self.bump(sql, post_id.0, *delta, "post").await?;
                }
                Mutation::BumpUserCounter { user_id, counter, delta } => {
                    let sql = counter_update("users", user_counter_column(*counter));
                    self.bump(sql, user_id.0, *delta, "user").await?;
                }
            }
            Ok(())
        })
    }

    fn user_is_private(&mut self, user: UserId)
        -> Pin<Box<dyn Future<Output = Result<bool, BackendError>> + Send + '_>>
    {
        Box::pin(async move {
            let private: Option<bool> = sqlx::query_scalar(SQL_USER_IS_PRIVATE)
                .bind(user.0)
                .fetch_optional(&mut *self.tx)
                .await
                .map_err(map_sqlx)?;
            private.ok_or_else(|| BackendError::not_found(format!("user {user}")))
        })
    }

    fn follow_status(&mut self, follower: UserId, followed: UserId)
        -> Pin<Box<dyn Future<Output = Result<Option<FollowStatus>, BackendError>> + Send + '_>>
    {
        Box::pin(async move {
            let status: Option<String> = sqlx::query_scalar(SQL_FOLLOW_STATUS)
                .bind(follower.0)
                .bind(followed.0)
                .fetch_optional(&mut *self.tx)
                .await
                .map_err(map_sqlx)?;
            status.map(|s| s.parse::<FollowStatus>()).transpose()
        })
    }

    fn commit(self: Box<Self>) -> Pin<Box<dyn Future<Output = Result<(), BackendError>> + Send>> {
        Box::pin(async move { self.tx.commit().await.map_err(map_sqlx) })
    }

    fn rollback(self: Box<Self>) -> Pin<Box<dyn Future<Output = Result<(), BackendError>> + Send>> {
        Box::pin(async move { self.tx.rollback().await.map_err(map_sqlx) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_update_clamps_at_zero() {
        let sql = counter_update("posts", post_counter_column(PostCounter::Likes));
        assert_eq!(sql, "UPDATE posts SET like_count = GREATEST(like_count + $2, 0) WHERE _id = $1");
        assert!(counter_update("users", user_counter_column(UserCounter::Posts)).contains("post_count"));
    }

    #[test]
    fn follow_statements_carry_status() {
        assert!(SQL_INSERT_FOLLOW.contains("status"));
        assert!(SQL_FOLLOW_STATUS.contains("FROM follows"));
        assert!(SQL_INSERT_USER.contains("is_private"));
    }
}
