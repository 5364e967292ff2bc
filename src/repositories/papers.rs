use sqlx::SqlitePool;
use time::PrimitiveDateTime;

use crate::db::models::Paper;

pub(crate) const COLUMNS: &str = "id, exam_title, time_limit, instructions, created_at";

pub(crate) struct CreatePaper<'a> {
    pub(crate) exam_title: &'a str,
    pub(crate) time_limit: i64,
    pub(crate) instructions: &'a str,
    pub(crate) created_at: PrimitiveDateTime,
}

pub(crate) async fn create(
    executor: impl sqlx::SqliteExecutor<'_>,
    params: CreatePaper<'_>,
) -> Result<Paper, sqlx::Error> {
    sqlx::query_as::<_, Paper>(&format!(
        "INSERT INTO papers (exam_title, time_limit, instructions, created_at)
         VALUES (?1, ?2, ?3, ?4)
         RETURNING {COLUMNS}"
    ))
    .bind(params.exam_title)
    .bind(params.time_limit)
    .bind(params.instructions)
    .bind(params.created_at)
    .fetch_one(executor)
    .await
}

pub(crate) async fn find_by_id(pool: &SqlitePool, id: i64) -> Result<Option<Paper>, sqlx::Error> {
    sqlx::query_as::<_, Paper>(&format!("SELECT {COLUMNS} FROM papers WHERE id = ?1"))
        .bind(id)
        .fetch_optional(pool)
        .await
}

#[cfg(test)]
pub(crate) async fn count(pool: &SqlitePool) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) FROM papers").fetch_one(pool).await
}
