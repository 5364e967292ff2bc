use sqlx::{QueryBuilder, Sqlite, SqlitePool, Transaction};

use crate::db::models::{NewQuestion, Question};

pub(crate) const COLUMNS: &str = "\
    id, paper_id, question, type, difficulty, blooms_level, topic, options, answer";

/// Rows per `INSERT`; eight binds each keeps a statement well under SQLite's
/// bound-variable limit.
pub(crate) const INSERT_CHUNK_ROWS: usize = 500;

/// Inserts all records on the caller's transaction, `INSERT_CHUNK_ROWS` per statement.
pub(crate) async fn insert_many(
    tx: &mut Transaction<'_, Sqlite>,
    paper_id: i64,
    records: &[NewQuestion],
) -> Result<u64, sqlx::Error> {
    let mut inserted = 0;

    for chunk in records.chunks(INSERT_CHUNK_ROWS) {
        let encoded_options = chunk
            .iter()
            .map(|record| serde_json::to_string(&record.options))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| sqlx::Error::Encode(Box::new(err)))?;

        let mut builder = QueryBuilder::<Sqlite>::new(
            "INSERT INTO questions (
                paper_id, question, type, difficulty, blooms_level, topic, options, answer
             ) ",
        );
        builder.push_values(
            chunk.iter().zip(encoded_options.iter()),
            |mut row, (record, options)| {
                row.push_bind(paper_id)
                    .push_bind(record.question.as_str())
                    .push_bind(record.question_type)
                    .push_bind(record.difficulty)
                    .push_bind(record.blooms_level.as_str())
                    .push_bind(record.topic.as_str())
                    .push_bind(options.as_str())
                    .push_bind(record.answer.as_str());
            },
        );

        inserted += builder.build().execute(&mut **tx).await?.rows_affected();
    }

    Ok(inserted)
}

pub(crate) async fn list_by_paper(
    pool: &SqlitePool,
    paper_id: i64,
) -> Result<Vec<Question>, sqlx::Error> {
    sqlx::query_as::<_, Question>(&format!(
        "SELECT {COLUMNS} FROM questions WHERE paper_id = ?1 ORDER BY id"
    ))
    .bind(paper_id)
    .fetch_all(pool)
    .await
}

/// Rows among `ids` that belong to `paper_id`, in id order. Foreign ids are ignored.
pub(crate) async fn list_by_ids(
    pool: &SqlitePool,
    paper_id: i64,
    ids: &[i64],
) -> Result<Vec<Question>, sqlx::Error> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let mut builder =
        QueryBuilder::<Sqlite>::new(format!("SELECT {COLUMNS} FROM questions WHERE paper_id = "));
    builder.push_bind(paper_id);
    builder.push(" AND id IN (");
    let mut separated = builder.separated(", ");
    for id in ids {
        separated.push_bind(*id);
    }
    separated.push_unseparated(") ORDER BY id");

    builder.build_query_as::<Question>().fetch_all(pool).await
}
