use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::PrimitiveDateTime;

use crate::db::types::{Difficulty, QuestionType};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct Paper {
    pub(crate) id: i64,
    pub(crate) exam_title: String,
    pub(crate) time_limit: i64,
    pub(crate) instructions: String,
    pub(crate) created_at: PrimitiveDateTime,
}

/// A question as stored. `options` is the raw JSON text of the column.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct Question {
    pub(crate) id: i64,
    pub(crate) paper_id: i64,
    pub(crate) question: String,
    #[sqlx(rename = "type")]
    pub(crate) question_type: QuestionType,
    pub(crate) difficulty: Difficulty,
    pub(crate) blooms_level: String,
    pub(crate) topic: String,
    pub(crate) options: String,
    pub(crate) answer: String,
}

impl Question {
    pub(crate) fn decode_options(&self) -> Result<Vec<String>, serde_json::Error> {
        serde_json::from_str(&self.options)
    }
}

/// A normalized question that has not been attached to a paper yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct NewQuestion {
    pub(crate) question: String,
    #[serde(rename = "type")]
    pub(crate) question_type: QuestionType,
    pub(crate) difficulty: Difficulty,
    pub(crate) blooms_level: String,
    pub(crate) topic: String,
    pub(crate) options: Vec<String>,
    pub(crate) answer: String,
}
