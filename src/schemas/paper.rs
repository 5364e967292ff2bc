use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::db::types::{Difficulty, QuestionType};
use crate::services::normalizer::{QuestionInput, DEFAULT_TOPIC};
use crate::services::papers::{
    GeneratePaperInput, PaperCreated, PaperMeta, StoreQuestionsInput, StoredQuestion,
};

pub(crate) const DEFAULT_EXAM_TITLE: &str = "Question Paper";
pub(crate) const DEFAULT_UPLOAD_TITLE: &str = "Excel Generated Paper";
pub(crate) const DEFAULT_UPLOAD_INSTRUCTIONS: &str = "Generated from Excel file";
pub(crate) const DEFAULT_TIME_LIMIT: i64 = 60;

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct GeneratePaperRequest {
    #[validate(length(min = 1, max = 50000, message = "Text is required"))]
    pub(crate) text: String,
    #[serde(default = "default_num_questions")]
    #[validate(range(min = 1, max = 50, message = "Invalid number of questions"))]
    pub(crate) num_questions: i64,
    #[serde(default = "default_question_types")]
    pub(crate) question_types: Vec<String>,
    #[serde(default = "default_difficulty")]
    pub(crate) difficulty: String,
    #[serde(default = "default_topic")]
    pub(crate) topic: String,
    #[serde(default = "default_exam_title")]
    #[validate(length(max = 200, message = "exam_title must be at most 200 characters"))]
    pub(crate) exam_title: String,
    #[serde(default = "default_time_limit")]
    #[validate(range(min = 1, message = "Invalid time limit"))]
    pub(crate) time_limit: i64,
    #[serde(default)]
    #[validate(length(max = 5000, message = "instructions must be at most 5000 characters"))]
    pub(crate) instructions: String,
}

impl GeneratePaperRequest {
    pub(crate) fn into_input(self) -> GeneratePaperInput {
        GeneratePaperInput {
            text: self.text,
            num_questions: self.num_questions,
            question_types: self.question_types,
            difficulty: self.difficulty,
            topic: self.topic,
            meta: PaperMeta {
                exam_title: self.exam_title,
                time_limit: self.time_limit,
                instructions: self.instructions,
            },
        }
    }
}

/// Caller-authored questions. Each entry is either an object with explicit
/// fields or a `"text (type, difficulty, blooms, topic)"` string.
#[derive(Debug, Deserialize, Validate)]
pub(crate) struct StorePaperRequest {
    #[serde(default)]
    pub(crate) questions: Vec<QuestionInput>,
    #[serde(default = "default_num_questions")]
    pub(crate) num_questions: i64,
    #[serde(default = "default_question_types")]
    pub(crate) question_types: Vec<String>,
    #[serde(default = "default_difficulty")]
    pub(crate) difficulty: String,
    #[serde(default = "default_topic")]
    pub(crate) topic: String,
    #[serde(default = "default_exam_title")]
    #[validate(length(max = 200, message = "exam_title must be at most 200 characters"))]
    pub(crate) exam_title: String,
    #[serde(default = "default_time_limit")]
    pub(crate) time_limit: i64,
    #[serde(default)]
    #[validate(length(max = 5000, message = "instructions must be at most 5000 characters"))]
    pub(crate) instructions: String,
}

impl StorePaperRequest {
    pub(crate) fn into_input(self) -> StoreQuestionsInput {
        StoreQuestionsInput {
            questions: self.questions,
            num_questions: self.num_questions,
            question_types: self.question_types,
            difficulty: self.difficulty,
            topic: self.topic,
            meta: PaperMeta {
                exam_title: self.exam_title,
                time_limit: self.time_limit,
                instructions: self.instructions,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct QuotaRequest {
    #[serde(rename = "type")]
    pub(crate) question_type: String,
    pub(crate) count: u32,
}

#[derive(Debug, Deserialize)]
pub(crate) struct QuestionsQuery {
    pub(crate) paper_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ExportRequest {
    #[serde(default)]
    pub(crate) paper_id: Option<i64>,
    #[serde(default)]
    pub(crate) question_ids: Vec<i64>,
}

#[derive(Debug, Serialize)]
pub(crate) struct PaperCreatedResponse {
    pub(crate) success: bool,
    pub(crate) paper_id: i64,
    pub(crate) question_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) message: Option<String>,
}

impl From<PaperCreated> for PaperCreatedResponse {
    fn from(created: PaperCreated) -> Self {
        Self {
            success: true,
            paper_id: created.paper_id,
            question_count: created.question_count,
            message: None,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct QuestionResponse {
    pub(crate) id: i64,
    pub(crate) question: String,
    #[serde(rename = "type")]
    pub(crate) question_type: QuestionType,
    pub(crate) difficulty: Difficulty,
    pub(crate) blooms_level: String,
    pub(crate) topic: String,
    pub(crate) options: Vec<String>,
    pub(crate) answer: String,
}

impl From<StoredQuestion> for QuestionResponse {
    fn from(stored: StoredQuestion) -> Self {
        Self {
            id: stored.id,
            question: stored.question,
            question_type: stored.question_type,
            difficulty: stored.difficulty,
            blooms_level: stored.blooms_level,
            topic: stored.topic,
            options: stored.options,
            answer: stored.answer,
        }
    }
}

fn default_num_questions() -> i64 {
    10
}

fn default_question_types() -> Vec<String> {
    vec![QuestionType::MultipleChoice.as_str().to_string()]
}

fn default_difficulty() -> String {
    Difficulty::Medium.as_str().to_string()
}

fn default_topic() -> String {
    DEFAULT_TOPIC.to_string()
}

fn default_exam_title() -> String {
    DEFAULT_EXAM_TITLE.to_string()
}

fn default_time_limit() -> i64 {
    DEFAULT_TIME_LIMIT
}
