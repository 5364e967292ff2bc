use std::collections::{HashMap, HashSet};

use rand::Rng;
use sqlx::SqlitePool;
use thiserror::Error;

use crate::core::time::primitive_now_utc;
use crate::db::models::{NewQuestion, Question};
use crate::db::types::{Difficulty, QuestionType};
use crate::repositories;
use crate::repositories::papers::CreatePaper;
use crate::services::export::{self, ExportError};
use crate::services::generation::{GenerationParams, QuestionGenerator, MAX_GENERATED_QUESTIONS};
use crate::services::normalizer::{self, Defaults, QuestionInput};
use crate::services::selection::{self, SelectionCriteria, SheetFormat, TypeQuota};

pub(crate) const MAX_PROVIDED_QUESTIONS: i64 = 100;
pub(crate) const MAX_UPLOAD_QUESTIONS: i64 = 50;
/// Distinct ids accepted by one export; each becomes a bound parameter.
pub(crate) const MAX_EXPORT_QUESTIONS: usize = 5000;

#[derive(Debug, Error)]
pub(crate) enum PaperError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Generation(String),
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
    #[error("export failed: {0}")]
    Export(String),
}

impl From<ExportError> for PaperError {
    fn from(err: ExportError) -> Self {
        Self::Export(err.to_string())
    }
}

impl PaperError {
    fn validation(message: impl Into<String>) -> Self {
        let message = message.into();
        tracing::warn!(reason = %message, "Rejected paper request");
        Self::Validation(message)
    }
}

#[derive(Debug, Clone)]
pub(crate) struct PaperMeta {
    pub(crate) exam_title: String,
    pub(crate) time_limit: i64,
    pub(crate) instructions: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PaperCreated {
    pub(crate) paper_id: i64,
    pub(crate) question_count: usize,
}

#[derive(Debug, Clone)]
pub(crate) struct GeneratePaperInput {
    pub(crate) text: String,
    pub(crate) num_questions: i64,
    pub(crate) question_types: Vec<String>,
    pub(crate) difficulty: String,
    pub(crate) topic: String,
    pub(crate) meta: PaperMeta,
}

#[derive(Debug, Clone)]
pub(crate) struct StoreQuestionsInput {
    pub(crate) questions: Vec<QuestionInput>,
    pub(crate) num_questions: i64,
    pub(crate) question_types: Vec<String>,
    pub(crate) difficulty: String,
    pub(crate) topic: String,
    pub(crate) meta: PaperMeta,
}

#[derive(Debug, Clone)]
pub(crate) struct QuotaInput {
    pub(crate) question_type: String,
    pub(crate) count: u32,
}

#[derive(Debug, Clone)]
pub(crate) struct UploadInput {
    pub(crate) file_name: String,
    pub(crate) contents: Vec<u8>,
    pub(crate) quotas: Vec<QuotaInput>,
    pub(crate) topic: Option<String>,
    pub(crate) difficulty: String,
    pub(crate) total_questions: i64,
    pub(crate) meta: PaperMeta,
}

/// A stored question with its options decoded for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct StoredQuestion {
    pub(crate) id: i64,
    pub(crate) question: String,
    pub(crate) question_type: QuestionType,
    pub(crate) difficulty: Difficulty,
    pub(crate) blooms_level: String,
    pub(crate) topic: String,
    pub(crate) options: Vec<String>,
    pub(crate) answer: String,
}

pub(crate) async fn generate_and_store(
    pool: &SqlitePool,
    generator: &QuestionGenerator,
    input: GeneratePaperInput,
) -> Result<PaperCreated, PaperError> {
    if input.text.trim().is_empty() {
        return Err(PaperError::validation("Text is required"));
    }
    let num_questions = u32::try_from(input.num_questions)
        .ok()
        .filter(|count| (1..=MAX_GENERATED_QUESTIONS).contains(count))
        .ok_or_else(|| PaperError::validation("Invalid number of questions"))?;
    let difficulty = parse_difficulty(&input.difficulty)?;
    let question_types = parse_question_types(&input.question_types)?;
    validate_meta(&input.meta)?;

    let questions = generator
        .generate(&GenerationParams {
            text: &input.text,
            num_questions,
            question_types: &question_types,
            difficulty,
            topic: &input.topic,
        })
        .await;

    if questions.is_empty() {
        tracing::error!("Generator returned no usable questions");
        return Err(PaperError::Generation("No questions could be generated".to_string()));
    }

    persist(pool, &input.meta, &questions, "ai").await
}

/// Stores questions supplied by the caller, in either payload form.
pub(crate) async fn store_provided(
    pool: &SqlitePool,
    input: StoreQuestionsInput,
) -> Result<PaperCreated, PaperError> {
    if input.questions.is_empty() {
        return Err(PaperError::validation("Invalid or empty questions"));
    }
    if !(1..=MAX_PROVIDED_QUESTIONS).contains(&input.num_questions) {
        return Err(PaperError::validation("Invalid number of questions"));
    }
    let difficulty = parse_difficulty(&input.difficulty)?;
    let question_types = parse_question_types(&input.question_types)?;
    validate_meta(&input.meta)?;

    let defaults = Defaults::new(question_types[0], difficulty, input.topic.as_str());
    let mut questions = Vec::with_capacity(input.questions.len());
    for entry in &input.questions {
        match normalizer::from_input(entry, &defaults) {
            Ok(Some(record)) => questions.push(record),
            Ok(None) => tracing::debug!("Dropping blank question entry"),
            Err(err) => return Err(PaperError::validation(err.to_string())),
        }
    }

    if questions.is_empty() {
        return Err(PaperError::validation("Invalid or empty questions"));
    }

    persist(pool, &input.meta, &questions, "provided").await
}

pub(crate) async fn upload_and_store<R: Rng + ?Sized>(
    pool: &SqlitePool,
    input: UploadInput,
    rng: &mut R,
) -> Result<PaperCreated, PaperError> {
    if input.quotas.is_empty() {
        return Err(PaperError::validation("No question types specified"));
    }
    if !(1..=MAX_UPLOAD_QUESTIONS).contains(&input.total_questions) {
        return Err(PaperError::validation("Invalid total questions count"));
    }
    if input.file_name.trim().is_empty() {
        return Err(PaperError::validation("No file selected"));
    }
    let format = SheetFormat::from_file_name(&input.file_name)
        .ok_or_else(|| PaperError::validation("Only Excel or CSV files are allowed"))?;
    let difficulty = parse_difficulty(&input.difficulty)?;
    let quotas = input
        .quotas
        .iter()
        .map(|quota| {
            QuestionType::parse(&quota.question_type)
                .map(|question_type| TypeQuota { question_type, count: quota.count })
                .ok_or_else(|| PaperError::validation("Invalid question types"))
        })
        .collect::<Result<Vec<_>, _>>()?;
    validate_meta(&input.meta)?;

    let candidates = selection::parse_candidate_pool(&input.contents, format)
        .map_err(|err| PaperError::validation(err.to_string()))?;

    let criteria =
        SelectionCriteria { topic: input.topic.as_deref(), difficulty, quotas: &quotas };
    let questions = selection::select_with_rng(&candidates, criteria, rng)
        .map_err(|err| PaperError::validation(err.to_string()))?;

    persist(pool, &input.meta, &questions, "spreadsheet").await
}

/// Questions of `paper_id` in insertion order. Unknown papers yield an empty list.
pub(crate) async fn list_questions(
    pool: &SqlitePool,
    paper_id: i64,
) -> Result<Vec<StoredQuestion>, PaperError> {
    if paper_id < 1 {
        return Err(PaperError::validation("Invalid paper_id"));
    }

    let rows = repositories::questions::list_by_paper(pool, paper_id).await?;
    tracing::info!(paper_id, count = rows.len(), "Fetched questions");

    Ok(rows.into_iter().map(StoredQuestion::from).collect())
}

/// Renders the selected questions of a paper, in the order given, as a PDF document.
pub(crate) async fn export_paper(
    pool: &SqlitePool,
    paper_id: i64,
    question_ids: &[i64],
) -> Result<Vec<u8>, PaperError> {
    if paper_id < 1 || question_ids.is_empty() {
        return Err(PaperError::validation("Invalid paper_id or question_ids"));
    }

    let mut seen = HashSet::with_capacity(question_ids.len());
    let requested =
        question_ids.iter().copied().filter(|id| seen.insert(*id)).collect::<Vec<_>>();
    if requested.len() > MAX_EXPORT_QUESTIONS {
        return Err(PaperError::validation(format!(
            "At most {MAX_EXPORT_QUESTIONS} question_ids can be exported at once"
        )));
    }

    let paper = repositories::papers::find_by_id(pool, paper_id)
        .await?
        .ok_or_else(|| PaperError::NotFound("Paper not found".to_string()))?;

    let mut by_id = repositories::questions::list_by_ids(pool, paper_id, &requested)
        .await?
        .into_iter()
        .map(|question| (question.id, question))
        .collect::<HashMap<_, _>>();
    let questions =
        requested.iter().filter_map(|id| by_id.remove(id)).collect::<Vec<Question>>();

    if questions.is_empty() {
        tracing::warn!(paper_id, "No requested questions belong to paper");
        return Err(PaperError::NotFound("No questions found".to_string()));
    }

    let blocks = export::compose(&paper, &questions);
    let document = export::render_pdf(&blocks)?;

    metrics::counter!("paper_exports_total").increment(1);
    tracing::info!(paper_id, questions = questions.len(), bytes = document.len(), "Exported paper");
    Ok(document)
}

async fn persist(
    pool: &SqlitePool,
    meta: &PaperMeta,
    questions: &[NewQuestion],
    source: &'static str,
) -> Result<PaperCreated, PaperError> {
    let mut tx = pool.begin().await?;

    let paper = repositories::papers::create(
        &mut *tx,
        CreatePaper {
            exam_title: &meta.exam_title,
            time_limit: meta.time_limit,
            instructions: &meta.instructions,
            created_at: primitive_now_utc(),
        },
    )
    .await?;
    let inserted = repositories::questions::insert_many(&mut tx, paper.id, questions).await?;

    tx.commit().await?;

    metrics::counter!("papers_created_total", "source" => source).increment(1);
    metrics::counter!("questions_stored_total").increment(inserted);
    tracing::info!(paper_id = paper.id, inserted, source, "Stored paper");

    Ok(PaperCreated { paper_id: paper.id, question_count: inserted as usize })
}

fn parse_difficulty(value: &str) -> Result<Difficulty, PaperError> {
    Difficulty::parse(value).ok_or_else(|| PaperError::validation("Invalid difficulty level"))
}

fn parse_question_types(values: &[String]) -> Result<Vec<QuestionType>, PaperError> {
    if values.is_empty() {
        return Err(PaperError::validation("Invalid question types"));
    }

    values
        .iter()
        .map(|value| {
            QuestionType::parse(value).ok_or_else(|| PaperError::validation("Invalid question types"))
        })
        .collect()
}

fn validate_meta(meta: &PaperMeta) -> Result<(), PaperError> {
    if meta.time_limit < 1 {
        return Err(PaperError::validation("Invalid time limit"));
    }
    Ok(())
}

impl From<Question> for StoredQuestion {
    fn from(row: Question) -> Self {
        let options = row.decode_options().unwrap_or_else(|err| {
            tracing::warn!(question_id = row.id, error = %err, "Stored options could not be decoded");
            Vec::new()
        });

        Self {
            id: row.id,
            question: row.question,
            question_type: row.question_type,
            difficulty: row.difficulty,
            blooms_level: row.blooms_level,
            topic: row.topic,
            options,
            answer: row.answer,
        }
    }
}
