use axum::{
    extract::{rejection::JsonRejection, Multipart, Query, State},
    http::header,
    response::IntoResponse,
    Json,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use validator::Validate;

use crate::api::errors::ApiError;
use crate::core::state::AppState;
use crate::schemas::paper::{
    ExportRequest, GeneratePaperRequest, PaperCreatedResponse, QuestionResponse, QuestionsQuery,
    QuotaRequest, StorePaperRequest, DEFAULT_TIME_LIMIT, DEFAULT_UPLOAD_INSTRUCTIONS,
    DEFAULT_UPLOAD_TITLE,
};
use crate::services::papers::{self, PaperMeta, QuotaInput, UploadInput};

const EXPORT_FILE_NAME: &str = "question_paper.pdf";

pub(super) async fn generate_paper(
    State(state): State<AppState>,
    payload: Result<Json<GeneratePaperRequest>, JsonRejection>,
) -> Result<Json<PaperCreatedResponse>, ApiError> {
    let Json(payload) = payload?;
    payload.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let created =
        papers::generate_and_store(state.db(), state.generator(), payload.into_input()).await?;
    Ok(Json(created.into()))
}

pub(super) async fn store_paper(
    State(state): State<AppState>,
    payload: Result<Json<StorePaperRequest>, JsonRejection>,
) -> Result<Json<PaperCreatedResponse>, ApiError> {
    let Json(payload) = payload?;
    payload.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let created = papers::store_provided(state.db(), payload.into_input()).await?;
    Ok(Json(created.into()))
}

pub(super) async fn upload_paper(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<PaperCreatedResponse>, ApiError> {
    let max_bytes = state.settings().upload().max_upload_bytes();
    let max_mb = state.settings().upload().max_upload_size_mb;

    let mut file: Option<(String, Vec<u8>)> = None;
    let mut quotas: Vec<QuotaInput> = Vec::new();
    let mut topic: Option<String> = None;
    let mut difficulty: Option<String> = None;
    let mut exam_title: Option<String> = None;
    let mut time_limit: Option<String> = None;
    let mut instructions: Option<String> = None;
    let mut total_questions: Option<String> = None;

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|_| ApiError::BadRequest("Invalid multipart data".to_string()))?
    {
        let name = field.name().unwrap_or("").to_string();
        if name == "file" || name == "excel_file" {
            let file_name = field.file_name().unwrap_or("").to_string();
            let mut bytes = Vec::new();
            while let Some(chunk) = field
                .chunk()
                .await
                .map_err(|_| ApiError::BadRequest("Failed to read file".to_string()))?
            {
                if bytes.len() + chunk.len() > max_bytes {
                    return Err(ApiError::PayloadTooLarge(format!(
                        "File size exceeds {max_mb}MB limit"
                    )));
                }
                bytes.extend_from_slice(&chunk);
            }
            file = Some((file_name, bytes));
            continue;
        }

        let text = field
            .text()
            .await
            .map_err(|_| ApiError::BadRequest(format!("Invalid form field '{name}'")))?;
        match name.as_str() {
            "question_types" => {
                let parsed: Vec<QuotaRequest> = serde_json::from_str(&text).map_err(|_| {
                    ApiError::BadRequest("Invalid question types format".to_string())
                })?;
                quotas = parsed
                    .into_iter()
                    .map(|quota| QuotaInput {
                        question_type: quota.question_type,
                        count: quota.count,
                    })
                    .collect();
            }
            "topic" => topic = Some(text),
            "difficulty" => difficulty = Some(text),
            "exam_title" => exam_title = Some(text),
            "time_limit" => time_limit = Some(text),
            "instructions" => instructions = Some(text),
            "total_questions" => total_questions = Some(text),
            other => tracing::debug!(field = other, "Ignoring unknown upload field"),
        }
    }

    let (file_name, contents) =
        file.ok_or_else(|| ApiError::BadRequest("No file uploaded".to_string()))?;
    let time_limit = parse_form_number(time_limit, DEFAULT_TIME_LIMIT, "Invalid time limit")?;
    let total_questions =
        parse_form_number(total_questions, 0, "Invalid total questions count")?;

    tracing::info!(
        file_name = %file_name,
        bytes = contents.len(),
        quotas = quotas.len(),
        total_questions,
        "Processing spreadsheet upload"
    );

    let input = UploadInput {
        file_name,
        contents,
        quotas,
        topic: topic.filter(|value| !value.trim().is_empty()),
        difficulty: difficulty.unwrap_or_else(|| "Medium".to_string()),
        total_questions,
        meta: PaperMeta {
            exam_title: exam_title.unwrap_or_else(|| DEFAULT_UPLOAD_TITLE.to_string()),
            time_limit,
            instructions: instructions
                .unwrap_or_else(|| DEFAULT_UPLOAD_INSTRUCTIONS.to_string()),
        },
    };

    let mut rng = StdRng::from_entropy();
    let created = papers::upload_and_store(state.db(), input, &mut rng).await?;

    let mut response = PaperCreatedResponse::from(created);
    response.message = Some(format!(
        "Successfully selected {} questions from the spreadsheet",
        created.question_count
    ));
    Ok(Json(response))
}

pub(super) async fn list_questions(
    State(state): State<AppState>,
    Query(query): Query<QuestionsQuery>,
) -> Result<Json<Vec<QuestionResponse>>, ApiError> {
    let paper_id = query
        .paper_id
        .as_deref()
        .filter(|value| !value.is_empty() && value.chars().all(|c| c.is_ascii_digit()))
        .and_then(|value| value.parse::<i64>().ok())
        .ok_or_else(|| ApiError::BadRequest("Invalid paper_id".to_string()))?;

    let questions = papers::list_questions(state.db(), paper_id).await?;
    Ok(Json(questions.into_iter().map(QuestionResponse::from).collect()))
}

pub(super) async fn export_paper(
    State(state): State<AppState>,
    payload: Result<Json<ExportRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(payload) = payload?;
    let paper_id = payload
        .paper_id
        .filter(|_| !payload.question_ids.is_empty())
        .ok_or_else(|| ApiError::BadRequest("Invalid paper_id or question_ids".to_string()))?;

    let document = papers::export_paper(state.db(), paper_id, &payload.question_ids).await?;

    Ok((
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (header::CONTENT_DISPOSITION, format!("attachment; filename=\"{EXPORT_FILE_NAME}\"")),
        ],
        document,
    ))
}

fn parse_form_number(
    value: Option<String>,
    default: i64,
    message: &str,
) -> Result<i64, ApiError> {
    match value.as_deref().map(str::trim) {
        None | Some("") => Ok(default),
        Some(raw) => raw.parse::<i64>().map_err(|_| ApiError::BadRequest(message.to_string())),
    }
}
