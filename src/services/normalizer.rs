use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::db::models::NewQuestion;
use crate::db::types::{Difficulty, QuestionType};
use crate::services::selection::SheetRow;

pub(crate) const DEFAULT_BLOOMS_LEVEL: &str = "Understand";
pub(crate) const DEFAULT_TOPIC: &str = "General";

const REQUIRED_AI_KEYS: [&str; 3] = ["question", "type", "answer"];

/// Request-level fallbacks applied to fields a candidate leaves out.
#[derive(Debug, Clone)]
pub(crate) struct Defaults {
    pub(crate) question_type: QuestionType,
    pub(crate) difficulty: Difficulty,
    pub(crate) topic: String,
}

impl Defaults {
    pub(crate) fn new(
        question_type: QuestionType,
        difficulty: Difficulty,
        topic: impl Into<String>,
    ) -> Self {
        let topic = topic.into();
        let topic = if topic.trim().is_empty() { DEFAULT_TOPIC.to_string() } else { topic };
        Self { question_type, difficulty, topic }
    }
}

/// Explicit-field question payload accepted in place of the delimited string form.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct StructuredQuestion {
    pub(crate) question: String,
    #[serde(rename = "type")]
    pub(crate) question_type: String,
    #[serde(default)]
    pub(crate) difficulty: Option<String>,
    #[serde(default)]
    pub(crate) blooms_level: Option<String>,
    #[serde(default)]
    pub(crate) topic: Option<String>,
    #[serde(default)]
    pub(crate) options: Vec<String>,
    #[serde(default)]
    pub(crate) answer: String,
}

/// A caller-supplied question: explicit fields, or the legacy delimited string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum QuestionInput {
    Legacy(String),
    Structured(StructuredQuestion),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub(crate) enum NormalizeError {
    #[error("unknown question type '{0}'")]
    UnknownType(String),
    #[error("unknown difficulty '{0}'")]
    UnknownDifficulty(String),
}

/// AI candidate: a JSON object carrying at least `question`, `type` and `answer`.
pub(crate) fn from_ai_candidate(candidate: &Value, defaults: &Defaults) -> Option<NewQuestion> {
    let Some(object) = candidate.as_object() else {
        tracing::warn!(candidate = %candidate, "Skipping AI candidate that is not an object");
        return None;
    };

    if let Some(missing) = REQUIRED_AI_KEYS.iter().find(|key| !object.contains_key(**key)) {
        tracing::warn!(missing_key = *missing, candidate = %candidate, "Skipping invalid question");
        return None;
    }

    let question = object.get("question").and_then(value_to_text).unwrap_or_default();
    if question.trim().is_empty() {
        tracing::warn!(candidate = %candidate, "Skipping AI candidate with empty question text");
        return None;
    }

    let raw_type = object.get("type").and_then(value_to_text).unwrap_or_default();
    let question_type = QuestionType::parse(&raw_type).unwrap_or_else(|| {
        tracing::warn!(
            question_type = %raw_type,
            fallback = %defaults.question_type,
            "Unknown question type from AI, using request default"
        );
        defaults.question_type
    });

    let difficulty = object
        .get("difficulty")
        .and_then(value_to_text)
        .and_then(|value| Difficulty::parse(&value))
        .unwrap_or(defaults.difficulty);

    let blooms_level = object
        .get("blooms_level")
        .and_then(value_to_text)
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_BLOOMS_LEVEL.to_string());

    let topic = object
        .get("topic")
        .and_then(value_to_text)
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| defaults.topic.clone());

    let options = match object.get("options") {
        Some(Value::Array(items)) => items.iter().filter_map(value_to_text).collect(),
        _ => Vec::new(),
    };

    let answer = object.get("answer").and_then(value_to_text).unwrap_or_default();

    Some(NewQuestion {
        question: question.trim().to_string(),
        question_type,
        difficulty,
        blooms_level,
        topic,
        options: options_for(question_type, options),
        answer,
    })
}

/// Spreadsheet row sampled for `question_type`. Rows without a description yield `None`.
pub(crate) fn from_sheet_row(
    row: &SheetRow,
    question_type: QuestionType,
    difficulty: Difficulty,
) -> Option<NewQuestion> {
    let description = row.description.as_deref().map(str::trim).unwrap_or_default();
    if description.is_empty() {
        return None;
    }

    let blooms_level = row
        .blooms_level
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(DEFAULT_BLOOMS_LEVEL);
    let topic = row
        .unit
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(DEFAULT_TOPIC);

    Some(NewQuestion {
        question: description.to_string(),
        question_type,
        difficulty,
        blooms_level: blooms_level.to_string(),
        topic: topic.to_string(),
        options: Vec::new(),
        answer: String::new(),
    })
}

/// Legacy `"<text> (<type>, <difficulty>, <blooms>, <topic>)"` form.
///
/// The suffix is split on `", "` by position, so a field that itself contains
/// `", "` shifts every field after it. Text without a suffix is kept whole with
/// every other field defaulted.
pub(crate) fn from_delimited(raw: &str, defaults: &Defaults) -> Option<NewQuestion> {
    let (text, details) = match raw.rsplit_once(" (") {
        Some((text, suffix)) => {
            let suffix = suffix.strip_suffix(')').unwrap_or(suffix);
            (text, suffix.split(", ").map(str::trim).collect::<Vec<_>>())
        }
        None => (raw, Vec::new()),
    };

    let question = text.trim();
    if question.is_empty() {
        return None;
    }

    let field = |index: usize| details.get(index).copied().filter(|value| !value.is_empty());

    let question_type = match field(0) {
        Some(value) => QuestionType::parse(value).unwrap_or_else(|| {
            tracing::warn!(
                question_type = value,
                fallback = %defaults.question_type,
                "Unknown question type in delimited question, using request default"
            );
            defaults.question_type
        }),
        None => defaults.question_type,
    };
    let difficulty = field(1).and_then(Difficulty::parse).unwrap_or(defaults.difficulty);
    let blooms_level = field(2).unwrap_or(DEFAULT_BLOOMS_LEVEL).to_string();
    let topic = field(3).map(str::to_string).unwrap_or_else(|| defaults.topic.clone());

    Some(NewQuestion {
        question: question.to_string(),
        question_type,
        difficulty,
        blooms_level,
        topic,
        options: Vec::new(),
        answer: String::new(),
    })
}

pub(crate) fn from_structured(
    input: &StructuredQuestion,
    defaults: &Defaults,
) -> Result<Option<NewQuestion>, NormalizeError> {
    let question_type = QuestionType::parse(&input.question_type)
        .ok_or_else(|| NormalizeError::UnknownType(input.question_type.clone()))?;

    let difficulty = match input.difficulty.as_deref().map(str::trim) {
        Some(value) if !value.is_empty() => {
            Difficulty::parse(value).ok_or_else(|| NormalizeError::UnknownDifficulty(value.into()))?
        }
        _ => defaults.difficulty,
    };

    let question = input.question.trim();
    if question.is_empty() {
        return Ok(None);
    }

    let blooms_level = input
        .blooms_level
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(DEFAULT_BLOOMS_LEVEL)
        .to_string();
    let topic = input
        .topic
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| defaults.topic.clone());

    Ok(Some(NewQuestion {
        question: question.to_string(),
        question_type,
        difficulty,
        blooms_level,
        topic,
        options: options_for(question_type, input.options.clone()),
        answer: input.answer.clone(),
    }))
}

pub(crate) fn from_input(
    input: &QuestionInput,
    defaults: &Defaults,
) -> Result<Option<NewQuestion>, NormalizeError> {
    match input {
        QuestionInput::Legacy(raw) => Ok(from_delimited(raw, defaults)),
        QuestionInput::Structured(structured) => from_structured(structured, defaults),
    }
}

/// `(type, difficulty, blooms, topic)` as printed under each exported question.
pub(crate) fn metadata_line(
    question_type: QuestionType,
    difficulty: Difficulty,
    blooms_level: &str,
    topic: &str,
) -> String {
    format!("({question_type}, {difficulty}, {blooms_level}, {topic})")
}

fn options_for(question_type: QuestionType, options: Vec<String>) -> Vec<String> {
    if question_type == QuestionType::MultipleChoice {
        options
    } else {
        Vec::new()
    }
}

fn value_to_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        other => Some(other.to_string()),
    }
}
