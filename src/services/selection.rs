use std::io::Cursor;

use calamine::{Data, Reader};
use csv::StringRecord;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Deserialize;
use thiserror::Error;

use crate::db::models::NewQuestion;
use crate::db::types::{Difficulty, QuestionType};
use crate::services::normalizer;

pub(crate) const REQUIRED_COLUMNS: [&str; 4] =
    ["Description", "Type", "Course Outcome", "Bloom's Level"];
const DIFFICULTY_COLUMN: &str = "Difficulty";
const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

#[derive(Debug, Error)]
pub(crate) enum SheetError {
    #[error("Missing required columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),
    #[error("Invalid spreadsheet: {0}")]
    Csv(#[from] csv::Error),
    #[error("Invalid spreadsheet: {0}")]
    Workbook(#[from] calamine::Error),
    #[error("Invalid spreadsheet: workbook has no worksheets")]
    NoWorksheet,
}

/// Question bank container, chosen by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SheetFormat {
    Csv,
    Excel,
}

impl SheetFormat {
    pub(crate) fn from_file_name(file_name: &str) -> Option<Self> {
        let lower = file_name.trim().to_ascii_lowercase();
        if lower.ends_with(".csv") {
            Some(Self::Csv)
        } else if lower.ends_with(".xlsx") || lower.ends_with(".xls") {
            Some(Self::Excel)
        } else {
            None
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub(crate) enum SelectionError {
    #[error("No questions found matching your criteria.")]
    NoMatches,
}

/// One spreadsheet line. Every column is optional at this level; required
/// columns are checked on the header row instead.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct SheetRow {
    #[serde(rename = "Description", default)]
    pub(crate) description: Option<String>,
    #[serde(rename = "Type", default)]
    pub(crate) question_type: String,
    #[serde(rename = "Course Outcome", default)]
    pub(crate) course_outcome: Option<String>,
    #[serde(rename = "Bloom's Level", default)]
    pub(crate) blooms_level: Option<String>,
    #[serde(rename = "Unit", default)]
    pub(crate) unit: Option<String>,
    #[serde(rename = "Difficulty", default)]
    pub(crate) difficulty: Option<String>,
}

#[derive(Debug, Clone)]
pub(crate) struct CandidatePool {
    pub(crate) rows: Vec<SheetRow>,
    pub(crate) has_difficulty: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TypeQuota {
    pub(crate) question_type: QuestionType,
    pub(crate) count: u32,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct SelectionCriteria<'a> {
    pub(crate) topic: Option<&'a str>,
    pub(crate) difficulty: Difficulty,
    pub(crate) quotas: &'a [TypeQuota],
}

pub(crate) fn parse_candidate_pool(
    bytes: &[u8],
    format: SheetFormat,
) -> Result<CandidatePool, SheetError> {
    match format {
        SheetFormat::Csv => parse_csv(bytes),
        SheetFormat::Excel => parse_workbook(bytes),
    }
}

fn parse_csv(bytes: &[u8]) -> Result<CandidatePool, SheetError> {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    let mut reader =
        csv::ReaderBuilder::new().flexible(true).trim(csv::Trim::All).from_reader(bytes);

    let headers = reader.headers()?.clone();
    check_required_columns(&headers)?;

    let has_difficulty = headers.iter().any(|header| header == DIFFICULTY_COLUMN);
    let rows = reader.deserialize::<SheetRow>().collect::<Result<Vec<_>, _>>()?;

    tracing::info!(rows = rows.len(), has_difficulty, "Spreadsheet loaded");
    Ok(CandidatePool { rows, has_difficulty })
}

/// First worksheet of an `.xlsx`/`.xls` workbook; the first row is the header.
fn parse_workbook(bytes: &[u8]) -> Result<CandidatePool, SheetError> {
    let mut workbook = calamine::open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))?;
    let range = workbook.worksheet_range_at(0).ok_or(SheetError::NoWorksheet)??;

    let mut lines = range.rows().map(|cells| cells.iter().map(cell_text).collect::<StringRecord>());
    let headers = lines.next().unwrap_or_default();
    check_required_columns(&headers)?;

    let has_difficulty = headers.iter().any(|header| header == DIFFICULTY_COLUMN);
    let rows = lines
        .filter(|record| record.iter().any(|value| !value.is_empty()))
        .map(|record| record.deserialize::<SheetRow>(Some(&headers)))
        .collect::<Result<Vec<_>, _>>()?;

    tracing::info!(rows = rows.len(), has_difficulty, "Workbook loaded");
    Ok(CandidatePool { rows, has_difficulty })
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(value) => value.trim().to_string(),
        other => other.to_string().trim().to_string(),
    }
}

fn check_required_columns(headers: &StringRecord) -> Result<(), SheetError> {
    let missing = REQUIRED_COLUMNS
        .iter()
        .filter(|column| !headers.iter().any(|header| header == **column))
        .map(|column| column.to_string())
        .collect::<Vec<_>>();
    if !missing.is_empty() {
        return Err(SheetError::MissingColumns(missing));
    }
    Ok(())
}

/// Filters the pool, then samples up to each quota per type without replacement.
pub(crate) fn select_with_rng<R: Rng + ?Sized>(
    pool: &CandidatePool,
    criteria: SelectionCriteria<'_>,
    rng: &mut R,
) -> Result<Vec<NewQuestion>, SelectionError> {
    let topic = criteria
        .topic
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_lowercase);

    let filtered = pool
        .rows
        .iter()
        .filter(|row| match &topic {
            Some(topic) => {
                row.unit.as_deref().is_some_and(|unit| unit.to_lowercase().contains(topic))
            }
            None => true,
        })
        .filter(|row| {
            !pool.has_difficulty || row.difficulty.as_deref() == Some(criteria.difficulty.as_str())
        })
        .collect::<Vec<_>>();

    let mut selected = Vec::new();
    for (question_type, quota) in collapse_quotas(criteria.quotas) {
        if quota == 0 {
            continue;
        }

        let of_type = filtered
            .iter()
            .copied()
            .filter(|row| row.question_type == question_type.as_str())
            .collect::<Vec<_>>();
        let amount = of_type.len().min(quota as usize);

        let before = selected.len();
        selected.extend(
            of_type
                .choose_multiple(rng, amount)
                .filter_map(|row| {
                    normalizer::from_sheet_row(row, question_type, criteria.difficulty)
                }),
        );

        tracing::debug!(
            question_type = %question_type,
            available = of_type.len(),
            quota,
            selected = selected.len() - before,
            "Sampled spreadsheet rows"
        );
    }

    if selected.is_empty() {
        return Err(SelectionError::NoMatches);
    }

    Ok(selected)
}

/// One entry per type in first-seen order; a repeated type takes the later count.
fn collapse_quotas(quotas: &[TypeQuota]) -> Vec<(QuestionType, u32)> {
    let mut collapsed: Vec<(QuestionType, u32)> = Vec::new();
    for quota in quotas {
        match collapsed.iter_mut().find(|(question_type, _)| *question_type == quota.question_type) {
            Some(entry) => entry.1 = quota.count,
            None => collapsed.push((quota.question_type, quota.count)),
        }
    }
    collapsed
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    const SHEET: &str = "\
Description,Type,Course Outcome,Bloom's Level,Unit,Difficulty
What is the main purpose of an operating system?,Multiple Choice,CO1,Remember,Unit 1 - Introduction,Easy
Explain process scheduling.,Short Answer,CO2,Understand,Unit 2 - Processes,Medium
Compare threads and processes.,Essay,CO3,Analyze,Unit 2 - Processes,Hard
Types of memory management?,Multiple Choice,CO2,Remember,Unit 3 - Memory,Easy
Describe virtual memory.,Long Answer,CO3,Understand,Unit 3 - Memory,Medium
What is deadlock?,Short Answer,CO4,Apply,Unit 4 - Deadlocks,Medium
Explain file systems.,Essay,CO2,Understand,Unit 5 - Files,Medium
CPU scheduling algorithms?,Multiple Choice,CO3,Remember,Unit 2 - Processes,Easy
Describe paging.,Long Answer,CO4,Understand,Unit 3 - Memory,Hard
Preemptive vs non-preemptive?,Short Answer,CO1,Analyze,Unit 2 - Processes,Medium
,Short Answer,CO1,Analyze,Unit 2 - Processes,Medium
";

    fn pool() -> CandidatePool {
        parse_candidate_pool(SHEET.as_bytes(), SheetFormat::Csv).expect("sheet parses")
    }

    fn quota(question_type: QuestionType, count: u32) -> TypeQuota {
        TypeQuota { question_type, count }
    }

    #[test]
    fn missing_required_columns_are_listed() {
        let sheet = "Description,Type,Unit\nWhat is RAM?,Essay,Unit 1\n";
        let err = parse_candidate_pool(sheet.as_bytes(), SheetFormat::Csv).unwrap_err();
        match err {
            SheetError::MissingColumns(columns) => {
                assert_eq!(columns, vec!["Course Outcome".to_string(), "Bloom's Level".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    const WORKBOOK: &[u8] =
        include_bytes!(concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/question_bank.xlsx"));
    const WORKBOOK_MISSING_COLUMNS: &[u8] =
        include_bytes!(concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/missing_columns.xlsx"));

    #[test]
    fn format_follows_extension() {
        assert_eq!(SheetFormat::from_file_name("bank.CSV"), Some(SheetFormat::Csv));
        assert_eq!(SheetFormat::from_file_name("bank.xlsx"), Some(SheetFormat::Excel));
        assert_eq!(SheetFormat::from_file_name("old bank.xls"), Some(SheetFormat::Excel));
        assert_eq!(SheetFormat::from_file_name("bank.ods"), None);
        assert_eq!(SheetFormat::from_file_name("bank"), None);
    }

    #[test]
    fn workbook_rows_are_read_from_first_sheet() {
        let pool = parse_candidate_pool(WORKBOOK, SheetFormat::Excel).expect("workbook parses");

        assert!(pool.has_difficulty);
        assert_eq!(pool.rows.len(), 4);
        assert_eq!(pool.rows[0].description.as_deref(), Some("What is a process?"));
        assert_eq!(pool.rows[0].question_type, "Short Answer");
        assert_eq!(pool.rows[2].unit.as_deref(), Some("2"));
        assert_eq!(pool.rows[3].difficulty.as_deref(), Some("Hard"));

        let quotas = [quota(QuestionType::ShortAnswer, 5)];
        let criteria = SelectionCriteria {
            topic: Some("processes"),
            difficulty: Difficulty::Medium,
            quotas: &quotas,
        };
        let selected = select_with_rng(&pool, criteria, &mut StdRng::seed_from_u64(9)).unwrap();
        assert_eq!(selected.len(), 2);
    }

    #[test]
    fn workbook_missing_columns_are_listed() {
        let err = parse_candidate_pool(WORKBOOK_MISSING_COLUMNS, SheetFormat::Excel).unwrap_err();
        assert_eq!(err.to_string(), "Missing required columns: Course Outcome, Bloom's Level");
    }

    #[test]
    fn corrupt_workbook_is_rejected() {
        let err = parse_candidate_pool(b"not a workbook", SheetFormat::Excel).unwrap_err();
        assert!(err.to_string().starts_with("Invalid spreadsheet"), "{err}");
    }

    #[test]
    fn bom_and_padding_in_headers_are_tolerated() {
        let sheet = "\u{feff}Description , Type,Course Outcome,Bloom's Level\nWhat is RAM?,Essay,CO1,Remember\n";
        let pool = parse_candidate_pool(sheet.as_bytes(), SheetFormat::Csv).expect("sheet parses");
        assert_eq!(pool.rows.len(), 1);
        assert!(!pool.has_difficulty);
        assert_eq!(pool.rows[0].question_type, "Essay");
    }

    #[test]
    fn counts_never_exceed_available_or_quota() {
        let pool = pool();
        let quota_sets = [
            vec![quota(QuestionType::ShortAnswer, 1)],
            vec![quota(QuestionType::ShortAnswer, 10), quota(QuestionType::Essay, 1)],
            vec![quota(QuestionType::MultipleChoice, 2), quota(QuestionType::TrueFalse, 3)],
        ];

        for quotas in quota_sets {
            let criteria =
                SelectionCriteria { topic: None, difficulty: Difficulty::Medium, quotas: &quotas };
            let mut rng = StdRng::seed_from_u64(11);
            let Ok(selected) = select_with_rng(&pool, criteria, &mut rng) else {
                continue;
            };

            let mut per_type = HashMap::<QuestionType, usize>::new();
            for record in &selected {
                *per_type.entry(record.question_type).or_default() += 1;
                assert_eq!(record.difficulty, Difficulty::Medium);
            }

            for quota in &quotas {
                let available = pool
                    .rows
                    .iter()
                    .filter(|row| row.question_type == quota.question_type.as_str())
                    .filter(|row| row.difficulty.as_deref() == Some("Medium"))
                    .count();
                let got = per_type.get(&quota.question_type).copied().unwrap_or(0);
                assert!(got <= available.min(quota.count as usize));
            }
        }
    }

    #[test]
    fn blank_description_rows_are_never_returned() {
        let quotas = [quota(QuestionType::ShortAnswer, 10)];
        let criteria =
            SelectionCriteria { topic: None, difficulty: Difficulty::Medium, quotas: &quotas };
        let selected = select_with_rng(&pool(), criteria, &mut StdRng::seed_from_u64(3)).unwrap();

        assert_eq!(selected.len(), 3);
        assert!(selected.iter().all(|record| !record.question.is_empty()));
    }

    #[test]
    fn topic_filter_is_case_insensitive_substring() {
        let quotas = [quota(QuestionType::MultipleChoice, 5)];
        let criteria = SelectionCriteria {
            topic: Some("PROCESSES"),
            difficulty: Difficulty::Easy,
            quotas: &quotas,
        };
        let selected = select_with_rng(&pool(), criteria, &mut StdRng::seed_from_u64(5)).unwrap();

        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].topic, "Unit 2 - Processes");
        assert_eq!(selected[0].question, "CPU scheduling algorithms?");
    }

    #[test]
    fn difficulty_filter_skipped_without_column() {
        let sheet = "Description,Type,Course Outcome,Bloom's Level\n\
                     Q1,Essay,CO1,Remember\n\
                     Q2,Essay,CO1,Remember\n";
        let pool = parse_candidate_pool(sheet.as_bytes(), SheetFormat::Csv).unwrap();
        let quotas = [quota(QuestionType::Essay, 5)];
        let criteria =
            SelectionCriteria { topic: None, difficulty: Difficulty::Hard, quotas: &quotas };
        let selected = select_with_rng(&pool, criteria, &mut StdRng::seed_from_u64(1)).unwrap();

        assert_eq!(selected.len(), 2);
        assert!(selected.iter().all(|record| record.difficulty == Difficulty::Hard));
        assert!(selected.iter().all(|record| record.topic == "General"));
    }

    #[test]
    fn no_matches_is_reported() {
        let quotas = [quota(QuestionType::ProblemSolving, 4)];
        let criteria =
            SelectionCriteria { topic: None, difficulty: Difficulty::Medium, quotas: &quotas };
        let result = select_with_rng(&pool(), criteria, &mut StdRng::seed_from_u64(9));
        assert_eq!(result.unwrap_err(), SelectionError::NoMatches);

        let zero = [quota(QuestionType::ShortAnswer, 0)];
        let criteria =
            SelectionCriteria { topic: None, difficulty: Difficulty::Medium, quotas: &zero };
        assert!(select_with_rng(&pool(), criteria, &mut StdRng::from_entropy()).is_err());
    }

    #[test]
    fn seeded_source_is_reproducible() {
        let quotas = [quota(QuestionType::ShortAnswer, 2), quota(QuestionType::Essay, 1)];
        let criteria =
            SelectionCriteria { topic: None, difficulty: Difficulty::Medium, quotas: &quotas };
        let first = select_with_rng(&pool(), criteria, &mut StdRng::seed_from_u64(42)).unwrap();
        let second = select_with_rng(&pool(), criteria, &mut StdRng::seed_from_u64(42)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn repeated_type_takes_later_quota() {
        let quotas = [quota(QuestionType::ShortAnswer, 3), quota(QuestionType::ShortAnswer, 1)];
        assert_eq!(collapse_quotas(&quotas), vec![(QuestionType::ShortAnswer, 1)]);
    }
}
