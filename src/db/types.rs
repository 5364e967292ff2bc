use std::fmt;

use serde::{Deserialize, Serialize};
use sqlx::Type;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Type)]
pub(crate) enum QuestionType {
    #[serde(rename = "Multiple Choice")]
    #[sqlx(rename = "Multiple Choice")]
    MultipleChoice,
    #[serde(rename = "True/False")]
    #[sqlx(rename = "True/False")]
    TrueFalse,
    #[serde(rename = "Short Answer")]
    #[sqlx(rename = "Short Answer")]
    ShortAnswer,
    Essay,
    #[serde(rename = "Long Answer")]
    #[sqlx(rename = "Long Answer")]
    LongAnswer,
    #[serde(rename = "Fill in the Blanks")]
    #[sqlx(rename = "Fill in the Blanks")]
    FillInTheBlanks,
    #[serde(rename = "Problem Solving")]
    #[sqlx(rename = "Problem Solving")]
    ProblemSolving,
}

impl QuestionType {
    pub(crate) const ALL: [QuestionType; 7] = [
        Self::MultipleChoice,
        Self::TrueFalse,
        Self::ShortAnswer,
        Self::Essay,
        Self::LongAnswer,
        Self::FillInTheBlanks,
        Self::ProblemSolving,
    ];

    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::MultipleChoice => "Multiple Choice",
            Self::TrueFalse => "True/False",
            Self::ShortAnswer => "Short Answer",
            Self::Essay => "Essay",
            Self::LongAnswer => "Long Answer",
            Self::FillInTheBlanks => "Fill in the Blanks",
            Self::ProblemSolving => "Problem Solving",
        }
    }

    /// Exact, case-sensitive match against the stored labels.
    pub(crate) fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|candidate| candidate.as_str() == value.trim())
    }
}

impl fmt::Display for QuestionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
pub(crate) enum Difficulty {
    Easy,
    #[default]
    Medium,
    Hard,
}

impl Difficulty {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Easy => "Easy",
            Self::Medium => "Medium",
            Self::Hard => "Hard",
        }
    }

    pub(crate) fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "Easy" => Some(Self::Easy),
            "Medium" => Some(Self::Medium),
            "Hard" => Some(Self::Hard),
            _ => None,
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn question_type_labels_round_trip() {
        for question_type in QuestionType::ALL {
            assert_eq!(QuestionType::parse(question_type.as_str()), Some(question_type));
        }
    }

    #[test]
    fn question_type_serde_uses_labels() {
        let json = serde_json::to_string(&QuestionType::FillInTheBlanks).unwrap();
        assert_eq!(json, "\"Fill in the Blanks\"");
        let parsed: QuestionType = serde_json::from_str("\"True/False\"").unwrap();
        assert_eq!(parsed, QuestionType::TrueFalse);
    }

    #[test]
    fn parse_rejects_unknown_and_case_variants() {
        assert_eq!(QuestionType::parse("multiple choice"), None);
        assert_eq!(QuestionType::parse("Matching"), None);
        assert_eq!(Difficulty::parse("easy"), None);
        assert_eq!(Difficulty::parse(" Hard "), Some(Difficulty::Hard));
    }
}
