//! Turning raw model output into stage payloads.
//!
//! Models wrap JSON in prose or code fences, number their list items and
//! repeat themselves. Everything here is lenient about presentation and strict
//! about content: a reply that yields nothing usable is a malformed response.

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::OnceLock;

use super::{BackendError, BackendResult, GenerationRequest};
use crate::documents::quality::is_cjk;
use crate::pipeline::{
    Answer, Difficulty, Question, QuestionOrigin, Review, RubricScores, Stage, StagePayload,
    Verdict,
};

const CITATION_PHRASES: &[&str] = &[
    "according to",
    "based on",
    "as stated",
    "the document",
    "the passage",
    "the text",
    "根據",
    "根据",
    "依據",
    "依据",
    "文件中",
    "文中",
    "段落中",
];

/// Parse `raw` as the payload of `request.stage`.
pub fn parse_payload(raw: &str, request: &GenerationRequest<'_>) -> BackendResult<StagePayload> {
    match request.stage {
        Stage::Keyword => parse_keywords(raw, request.options.keywords_per_chunk),
        Stage::Question => parse_questions(raw, request),
        Stage::Answer => parse_answers(raw, request),
        Stage::Critique => parse_reviews(raw, request),
    }
}

/// Substring from the first `{` to the last `}`.
pub fn extract_json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}

fn parse_object(raw: &str) -> BackendResult<Value> {
    let json = extract_json_object(raw)
        .ok_or_else(|| BackendError::malformed("no JSON object in response"))?;
    serde_json::from_str(json).map_err(|e| BackendError::malformed(format!("invalid JSON: {e}")))
}

fn keyword_separator() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[,\n，、;；]").ok()).as_ref()
}

fn list_marker() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*(?:[-*•]+|\d+\s*[.)、])\s*").ok())
        .as_ref()
}

fn keyword_label() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^\s*(?:keywords?|關鍵字|关键词|關鍵詞)\s*[:：]").ok())
        .as_ref()
}

/// Split a free-text keyword list on ASCII and CJK separators.
pub fn split_keyword_list(raw: &str) -> Vec<String> {
    let body = match keyword_label() {
        Some(re) => re.replace(raw.trim(), "").into_owned(),
        None => raw.trim().to_string(),
    };
    match keyword_separator() {
        Some(re) => re.split(&body).map(str::to_string).collect(),
        None => body.split(',').map(str::to_string).collect(),
    }
}

/// Strip markers and punctuation, drop symbol-only items, de-duplicate
/// case-insensitively keeping first occurrence, truncate to `limit`.
pub fn normalize_keywords<I, S>(items: I, limit: usize) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for item in items {
        let raw = item.as_ref();
        let unmarked = match list_marker() {
            Some(re) => re.replace(raw, "").into_owned(),
            None => raw.to_string(),
        };
        let cleaned = unmarked
            .trim_matches(|c: char| !c.is_alphanumeric() && !is_cjk(c))
            .to_string();
        if cleaned.is_empty() {
            continue;
        }
        if seen.insert(cleaned.to_lowercase()) {
            out.push(cleaned);
        }
        if out.len() == limit {
            break;
        }
    }
    out
}

pub fn parse_keywords(raw: &str, limit: usize) -> BackendResult<StagePayload> {
    let from_json = extract_json_object(raw)
        .and_then(|json| serde_json::from_str::<Value>(json).ok())
        .and_then(|value| string_array(value.get("keywords")?));
    let from_array = || {
        let trimmed = raw.trim();
        if trimmed.starts_with('[') {
            serde_json::from_str::<Value>(trimmed)
                .ok()
                .and_then(|v| string_array(&v))
        } else {
            None
        }
    };

    let items = from_json
        .or_else(from_array)
        .unwrap_or_else(|| split_keyword_list(raw));
    let keywords = normalize_keywords(items, limit);
    if keywords.is_empty() {
        return Err(BackendError::malformed("no keywords found in response"));
    }
    Ok(StagePayload::Keywords { keywords })
}

fn string_array(value: &Value) -> Option<Vec<String>> {
    value.as_array().map(|items| {
        items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect()
    })
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawQuestion {
    Text(String),
    Detailed {
        text: String,
        #[serde(default)]
        lang: Option<String>,
        #[serde(default)]
        difficulty: Option<String>,
        #[serde(default)]
        topic: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
struct RawKeywordQuestions {
    keyword: String,
    #[serde(default)]
    questions: Vec<RawQuestion>,
}

#[derive(Debug, Deserialize)]
struct RawQuestionSet {
    #[serde(default)]
    base_questions: Vec<RawQuestion>,
    #[serde(default)]
    keyword_questions: Vec<RawKeywordQuestions>,
    #[serde(default)]
    questions: Vec<RawQuestion>,
}

pub fn parse_questions(raw: &str, request: &GenerationRequest<'_>) -> BackendResult<StagePayload> {
    let value = parse_object(raw)?;
    let set: RawQuestionSet = serde_json::from_value(value)
        .map_err(|e| BackendError::malformed(format!("unexpected question schema: {e}")))?;

    let default_topic = request
        .upstream
        .keywords
        .first()
        .cloned()
        .unwrap_or_default();
    let base = if set.base_questions.is_empty() {
        set.questions
    } else {
        set.base_questions
    };

    let mut questions: Vec<Question> = base
        .into_iter()
        .filter_map(|q| to_question(q, request.language, &default_topic, None))
        .take(request.options.base_questions)
        .collect();

    for group in set.keyword_questions {
        let keyword = group.keyword.trim().to_string();
        if keyword.is_empty() {
            continue;
        }
        questions.extend(
            group
                .questions
                .into_iter()
                .filter_map(|q| to_question(q, request.language, &keyword, Some(&keyword)))
                .take(request.options.questions_per_keyword),
        );
    }

    if questions.is_empty() {
        return Err(BackendError::malformed("response contained no questions"));
    }
    Ok(StagePayload::Questions { questions })
}

fn to_question(raw: RawQuestion, lang: &str, topic: &str, keyword: Option<&str>) -> Option<Question> {
    let (text, q_lang, difficulty, q_topic) = match raw {
        RawQuestion::Text(text) => (text, None, None, None),
        RawQuestion::Detailed {
            text,
            lang,
            difficulty,
            topic,
        } => (text, lang, difficulty, topic),
    };
    let text = text.trim().to_string();
    if text.is_empty() {
        return None;
    }
    Some(Question {
        text,
        lang: q_lang
            .map(|l| l.trim().to_lowercase())
            .filter(|l| !l.is_empty())
            .unwrap_or_else(|| lang.to_string()),
        difficulty: difficulty
            .as_deref()
            .map(Difficulty::parse_lenient)
            .unwrap_or_default(),
        topic: q_topic
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| topic.to_string()),
        origin: if keyword.is_some() {
            QuestionOrigin::Keyword
        } else {
            QuestionOrigin::Base
        },
        keyword: keyword.map(str::to_string),
    })
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawAnswer {
    Text(String),
    Detailed {
        #[serde(default)]
        question_index: Option<usize>,
        #[serde(alias = "text")]
        answer: String,
        #[serde(default)]
        citations: Vec<String>,
    },
}

#[derive(Debug, Deserialize)]
struct RawAnswerSet {
    answers: Vec<RawAnswer>,
}

pub fn parse_answers(raw: &str, request: &GenerationRequest<'_>) -> BackendResult<StagePayload> {
    let questions = &request.upstream.questions;
    if questions.is_empty() {
        return Err(BackendError::malformed("no questions to answer"));
    }

    let value = parse_object(raw)?;
    let set: RawAnswerSet = serde_json::from_value(value)
        .map_err(|e| BackendError::malformed(format!("unexpected answer schema: {e}")))?;

    let mut answers = Vec::new();
    for (position, raw_answer) in set.answers.into_iter().enumerate() {
        let (index, text, citations) = match raw_answer {
            RawAnswer::Text(text) => (position, text, Vec::new()),
            RawAnswer::Detailed {
                question_index,
                answer,
                citations,
            } => (question_index.unwrap_or(position), answer, citations),
        };
        let Some(question) = questions.get(index) else {
            continue;
        };
        let text = text.trim().to_string();
        if text.is_empty() {
            continue;
        }
        answers.push(build_answer(question, text, citations));
    }

    if answers.is_empty() {
        return Err(BackendError::malformed("response contained no usable answers"));
    }
    Ok(StagePayload::Answers { answers })
}

/// Attach citation detection and the confidence estimate to an answer.
pub fn build_answer(question: &Question, text: String, citations: Vec<String>) -> Answer {
    let cited = !citations.is_empty() || has_citation(&text);
    Answer {
        question: question.text.clone(),
        lang: question.lang.clone(),
        confidence: estimate_confidence(&text, cited),
        has_citation: cited,
        citations,
        text,
    }
}

pub fn parse_reviews(raw: &str, request: &GenerationRequest<'_>) -> BackendResult<StagePayload> {
    let answers = &request.upstream.answers;
    if answers.is_empty() {
        return Err(BackendError::malformed("no answers to review"));
    }

    let value = parse_object(raw)?;
    let items = value
        .get("reviews")
        .and_then(Value::as_array)
        .ok_or_else(|| BackendError::malformed("missing 'reviews' array"))?;

    let mut reviews = Vec::new();
    for (position, item) in items.iter().enumerate() {
        let index = item
            .get("question_index")
            .and_then(Value::as_u64)
            .map(|i| i as usize)
            .unwrap_or(position);
        let Some(answer) = answers.get(index) else {
            continue;
        };

        let score = |key: &str| item.get(key).and_then(score_value);
        let (Some(relevance), Some(groundedness), Some(standalone), Some(accuracy)) = (
            score("relevance"),
            score("groundedness"),
            score("standalone"),
            score("accuracy"),
        ) else {
            continue;
        };

        let verdict = item
            .get("verdict")
            .and_then(Value::as_str)
            .and_then(|v| v.parse::<Verdict>().ok());
        let reason = item
            .get("reason")
            .or_else(|| item.get("comments"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .trim()
            .to_string();

        reviews.push(Review::new(
            answer.question.clone(),
            RubricScores {
                relevance,
                groundedness,
                standalone,
                accuracy,
            },
            verdict,
            reason,
        ));
    }

    if reviews.is_empty() {
        return Err(BackendError::malformed("response contained no complete reviews"));
    }
    Ok(StagePayload::Critique { reviews })
}

/// Rubric score from a number or numeric string, clamped to 1..=5.
fn score_value(value: &Value) -> Option<u8> {
    let number = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    Some(number.round().clamp(1.0, 5.0) as u8)
}

/// True when the text refers back to its source.
pub fn has_citation(text: &str) -> bool {
    let lower = text.to_lowercase();
    CITATION_PHRASES.iter().any(|p| lower.contains(p))
}

/// Heuristic confidence in [0, 1]: cited, reasonably sized answers that
/// quote figures score higher.
pub fn estimate_confidence(text: &str, cited: bool) -> f32 {
    let mut confidence: f32 = 0.5;
    if cited {
        confidence += 0.2;
    }
    let len = text.chars().count();
    if (10..=500).contains(&len) {
        confidence += 0.1;
    }
    if text.chars().any(|c| c.is_ascii_digit() || c == '%') {
        confidence += 0.2;
    }
    confidence.min(1.0)
}
