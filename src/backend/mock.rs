//! Deterministic backend for tests and dry runs.
//!
//! Payloads are derived from the chunk text alone, so identical inputs always
//! produce identical corpora. Individual stages can be pinned to a fixed
//! payload with [`MockBackend::with_fixed`].

use async_trait::async_trait;
use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

use super::parse::{build_answer, normalize_keywords};
use super::{BackendError, BackendResult, GenerationRequest, InferenceBackend};
use crate::pipeline::{
    Difficulty, Question, QuestionOrigin, Review, RubricScores, Stage, StagePayload, Verdict,
};

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "with", "that", "this", "are", "was", "were", "from", "into", "its",
    "has", "have", "had", "been", "which", "their", "will", "can", "also", "not", "but", "may",
    "such", "than", "then", "there", "these", "those", "when", "where", "while", "each", "other",
    "more", "most", "all", "any", "our", "you", "your", "they", "them", "is", "be", "of", "to",
    "in", "on", "an", "as", "at", "by", "or", "it", "we", "if", "so", "no",
    "我們", "這個", "那個", "以及", "因此", "可以", "一個", "沒有", "就是", "如果",
];

const BASE_EN: [&str; 5] = [
    "What is the main point of this passage about {topic}?",
    "How does the passage describe {topic}?",
    "What details does the passage give about {topic}?",
    "Why is {topic} important according to the passage?",
    "What conclusion can be drawn about {topic}?",
];

const BASE_ZH: [&str; 5] = [
    "這段內容關於{topic}的重點是什麼？",
    "文件如何描述{topic}？",
    "文件提供了哪些關於{topic}的細節？",
    "根據文件，{topic}為什麼重要？",
    "關於{topic}可以得出什麼結論？",
];

const KEYWORD_EN: [&str; 2] = [
    "What does the passage say about {topic}?",
    "How is {topic} related to the rest of the passage?",
];

const KEYWORD_ZH: [&str; 2] = ["文件中提到的{topic}是什麼？", "{topic}與文件其他內容有什麼關係？"];

const DIFFICULTIES: [Difficulty; 3] = [Difficulty::Easy, Difficulty::Medium, Difficulty::Hard];

#[derive(Debug, Clone, Default)]
pub struct MockBackend {
    fixed: HashMap<Stage, StagePayload>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Always answer `stage` with `payload`.
    pub fn with_fixed(mut self, stage: Stage, payload: StagePayload) -> Self {
        self.fixed.insert(stage, payload);
        self
    }
}

#[async_trait]
impl InferenceBackend for MockBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn generate(&self, request: &GenerationRequest<'_>) -> BackendResult<StagePayload> {
        if let Some(payload) = self.fixed.get(&request.stage) {
            return Ok(payload.clone());
        }
        match request.stage {
            Stage::Keyword => Ok(StagePayload::Keywords {
                keywords: extract_keywords(&request.chunk.text, request.options.keywords_per_chunk),
            }),
            Stage::Question => Ok(StagePayload::Questions {
                questions: template_questions(request),
            }),
            Stage::Answer => template_answers(request),
            Stage::Critique => template_reviews(request),
        }
    }
}

fn token_pattern() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[一-鿿]{2,6}|[A-Za-z][A-Za-z0-9_\-]{1,30}").ok())
        .as_ref()
}

/// Most frequent content words, ties broken alphabetically.
pub fn extract_keywords(text: &str, limit: usize) -> Vec<String> {
    let Some(re) = token_pattern() else {
        return vec!["general".to_string()];
    };

    let mut counts: HashMap<String, (usize, String)> = HashMap::new();
    for m in re.find_iter(text) {
        let word = m.as_str();
        let key = word.to_lowercase();
        if STOPWORDS.contains(&key.as_str()) {
            continue;
        }
        counts
            .entry(key)
            .or_insert_with(|| (0, word.to_string()))
            .0 += 1;
    }

    let mut ranked: Vec<(String, usize, String)> = counts
        .into_iter()
        .map(|(key, (count, display))| (key, count, display))
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    let keywords = normalize_keywords(ranked.into_iter().map(|(_, _, display)| display), limit);
    if keywords.is_empty() {
        vec!["general".to_string()]
    } else {
        keywords
    }
}

fn is_zh(lang: &str) -> bool {
    lang.to_lowercase().starts_with("zh")
}

fn fill(template: &str, topic: &str) -> String {
    template.replace("{topic}", topic)
}

fn template_questions(request: &GenerationRequest<'_>) -> Vec<Question> {
    let fallback = [request.language.to_string()];
    let languages: &[String] = if request.languages.is_empty() {
        &fallback
    } else {
        request.languages
    };
    let keywords = &request.upstream.keywords;
    let mut questions = Vec::new();

    for i in 0..request.options.base_questions {
        let lang = &languages[questions.len() % languages.len()];
        let topic = match (keywords.first(), is_zh(lang)) {
            (Some(k), _) => k.clone(),
            (None, true) => "這段內容".to_string(),
            (None, false) => "this topic".to_string(),
        };
        let template = if is_zh(lang) {
            BASE_ZH[i % BASE_ZH.len()]
        } else {
            BASE_EN[i % BASE_EN.len()]
        };
        questions.push(Question {
            text: fill(template, &topic),
            lang: lang.clone(),
            difficulty: DIFFICULTIES[i % DIFFICULTIES.len()],
            topic,
            origin: QuestionOrigin::Base,
            keyword: None,
        });
    }

    for keyword in keywords {
        for i in 0..request.options.questions_per_keyword {
            let lang = &languages[questions.len() % languages.len()];
            let template = if is_zh(lang) {
                KEYWORD_ZH[i % KEYWORD_ZH.len()]
            } else {
                KEYWORD_EN[i % KEYWORD_EN.len()]
            };
            questions.push(Question {
                text: fill(template, keyword),
                lang: lang.clone(),
                difficulty: DIFFICULTIES[(i + 1) % DIFFICULTIES.len()],
                topic: keyword.clone(),
                origin: QuestionOrigin::Keyword,
                keyword: Some(keyword.clone()),
            });
        }
    }
    questions
}

/// First sentence of `text`, at most 200 characters, always terminated.
fn first_sentence(text: &str, zh: bool) -> String {
    let trimmed = text.trim();
    let end = trimmed
        .char_indices()
        .find(|(_, c)| matches!(c, '。' | '！' | '？' | '.' | '!' | '?'))
        .map(|(i, c)| i + c.len_utf8())
        .unwrap_or(trimmed.len());
    let sentence: String = trimmed[..end].chars().take(200).collect();
    match sentence.chars().last() {
        Some('。' | '！' | '？' | '.' | '!' | '?') => sentence,
        _ if zh => format!("{sentence}。"),
        _ => format!("{sentence}."),
    }
}

fn template_answers(request: &GenerationRequest<'_>) -> BackendResult<StagePayload> {
    let questions = &request.upstream.questions;
    if questions.is_empty() {
        return Err(BackendError::malformed("no questions to answer"));
    }
    let citation = format!("chunk:{}", request.chunk.chunk_id);
    let answers = questions
        .iter()
        .map(|question| {
            let zh = is_zh(&question.lang);
            let sentence = first_sentence(&request.chunk.text, zh);
            let text = if zh {
                format!("根據文件內容，{sentence}")
            } else {
                format!("According to the passage, {sentence}")
            };
            build_answer(question, text, vec![citation.clone()])
        })
        .collect();
    Ok(StagePayload::Answers { answers })
}

fn template_reviews(request: &GenerationRequest<'_>) -> BackendResult<StagePayload> {
    let answers = &request.upstream.answers;
    if answers.is_empty() {
        return Err(BackendError::malformed("no answers to review"));
    }
    let reviews = answers
        .iter()
        .map(|answer| {
            Review::new(
                answer.question.clone(),
                RubricScores {
                    relevance: 4,
                    groundedness: 4,
                    standalone: 4,
                    accuracy: 4,
                },
                Some(Verdict::Correct),
                "Answer is supported by the passage.".to_string(),
            )
        })
        .collect();
    Ok(StagePayload::Critique { reviews })
}
