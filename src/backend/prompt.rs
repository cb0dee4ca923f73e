//! Chat prompts for the remote backend.

use std::fmt::Write as _;

use super::GenerationRequest;
use crate::documents::truncate_chars;
use crate::pipeline::Stage;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

fn is_chinese(language: &str) -> bool {
    let lang = language.to_lowercase();
    lang.starts_with("zh") || lang == "chinese"
}

/// Build the prompt for `request.stage`.
pub fn build(request: &GenerationRequest<'_>) -> Prompt {
    let zh = is_chinese(request.language);
    let context = context_block(request, zh);
    let (system, task) = match request.stage {
        Stage::Keyword => keyword_prompt(request, zh),
        Stage::Question => question_prompt(request, zh),
        Stage::Answer => answer_prompt(request, zh),
        Stage::Critique => critique_prompt(request, zh),
    };
    Prompt {
        system,
        user: format!("{context}\n\n{task}"),
    }
}

fn context_block(request: &GenerationRequest<'_>, zh: bool) -> String {
    let chunk = request.chunk;
    let text = truncate_chars(&chunk.text, request.options.max_context_chars);
    let page = chunk
        .page
        .map(|p| p.to_string())
        .unwrap_or_else(|| "-".to_string());
    if zh {
        format!(
            "[文件內容]\n來源: {} | 第 {} 頁 | chunk {}\n\"\"\"{}\"\"\"",
            chunk.source, page, chunk.chunk_id, text
        )
    } else {
        format!(
            "[CONTEXT]\nSource: {} | page {} | chunk {}\n\"\"\"{}\"\"\"",
            chunk.source, page, chunk.chunk_id, text
        )
    }
}

fn keyword_prompt(request: &GenerationRequest<'_>, zh: bool) -> (String, String) {
    let n = request.options.keywords_per_chunk;
    if zh {
        (
            "你是專業的關鍵字提取專家。只輸出 JSON。".to_string(),
            format!(
                "請為上述內容提取 {n} 個最重要的關鍵字。\n\
                 1. 關鍵字必須直接出現在文本中或與內容密切相關\n\
                 2. 優先級：專有名詞 > 技術術語 > 核心概念\n\
                 3. 不要使用過於泛用的詞，也不要使用年份或日期\n\
                 輸出格式：{{\"keywords\": [\"詞1\", \"詞2\"]}}"
            ),
        )
    } else {
        (
            "You are a precise keyword extraction assistant. Output JSON only.".to_string(),
            format!(
                "Extract the {n} most important keywords from the context above.\n\
                 1. Keywords must appear in the text or be closely related to it\n\
                 2. Prefer proper nouns, then technical terms, then core concepts\n\
                 3. Avoid generic words, years and dates\n\
                 Output format: {{\"keywords\": [\"k1\", \"k2\"]}}"
            ),
        )
    }
}

fn question_prompt(request: &GenerationRequest<'_>, zh: bool) -> (String, String) {
    let options = request.options;
    let langs = request.languages.join(", ");
    let keywords = request.upstream.keywords.join(", ");
    let system = "You are the question writer for a retrieval evaluation dataset. \
                  Return strict JSON only, with no extra text."
        .to_string();

    let mut task = String::new();
    if zh {
        let _ = writeln!(task, "請根據上述文件內容：");
        let _ = writeln!(
            task,
            "1) 產生 {} 個直接依據內容的基礎問題（涵蓋定義、機制、數據、趨勢、比較）。",
            options.base_questions
        );
        if !keywords.is_empty() {
            let _ = writeln!(
                task,
                "2) 針對每個關鍵字（{keywords}）各產生 {} 個問題。",
                options.questions_per_keyword
            );
        }
        let _ = writeln!(task, "問題語言限於：{langs}。每題 1-2 句，可獨立理解，避免是非題。");
    } else {
        let _ = writeln!(task, "For the context above:");
        let _ = writeln!(
            task,
            "1) Write {} base questions grounded in the text (definition, mechanism, data, trend, comparison).",
            options.base_questions
        );
        if !keywords.is_empty() {
            let _ = writeln!(
                task,
                "2) For EACH keyword ({keywords}) write {} questions.",
                options.questions_per_keyword
            );
        }
        let _ = writeln!(
            task,
            "Limit languages to: {langs}. Each question is 1-2 sentences, standalone, not yes/no."
        );
    }
    task.push_str(
        "\nSchema:\n\
         {\"base_questions\": [{\"text\": \"...\", \"lang\": \"zh|en\", \"difficulty\": \"easy|medium|hard\", \"topic\": \"...\"}],\n \
         \"keyword_questions\": [{\"keyword\": \"K1\", \"questions\": [{\"text\": \"...\", \"lang\": \"...\", \"difficulty\": \"...\", \"topic\": \"...\"}]}]}",
    );
    (system, task)
}

fn answer_prompt(request: &GenerationRequest<'_>, zh: bool) -> (String, String) {
    let mut questions = String::new();
    for (i, question) in request.upstream.questions.iter().enumerate() {
        let _ = writeln!(questions, "{i}. [{}] {}", question.lang, question.text);
    }
    let citation = format!("chunk:{}", request.chunk.chunk_id);

    if zh {
        (
            "你是專業的技術文件分析專家。必須基於提供的文件內容回答，不要編造資訊。只輸出 JSON。"
                .to_string(),
            format!(
                "[問題]\n{questions}\n\
                 請以問題指定的語言逐題回答，明確引用來源（例如「根據文件」）。\
                 如果文件中沒有足夠資訊，請說明「文件中未提及相關資訊」。\n\
                 輸出格式：{{\"answers\": [{{\"question_index\": 0, \"answer\": \"...\", \"citations\": [\"{citation}\"]}}]}}"
            ),
        )
    } else {
        (
            "You are a careful technical analyst. Answer only from the provided context \
             and never invent facts. Output JSON only."
                .to_string(),
            format!(
                "[QUESTIONS]\n{questions}\n\
                 Answer every question in its own language and cite the source \
                 (e.g. \"According to the passage\"). If the context is insufficient, say so.\n\
                 Output format: {{\"answers\": [{{\"question_index\": 0, \"answer\": \"...\", \"citations\": [\"{citation}\"]}}]}}"
            ),
        )
    }
}

fn critique_prompt(request: &GenerationRequest<'_>, zh: bool) -> (String, String) {
    let mut pairs = String::new();
    for (i, answer) in request.upstream.answers.iter().enumerate() {
        let _ = writeln!(pairs, "{i}. Q: {}\n   A: {}", answer.question, answer.text);
    }
    let rubric = "Score each pair 1-5 on relevance, groundedness, standalone and accuracy. \
                  verdict is one of correct, partial, wrong, insufficient.";
    let schema = "{\"reviews\": [{\"question_index\": 0, \"relevance\": 1, \"groundedness\": 1, \
                  \"standalone\": 1, \"accuracy\": 1, \"verdict\": \"correct\", \"reason\": \"...\"}]}";

    let system = if zh {
        "你是嚴格的問答品質審查員。只輸出 JSON。".to_string()
    } else {
        "You are a strict reviewer of question-answer pairs. Output JSON only.".to_string()
    };
    (system, format!("[QA PAIRS]\n{pairs}\n{rubric}\nOutput format: {schema}"))
}
