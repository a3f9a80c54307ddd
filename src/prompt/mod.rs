// Prompt building
// Renders retrieved context and a user question into a grounded prompt

#[cfg(test)]
mod tests;

use std::fmt;

use serde::{Deserialize, Serialize};

/// Line placed between context chunks
pub const CONTEXT_SEPARATOR: &str = "---";

/// Longest document prefix, in characters, handed to the summarizer
pub const SUMMARY_INPUT_LIMIT: usize = 4000;

const ESCAPED_SEPARATOR: &str = "\\---";

const DEFAULT_INSTRUCTIONS: &str = "You are an AI assistant designed to answer questions strictly based on the provided company policy documents.\nIf the answer to the question cannot be found in the provided context, state that you do not have enough information to answer the question, or that the question is outside the scope of the provided policies. Do not invent information.";

/// How long a generated answer or summary should be
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum AnswerLength {
    Short,
    #[default]
    Medium,
    Long,
}

impl AnswerLength {
    /// Token budget handed to the generator
    #[inline]
    pub fn max_tokens(self) -> u32 {
        match self {
            Self::Short => 150,
            Self::Medium => 300,
            Self::Long => 600,
        }
    }

    #[inline]
    pub fn directive(self) -> &'static str {
        match self {
            Self::Short => "Keep the answer to two or three sentences.",
            Self::Medium => "Answer in one concise paragraph.",
            Self::Long => "Answer thoroughly, in two or three paragraphs.",
        }
    }

    fn summary_directive(self) -> &'static str {
        match self {
            Self::Short => "2-3 sentences",
            Self::Medium => "one paragraph",
            Self::Long => "2-3 paragraphs",
        }
    }
}

impl fmt::Display for AnswerLength {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Short => f.write_str("short"),
            Self::Medium => f.write_str("medium"),
            Self::Long => f.write_str("long"),
        }
    }
}

/// Everything a grounded prompt is rendered from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptRequest<'a> {
    pub context_chunks: &'a [String],
    pub query: &'a str,
    /// When set, a length directive is added to the instructions
    pub length: Option<AnswerLength>,
}

/// Fixed framing around the context block and the question
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptTemplate {
    pub instructions: String,
    pub context_heading: String,
    pub question_label: String,
    pub answer_label: String,
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self {
            instructions: DEFAULT_INSTRUCTIONS.to_string(),
            context_heading: "Company Policy Context:".to_string(),
            question_label: "User Question:".to_string(),
            answer_label: "Answer:".to_string(),
        }
    }
}

impl PromptTemplate {
    #[inline]
    pub fn render(&self, request: &PromptRequest<'_>) -> String {
        let mut prompt = String::with_capacity(
            self.instructions.len()
                + request.query.len()
                + request.context_chunks.iter().map(String::len).sum::<usize>()
                + 128,
        );

        prompt.push_str(&self.instructions);
        if let Some(length) = request.length {
            prompt.push('\n');
            prompt.push_str(length.directive());
        }
        prompt.push_str("\n\n");
        prompt.push_str(&self.context_heading);
        prompt.push('\n');
        prompt.push_str(CONTEXT_SEPARATOR);
        prompt.push('\n');
        prompt.push_str(&join_context(request.context_chunks));
        prompt.push('\n');
        prompt.push_str(CONTEXT_SEPARATOR);
        prompt.push('\n');
        prompt.push_str(&self.question_label);
        prompt.push(' ');
        prompt.push_str(request.query);
        prompt.push_str("\n\n");
        prompt.push_str(&self.answer_label);

        prompt
    }
}

/// Build a grounded prompt with the default framing
#[inline]
pub fn build_prompt(context_chunks: &[String], query: &str) -> String {
    PromptTemplate::default().render(&PromptRequest {
        context_chunks,
        query,
        length: None,
    })
}

/// Join chunks with separator lines, escaping separator lines inside chunks.
///
/// Chunks appear verbatim in the result except for lines that are exactly
/// `---` (ignoring surrounding whitespace), which become `\---`. Such a chunk
/// is therefore not a substring of the joined context.
#[inline]
pub fn join_context(context_chunks: &[String]) -> String {
    context_chunks
        .iter()
        .map(|chunk| escape_separators(chunk))
        .collect::<Vec<_>>()
        .join(&format!("\n{}\n", CONTEXT_SEPARATOR))
}

fn escape_separators(chunk: &str) -> String {
    if !chunk.lines().any(|line| line.trim() == CONTEXT_SEPARATOR) {
        return chunk.to_string();
    }

    chunk
        .split('\n')
        .map(|line| {
            if line.trim() == CONTEXT_SEPARATOR {
                line.replacen(CONTEXT_SEPARATOR, ESCAPED_SEPARATOR, 1)
            } else {
                line.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Prompt asking for a summary of a document.
///
/// Only the first [`SUMMARY_INPUT_LIMIT`] characters of the document are used.
#[inline]
pub fn build_summary_prompt(document_text: &str, length: AnswerLength) -> String {
    let excerpt: String = document_text.chars().take(SUMMARY_INPUT_LIMIT).collect();

    format!(
        "You are a professional document analyst. Summarize the document below.\n\
         \n\
         REQUIREMENTS:\n\
         - Length: {} ({})\n\
         - Include the key information without omitting important details\n\
         - Use clear, professional language and keep the document's tone\n\
         - Do not add information that is not in the document\n\
         - Never invent dates, durations or figures that are not stated\n\
         \n\
         Write the summary as a cohesive narrative without section headers.\n\
         \n\
         DOCUMENT:\n\
         {}\n\
         \n\
         SUMMARY:",
        length,
        length.summary_directive(),
        excerpt
    )
}

/// Stop sequences that keep a summary from running into prompt scaffolding
#[inline]
pub fn summary_stop_sequences() -> Vec<String> {
    ["\n\nDOCUMENT:", "REQUIREMENTS:", "\n\nSUMMARY:"]
        .iter()
        .map(|s| (*s).to_string())
        .collect()
}

/// Remove label echoes and a trailing unfinished sentence from a generated summary
#[inline]
pub fn clean_summary(raw: &str) -> String {
    let lines: Vec<&str> = raw
        .lines()
        .map(str::trim)
        .map(|line| {
            line.strip_prefix("SUMMARY:")
                .or_else(|| line.strip_prefix("Summary:"))
                .map_or(line, str::trim)
        })
        .filter(|line| !line.is_empty())
        .collect();

    let summary = lines.join("\n");
    if summary.ends_with(['.', '!', '?']) {
        return summary;
    }

    match summary.rfind(['.', '!', '?']) {
        Some(end) => summary.get(..=end).unwrap_or(&summary).to_string(),
        None => summary,
    }
}
