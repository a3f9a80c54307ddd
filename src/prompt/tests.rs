use super::*;

fn chunks(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}

#[test]
fn default_prompt_layout() {
    let prompt = build_prompt(
        &chunks(&["Leave accrues monthly.", "Unused leave expires in March."]),
        "When does leave expire?",
    );

    let expected = format!(
        "{}\n\nCompany Policy Context:\n---\nLeave accrues monthly.\n---\nUnused leave expires in March.\n---\nUser Question: When does leave expire?\n\nAnswer:",
        DEFAULT_INSTRUCTIONS
    );
    assert_eq!(prompt, expected);
}

#[test]
fn prompt_contains_every_chunk_and_query() {
    let context = chunks(&[
        "Employees may work remotely two days per week.",
        "Expenses over $500 need approval.\nReceipts are mandatory.",
        "Überstunden werden ausgeglichen.",
    ]);
    let query = "Can I work from home on Fridays?";

    let prompt = build_prompt(&context, query);

    for chunk in &context {
        assert!(prompt.contains(chunk.as_str()), "missing chunk: {}", chunk);
    }
    assert!(prompt.contains(query));
}

#[test]
fn prompt_instructs_grounding() {
    let prompt = build_prompt(&chunks(&["anything"]), "question");

    assert!(prompt.contains("strictly based on the provided company policy documents"));
    assert!(prompt.contains("do not have enough information"));
    assert!(prompt.contains("Do not invent information."));
}

#[test]
fn empty_context_still_renders() {
    let prompt = build_prompt(&[], "Is there a dress code?");

    assert!(prompt.contains("Company Policy Context:\n---\n\n---\nUser Question: Is there a dress code?"));
}

#[test]
fn separator_lines_inside_chunks_are_escaped() {
    let context = chunks(&["Section A\n---\nSection B", "plain"]);

    let prompt = build_prompt(&context, "q");

    assert!(prompt.contains("Section A\n\\---\nSection B"));
    // opening, one between the two chunks, closing
    assert_eq!(prompt.lines().filter(|line| *line == "---").count(), 3);
}

#[test]
fn only_chunks_with_separator_lines_lose_verbatim_containment() {
    let context = chunks(&["Intro\n---\nOutro", "Intro\n--- note\nOutro"]);

    let prompt = build_prompt(&context, "q");

    assert!(!prompt.contains(context[0].as_str()));
    assert!(prompt.contains("Intro\n\\---\nOutro"));
    assert!(prompt.contains(context[1].as_str()));
    assert_eq!(join_context(&context[1..]), context[1]);
}

#[test]
fn separator_text_within_a_line_is_untouched() {
    let context = chunks(&["Use --- as a divider in memos."]);

    let prompt = build_prompt(&context, "q");

    assert!(prompt.contains("Use --- as a divider in memos."));
}

#[test]
fn indented_separator_line_is_escaped() {
    assert_eq!(escape_separators("a\n  ---  \nb"), "a\n  \\---  \nb");
    assert_eq!(escape_separators("no separators"), "no separators");
}

#[test]
fn length_directive_is_added() {
    let context = chunks(&["ctx"]);
    let prompt = PromptTemplate::default().render(&PromptRequest {
        context_chunks: &context,
        query: "q",
        length: Some(AnswerLength::Short),
    });

    assert!(prompt.contains(AnswerLength::Short.directive()));
    assert!(!build_prompt(&context, "q").contains(AnswerLength::Short.directive()));
}

#[test]
fn custom_template_labels() {
    let template = PromptTemplate {
        instructions: "Answer from the handbook only.".to_string(),
        context_heading: "Handbook:".to_string(),
        question_label: "Q:".to_string(),
        answer_label: "A:".to_string(),
    };
    let context = chunks(&["one"]);

    let prompt = template.render(&PromptRequest {
        context_chunks: &context,
        query: "what?",
        length: None,
    });

    assert_eq!(
        prompt,
        "Answer from the handbook only.\n\nHandbook:\n---\none\n---\nQ: what?\n\nA:"
    );
}

#[test]
fn answer_length_budgets() {
    assert_eq!(AnswerLength::Short.max_tokens(), 150);
    assert_eq!(AnswerLength::Medium.max_tokens(), 300);
    assert_eq!(AnswerLength::Long.max_tokens(), 600);
    assert_eq!(AnswerLength::default(), AnswerLength::Medium);
    assert_eq!(AnswerLength::Long.to_string(), "long");
}

#[test]
fn summary_prompt_truncates_document() {
    let document = "é".repeat(SUMMARY_INPUT_LIMIT + 500);

    let prompt = build_summary_prompt(&document, AnswerLength::Long);

    assert!(prompt.contains(&"é".repeat(SUMMARY_INPUT_LIMIT)));
    assert!(!prompt.contains(&"é".repeat(SUMMARY_INPUT_LIMIT + 1)));
    assert!(prompt.contains("Length: long (2-3 paragraphs)"));
    assert!(prompt.ends_with("SUMMARY:"));
}

#[test]
fn summary_prompt_keeps_short_documents_whole() {
    let prompt = build_summary_prompt("A short memo.", AnswerLength::Short);

    assert!(prompt.contains("DOCUMENT:\nA short memo.\n"));
}

#[test]
fn clean_summary_strips_labels_and_unfinished_sentence() {
    assert_eq!(
        clean_summary("Summary: The policy covers leave.\n\nIt also covers travel. And then"),
        "The policy covers leave.\nIt also covers travel."
    );
    assert_eq!(clean_summary("SUMMARY:\nDone!"), "Done!");
    assert_eq!(clean_summary("no terminal punctuation"), "no terminal punctuation");
    assert_eq!(clean_summary(""), "");
}
