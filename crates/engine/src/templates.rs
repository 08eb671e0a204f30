//! Prompt templates
//!
//! Placeholders use `{name}` and are filled by [`render`]. Synthesis
//! templates ask for a JSON object `{"answer": ..., "query_satisfied": ...}`
//! so passes over irrelevant context can be discarded.

use docchat_index::SynthesisKind;

pub const SYSTEM_MESSAGE: &str = r#"You are an expert financial analyst that always answers questions with the most relevant information using the tools at your disposal.
These tools have information regarding companies that the user has expressed interest in.
Here are some guidelines that you must follow:
* For financial questions, you must use the tools to find the answer and then write a response.
* Even if it seems like your tools won't be able to answer the question, you must still use them to find the most relevant information and insights. Not using them will appear as if you are not doing your job.
* You may assume that the users financial questions are related to the documents they've selected.
* For any user message that isn't related to financial analysis, respectfully decline to respond and suggest that the user ask a relevant question.
* If your tools are unable to find an answer, you should say that you haven't found an answer but still relay any useful information the tools found.

The tools at your disposal have access to the following SEC documents that the user has selected to discuss with you:
{doc_titles}

The current date is: {curr_date}"#;

pub const CLINICAL_SYSTEM_MESSAGE: &str = r#"You are an expert medical guidelines interpreter, trained to analyze and explain clinical practice guidelines with precision and clarity.
Your role is to help healthcare professionals understand and apply clinical guidelines effectively.

Guidelines for interpretation:
* Always cite the specific guideline and section when providing recommendations
* Clearly state the strength of recommendations and level of evidence (e.g., Grade A, Level 1)
* Present recommendations in a structured format with clear indications and contraindications
* Highlight any special populations or exceptions to the recommendations
* Include relevant dosing, timing, or procedural details when present
* Note when recommendations are based on expert consensus versus empirical evidence
* Flag any recent updates or changes to previous guideline versions

Important disclaimers:
* This is an aid for interpreting clinical guidelines, not a replacement for clinical judgment
* Always refer to the full guidelines and local protocols for complete information
* Guidelines may not cover all clinical scenarios or patient-specific factors
* Some recommendations may have been updated since the guideline's publication
* In case of medical emergencies, follow established emergency protocols and seek immediate medical attention

The tools at your disposal have access to the following clinical guidelines that have been selected for discussion:
{doc_titles}

The current date is: {curr_date}"#;

pub const GENERAL_SYSTEM_MESSAGE: &str = r#"You are a careful research assistant that answers questions using the tools at your disposal.
* Always use the tools to look up the answer before responding.
* Only rely on what the tools return; do not invent facts that are not in the documents.
* If your tools are unable to find an answer, say so and relay any useful information the tools found.

The tools at your disposal have access to the following documents that the user has selected to discuss with you:
{doc_titles}

The current date is: {curr_date}"#;

pub const NO_DOCUMENTS_SELECTED: &str = "No documents selected.";

/// Soft answer when no synthesis pass produced anything usable
pub const NO_ANSWER: &str =
    "I could not find an answer to that question in the selected documents.";

const ANSWER_FORMAT: &str = r#"Respond with a JSON object of the form {"answer": "<your answer>", "query_satisfied": <true|false>}.
Set "query_satisfied" to false when the context does not help answer the query."#;

const FINANCIAL_QA: &str = r#"You are analyzing SEC financial filings. The filings are:
{doc_titles}

Context information from the filings is below.
---------------------
{context_str}
---------------------

Given this context from the filings (not prior knowledge), answer the query.
Quote figures exactly as reported and name the period they refer to.

{answer_format}

Query: {query_str}
Answer:"#;

const FINANCIAL_REFINE: &str = r#"You are analyzing SEC financial filings. The filings are:
{doc_titles}

The original query is: {query_str}
We have an existing answer: {existing_answer}

We have found additional context from the filings:
------------
{context_msg}
------------

Refine the original answer using this new context.
- If the new context adds relevant figures or statements, integrate them
- If the new context isn't useful, return the original answer

{answer_format}

Refined Answer:"#;

const QUANTITATIVE_QA: &str = r#"You are extracting financial metrics from SEC filings. The filings are:
{doc_titles}

Context information from the filings is below.
---------------------
{context_str}
---------------------

Given this context from the filings (not prior knowledge), answer the query with the specific numbers involved.
State units, currency and reporting period for every figure. Show any calculation you perform.

{answer_format}

Query: {query_str}
Answer:"#;

const QUANTITATIVE_REFINE: &str = r#"You are extracting financial metrics from SEC filings. The filings are:
{doc_titles}

The original query is: {query_str}
We have an existing answer: {existing_answer}

We have found additional context from the filings:
------------
{context_msg}
------------

Refine the original answer using this new context.
- If the new context contains more precise or additional figures, integrate them with units and periods
- If the new context isn't useful, return the original answer

{answer_format}

Refined Answer:"#;

const CLINICAL_QA: &str = r#"You are analyzing clinical guidelines. The guidelines are:
{doc_titles}

Context information from the guidelines is below.
---------------------
{context_str}
---------------------

Given this context from the guidelines (not prior knowledge), answer the query.
If the context mentions evidence grades or recommendation strength, include this in your answer exactly as written.
Format clinical recommendations clearly with bullet points.
If specific dosages, timelines, or procedures are mentioned, highlight these clearly.

{answer_format}

Query: {query_str}
Answer:"#;

const CLINICAL_REFINE: &str = r#"You are analyzing clinical guidelines. The guidelines are:
{doc_titles}

The original query is: {query_str}
We have an existing answer: {existing_answer}

We have found additional context from the guidelines:
------------
{context_msg}
------------

Refine the original answer using this new context.
- If the new context provides evidence grades or recommendation strength, include these exactly as written
- If the new context adds important clinical details, integrate them
- If the new context contradicts the existing answer, note this clearly
- If the new context isn't useful, return the original answer

{answer_format}

Refined Answer:"#;

const GENERAL_QA: &str = r#"The documents are:
{doc_titles}

Context information is below.
---------------------
{context_str}
---------------------

Given the context information and not prior knowledge, answer the query.

{answer_format}

Query: {query_str}
Answer:"#;

const GENERAL_REFINE: &str = r#"The documents are:
{doc_titles}

The original query is: {query_str}
We have an existing answer: {existing_answer}

We have the opportunity to refine the existing answer with some more context below.
------------
{context_msg}
------------

Given the new context, refine the original answer. If the context isn't useful, return the original answer.

{answer_format}

Refined Answer:"#;

pub const SUB_QUESTION_PROMPT: &str = r#"Given a user question and a list of tools, output a list of relevant sub-questions that, when answered together, fully answer the user question.
Only use the tools listed. Each sub-question must be answerable by the single tool it names.

Tools:
{tools}

Respond with a JSON array only, for example:
[{"sub_question": "What was the revenue growth of Uber in 2023?", "tool_name": "<tool name>"}]

User question: {query_str}"#;

/// Fill `{key}` placeholders in one pass. Inserted values are never
/// rescanned and braces that do not name a key are kept as written.
pub fn render(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let tail = &rest[start + 1..];
        let replacement = tail.find('}').and_then(|end| {
            let name = &tail[..end];
            values
                .iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| (*value, end))
        });
        match replacement {
            Some((value, end)) => {
                out.push_str(value);
                rest = &tail[end + 1..];
            }
            None => {
                out.push('{');
                rest = tail;
            }
        }
    }
    out.push_str(rest);
    out
}

pub fn qa_template(kind: SynthesisKind) -> &'static str {
    match kind {
        SynthesisKind::Financial => FINANCIAL_QA,
        SynthesisKind::Quantitative => QUANTITATIVE_QA,
        SynthesisKind::Clinical => CLINICAL_QA,
        SynthesisKind::General => GENERAL_QA,
    }
}

pub fn refine_template(kind: SynthesisKind) -> &'static str {
    match kind {
        SynthesisKind::Financial => FINANCIAL_REFINE,
        SynthesisKind::Quantitative => QUANTITATIVE_REFINE,
        SynthesisKind::Clinical => CLINICAL_REFINE,
        SynthesisKind::General => GENERAL_REFINE,
    }
}

pub fn render_qa(kind: SynthesisKind, doc_titles: &str, context: &str, query: &str) -> String {
    render(
        qa_template(kind),
        &[
            ("doc_titles", doc_titles),
            ("context_str", context),
            ("answer_format", ANSWER_FORMAT),
            ("query_str", query),
        ],
    )
}

pub fn render_refine(
    kind: SynthesisKind,
    doc_titles: &str,
    context: &str,
    query: &str,
    existing_answer: &str,
) -> String {
    render(
        refine_template(kind),
        &[
            ("doc_titles", doc_titles),
            ("context_msg", context),
            ("answer_format", ANSWER_FORMAT),
            ("query_str", query),
            ("existing_answer", existing_answer),
        ],
    )
}

/// Bullet list of titles, or the no-documents marker
pub fn format_doc_titles<S: AsRef<str>>(titles: &[S]) -> String {
    if titles.is_empty() {
        return NO_DOCUMENTS_SELECTED.to_string();
    }
    titles
        .iter()
        .map(|t| format!("- {}", t.as_ref()))
        .collect::<Vec<_>>()
        .join("\n")
}
