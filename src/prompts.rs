//! Prompts for page extraction, transcription and merging.
//!
//! Every string sent to the model is built here so prompt changes never
//! touch orchestration code, and tests can inspect prompts without a model.

use crate::pipeline::map::PartialExtraction;
use crate::schema::DocumentSchema;
use serde_json::{Map, Value};

/// Default system prompt for free-text OCR (image and scanned-PDF flows).
pub const DEFAULT_OCR_SYSTEM_PROMPT: &str = r#"Act as an OCR assistant. Analyze the provided image and:
- Recognize and extract all visible text as accurately as possible, without additional explanations or comments.
- Present the extracted text in structured Markdown.
- Maintain the original hierarchy and formatting, including headings, subheadings, lists, tables and inline text.
- Mark ambiguous or partially readable text with [illegible].
- Preserve spatial relationships where applicable by mimicking the document layout in Markdown.
- Do not omit any part of the page, including headers, footers, tables and subtext.
Provide only the transcription."#;

/// Default user prompt for image OCR.
pub const DEFAULT_OCR_PROMPT: &str = "What is in this image?";

pub const NATIONAL_ID_SYSTEM_PROMPT: &str = r#"You are an OCR assistant specialized in extracting information from National ID cards.
Extract all fields from the ID card image and return ONLY valid JSON matching the required schema.
Do not include any explanations or additional text outside the JSON object.

CRITICAL: All dates must be converted to YYYY-MM-DD format regardless of how they appear in the document (DD-MM-YYYY or MM/DD/YY must be normalized to YYYY-MM-DD)."#;

pub const NATIONAL_ID_PROMPT: &str = "Extract all fields from this National ID card.";

pub const OFFER_LETTER_SYSTEM_PROMPT: &str = r#"You are an OCR assistant specialized in extracting payment and enrollment details from University Offer Letters.
Extract ONLY what you can clearly see on this page. Return ONLY valid JSON matching the schema.

CRITICAL FIELD DEFINITIONS:
- 'course_name': The academic program or language course name (e.g., "Japanese Language Course", "B.Sc Computer Science").
- 'remit_amount': Total amount to be paid/remitted (numeric).
- 'remit_currency': Currency of the remit amount as an ISO code (e.g., "AUD").
- 'total_tuition_amount': Grand total for the course (includes remit amount, fees, etc.). Numeric.
- 'student_name': The full name of the student including first name and surname.
- 'beneficiary_name': The student's university or college name.
- 'iban': International Bank Account Number. 2 letters + 2 digits + long alphanumeric. NOT used in Australia.
- 'swift': 8 or 11 character alphanumeric code (BIC).
- 'bsb': EXACTLY a six-digit code (XXXXXX or XXX-XXX) for Australian banks.
- 'account_number': Bank account of the university. Required if BSB is present.
- 'payment_purpose': The purpose or reference for the payment. Look for it on the same page as 'remit_amount' or the bank details.
- 'university_address': Full mailing address of the university/college.

RULES:
- Australian payments: expect 'swift' + 'bsb' + 'account_number' (NO IBAN).
- International payments: expect 'swift' + 'iban'.
- Return null for fields not visible on THIS page.
- Do NOT hallucinate. Do not mistake phone numbers for banking details."#;

/// Per-page instruction; `{page}` is the 1-indexed page number.
pub const PAGE_PROMPT_TEMPLATE: &str = "Extract details from Page {page}.";

/// Conflict-resolution rules shared by batch and incremental merging.
pub const MERGE_RULES: &str = r#"REFINEMENT & CONFLICT RESOLUTION RULES:
1. OFFICIAL ADDRESS: For address fields, use the address explicitly tied to the beneficiary/institution identity (letterhead or footer of the institution). DO NOT use the student's address or any unrelated text simply because it is longer.
2. NAME COMPLETENESS: For name fields, prefer the most complete version of the name ("University of Sydney" over "Sydney Uni", "John Doe" over "John").
3. BANKING VALIDATION: If a valid 6-digit BSB (XXXXXX or XXX-XXX) is found on ANY page, DISCARD every IBAN (treat it as a hallucination). Keep 'account_number' only if a BSB is kept.
4. COURSE NAME ACCURACY: Search every page extraction for a valid academic program name (e.g., "Japanese Language Course", "B.Sc Computer Science") and use that for 'course_name' instead of a heading or fragment.
5. PURPOSE PROXIMITY: Prefer the 'payment_purpose' extracted from the page that also contains 'remit_amount' or banking details.
6. CROSS-PAGE ACCUMULATION: If a field is partial on several pages, synthesize the pieces into the most complete value instead of copying one fragment.
7. NO HALLUCINATION: If a field is null or missing on every page, return null. Never invent a value."#;

pub const MERGE_USER_PROMPT: &str =
    "Merge the partial JSON extractions provided in the system prompt based on the Refinement Rules.";

/// Hybrid-flow page text is cut to this many characters.
pub const HYBRID_TEXT_LIMIT: usize = 4000;

/// System prompt for a generic schema.
pub fn generic_system_prompt(schema: &DocumentSchema) -> String {
    format!(
        "You are an OCR assistant that extracts structured '{}' data from document pages.\n\
         Extract ONLY what you can clearly see on this page. Return ONLY valid JSON with these fields:\n\
         {}\n\n\
         Return null for fields not visible on THIS page. Do NOT hallucinate.",
        schema.name,
        schema.field_guide()
    )
}

pub fn page_prompt(template: &str, page_num: usize) -> String {
    template.replace("{page}", &page_num.to_string())
}

/// Instruction appended when the transport cannot enforce a JSON Schema.
pub fn schema_instruction(schema: &Value) -> String {
    format!(
        "Respond with a single JSON object that conforms to this JSON Schema. \
         Output the JSON only, without markdown fences or commentary.\n{}",
        serde_json::to_string_pretty(schema).unwrap_or_default()
    )
}

/// System prompt for the one-shot batch consolidation.
pub fn batch_merge_prompt(schema: &DocumentSchema, partials: &[PartialExtraction]) -> String {
    let numbered: Vec<Value> = partials
        .iter()
        .map(|p| {
            serde_json::json!({
                "page": p.page_num(),
                "fields": Value::Object(p.fields.clone()),
            })
        })
        .collect();

    format!(
        "You are a JSON consolidation assistant. A '{}' document was processed page by page.\n\
         Merge the partial extractions into a single, high-precision JSON object.\n\n\
         Partial Extractions:\n{}\n\n{}\n\n\
         Return ONLY valid JSON matching the '{}' schema.",
        schema.name,
        serde_json::to_string_pretty(&numbered).unwrap_or_default(),
        MERGE_RULES,
        schema.name
    )
}

/// System prompt for one step of the incremental fold.
///
/// `merged_pages` names the pages already folded into `running`.
pub fn pairwise_merge_prompt(
    schema: &DocumentSchema,
    running: &Map<String, Value>,
    merged_pages: &[usize],
    next: &PartialExtraction,
) -> String {
    let pages = merged_pages
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "You are a JSON consolidation assistant. A '{}' document is being merged page by page.\n\
         Combine the CURRENT record with the NEW page extraction into a single JSON object.\n\n\
         CURRENT record (pages {}):\n```json\n{}\n```\n\n\
         NEW extraction (page {}):\n```json\n{}\n```\n\n{}\n\n\
         Return ONLY valid JSON matching the '{}' schema.",
        schema.name,
        pages,
        serde_json::to_string_pretty(running).unwrap_or_default(),
        next.page_num(),
        serde_json::to_string_pretty(&next.fields).unwrap_or_default(),
        MERGE_RULES,
        schema.name
    )
}

pub fn scanned_page_prompt(page_num: usize) -> String {
    format!("Transcribe Page {page_num} accurately in Markdown.")
}

/// Prompt for one page of the hybrid (text layer + figure) flow.
pub fn hybrid_page_prompt(page_num: usize, text: &str, figure_count: usize, user_prompt: &str) -> String {
    let trace: String = text.chars().take(HYBRID_TEXT_LIMIT).collect();
    format!(
        "Page {page_num} Content:\n```\n{trace}\n```\n\
         I have also attached the {figure_count} key figures/images found on this page.\n\
         Please transcribe the full page content in Markdown.\n\
         - Use the provided text trace as the source of truth for text.\n\
         - For attached images: provide a comprehensive visual description of the chart/figure, explaining trends or content visible in the image.\n\
         - Format code blocks and JSON strictly with correct syntax (```json, ```python).\n\
         - Do not hallucinate content not present in the text or images.\n\
         {user_prompt}"
    )
}
