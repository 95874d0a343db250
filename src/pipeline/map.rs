//! Map Stage: one model call per page, all in flight together.
//!
//! Wall-clock time is bounded by the slowest page rather than the sum of all
//! pages. Each page task owns its image and returns its own result; nothing
//! is shared between tasks. Results come back in page order (the fan-out is
//! an ordered buffered stream), which the merge prompts rely on for
//! page-proximity rules.
//!
//! A failing page is dropped and recorded, never retried. The stage only
//! fails when no page produced anything usable.
//!
//! Dropping the returned future (e.g. the caller's request is cancelled)
//! drops every in-flight page request with it.

use crate::error::{ExtractError, PageError};
use crate::extract::ExtractionTask;
use crate::output::PageOutcome;
use crate::pipeline::llm::{CompletionRequest, ModelClient};
use crate::pipeline::parse;
use crate::progress::ProgressCallback;
use crate::schema::DocumentSchema;
use edgequake_llm::ImageData;
use futures::stream::{self, StreamExt};
use serde_json::{Map, Value};
use std::future::Future;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Fields observed on one page. Absent keys mean "not seen on this page".
#[derive(Debug, Clone, PartialEq)]
pub struct PartialExtraction {
    /// 0-based page index.
    pub page_index: usize,
    pub fields: Map<String, Value>,
}

impl PartialExtraction {
    pub fn page_num(&self) -> usize {
        self.page_index + 1
    }
}

/// Pages whose model output was collected, plus what happened to each page.
#[derive(Debug)]
pub struct MapResult {
    pub partials: Vec<PartialExtraction>,
    pub outcomes: Vec<PageOutcome>,
}

/// True for explicit `null` and the literal string `"null"`.
pub fn is_null_like(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().eq_ignore_ascii_case("null"),
        _ => false,
    }
}

/// Drop null-like values and keys outside the schema.
pub fn clean_fields(fields: Map<String, Value>, schema: &DocumentSchema) -> Map<String, Value> {
    fields
        .into_iter()
        .filter(|(key, value)| {
            if !schema.has_field(key) {
                debug!("Dropping field '{}' not declared by schema '{}'", key, schema.name);
                return false;
            }
            !is_null_like(value)
        })
        .collect()
}

/// Run `task` for every item concurrently, returning results in input order.
///
/// `limit` caps in-flight tasks; `None` runs everything at once.
pub async fn fan_out<I, T, F, Fut>(items: Vec<I>, limit: Option<usize>, task: F) -> Vec<T>
where
    F: Fn(I) -> Fut,
    Fut: Future<Output = T>,
{
    let limit = limit.unwrap_or(items.len()).max(1);
    stream::iter(items.into_iter().map(task))
        .buffered(limit)
        .collect()
        .await
}

/// Extract one page: call the model, parse, clean.
async fn extract_page(
    client: &dyn ModelClient,
    task: &ExtractionTask,
    response_schema: &Value,
    page_index: usize,
    image: ImageData,
) -> Result<PartialExtraction, ExtractError> {
    let prompt = crate::prompts::page_prompt(&task.page_prompt, page_index + 1);
    let request = CompletionRequest::new(prompt)
        .system(task.system_prompt.clone())
        .image(image)
        .schema(response_schema.clone());

    let raw = client.complete(request).await?;
    let fields = parse::parse(&raw)?;
    Ok(PartialExtraction {
        page_index,
        fields: clean_fields(fields, &task.schema),
    })
}

/// Run the map stage over normalised page images `(page_index, image)`.
///
/// # Errors
/// [`ExtractError::NoUsableExtraction`] when every page failed.
pub async fn map_pages(
    client: &dyn ModelClient,
    pages: Vec<(usize, ImageData)>,
    task: &ExtractionTask,
    concurrency: Option<usize>,
    progress: Option<&ProgressCallback>,
) -> Result<MapResult, ExtractError> {
    let total = pages.len();
    let response_schema = task.schema.json_schema();
    info!("Map stage: {} pages, schema '{}'", total, task.schema.name);

    let results = fan_out(pages, concurrency, |(page_index, image)| {
        let response_schema = &response_schema;
        async move {
            let page_num = page_index + 1;
            if let Some(cb) = progress {
                cb.on_page_start(page_num, total);
            }
            let start = Instant::now();
            let result = extract_page(client, task, response_schema, page_index, image).await;
            (page_index, result, start.elapsed().as_millis() as u64)
        }
    })
    .await;

    collect_partials(results, total, progress)
}

/// Split per-page results into kept partials and outcomes.
fn collect_partials(
    results: Vec<(usize, Result<PartialExtraction, ExtractError>, u64)>,
    total: usize,
    progress: Option<&ProgressCallback>,
) -> Result<MapResult, ExtractError> {
    let mut partials = Vec::with_capacity(results.len());
    let mut outcomes = Vec::with_capacity(results.len());

    for (page_index, result, duration_ms) in results {
        let page_num = page_index + 1;
        match result {
            Ok(partial) => {
                if let Some(cb) = progress {
                    cb.on_page_complete(page_num, total, partial.fields.len());
                }
                debug!("Page {}: {} fields kept", page_num, partial.fields.len());
                outcomes.push(PageOutcome {
                    page_num,
                    output_len: partial.fields.len(),
                    duration_ms,
                    error: None,
                });
                partials.push(partial);
            }
            Err(e) => {
                let page_error = PageError::from_extract(page_num, e);
                warn!("{}; page dropped", page_error);
                if let Some(cb) = progress {
                    cb.on_page_error(page_num, total, &page_error.to_string());
                }
                outcomes.push(PageOutcome {
                    page_num,
                    output_len: 0,
                    duration_ms,
                    error: Some(page_error),
                });
            }
        }
    }

    if partials.is_empty() {
        let first_error = outcomes
            .iter()
            .find_map(|o| o.error.as_ref())
            .map(ToString::to_string)
            .unwrap_or_else(|| "no pages to process".to_string());
        return Err(ExtractError::NoUsableExtraction { total, first_error });
    }

    info!(
        "Map stage complete: {}/{} pages usable",
        partials.len(),
        total
    );
    Ok(MapResult { partials, outcomes })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Answers by page number found in the prompt; later pages answer first.
    struct PageScript {
        answers: Vec<Result<String, u16>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl PageScript {
        fn new(answers: Vec<Result<&str, u16>>) -> Self {
            Self {
                answers: answers
                    .into_iter()
                    .map(|a| a.map(str::to_string))
                    .collect(),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ModelClient for PageScript {
        async fn complete(&self, request: CompletionRequest) -> Result<String, ExtractError> {
            let page: usize = request
                .prompt
                .trim_end_matches('.')
                .rsplit(' ')
                .next()
                .and_then(|n| n.parse().ok())
                .unwrap();
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            let delay = (self.answers.len() - page) as u64 * 20;
            tokio::time::sleep(Duration::from_millis(delay)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            assert_eq!(request.images.len(), 1);
            assert!(request.response_schema.is_some());
            self.answers[page - 1].clone().map_err(|status| ExtractError::Upstream {
                status: Some(status),
                body: "scripted failure".into(),
            })
        }
    }

    fn task() -> ExtractionTask {
        ExtractionTask::offer_letter()
    }

    fn images(n: usize) -> Vec<(usize, ImageData)> {
        (0..n)
            .map(|i| (i, ImageData::new("QUJD".to_string(), "image/jpeg")))
            .collect()
    }

    #[test]
    fn cleaning_drops_null_and_null_string() {
        let schema = DocumentSchema::new(
            "t",
            ["a", "b", "c"]
                .iter()
                .map(|n| crate::schema::FieldSpec::optional(n, crate::schema::FieldKind::String, ""))
                .collect(),
        );
        let raw = json!({"a": 1, "b": null, "c": "null"}).as_object().cloned().unwrap();
        let cleaned = clean_fields(raw, &schema);
        assert_eq!(Value::Object(cleaned), json!({"a": 1}));
    }

    #[test]
    fn cleaning_drops_fields_outside_schema() {
        let raw = json!({"student_name": "John", "phone": "0400 000 000"})
            .as_object()
            .cloned()
            .unwrap();
        let cleaned = clean_fields(raw, &DocumentSchema::offer_letter());
        assert_eq!(Value::Object(cleaned), json!({"student_name": "John"}));
    }

    #[tokio::test]
    async fn preserves_page_order_and_runs_concurrently() {
        let client = PageScript::new(vec![
            Ok(r#"{"student_name": "John"}"#),
            Ok(r#"Sure! ```json
{"student_name": "John Doe", "bsb": "123-456"}
```"#),
            Ok(r#"{"payment_purpose": "Tuition", "iban": null}"#),
        ]);

        let result = map_pages(&client, images(3), &task(), None, None)
            .await
            .unwrap();

        let pages: Vec<usize> = result.partials.iter().map(|p| p.page_num()).collect();
        assert_eq!(pages, vec![1, 2, 3]);
        assert_eq!(result.partials[1].fields["bsb"], json!("123-456"));
        assert!(!result.partials[2].fields.contains_key("iban"));
        assert_eq!(client.max_in_flight.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn concurrency_limit_is_respected() {
        let client = PageScript::new(vec![Ok("{}"), Ok("{}"), Ok("{}"), Ok("{}")]);
        map_pages(&client, images(4), &task(), Some(2), None)
            .await
            .unwrap();
        assert!(client.max_in_flight.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn failed_pages_are_dropped_not_fatal() {
        let client = PageScript::new(vec![
            Err(503),
            Ok(r#"{"course_name": "B.Sc Computer Science"}"#),
            Ok("I could not read this page."),
        ]);

        let result = map_pages(&client, images(3), &task(), None, None)
            .await
            .unwrap();

        assert_eq!(result.partials.len(), 1);
        assert_eq!(result.partials[0].page_num(), 2);
        assert_eq!(result.outcomes.len(), 3);
        assert!(matches!(
            result.outcomes[0].error,
            Some(PageError::ModelFailed { page: 1, .. })
        ));
        assert!(matches!(
            result.outcomes[2].error,
            Some(PageError::Unparseable { page: 3, .. })
        ));
    }

    #[tokio::test]
    async fn all_pages_failing_is_no_usable_extraction() {
        let client = PageScript::new(vec![Err(500), Ok("nothing here")]);
        let err = map_pages(&client, images(2), &task(), None, None)
            .await
            .unwrap_err();
        match err {
            ExtractError::NoUsableExtraction { total, first_error } => {
                assert_eq!(total, 2);
                assert!(first_error.contains("Page 1"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
