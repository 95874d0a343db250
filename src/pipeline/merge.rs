//! Reduce Stage: consolidate per-page partial extractions into one record.
//!
//! Three strategies, selected by [`MergeStrategy`]:
//!
//! * **Batch**: all partials go to the model in one consolidation call.
//! * **Incremental**: a left fold. The running record and the next partial
//!   go to the model together, one call per additional page. The fold is
//!   strictly sequential: each step needs the previous step's output, and
//!   tie-breaking depends on which page was folded first.
//! * **Deterministic**: [`rules::merge_deterministic`], no model call.
//!
//! A single partial skips the stage entirely and is returned unchanged.
//! Every model-assisted result passes through [`rules::guard_merged`].
//! A failing merge call fails the request; there is nothing left to fall
//! back on once the map stage is done.

use crate::config::MergeStrategy;
use crate::error::ExtractError;
use crate::pipeline::llm::{CompletionRequest, ModelClient};
use crate::pipeline::map::PartialExtraction;
use crate::pipeline::{parse, rules};
use crate::progress::ProgressCallback;
use crate::prompts;
use crate::schema::DocumentSchema;
use serde_json::{Map, Value};
use std::time::Instant;
use tracing::{debug, info};

/// The merged record and how many model calls it took.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    pub fields: Map<String, Value>,
    pub merge_calls: usize,
}

/// Run the reduce stage over partials in page order.
///
/// # Errors
/// [`ExtractError::Upstream`] or [`ExtractError::ParseFailure`] from a merge
/// call; [`ExtractError::Internal`] when `partials` is empty.
pub async fn reduce(
    client: &dyn ModelClient,
    partials: &[PartialExtraction],
    schema: &DocumentSchema,
    strategy: MergeStrategy,
    progress: Option<&ProgressCallback>,
) -> Result<MergeOutcome, ExtractError> {
    match partials {
        [] => Err(ExtractError::Internal(
            "reduce stage called without partial extractions".into(),
        )),
        [only] => {
            debug!("Single partial extraction (page {}): merge skipped", only.page_num());
            Ok(MergeOutcome {
                fields: only.fields.clone(),
                merge_calls: 0,
            })
        }
        _ => {
            let start = Instant::now();
            let outcome = match strategy {
                MergeStrategy::Batch => merge_batch(client, partials, schema, progress).await?,
                MergeStrategy::Incremental => {
                    merge_incremental(client, partials, schema, progress).await?
                }
                MergeStrategy::Deterministic => MergeOutcome {
                    fields: rules::merge_deterministic(partials, schema),
                    merge_calls: 0,
                },
            };
            info!(
                "Reduce stage ({:?}): {} partials -> {} fields, {} merge calls in {:?}",
                strategy,
                partials.len(),
                outcome.fields.len(),
                outcome.merge_calls,
                start.elapsed()
            );
            Ok(outcome)
        }
    }
}

async fn merge_batch(
    client: &dyn ModelClient,
    partials: &[PartialExtraction],
    schema: &DocumentSchema,
    progress: Option<&ProgressCallback>,
) -> Result<MergeOutcome, ExtractError> {
    if let Some(cb) = progress {
        cb.on_merge_step(1, 1);
    }
    let request = CompletionRequest::new(prompts::MERGE_USER_PROMPT)
        .system(prompts::batch_merge_prompt(schema, partials))
        .schema(schema.json_schema());

    let merged = merge_call(client, request).await?;
    Ok(MergeOutcome {
        fields: rules::guard_merged(merged, partials, schema),
        merge_calls: 1,
    })
}

async fn merge_incremental(
    client: &dyn ModelClient,
    partials: &[PartialExtraction],
    schema: &DocumentSchema,
    progress: Option<&ProgressCallback>,
) -> Result<MergeOutcome, ExtractError> {
    let total_steps = partials.len() - 1;
    let response_schema = schema.json_schema();

    let mut running = partials[0].fields.clone();
    let mut merged_pages = vec![partials[0].page_num()];

    for (offset, next) in partials[1..].iter().enumerate() {
        let step = offset + 1;
        if let Some(cb) = progress {
            cb.on_merge_step(step, total_steps);
        }
        debug!(
            "Merge step {}/{}: pages {:?} + page {}",
            step,
            total_steps,
            merged_pages,
            next.page_num()
        );

        let request = CompletionRequest::new(prompts::MERGE_USER_PROMPT)
            .system(prompts::pairwise_merge_prompt(
                schema,
                &running,
                &merged_pages,
                next,
            ))
            .schema(response_schema.clone());

        let merged = merge_call(client, request).await?;
        running = rules::guard_merged(merged, &partials[..=step], schema);
        merged_pages.push(next.page_num());
    }

    Ok(MergeOutcome {
        fields: running,
        merge_calls: total_steps,
    })
}

async fn merge_call(
    client: &dyn ModelClient,
    request: CompletionRequest,
) -> Result<Map<String, Value>, ExtractError> {
    let raw = client.complete(request).await?;
    parse::parse(&raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    /// Replays canned merge responses and records the system prompts it saw.
    struct Replay {
        responses: Mutex<Vec<String>>,
        prompts: Mutex<Vec<String>>,
    }

    impl Replay {
        fn new(responses: &[&str]) -> Self {
            Self {
                responses: Mutex::new(responses.iter().rev().map(|s| s.to_string()).collect()),
                prompts: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            self.prompts.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ModelClient for Replay {
        async fn complete(&self, request: CompletionRequest) -> Result<String, ExtractError> {
            assert!(request.images.is_empty());
            self.prompts
                .lock()
                .unwrap()
                .push(request.system_prompt.unwrap_or_default());
            self.responses
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| ExtractError::Upstream {
                    status: Some(500),
                    body: "no more responses".into(),
                })
        }
    }

    fn partial(index: usize, value: Value) -> PartialExtraction {
        PartialExtraction {
            page_index: index,
            fields: value.as_object().cloned().unwrap(),
        }
    }

    #[tokio::test]
    async fn single_partial_is_returned_unchanged() {
        let client = Replay::new(&[]);
        let p = partial(0, json!({"student_name": "John", "iban": "GB29NWBK60161331926819"}));
        for strategy in [
            MergeStrategy::Batch,
            MergeStrategy::Incremental,
            MergeStrategy::Deterministic,
        ] {
            let outcome = reduce(
                &client,
                std::slice::from_ref(&p),
                &DocumentSchema::offer_letter(),
                strategy,
                None,
            )
            .await
            .unwrap();
            assert_eq!(outcome.fields, p.fields);
            assert_eq!(outcome.merge_calls, 0);
        }
        assert_eq!(client.calls(), 0);
    }

    #[tokio::test]
    async fn batch_is_one_call_and_guarded() {
        let client = Replay::new(&[
            r#"```json
{"student_name": "John Doe", "bsb": "123456", "iban": "GB29NWBK60161331926819", "course_name": "Made Up"}
```"#,
        ]);
        let partials = vec![
            partial(0, json!({"student_name": "John", "iban": "GB29NWBK60161331926819"})),
            partial(1, json!({"student_name": "John Doe", "bsb": "123456"})),
        ];
        let outcome = reduce(
            &client,
            &partials,
            &DocumentSchema::offer_letter(),
            MergeStrategy::Batch,
            None,
        )
        .await
        .unwrap();

        assert_eq!(outcome.merge_calls, 1);
        assert_eq!(
            Value::Object(outcome.fields),
            json!({"student_name": "John Doe", "bsb": "123456"})
        );
        let prompts = client.prompts.lock().unwrap();
        assert!(prompts[0].contains("\"page\": 2"));
    }

    #[tokio::test]
    async fn incremental_folds_left_one_call_per_extra_page() {
        let client = Replay::new(&[
            r#"{"student_name": "John Doe", "course_name": "B.Sc"}"#,
            r#"{"student_name": "John Doe", "course_name": "B.Sc Computer Science"}"#,
        ]);
        let partials = vec![
            partial(0, json!({"student_name": "John"})),
            partial(1, json!({"student_name": "John Doe", "course_name": "B.Sc"})),
            partial(2, json!({"course_name": "B.Sc Computer Science"})),
        ];
        let outcome = reduce(
            &client,
            &partials,
            &DocumentSchema::offer_letter(),
            MergeStrategy::Incremental,
            None,
        )
        .await
        .unwrap();

        assert_eq!(outcome.merge_calls, 2);
        assert_eq!(outcome.fields["course_name"], json!("B.Sc Computer Science"));

        let prompts = client.prompts.lock().unwrap();
        assert!(prompts[0].contains("CURRENT record (pages 1)"));
        assert!(prompts[0].contains("NEW extraction (page 2)"));
        assert!(prompts[1].contains("CURRENT record (pages 1, 2)"));
        assert!(prompts[1].contains("\"course_name\": \"B.Sc\""));
        assert!(prompts[1].contains("NEW extraction (page 3)"));
    }

    #[tokio::test]
    async fn merge_call_failure_propagates() {
        let client = Replay::new(&["I merged them for you!"]);
        let err = reduce(
            &client,
            &[partial(0, json!({"a": 1})), partial(1, json!({"a": 2}))],
            &DocumentSchema::offer_letter(),
            MergeStrategy::Batch,
            None,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ExtractError::ParseFailure { .. }));
    }

    #[tokio::test]
    async fn deterministic_makes_no_calls() {
        let client = Replay::new(&[]);
        let outcome = reduce(
            &client,
            &[
                partial(0, json!({"bsb": "123456", "iban": "GB29NWBK60161331926819"})),
                partial(1, json!({"iban": "DE89370400440532013000"})),
            ],
            &DocumentSchema::offer_letter(),
            MergeStrategy::Deterministic,
            None,
        )
        .await
        .unwrap();
        assert_eq!(outcome.merge_calls, 0);
        assert_eq!(outcome.fields.get("iban"), None);
        assert_eq!(outcome.fields["bsb"], json!("123456"));
    }

    #[tokio::test]
    async fn empty_input_is_internal_error() {
        let client = Replay::new(&[]);
        let err = reduce(
            &client,
            &[],
            &DocumentSchema::offer_letter(),
            MergeStrategy::Batch,
            None,
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), "Internal");
    }
}
