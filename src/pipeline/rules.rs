//! Merge rules applied locally, without a model call.
//!
//! The same rules the merge prompts hand to the model, expressed as code.
//! They run in two places:
//!
//! * as the whole reduce step for [`crate::config::MergeStrategy::Deterministic`];
//! * as guards over every model-assisted merge result, so that a merge call
//!   can neither invent fields nor break the banking jurisdiction rule.

use crate::pipeline::map::{clean_fields, is_null_like, PartialExtraction};
use crate::schema::DocumentSchema;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use tracing::debug;

/// Fields belonging to the IBAN / BSB banking jurisdictions.
pub const BANKING_FIELDS: [&str; 4] = ["swift", "iban", "bsb", "account_number"];

/// Normalise an Australian BSB to six digits.
///
/// Accepts `XXXXXX` and `XXX-XXX` (surrounding whitespace ignored).
pub fn normalize_bsb(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let digits: String = match raw.len() {
        6 => raw.to_string(),
        7 if raw.as_bytes()[3] == b'-' => format!("{}{}", &raw[..3], &raw[4..]),
        _ => return None,
    };
    if digits.len() == 6 && digits.bytes().all(|b| b.is_ascii_digit()) {
        Some(digits)
    } else {
        None
    }
}

/// The normalised BSB held by `value`, if it is a valid one.
///
/// A BSB emitted as a JSON number has lost its leading zero when it starts
/// with one (`012345` arrives as `12345`), so five-digit numbers are padded.
pub fn bsb_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => normalize_bsb(s),
        Value::Number(n) => n
            .as_u64()
            .filter(|n| (10_000..=999_999).contains(n))
            .map(|n| format!("{n:06}")),
        _ => None,
    }
}

pub fn is_valid_bsb(value: &Value) -> bool {
    bsb_value(value).is_some()
}

/// Enforce the jurisdiction rule on a single record.
///
/// A valid BSB is normalised and any IBAN is discarded. Without a BSB the
/// account number is discarded. An invalid BSB is left for the validator.
pub fn apply_banking_rules(fields: &mut Map<String, Value>) {
    match fields.get("bsb") {
        Some(value) => {
            if let Some(bsb) = bsb_value(value) {
                fields.insert("bsb".to_string(), Value::String(bsb));
                if fields.remove("iban").is_some() {
                    debug!("Discarded IBAN: a valid BSB is present");
                }
            }
        }
        None => {
            if fields.remove("account_number").is_some() {
                debug!("Discarded account_number: no BSB present");
            }
        }
    }
}

/// Jurisdiction rule across pages: a BSB seen on any input wins over the
/// merged record's IBAN, even if the merge itself lost the BSB. A kept BSB
/// also gets back the account number a page reported if the merge lost it.
pub fn enforce_jurisdiction(merged: &mut Map<String, Value>, inputs: &[PartialExtraction]) {
    if !merged.get("bsb").is_some_and(is_valid_bsb) {
        let observed = inputs
            .iter()
            .find_map(|p| p.fields.get("bsb").and_then(bsb_value));
        if let Some(bsb) = observed {
            debug!("Restoring BSB {} observed on an input page", bsb);
            merged.insert("bsb".to_string(), Value::String(bsb));
        }
    }

    let has_bsb = merged.get("bsb").is_some_and(is_valid_bsb);
    let has_account = merged
        .get("account_number")
        .is_some_and(|v| !is_null_like(v));
    if has_bsb && !has_account {
        let observed = inputs
            .iter()
            .filter_map(|p| p.fields.get("account_number"))
            .find(|v| !is_null_like(v));
        if let Some(account) = observed {
            debug!("Restoring account_number observed on an input page");
            merged.insert("account_number".to_string(), account.clone());
        }
    }
    apply_banking_rules(merged);
}

/// Drop fields that no input page ever reported.
pub fn retain_observed(merged: &mut Map<String, Value>, inputs: &[PartialExtraction]) {
    merged.retain(|key, _| {
        let seen = inputs.iter().any(|p| p.fields.contains_key(key));
        if !seen {
            debug!("Dropping merged field '{}': absent from every page", key);
        }
        seen
    });
}

/// Guards applied to every model-assisted merge result.
pub fn guard_merged(
    merged: Map<String, Value>,
    inputs: &[PartialExtraction],
    schema: &DocumentSchema,
) -> Map<String, Value> {
    let mut merged = clean_fields(merged, schema);
    retain_observed(&mut merged, inputs);
    if schema.banking_jurisdiction {
        enforce_jurisdiction(&mut merged, inputs);
    }
    merged
}

/// Words that mark a string as an academic program name.
static RE_PROGRAM_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(course|program|programme|bachelor|master|diploma|certificate|degree|doctor|ph\.?d|b\.?\s?sc|m\.?\s?sc|b\.?\s?a|m\.?\s?a|mba|foundation|language|studies)\b",
    )
    .unwrap()
});

/// Whether `value` reads as an academic program name rather than a
/// heading or fragment.
pub fn looks_like_program(value: &Value) -> bool {
    value.as_str().is_some_and(|s| RE_PROGRAM_NAME.is_match(s))
}

fn is_address_field(name: &str) -> bool {
    name.contains("address")
}

fn normalized_text(value: &Value) -> Option<String> {
    value
        .as_str()
        .map(|s| s.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase())
}

/// Pick the most complete value, scanning in page order.
///
/// A later string replaces the current one only when it contains it
/// (case-insensitive) and is longer. Any other disagreement keeps the
/// earlier page's value.
fn most_complete<'a>(values: impl IntoIterator<Item = &'a Value>) -> Option<&'a Value> {
    let mut best: Option<&Value> = None;
    for value in values {
        best = match best {
            None => Some(value),
            Some(current) => match (normalized_text(current), normalized_text(value)) {
                (Some(cur), Some(new)) if new.len() > cur.len() && new.contains(&cur) => {
                    Some(value)
                }
                _ => Some(current),
            },
        };
    }
    best
}

/// Merge partials with the rule set alone, in page order.
///
/// * completeness: "John Doe" beats "John";
/// * true conflicts: the earliest page wins, so the result depends on input order;
/// * `course_name`: a value that reads as an academic program name, when
///   any page has one;
/// * `payment_purpose`: taken from a page that also reports `remit_amount`
///   or banking details, when one exists;
/// * address fields: taken from a page tied to the beneficiary (it reports
///   `beneficiary_name`, or the address names the beneficiary), when one exists;
/// * jurisdiction: as [`enforce_jurisdiction`] when the schema asks for it.
pub fn merge_deterministic(
    partials: &[PartialExtraction],
    schema: &DocumentSchema,
) -> Map<String, Value> {
    let mut merged = Map::new();

    let (addresses, others): (Vec<_>, Vec<_>) =
        schema.fields.iter().partition(|f| is_address_field(&f.name));

    for field in others {
        let sources = observed_on(partials, &field.name);
        let sources = match field.name.as_str() {
            "course_name" => prefer(sources, |p| looks_like_program(&p.fields["course_name"])),
            "payment_purpose" => prefer(sources, |p| {
                p.fields.contains_key("remit_amount")
                    || BANKING_FIELDS.iter().any(|b| p.fields.contains_key(*b))
            }),
            _ => sources,
        };
        if let Some(value) = most_complete(sources.iter().map(|p| &p.fields[&field.name])) {
            merged.insert(field.name.clone(), value.clone());
        }
    }

    let beneficiary = merged.get("beneficiary_name").and_then(normalized_text);
    for field in addresses {
        let sources = prefer(observed_on(partials, &field.name), |p| {
            p.fields.contains_key("beneficiary_name")
                || match (&beneficiary, normalized_text(&p.fields[&field.name])) {
                    (Some(name), Some(address)) => address.contains(name.as_str()),
                    _ => false,
                }
        });
        if let Some(value) = most_complete(sources.iter().map(|p| &p.fields[&field.name])) {
            merged.insert(field.name.clone(), value.clone());
        }
    }

    // Rebuild in schema order.
    let mut ordered = Map::new();
    for field in &schema.fields {
        if let Some(value) = merged.remove(&field.name) {
            ordered.insert(field.name.clone(), value);
        }
    }

    if schema.banking_jurisdiction {
        enforce_jurisdiction(&mut ordered, partials);
    }
    ordered
}

fn observed_on<'a>(partials: &'a [PartialExtraction], field: &str) -> Vec<&'a PartialExtraction> {
    partials
        .iter()
        .filter(|p| p.fields.get(field).is_some_and(|v| !is_null_like(v)))
        .collect()
}

/// Keep the sources matching `pred`, or all of them when none match.
fn prefer<'a>(
    sources: Vec<&'a PartialExtraction>,
    pred: impl Fn(&PartialExtraction) -> bool,
) -> Vec<&'a PartialExtraction> {
    let preferred: Vec<_> = sources.iter().copied().filter(|p| pred(*p)).collect();
    if preferred.is_empty() {
        sources
    } else {
        preferred
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn partial(index: usize, value: Value) -> PartialExtraction {
        PartialExtraction {
            page_index: index,
            fields: value.as_object().cloned().unwrap(),
        }
    }

    fn map(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn bsb_formats() {
        assert_eq!(normalize_bsb("123456").as_deref(), Some("123456"));
        assert_eq!(normalize_bsb(" 123-456 ").as_deref(), Some("123456"));
        assert_eq!(normalize_bsb("12-3456"), None);
        assert_eq!(normalize_bsb("1234567"), None);
        assert_eq!(normalize_bsb("12345a"), None);
        assert_eq!(normalize_bsb("+61 2 9999 0000"), None);
        assert!(is_valid_bsb(&json!(123456)));
        assert!(!is_valid_bsb(&json!(null)));
        assert_eq!(bsb_value(&json!(12345)).as_deref(), Some("012345"));
        assert_eq!(bsb_value(&json!(1234)), None);
        assert_eq!(bsb_value(&json!(1234567)), None);
    }

    #[test]
    fn valid_bsb_discards_iban() {
        let mut fields = map(json!({"bsb": "123-456", "iban": "GB29NWBK60161331926819", "account_number": "9999"}));
        apply_banking_rules(&mut fields);
        assert_eq!(fields["bsb"], json!("123456"));
        assert!(!fields.contains_key("iban"));
        assert_eq!(fields["account_number"], json!("9999"));
    }

    #[test]
    fn account_number_needs_bsb() {
        let mut fields = map(json!({"iban": "GB29NWBK60161331926819", "account_number": "9999"}));
        apply_banking_rules(&mut fields);
        assert!(fields.contains_key("iban"));
        assert!(!fields.contains_key("account_number"));
    }

    #[test]
    fn bsb_seen_on_any_page_beats_merged_iban() {
        let inputs = vec![
            partial(0, json!({"iban": "GB29NWBK60161331926819"})),
            partial(1, json!({"bsb": "123-456", "account_number": "9999"})),
        ];
        let mut merged = map(json!({"iban": "GB29NWBK60161331926819"}));
        enforce_jurisdiction(&mut merged, &inputs);
        assert_eq!(Value::Object(merged), json!({"bsb": "123456", "account_number": "9999"}));
    }

    #[test]
    fn merged_bsb_gets_back_lost_account_number() {
        let inputs = vec![
            partial(0, json!({"student_name": "John"})),
            partial(1, json!({"bsb": "123-456", "account_number": "9999"})),
        ];
        let mut merged = map(json!({"bsb": "123456", "swift": "NWBKGB2L"}));
        enforce_jurisdiction(&mut merged, &inputs);
        assert_eq!(merged["account_number"], json!("9999"));
        assert_eq!(merged["bsb"], json!("123456"));
    }

    #[test]
    fn guard_removes_invented_and_unknown_fields() {
        let schema = DocumentSchema::offer_letter();
        let inputs = vec![partial(0, json!({"student_name": "John Doe"}))];
        let merged = map(json!({
            "student_name": "John Doe",
            "course_name": "Invented Course",
            "phone": "0400",
            "swift": null
        }));
        let guarded = guard_merged(merged, &inputs, &schema);
        assert_eq!(Value::Object(guarded), json!({"student_name": "John Doe"}));
    }

    #[test]
    fn most_complete_name_wins_in_either_order() {
        let schema = DocumentSchema::offer_letter();
        let a = partial(0, json!({"student_name": "John"}));
        let b = partial(1, json!({"student_name": "john  DOE"}));
        let forward = merge_deterministic(&[a.clone(), b.clone()], &schema);
        let backward = merge_deterministic(&[b, a], &schema);
        assert_eq!(forward["student_name"], json!("john  DOE"));
        assert_eq!(backward["student_name"], json!("john  DOE"));
    }

    #[test]
    fn true_conflict_keeps_first_page() {
        let schema = DocumentSchema::offer_letter();
        let a = partial(0, json!({"course_name": "Japanese Language Course"}));
        let c = partial(2, json!({"course_name": "B.Sc Computer Science"}));
        assert_eq!(
            merge_deterministic(&[a.clone(), c.clone()], &schema)["course_name"],
            json!("Japanese Language Course")
        );
        assert_eq!(
            merge_deterministic(&[c, a], &schema)["course_name"],
            json!("B.Sc Computer Science")
        );
    }

    #[test]
    fn program_name_beats_heading_for_course() {
        let schema = DocumentSchema::offer_letter();
        let heading = partial(0, json!({"course_name": "Letter of Offer"}));
        let program = partial(2, json!({"course_name": "Japanese Language Course"}));
        for pages in [[heading.clone(), program.clone()], [program.clone(), heading.clone()]] {
            assert_eq!(
                merge_deterministic(&pages, &schema)["course_name"],
                json!("Japanese Language Course")
            );
        }
        assert!(looks_like_program(&json!("B.Sc Computer Science")));
        assert!(looks_like_program(&json!("Master of Data Science")));
        assert!(!looks_like_program(&json!("Welcome to campus")));
    }

    #[test]
    fn purpose_follows_remit_amount() {
        let schema = DocumentSchema::offer_letter();
        let merged = merge_deterministic(
            &[
                partial(0, json!({"payment_purpose": "Welcome to campus"})),
                partial(1, json!({"remit_amount": 12000.0, "payment_purpose": "Tuition fee T1"})),
            ],
            &schema,
        );
        assert_eq!(merged["payment_purpose"], json!("Tuition fee T1"));
    }

    #[test]
    fn address_tied_to_beneficiary_beats_longer_student_address() {
        let schema = DocumentSchema::offer_letter();
        let merged = merge_deterministic(
            &[
                partial(
                    0,
                    json!({"student_name": "John Doe", "university_address": "Flat 12, 345 Long Residential Street, Springfield, Somewhere 99999"}),
                ),
                partial(
                    1,
                    json!({"beneficiary_name": "Univ of X", "university_address": "1 College Rd, Sydney NSW 2000"}),
                ),
            ],
            &schema,
        );
        assert_eq!(merged["university_address"], json!("1 College Rd, Sydney NSW 2000"));
    }

    #[test]
    fn absent_everywhere_stays_absent() {
        let schema = DocumentSchema::offer_letter();
        let merged = merge_deterministic(&[partial(0, json!({"student_name": "John"}))], &schema);
        assert_eq!(merged.len(), 1);
    }
}
