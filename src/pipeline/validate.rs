//! Schema Validator: turn a merged map into a [`ValidatedRecord`].
//!
//! Per field, in schema order:
//!
//! | State after merge | Required | Optional |
//! |---|---|---|
//! | missing / `null` / `"null"` | kind default (`""`, `0.0`) | `null` |
//! | empty string | kept as `""` (number: `0.0`) | `null` |
//! | present | coerced to the field kind | coerced to the field kind |
//!
//! Coercions: numeric strings (`"12,500.00"`) become numbers, numbers become
//! strings for string fields, dates must be `YYYY-MM-DD`. Keys outside the
//! schema are dropped. Jurisdiction schemas then check the banking fields.
//! Every violation is collected before failing.

use crate::error::{ExtractError, FieldViolation};
use crate::pipeline::map::is_null_like;
use crate::pipeline::rules::bsb_value;
use crate::schema::{DocumentSchema, FieldKind, FieldSpec, ValidatedRecord};
use chrono::NaiveDate;
use serde_json::{Map, Number, Value};
use tracing::debug;

/// Validate `merged` against `schema`.
///
/// # Errors
/// [`ExtractError::Validation`] listing every violated field.
pub fn validate(
    merged: &Map<String, Value>,
    schema: &DocumentSchema,
) -> Result<ValidatedRecord, ExtractError> {
    let mut fields = Map::new();
    let mut violations = Vec::new();

    for key in merged.keys().filter(|k| !schema.has_field(k)) {
        debug!("Validator dropping unknown field '{}'", key);
    }

    for spec in &schema.fields {
        let present = merged.get(&spec.name).filter(|v| !is_null_like(v));
        let value = match present {
            None => missing(spec),
            Some(value) => match coerce(spec, value) {
                Ok(v) => v,
                Err(reason) => {
                    violations.push(FieldViolation::new(&spec.name, reason));
                    value.clone()
                }
            },
        };
        fields.insert(spec.name.clone(), value);
    }

    if schema.banking_jurisdiction {
        check_jurisdiction(&mut fields, &mut violations);
    }

    if violations.is_empty() {
        Ok(ValidatedRecord {
            schema: schema.name.clone(),
            fields,
        })
    } else {
        Err(ExtractError::Validation {
            schema: schema.name.clone(),
            violations,
        })
    }
}

fn missing(spec: &FieldSpec) -> Value {
    if spec.required {
        spec.kind.default_value()
    } else {
        Value::Null
    }
}

fn coerce(spec: &FieldSpec, value: &Value) -> Result<Value, String> {
    match (spec.kind, value) {
        (_, Value::String(s)) if s.trim().is_empty() => Ok(missing(spec)),

        (FieldKind::String, Value::String(s)) => Ok(Value::String(s.trim().to_string())),
        (FieldKind::String, Value::Number(n)) => Ok(Value::String(n.to_string())),

        (FieldKind::Number, Value::Number(_)) => Ok(value.clone()),
        (FieldKind::Number, Value::String(s)) => parse_number(s)
            .map(Value::Number)
            .ok_or_else(|| format!("expected a number, got {s:?}")),

        (FieldKind::Date, Value::String(s)) => {
            let s = s.trim();
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .map(|_| Value::String(s.to_string()))
                .map_err(|_| format!("expected a YYYY-MM-DD date, got {s:?}"))
        }

        (kind, other) => Err(format!("expected {}, got {}", kind_name(kind), type_name(other))),
    }
}

/// Parse `"12,500.00"` or `" 950 "`; thousands separators and whitespace
/// are ignored.
fn parse_number(s: &str) -> Option<Number> {
    let cleaned: String = s
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ',')
        .collect();
    let n: f64 = cleaned.parse().ok()?;
    Number::from_f64(n)
}

fn kind_name(kind: FieldKind) -> &'static str {
    match kind {
        FieldKind::String => "a string",
        FieldKind::Number => "a number",
        FieldKind::Date => "a YYYY-MM-DD date",
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn is_set(fields: &Map<String, Value>, name: &str) -> bool {
    fields.get(name).is_some_and(|v| match v {
        Value::Null => false,
        Value::String(s) => !s.is_empty(),
        _ => true,
    })
}

/// IBAN and BSB are mutually exclusive; a BSB must be well-formed and come
/// with an account number; an account number needs a BSB.
fn check_jurisdiction(fields: &mut Map<String, Value>, violations: &mut Vec<FieldViolation>) {
    let has_iban = is_set(fields, "iban");
    let has_bsb = is_set(fields, "bsb");
    let has_account = is_set(fields, "account_number");

    if has_bsb {
        match fields.get("bsb").and_then(bsb_value) {
            Some(bsb) => {
                fields.insert("bsb".to_string(), Value::String(bsb));
            }
            None => violations.push(FieldViolation::new(
                "bsb",
                "must be exactly six digits (XXXXXX or XXX-XXX)",
            )),
        }
        if has_iban {
            violations.push(FieldViolation::new("iban", "cannot be combined with a BSB"));
        }
        if !has_account {
            violations.push(FieldViolation::new(
                "account_number",
                "required when a BSB is present",
            ));
        }
    } else if has_account {
        violations.push(FieldViolation::new(
            "account_number",
            "only valid together with a BSB",
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    fn violations(err: ExtractError) -> Vec<String> {
        match err {
            ExtractError::Validation { violations, .. } => {
                violations.into_iter().map(|v| v.field).collect()
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn missing_required_string_defaults_to_empty() {
        let record = validate(
            &map(json!({"student_name": "John Doe", "remit_amount": 100})),
            &DocumentSchema::offer_letter(),
        )
        .unwrap();
        assert_eq!(record.fields["remit_currency"], json!(""));
        assert_eq!(record.fields["beneficiary_name"], json!(""));
        assert_eq!(record.fields["iban"], Value::Null);
        assert_eq!(record.get("iban"), None);
    }

    #[test]
    fn missing_required_number_defaults_to_zero() {
        let record = validate(&Map::new(), &DocumentSchema::offer_letter()).unwrap();
        assert_eq!(record.get_f64("remit_amount"), Some(0.0));
        assert_eq!(record.fields["total_tuition_amount"], Value::Null);
    }

    #[test]
    fn coerces_numeric_strings_and_trims() {
        let record = validate(
            &map(json!({
                "remit_amount": "12,500.50",
                "student_name": "  John Doe ",
                "account_number": 12345678,
                "bsb": "123-456"
            })),
            &DocumentSchema::offer_letter(),
        )
        .unwrap();
        assert_eq!(record.get_f64("remit_amount"), Some(12500.5));
        assert_eq!(record.get_str("student_name"), Some("John Doe"));
        assert_eq!(record.get_str("account_number"), Some("12345678"));
        assert_eq!(record.get_str("bsb"), Some("123456"));
    }

    #[test]
    fn unknown_fields_are_dropped() {
        let record = validate(
            &map(json!({"full_name": "Jane", "id_number": "X1", "date_of_birth": "1990-01-31", "eye_colour": "brown"})),
            &DocumentSchema::national_id(),
        )
        .unwrap();
        assert!(!record.fields.contains_key("eye_colour"));
    }

    #[test]
    fn reports_every_violation() {
        let err = validate(
            &map(json!({
                "remit_amount": "lots",
                "bsb": "12345",
                "iban": "GB29NWBK60161331926819"
            })),
            &DocumentSchema::offer_letter(),
        )
        .unwrap_err();
        let fields = violations(err);
        assert_eq!(fields, vec!["remit_amount", "bsb", "iban", "account_number"]);
    }

    #[test]
    fn dates_must_be_iso() {
        let err = validate(
            &map(json!({"full_name": "Jane", "id_number": "X1", "date_of_birth": "31-01-1990", "date_of_expiry": "2031-02-30"})),
            &DocumentSchema::national_id(),
        )
        .unwrap_err();
        assert_eq!(violations(err), vec!["date_of_birth", "date_of_expiry"]);
    }

    #[test]
    fn account_number_alone_is_invalid() {
        let err = validate(
            &map(json!({"account_number": "9999", "swift": "NWBKGB2L"})),
            &DocumentSchema::offer_letter(),
        )
        .unwrap_err();
        assert_eq!(violations(err), vec!["account_number"]);
    }

    #[test]
    fn iban_jurisdiction_is_valid() {
        let record = validate(
            &map(json!({"swift": "NWBKGB2L", "iban": "GB29NWBK60161331926819"})),
            &DocumentSchema::offer_letter(),
        )
        .unwrap();
        assert_eq!(record.fields["bsb"], Value::Null);
    }

    #[test]
    fn non_jurisdiction_schema_skips_banking_checks() {
        let schema = DocumentSchema::new(
            "bank",
            vec![
                FieldSpec::optional("iban", FieldKind::String, ""),
                FieldSpec::optional("bsb", FieldKind::String, ""),
            ],
        );
        assert!(validate(&map(json!({"iban": "X", "bsb": "Y"})), &schema).is_ok());
    }
}
