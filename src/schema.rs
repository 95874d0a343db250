//! Target record schemas.
//!
//! A [`DocumentSchema`] is a declared table of fields: name, kind, whether the
//! field is required, and a description for the model. Prompt generation,
//! the structured-output JSON Schema, per-page cleaning, the merge guards and
//! the validator all read this table instead of hard-coding per-field logic.
//!
//! Required fields that are missing after merge are filled with the kind's
//! default (`""` for strings and dates, `0.0` for numbers). Optional fields
//! that are missing stay `null`.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Value kind of a schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    String,
    Number,
    /// ISO calendar date, `YYYY-MM-DD`.
    Date,
}

impl FieldKind {
    /// Default substituted for a missing *required* field.
    pub fn default_value(self) -> Value {
        match self {
            FieldKind::String | FieldKind::Date => Value::String(String::new()),
            FieldKind::Number => json!(0.0),
        }
    }

    fn json_type(self) -> &'static str {
        match self {
            FieldKind::String | FieldKind::Date => "string",
            FieldKind::Number => "number",
        }
    }
}

/// One row of the schema field table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub description: String,
}

impl FieldSpec {
    pub fn required(name: &str, kind: FieldKind, description: &str) -> Self {
        Self {
            name: name.to_string(),
            kind,
            required: true,
            description: description.to_string(),
        }
    }

    pub fn optional(name: &str, kind: FieldKind, description: &str) -> Self {
        Self {
            required: false,
            ..Self::required(name, kind, description)
        }
    }
}

/// A target record definition.
///
/// Deserialisable from JSON so callers can ship their own schemas:
///
/// ```json
/// { "name": "invoice",
///   "fields": [ { "name": "total", "kind": "number", "required": true } ] }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentSchema {
    pub name: String,
    pub fields: Vec<FieldSpec>,
    /// Enforce the IBAN vs. BSB/account-number banking rule.
    #[serde(default)]
    pub banking_jurisdiction: bool,
}

impl DocumentSchema {
    pub fn new(name: impl Into<String>, fields: Vec<FieldSpec>) -> Self {
        Self {
            name: name.into(),
            fields,
            banking_jurisdiction: false,
        }
    }

    pub fn with_banking_jurisdiction(mut self, enabled: bool) -> Self {
        self.banking_jurisdiction = enabled;
        self
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    /// University offer letter: enrolment and payment details.
    pub fn offer_letter() -> Self {
        use FieldKind::*;
        Self::new(
            "offer_letter",
            vec![
                FieldSpec::required(
                    "student_name",
                    String,
                    "Full name of the student including first name and surname.",
                ),
                FieldSpec::required(
                    "beneficiary_name",
                    String,
                    "Name of the university or college receiving the payment.",
                ),
                FieldSpec::optional(
                    "university_address",
                    String,
                    "Full mailing address of the university/college.",
                ),
                FieldSpec::required(
                    "course_name",
                    String,
                    "Academic program or language course name.",
                ),
                FieldSpec::required("remit_amount", Number, "Total amount to be paid/remitted."),
                FieldSpec::required(
                    "remit_currency",
                    String,
                    "ISO currency code of the remit amount (e.g. AUD, USD).",
                ),
                FieldSpec::optional(
                    "total_tuition_amount",
                    Number,
                    "Grand total for the course including fees.",
                ),
                FieldSpec::optional("swift", String, "8 or 11 character SWIFT/BIC code."),
                FieldSpec::optional(
                    "iban",
                    String,
                    "International Bank Account Number. Not used in Australia.",
                ),
                FieldSpec::optional(
                    "bsb",
                    String,
                    "Australian bank-state-branch code: exactly six digits (XXXXXX or XXX-XXX).",
                ),
                FieldSpec::optional(
                    "account_number",
                    String,
                    "Bank account number of the university. Only with a BSB.",
                ),
                FieldSpec::optional(
                    "payment_purpose",
                    String,
                    "Purpose or reference for the payment.",
                ),
            ],
        )
        .with_banking_jurisdiction(true)
    }

    /// National identity card.
    pub fn national_id() -> Self {
        use FieldKind::*;
        Self::new(
            "national_id",
            vec![
                FieldSpec::required("full_name", String, "Full name as printed on the card."),
                FieldSpec::required("id_number", String, "National identification number."),
                FieldSpec::required("date_of_birth", Date, "Date of birth, YYYY-MM-DD."),
                FieldSpec::optional("gender", String, "Gender or sex as printed."),
                FieldSpec::optional("nationality", String, "Nationality or citizenship."),
                FieldSpec::optional("place_of_birth", String, "Place of birth."),
                FieldSpec::optional("address", String, "Residential address."),
                FieldSpec::optional("date_of_issue", Date, "Issue date, YYYY-MM-DD."),
                FieldSpec::optional("date_of_expiry", Date, "Expiry date, YYYY-MM-DD."),
            ],
        )
    }

    /// JSON Schema used to request constrained decoding from the model.
    ///
    /// Every property is nullable: a single page legitimately lacks most
    /// fields, so "not visible" must be expressible even for required ones.
    pub fn json_schema(&self) -> Value {
        let mut properties = Map::new();
        for field in &self.fields {
            let mut prop = json!({
                "type": [field.kind.json_type(), "null"],
            });
            if !field.description.is_empty() {
                prop["description"] = Value::String(field.description.clone());
            }
            if field.kind == FieldKind::Date {
                prop["format"] = Value::String("date".into());
            }
            properties.insert(field.name.clone(), prop);
        }
        let required: Vec<Value> = self
            .fields
            .iter()
            .map(|f| Value::String(f.name.clone()))
            .collect();

        json!({
            "title": self.name,
            "type": "object",
            "properties": properties,
            "required": required,
            "additionalProperties": false,
        })
    }

    /// Bullet list of field definitions for prompts.
    pub fn field_guide(&self) -> String {
        self.fields
            .iter()
            .map(|f| {
                let req = if f.required { "required" } else { "optional" };
                if f.description.is_empty() {
                    format!("- '{}' ({:?}, {req})", f.name, f.kind)
                } else {
                    format!("- '{}' ({:?}, {req}): {}", f.name, f.kind, f.description)
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// A record that passed [`crate::pipeline::validate::validate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatedRecord {
    pub schema: String,
    pub fields: Map<String, Value>,
}

impl ValidatedRecord {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field).filter(|v| !v.is_null())
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(Value::as_str)
    }

    pub fn get_f64(&self, field: &str) -> Option<f64> {
        self.get(field).and_then(Value::as_f64)
    }

    /// Deserialise the fields into a typed record such as [`OfferLetter`].
    pub fn to_typed<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(Value::Object(self.fields.clone()))
    }

    pub fn to_json_pretty(&self) -> String {
        serde_json::to_string_pretty(&self.fields).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Typed view of a validated offer-letter record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfferLetter {
    pub student_name: String,
    pub beneficiary_name: String,
    pub university_address: Option<String>,
    pub course_name: String,
    pub remit_amount: f64,
    pub remit_currency: String,
    pub total_tuition_amount: Option<f64>,
    pub swift: Option<String>,
    pub iban: Option<String>,
    pub bsb: Option<String>,
    pub account_number: Option<String>,
    pub payment_purpose: Option<String>,
}

/// Typed view of a validated national-ID record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NationalId {
    pub full_name: String,
    pub id_number: String,
    pub date_of_birth: String,
    pub gender: Option<String>,
    pub nationality: Option<String>,
    pub place_of_birth: Option<String>,
    pub address: Option<String>,
    pub date_of_issue: Option<String>,
    pub date_of_expiry: Option<String>,
}
