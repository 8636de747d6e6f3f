//! Wire types shared with the clinical-records backend

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A patient record as the backend serves it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Patient {
    pub id: String,
    pub name: String,
    pub age: u32,
    pub condition: String,
    pub history: Vec<String>,
    #[serde(rename = "lastVisit")]
    pub last_visit: String,
    pub phone: String,
}

impl Default for Patient {
    fn default() -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            age: 0,
            condition: String::new(),
            history: Vec::new(),
            last_visit: String::new(),
            phone: String::new(),
        }
    }
}

/// Envelope used by the patient CRUD endpoints:
/// `{ "status": "success", "data": ... }`
#[derive(Debug, Deserialize)]
pub struct Envelope<T> {
    pub status: String,
    #[serde(default)]
    pub data: Option<T>,
    #[serde(default)]
    pub message: Option<String>,
}

impl<T> Envelope<T> {
    pub fn is_success(&self) -> bool {
        self.status == "success"
    }
}

/// Structured note fields as returned by the AI structuring endpoint.
pub type StructuredFields = BTreeMap<String, FieldValue>;

/// A structured field value: scalar text, a number, or a sequence.
/// Sequences render comma-joined for editing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    Number(f64),
    List(Vec<String>),
}

/// A manual edit did not parse back into the field's expected shape.
#[derive(Debug, Clone)]
pub struct FieldEditError {
    pub field: String,
    pub reason: String,
}

impl std::fmt::Display for FieldEditError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Field '{}' could not be parsed: {}", self.field, self.reason)
    }
}

impl std::error::Error for FieldEditError {}

impl FieldValue {
    /// Render for a plain-text editor: lists are comma-joined, numbers
    /// printed, text passed through.
    pub fn to_editable_text(&self) -> String {
        match self {
            FieldValue::Text(s) => s.clone(),
            FieldValue::Number(n) => {
                if n.fract() == 0.0 && n.is_finite() {
                    format!("{}", *n as i64)
                } else {
                    format!("{}", n)
                }
            }
            FieldValue::List(items) => items.join(", "),
        }
    }

    /// Parse edited text back into this field's shape. The shape is taken
    /// from the pre-edit value, so a list stays a list and a number must
    /// still parse as one.
    pub fn from_edited_text(&self, field: &str, text: &str) -> Result<FieldValue, FieldEditError> {
        match self {
            FieldValue::Text(_) => Ok(FieldValue::Text(text.to_string())),
            FieldValue::Number(_) => text
                .trim()
                .parse::<f64>()
                .map(FieldValue::Number)
                .map_err(|_| FieldEditError {
                    field: field.to_string(),
                    reason: format!("'{}' is not a number", text.trim()),
                }),
            FieldValue::List(_) => Ok(FieldValue::List(
                text.split(',')
                    .map(|item| item.trim().to_string())
                    .filter(|item| !item.is_empty())
                    .collect(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_values_deserialize_untagged() {
        let fields: StructuredFields = serde_json::from_str(
            r#"{
                "chief_complaint": "chest pain",
                "heart_rate": 88,
                "medications": ["aspirin", "metformin"]
            }"#,
        )
        .unwrap();

        assert_eq!(
            fields["chief_complaint"],
            FieldValue::Text("chest pain".into())
        );
        assert_eq!(fields["heart_rate"], FieldValue::Number(88.0));
        assert_eq!(
            fields["medications"],
            FieldValue::List(vec!["aspirin".into(), "metformin".into()])
        );
    }

    #[test]
    fn list_renders_comma_joined() {
        let value = FieldValue::List(vec!["aspirin".into(), "metformin".into()]);
        assert_eq!(value.to_editable_text(), "aspirin, metformin");
    }

    #[test]
    fn whole_numbers_render_without_decimal() {
        assert_eq!(FieldValue::Number(88.0).to_editable_text(), "88");
        assert_eq!(FieldValue::Number(37.5).to_editable_text(), "37.5");
    }

    #[test]
    fn edited_list_round_trips() {
        let original = FieldValue::List(vec!["aspirin".into()]);
        let edited = original
            .from_edited_text("medications", "aspirin, metformin , ")
            .unwrap();
        assert_eq!(
            edited,
            FieldValue::List(vec!["aspirin".into(), "metformin".into()])
        );
    }

    #[test]
    fn malformed_number_edit_is_rejected() {
        let original = FieldValue::Number(88.0);
        let err = original
            .from_edited_text("heart_rate", "eighty-eight")
            .unwrap_err();
        assert_eq!(err.field, "heart_rate");
        assert!(err.to_string().contains("heart_rate"));
    }

    #[test]
    fn text_edit_is_taken_verbatim() {
        let original = FieldValue::Text("old".into());
        let edited = original.from_edited_text("summary", "new text").unwrap();
        assert_eq!(edited, FieldValue::Text("new text".into()));
    }

    #[test]
    fn patient_deserializes_with_missing_fields() {
        let patient: Patient =
            serde_json::from_str(r#"{"name": "Jane Doe", "age": 52}"#).unwrap();
        assert_eq!(patient.name, "Jane Doe");
        assert_eq!(patient.age, 52);
        assert!(patient.history.is_empty());
    }

    #[test]
    fn envelope_status_check() {
        let env: Envelope<Vec<Patient>> =
            serde_json::from_str(r#"{"status": "success", "data": []}"#).unwrap();
        assert!(env.is_success());

        let env: Envelope<Vec<Patient>> =
            serde_json::from_str(r#"{"status": "error", "message": "nope"}"#).unwrap();
        assert!(!env.is_success());
    }
}
