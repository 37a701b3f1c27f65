//! Extract named fields from a model completion.
//!
//! The prompt asks the model to answer with a fenced JSON block; [`parse`]
//! pulls that block out and returns each declared field as text.
//!
//! [`parse`]: StructuredOutputParser::parse

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

pub const ENVELOPE_START: &str = "```json";
pub const ENVELOPE_END: &str = "```";

static ENVELOPE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```json\s*(.*?)\s*```").unwrap());

#[derive(Debug, thiserror::Error)]
pub enum OutputParseError {
    #[error("malformed output: {reason}")]
    MalformedOutput { reason: String, output: String },

    #[error("invalid JSON inside output envelope: {0}")]
    Json(#[from] serde_json::Error),

    #[error("output is missing required fields: {}", .missing.join(", "))]
    SchemaMismatch { missing: Vec<String> },
}

/// One named field the model must return.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseSchema {
    pub name: String,
    pub description: String,
    #[serde(default = "default_type_name")]
    pub type_name: String,
}

fn default_type_name() -> String {
    "string".into()
}

impl ResponseSchema {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            type_name: default_type_name(),
        }
    }

    /// Type hint shown to the model. Parsing still returns text.
    #[must_use]
    pub fn with_type(mut self, type_name: impl Into<String>) -> Self {
        self.type_name = type_name.into();
        self
    }
}

#[derive(Debug, Clone)]
pub struct StructuredOutputParser {
    schemas: Vec<ResponseSchema>,
}

impl StructuredOutputParser {
    #[must_use]
    pub fn new(schemas: Vec<ResponseSchema>) -> Self {
        Self { schemas }
    }

    #[must_use]
    pub fn schemas(&self) -> &[ResponseSchema] {
        &self.schemas
    }

    /// Instruction block to embed in the prompt.
    #[must_use]
    pub fn format_instructions(&self) -> String {
        let mut out = String::from(
            "The output should be a markdown code snippet formatted in the following schema, \
             including the leading and trailing \"```json\" and \"```\":\n\n",
        );
        out.push_str(ENVELOPE_START);
        out.push_str("\n{\n");
        for s in &self.schemas {
            let _ = writeln!(out, "\t\"{}\": {}  // {}", s.name, s.type_name, s.description);
        }
        out.push_str("}\n");
        out.push_str(ENVELOPE_END);
        out
    }

    /// Parse a completion into `field name -> text value`.
    ///
    /// Only declared fields are returned. Non-string JSON values are returned in
    /// their JSON text form, `null` as an empty string.
    ///
    /// # Errors
    ///
    /// Returns [`OutputParseError::MalformedOutput`] when the envelope is absent or
    /// does not hold a JSON object, [`OutputParseError::Json`] when its content is
    /// not valid JSON, and [`OutputParseError::SchemaMismatch`] naming every
    /// declared field the object lacks.
    pub fn parse(&self, raw: &str) -> Result<BTreeMap<String, String>, OutputParseError> {
        let Some(captures) = ENVELOPE_RE.captures(raw) else {
            return Err(OutputParseError::MalformedOutput {
                reason: "no ```json fenced block found".into(),
                output: raw.to_owned(),
            });
        };
        let body = captures.get(1).map_or("", |m| m.as_str());
        let value: serde_json::Value = serde_json::from_str(body)?;
        let serde_json::Value::Object(mut object) = value else {
            return Err(OutputParseError::MalformedOutput {
                reason: "fenced block is not a JSON object".into(),
                output: raw.to_owned(),
            });
        };

        let missing: Vec<String> = self
            .schemas
            .iter()
            .filter(|s| !object.contains_key(&s.name))
            .map(|s| s.name.clone())
            .collect();
        if !missing.is_empty() {
            return Err(OutputParseError::SchemaMismatch { missing });
        }

        let mut out = BTreeMap::new();
        for s in &self.schemas {
            let text = match object.remove(&s.name) {
                Some(serde_json::Value::String(v)) => v,
                Some(serde_json::Value::Null) | None => String::new(),
                Some(other) => other.to_string(),
            };
            out.insert(s.name.clone(), text);
        }
        Ok(out)
    }
}
