//! Weighted variant registry: the polymorphic counterpart to
//! `ParseableModel.parse`/`WeightedModel.get_weight` in
//! `original_source/.../messages/base.py`.
//!
//! Variants are tried most-specific first. "Specific" is a weight computed
//! at registration time from hierarchy depth, required-field count, and a
//! literal-event bonus; the registry additionally enforces the invariant
//! spec.md §8 names: if variant A's required fields are a strict superset of
//! variant B's, A must outweigh B, so a more specific match is never shadowed
//! by a more general one that happens to validate first.

use std::path::Path;
use std::sync::Arc;

use serde_json::Value;

use crate::envelope::Envelope;
use crate::variant::{DynMessage, MessageVariant};

type TryParse = dyn Fn(&Value) -> Option<Box<dyn DynMessage>> + Send + Sync;

struct Entry {
    name: &'static str,
    weight: u32,
    required_fields: &'static [&'static str],
    try_parse: Arc<TryParse>,
}

/// Accepted raw forms a message can arrive in, mirroring the original's
/// `ACCEPTABLE_INPUT_TYPES = (dict, FilePath, str, bytes)`.
pub enum RawInput {
    Map(serde_json::Map<String, Value>),
    Json(String),
    Bytes(Vec<u8>),
    Path(std::path::PathBuf),
}

impl From<serde_json::Map<String, Value>> for RawInput {
    fn from(map: serde_json::Map<String, Value>) -> Self {
        RawInput::Map(map)
    }
}

impl From<String> for RawInput {
    fn from(json: String) -> Self {
        RawInput::Json(json)
    }
}

impl From<&str> for RawInput {
    fn from(json: &str) -> Self {
        RawInput::Json(json.to_string())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("failed to read message contents from path {0:?}: {1}")]
    Io(std::path::PathBuf, #[source] std::io::Error),
    #[error("message payload is not valid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),
    #[error("message payload must be a JSON object, got {0}")]
    NotAnObject(&'static str),
}

impl RawInput {
    fn into_value(self) -> Result<Value, ParseError> {
        let value = match self {
            RawInput::Map(map) => Value::Object(map),
            RawInput::Json(text) => {
                serde_json::from_str(&text).map_err(ParseError::InvalidJson)?
            }
            RawInput::Bytes(bytes) => {
                serde_json::from_slice(&bytes).map_err(ParseError::InvalidJson)?
            }
            RawInput::Path(path) => {
                let text = std::fs::read_to_string(&path)
                    .map_err(|e| ParseError::Io(path.clone(), e))?;
                serde_json::from_str(&text).map_err(ParseError::InvalidJson)?
            }
        };

        if !value.is_object() {
            return Err(ParseError::NotAnObject(json_type_name(&value)));
        }

        Ok(value)
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Registry of variants, sorted most-specific-first once [`Registry::build`]
/// has run the weight-propagation pass.
pub struct Registry {
    entries: Vec<Entry>,
    sorted: bool,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Registry {
            entries: Vec::new(),
            sorted: false,
        }
    }

    /// Register a concrete [`MessageVariant`]. Parsing attempts feed the raw
    /// JSON value to `serde_json::from_value`; `serde`'s own
    /// required-field/type checks double as this variant's match test,
    /// matching the original's reliance on pydantic validation failures to
    /// reject a non-matching shape.
    pub fn register<T>(&mut self)
    where
        T: MessageVariant + std::fmt::Debug + Send + Sync + Clone + 'static,
    {
        self.entries.push(Entry {
            name: std::any::type_name::<T>(),
            weight: T::base_weight(),
            required_fields: T::required_fields(),
            try_parse: Arc::new(|value: &Value| -> Option<Box<dyn DynMessage>> {
                if let Some(literal) = T::LITERAL_EVENT {
                    if value.get("event").and_then(Value::as_str) != Some(literal) {
                        return None;
                    }
                }
                serde_json::from_value::<T>(value.clone())
                    .ok()
                    .map(|variant| Box::new(variant) as Box<dyn DynMessage>)
            }),
        });
        self.sorted = false;
    }

    /// Enforce "superset-required-fields implies strictly greater weight"
    /// across every registered pair, then sort descending by weight. Runs a
    /// fixpoint pass since bumping one entry's weight can, in principle,
    /// invalidate an ordering against a third entry.
    fn build(&mut self) {
        if self.sorted {
            return;
        }

        let mut changed = true;
        let mut iterations = 0;
        while changed && iterations < self.entries.len() + 1 {
            changed = false;
            iterations += 1;

            for i in 0..self.entries.len() {
                for j in 0..self.entries.len() {
                    if i == j {
                        continue;
                    }
                    let (a_fields, a_weight) = (self.entries[i].required_fields, self.entries[i].weight);
                    let (b_fields, b_weight) = (self.entries[j].required_fields, self.entries[j].weight);

                    if is_strict_superset(a_fields, b_fields) && a_weight <= b_weight {
                        self.entries[i].weight = b_weight + 1;
                        changed = true;
                    }
                }
            }
        }

        self.entries.sort_by(|a, b| b.weight.cmp(&a.weight));
        self.sorted = true;
    }

    /// Parse `raw` against every registered variant, most specific first,
    /// falling back to the base [`Envelope`] when nothing more specific
    /// matches.
    pub fn parse(&mut self, raw: impl Into<RawInput>) -> Result<Box<dyn DynMessage>, ParseError> {
        self.build();

        let value = raw.into().into_value()?;

        for entry in &self.entries {
            if let Some(message) = (entry.try_parse)(&value) {
                tracing::trace!(variant = entry.name, weight = entry.weight, "matched variant");
                return Ok(message);
            }
        }

        let envelope: Envelope = serde_json::from_value(value).map_err(ParseError::InvalidJson)?;
        Ok(Box::new(envelope))
    }

    pub fn parse_path(&mut self, path: impl AsRef<Path>) -> Result<Box<dyn DynMessage>, ParseError> {
        self.parse(RawInput::Path(path.as_ref().to_path_buf()))
    }

    /// Weights in registration order, for tests and diagnostics.
    pub fn weights(&mut self) -> Vec<(&'static str, u32)> {
        self.build();
        self.entries.iter().map(|e| (e.name, e.weight)).collect()
    }
}

fn is_strict_superset(a: &[&'static str], b: &[&'static str]) -> bool {
    b.iter().all(|field| a.contains(field)) && a.len() > b.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::GenericMessage;

    #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
    struct ValueEvent {
        #[serde(flatten)]
        envelope: Envelope,
        example_body_value: i64,
    }

    impl MessageVariant for ValueEvent {
        const DEPTH: u32 = 3;
        fn required_fields() -> &'static [&'static str] {
            &["example_body_value"]
        }
        fn envelope(&self) -> &Envelope {
            &self.envelope
        }
        fn envelope_mut(&mut self) -> &mut Envelope {
            &mut self.envelope
        }
    }

    #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
    struct ExampleEvent {
        #[serde(flatten)]
        envelope: Envelope,
        example_data: String,
    }

    impl MessageVariant for ExampleEvent {
        const DEPTH: u32 = 3;
        fn required_fields() -> &'static [&'static str] {
            &["example_data"]
        }
        fn envelope(&self) -> &Envelope {
            &self.envelope
        }
        fn envelope_mut(&mut self) -> &mut Envelope {
            &mut self.envelope
        }
    }

    fn registry() -> Registry {
        let mut registry = Registry::new();
        registry.register::<GenericMessage>();
        registry.register::<ValueEvent>();
        registry.register::<ExampleEvent>();
        registry
    }

    #[test]
    fn most_specific_variant_wins() {
        let mut registry = registry();
        let parsed = registry
            .parse(serde_json::json!({"event": "value", "example_body_value": 7}))
            .expect("parses");
        assert_eq!(parsed.variant_name(), std::any::type_name::<ValueEvent>());
    }

    #[test]
    fn falls_back_to_base_envelope() {
        let mut registry = registry();
        let parsed = registry
            .parse(serde_json::json!({"event": "plain"}))
            .expect("parses");
        assert_eq!(parsed.variant_name(), std::any::type_name::<Envelope>());
    }

    #[test]
    fn superset_required_fields_outweighs_subset() {
        #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
        struct Superset {
            #[serde(flatten)]
            envelope: Envelope,
            example_body_value: i64,
            extra_required: String,
        }

        impl MessageVariant for Superset {
            const DEPTH: u32 = 3;
            fn required_fields() -> &'static [&'static str] {
                &["example_body_value", "extra_required"]
            }
            fn envelope(&self) -> &Envelope {
                &self.envelope
            }
            fn envelope_mut(&mut self) -> &mut Envelope {
                &mut self.envelope
            }
        }

        let mut registry = Registry::new();
        registry.register::<ValueEvent>();
        registry.register::<Superset>();

        let weights = registry.weights();
        let value_weight = weights
            .iter()
            .find(|(name, _)| *name == std::any::type_name::<ValueEvent>())
            .unwrap()
            .1;
        let superset_weight = weights
            .iter()
            .find(|(name, _)| *name == std::any::type_name::<Superset>())
            .unwrap()
            .1;
        assert!(superset_weight > value_weight);
    }
}
