//! The variant trait hierarchy that lets [`crate::registry`] treat built-in
//! control messages and operator-defined payloads uniformly.
//!
//! Grounded on `original_source/.../messages/base.py`'s `WeightedModel` +
//! `Message` pair: a `WeightedModel` contributes a weight derived from its
//! field shape, and a `Message` additionally behaves like a read/write dict
//! over its declared-plus-extra fields. Rust has no runtime MRO, so the
//! "depth in the class hierarchy" term of the Python weight formula becomes
//! an explicit associated constant each variant supplies at the call site.

use crate::envelope::Envelope;

/// A concrete, staticaly-typed message shape that can be registered with a
/// [`crate::registry::Registry`].
///
/// `DEPTH` stands in for `len(inspect.getmro(cls))` in the original: the
/// conceptual distance from the base `Envelope`. A direct specialization of
/// `Envelope` uses `DEPTH = 2` (envelope + self); a specialization of a
/// specialization uses `DEPTH = 3`, and so on.
pub trait MessageVariant: Sized + serde::Serialize + serde::de::DeserializeOwned + Clone {
    /// Distance from the base envelope in the conceptual variant hierarchy.
    const DEPTH: u32 = 2;

    /// When `Some`, this variant's `event` field is a fixed literal rather
    /// than an open `String`, earning the `EVENT_LITERAL_ADJUSTER` (100)
    /// weight bonus the original awards to classes with a `Literal` event
    /// annotation.
    const LITERAL_EVENT: Option<&'static str> = None;

    /// Field names (besides `event`) that must be present for a JSON value
    /// to be considered a match for this variant. Used both for weight
    /// computation and, indirectly, by `serde`'s own required-field
    /// enforcement during `parse`.
    fn required_fields() -> &'static [&'static str];

    /// This variant's own fields, required or optional, beyond the embedded
    /// [`Envelope`] — e.g. `GenericMessage`'s `data` or `TrimMessage`'s
    /// `count`. Extends [`DynMessage`]'s dict interface (spec.md §4.5) past
    /// the envelope's declared-plus-extra union so a parsed variant's own
    /// fields are reachable through `get`/`keys`/`items` too.
    fn declared_fields() -> &'static [&'static str] {
        &[]
    }

    fn envelope(&self) -> &Envelope;
    fn envelope_mut(&mut self) -> &mut Envelope;

    /// The weight contributed by `event` being a fixed literal instead of an
    /// open string, per `_adjust_weight_for_literal_event`.
    fn literal_event_bonus() -> u32 {
        if Self::LITERAL_EVENT.is_some() {
            100
        } else {
            0
        }
    }

    /// Total registration-time weight: depth + one point per required field
    /// + the literal-event bonus. Sub-record recursion (the Python version's
    /// `field.type_.get_weight()` branch) does not apply here since this
    /// port's variants flatten their own envelope rather than nesting a
    /// `WeightedModel` field, so every required field contributes a flat 1.
    fn base_weight() -> u32 {
        Self::DEPTH + Self::required_fields().len() as u32 + Self::literal_event_bonus()
    }
}

/// Type-erased handle to any [`MessageVariant`], used by the registry to
/// hold heterogeneous parsed messages behind one pointer.
pub trait DynMessage: std::fmt::Debug + Send + Sync {
    fn envelope(&self) -> &Envelope;
    fn envelope_mut(&mut self) -> &mut Envelope;
    fn variant_name(&self) -> &'static str;
    fn to_value(&self) -> serde_json::Value;
    fn clone_dyn(&self) -> Box<dyn DynMessage>;

    /// This variant's own declared field names beyond the envelope, in
    /// declaration order. See [`MessageVariant::declared_fields`].
    fn variant_fields(&self) -> &'static [&'static str] {
        &[]
    }

    /// Look up `key` across the envelope's declared-plus-extra union, then
    /// this variant's own declared fields — the full dict interface
    /// spec.md §4.5 describes, e.g. `message.get("data")` on a parsed
    /// `GenericMessage`.
    fn get(&self, key: &str) -> Option<serde_json::Value> {
        if let Some(value) = self.envelope().get(key) {
            return Some(value);
        }
        if self.variant_fields().contains(&key) {
            return self.to_value().get(key).cloned();
        }
        None
    }

    /// Key names in declared(envelope)-then-declared(variant)-then-extra
    /// order.
    fn keys(&self) -> Vec<String> {
        let mut keys = self.envelope().keys();
        keys.extend(self.variant_fields().iter().map(|s| s.to_string()));
        keys
    }

    fn values(&self) -> Vec<serde_json::Value> {
        self.keys()
            .into_iter()
            .filter_map(|k| self.get(&k))
            .collect()
    }

    fn items(&self) -> Vec<(String, serde_json::Value)> {
        self.keys()
            .into_iter()
            .filter_map(|k| self.get(&k).map(|v| (k.clone(), v)))
            .collect()
    }

    /// Integer indexing into the same union, per spec.md §4.5.
    fn nth(&self, index: usize) -> Option<(String, serde_json::Value)> {
        self.items().into_iter().nth(index)
    }
}

impl Clone for Box<dyn DynMessage> {
    fn clone(&self) -> Self {
        self.clone_dyn()
    }
}

/// Blanket impl so every registered [`MessageVariant`] automatically
/// satisfies [`DynMessage`] without hand-written boilerplate per variant.
impl<T> DynMessage for T
where
    T: MessageVariant + std::fmt::Debug + Send + Sync + 'static,
{
    fn envelope(&self) -> &Envelope {
        MessageVariant::envelope(self)
    }

    fn envelope_mut(&mut self) -> &mut Envelope {
        MessageVariant::envelope_mut(self)
    }

    fn variant_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).expect("registered variants always serialize")
    }

    fn clone_dyn(&self) -> Box<dyn DynMessage> {
        Box::new(self.clone())
    }

    fn variant_fields(&self) -> &'static [&'static str] {
        T::declared_fields()
    }
}
