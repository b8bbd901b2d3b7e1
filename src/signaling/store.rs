use crate::error::Result;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use tokio::sync::mpsc;

/// One top-level field operation of a document write.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldOp {
    /// Overwrite the field; `Value::Null` nulls it out.
    Set(Value),
    /// Append values not already present in the array field.
    ArrayUnion(Vec<Value>),
}

/// A partial document write. Merge patches touch only the listed fields;
/// replace patches drop every other field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocPatch {
    pub ops: BTreeMap<String, FieldOp>,
    pub replace: bool,
}

impl DocPatch {
    pub fn merge() -> Self {
        Self::default()
    }

    pub fn replace() -> Self {
        Self {
            ops: BTreeMap::new(),
            replace: true,
        }
    }

    pub fn set(mut self, field: &str, value: impl Serialize) -> Self {
        let value = serde_json::to_value(value).unwrap_or(Value::Null);
        self.ops.insert(field.to_owned(), FieldOp::Set(value));
        self
    }

    pub fn null(mut self, field: &str) -> Self {
        self.ops.insert(field.to_owned(), FieldOp::Set(Value::Null));
        self
    }

    pub fn append(mut self, field: &str, value: impl Serialize) -> Self {
        let value = serde_json::to_value(value).unwrap_or(Value::Null);
        match self.ops.get_mut(field) {
            Some(FieldOp::ArrayUnion(values)) => values.push(value),
            _ => {
                self.ops
                    .insert(field.to_owned(), FieldOp::ArrayUnion(vec![value]));
            }
        }
        self
    }

    /// Applies the patch to a document, creating it when missing.
    pub fn apply_to(&self, doc: Option<&Value>) -> Value {
        let mut fields = match (self.replace, doc) {
            (false, Some(Value::Object(existing))) => existing.clone(),
            _ => serde_json::Map::new(),
        };
        for (field, op) in &self.ops {
            match op {
                FieldOp::Set(value) => {
                    fields.insert(field.clone(), value.clone());
                }
                FieldOp::ArrayUnion(values) => {
                    let entry = fields
                        .entry(field.clone())
                        .or_insert_with(|| Value::Array(Vec::new()));
                    if !entry.is_array() {
                        *entry = Value::Array(Vec::new());
                    }
                    if let Value::Array(items) = entry {
                        for value in values {
                            if !items.contains(value) {
                                items.push(value.clone());
                            }
                        }
                    }
                }
            }
        }
        Value::Object(fields)
    }
}

/// Push-based listener on one document. The current snapshot is delivered
/// first, `None` meaning the document does not exist. Dropping the
/// subscription unsubscribes.
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<Option<Value>>,
}

impl Subscription {
    pub fn new(rx: mpsc::UnboundedReceiver<Option<Value>>) -> Self {
        Self { rx }
    }

    pub async fn next(&mut self) -> Option<Option<Value>> {
        self.rx.recv().await
    }
}

/// Remote, replicated document store used as the signaling mailbox.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Backend configured and caller authenticated.
    fn is_ready(&self) -> bool;

    async fn write(&self, key: &str, patch: DocPatch) -> Result<()>;

    async fn subscribe(&self, key: &str) -> Result<Subscription>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merge_keeps_untouched_fields() {
        let doc = json!({"status": "PENDING", "version": 1});
        let patched = DocPatch::merge().set("status", "OFFERED").apply_to(Some(&doc));
        assert_eq!(patched, json!({"status": "OFFERED", "version": 1}));
    }

    #[test]
    fn replace_drops_other_fields() {
        let doc = json!({"offer": {"type": "offer", "sdp": "x"}, "version": 1});
        let patched = DocPatch::replace().set("version", 2).apply_to(Some(&doc));
        assert_eq!(patched, json!({"version": 2}));
    }

    #[test]
    fn array_union_appends_without_duplicates() {
        let doc = json!({"offerCandidates": [{"candidate": "a"}]});
        let patched = DocPatch::merge()
            .append("offerCandidates", json!({"candidate": "a"}))
            .append("offerCandidates", json!({"candidate": "b"}))
            .apply_to(Some(&doc));
        assert_eq!(
            patched["offerCandidates"],
            json!([{"candidate": "a"}, {"candidate": "b"}])
        );
    }

    #[test]
    fn null_clears_a_field() {
        let doc = json!({"answer": {"type": "answer", "sdp": "x"}, "answerId": 4});
        let patched = DocPatch::merge().null("answer").null("answerId").apply_to(Some(&doc));
        assert_eq!(patched, json!({"answer": null, "answerId": null}));
    }
}
