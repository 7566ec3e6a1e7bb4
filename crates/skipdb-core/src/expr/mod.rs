//! Key expressions: which values of a document an index stores.
//!
//! Syntax:
//! - `$` is the whole document, `$.a.b` a nested field (`a.b` for short)
//! - `$.tags[*]` yields every element of an array, `$.tags[0]` one element
//! - `LOWER(e)` and `UPPER(e)` transform strings
//! - `[e1, e2]` builds a compound key
//! - `NOW()` and `RANDOM()` yield volatile values and cannot be indexed

mod parser;

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::Value;
use xxhash_rust::xxh64::xxh64;

use crate::encoding::{Collation, IndexKey};
use crate::error::{EncodingError, ExpressionError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathStep {
    Field(String),
    Items,
    Position(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyExpr {
    Root,
    Path(Vec<PathStep>),
    Lower(Box<KeyExpr>),
    Upper(Box<KeyExpr>),
    Compound(Vec<KeyExpr>),
    Now,
    Random,
}

/// Parse expression source text.
pub fn parse(source: &str) -> Result<KeyExpr, ExpressionError> {
    parser::Parser::new(source).parse()
}

static RANDOM_COUNTER: AtomicU64 = AtomicU64::new(0);

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn random_unit() -> f64 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    let seq = RANDOM_COUNTER.fetch_add(1, Ordering::Relaxed);
    let bits = xxh64(&nanos.to_le_bytes(), seq);
    (bits >> 11) as f64 / (1u64 << 53) as f64
}

impl KeyExpr {
    /// False when the expression depends on the whole document or on
    /// anything other than the document.
    pub fn is_indexable(&self) -> bool {
        match self {
            KeyExpr::Root | KeyExpr::Now | KeyExpr::Random => false,
            KeyExpr::Path(_) => true,
            KeyExpr::Lower(inner) | KeyExpr::Upper(inner) => inner.is_indexable(),
            KeyExpr::Compound(items) => items.iter().all(KeyExpr::is_indexable),
        }
    }

    /// Top-level document fields the expression reads. Empty means the whole
    /// document is needed.
    pub fn fields(&self) -> Vec<String> {
        let mut fields = Vec::new();
        if self.collect_fields(&mut fields) {
            fields
        } else {
            Vec::new()
        }
    }

    /// Returns false if the whole document is needed.
    fn collect_fields(&self, out: &mut Vec<String>) -> bool {
        match self {
            KeyExpr::Root => false,
            KeyExpr::Now | KeyExpr::Random => true,
            KeyExpr::Path(steps) => match steps.first() {
                Some(PathStep::Field(name)) => {
                    if !out.contains(name) {
                        out.push(name.clone());
                    }
                    true
                }
                _ => false,
            },
            KeyExpr::Lower(inner) | KeyExpr::Upper(inner) => inner.collect_fields(out),
            KeyExpr::Compound(items) => items.iter().all(|item| item.collect_fields(out)),
        }
    }

    /// Values the expression yields for `doc`, before key conversion.
    pub fn evaluate(&self, doc: &Value) -> Vec<Value> {
        match self {
            KeyExpr::Root => vec![doc.clone()],
            KeyExpr::Path(steps) => {
                let mut current = vec![doc];
                let mut multi = false;
                for step in steps {
                    current = match step {
                        PathStep::Field(name) => current.iter().filter_map(|v| v.get(name)).collect(),
                        PathStep::Position(at) => current.iter().filter_map(|v| v.get(*at)).collect(),
                        PathStep::Items => {
                            multi = true;
                            current
                                .iter()
                                .filter_map(|v| v.as_array())
                                .flat_map(|items| items.iter())
                                .collect()
                        }
                    };
                }
                if current.is_empty() && !multi {
                    vec![Value::Null]
                } else {
                    current.into_iter().cloned().collect()
                }
            }
            KeyExpr::Lower(inner) => inner
                .evaluate(doc)
                .into_iter()
                .map(|v| match v {
                    Value::String(s) => Value::String(s.to_lowercase()),
                    other => other,
                })
                .collect(),
            KeyExpr::Upper(inner) => inner
                .evaluate(doc)
                .into_iter()
                .map(|v| match v {
                    Value::String(s) => Value::String(s.to_uppercase()),
                    other => other,
                })
                .collect(),
            KeyExpr::Compound(items) => {
                let parts = items
                    .iter()
                    .map(|item| {
                        let mut values = item.evaluate(doc);
                        match values.len() {
                            0 => Value::Null,
                            1 => values.remove(0),
                            _ => Value::Array(values),
                        }
                    })
                    .collect();
                vec![Value::Array(parts)]
            }
            KeyExpr::Now => vec![Value::from(now_millis())],
            KeyExpr::Random => vec![Value::from(random_unit())],
        }
    }

    /// Index keys for `doc`, de-duplicated under `collation` in emission order.
    pub fn evaluate_keys(
        &self,
        doc: &Value,
        collation: Collation,
    ) -> Result<Vec<IndexKey>, EncodingError> {
        let mut keys: Vec<IndexKey> = Vec::new();
        for value in self.evaluate(doc) {
            let key = IndexKey::from_json(&value)?;
            if !keys.iter().any(|k| collation.equals(k, &key)) {
                keys.push(key);
            }
        }
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn keys(source: &str, doc: &Value) -> Vec<IndexKey> {
        parse(source)
            .unwrap()
            .evaluate_keys(doc, Collation::default())
            .unwrap()
    }

    fn s(v: &str) -> IndexKey {
        IndexKey::String(v.to_string())
    }

    #[test]
    fn test_parse_forms() {
        assert_eq!(parse("$").unwrap(), KeyExpr::Root);
        assert_eq!(
            parse("$.a.b").unwrap(),
            KeyExpr::Path(vec![PathStep::Field("a".into()), PathStep::Field("b".into())])
        );
        assert_eq!(parse("a.b").unwrap(), parse("$.a.b").unwrap());
        assert_eq!(
            parse(" lower( $.name ) ").unwrap(),
            KeyExpr::Lower(Box::new(KeyExpr::Path(vec![PathStep::Field("name".into())])))
        );
        assert_eq!(
            parse("[$.a, $.tags[*]]").unwrap(),
            KeyExpr::Compound(vec![
                KeyExpr::Path(vec![PathStep::Field("a".into())]),
                KeyExpr::Path(vec![PathStep::Field("tags".into()), PathStep::Items]),
            ])
        );
        assert_eq!(parse("NOW()").unwrap(), KeyExpr::Now);
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(parse("   "), Err(ExpressionError::Empty)));
        assert!(matches!(
            parse("FOO($.a)"),
            Err(ExpressionError::UnknownFunction(name)) if name == "FOO"
        ));
        assert!(matches!(
            parse("$.a b"),
            Err(ExpressionError::Unexpected { position: 4, .. })
        ));
        assert!(parse("$.").is_err());
        assert!(parse("[$.a,").is_err());
        assert!(parse("LOWER($.a").is_err());
        assert!(parse("$.a[x]").is_err());
    }

    #[test]
    fn test_indexable() {
        assert!(parse("$.a").unwrap().is_indexable());
        assert!(parse("UPPER([$.a, $.b])").unwrap().is_indexable());
        assert!(!parse("$").unwrap().is_indexable());
        assert!(!parse("[$.a, NOW()]").unwrap().is_indexable());
        assert!(!parse("LOWER(RANDOM())").unwrap().is_indexable());
    }

    #[test]
    fn test_fields() {
        assert_eq!(parse("$.a.b").unwrap().fields(), vec!["a".to_string()]);
        assert_eq!(
            parse("[$.b, LOWER($.a), $.b]").unwrap().fields(),
            vec!["b".to_string(), "a".to_string()]
        );
        assert!(parse("$").unwrap().fields().is_empty());
    }

    #[test]
    fn test_missing_scalar_yields_null() {
        assert_eq!(keys("$.missing", &json!({"a": 1})), vec![IndexKey::Null]);
        assert_eq!(keys("$.a.b", &json!({"a": 5})), vec![IndexKey::Null]);
    }

    #[test]
    fn test_items_expand_and_dedupe() {
        let doc = json!({"tags": ["x", "y", "x", "Y"]});
        assert_eq!(keys("$.tags[*]", &doc), vec![s("x"), s("y"), s("Y")]);
        assert_eq!(
            parse("$.tags[*]")
                .unwrap()
                .evaluate_keys(&doc, Collation::ignore_case())
                .unwrap(),
            vec![s("x"), s("y")]
        );
        assert_eq!(keys("LOWER($.tags[*])", &doc), vec![s("x"), s("y")]);
        assert!(keys("$.tags[*]", &json!({"tags": "solo"})).is_empty());
        assert!(keys("$.tags[*]", &json!({})).is_empty());
        assert_eq!(keys("$.tags[1]", &doc), vec![s("y")]);
    }

    #[test]
    fn test_compound_key() {
        let doc = json!({"last": "Doe", "first": "Jane"});
        assert_eq!(
            keys("[$.last, $.first, $.middle]", &doc),
            vec![IndexKey::Array(vec![s("Doe"), s("Jane"), IndexKey::Null])]
        );
    }

    #[test]
    fn test_object_value_is_not_a_key() {
        let expr = parse("$.address").unwrap();
        let err = expr
            .evaluate_keys(&json!({"address": {"city": "Oslo"}}), Collation::default())
            .unwrap_err();
        assert!(matches!(err, EncodingError::UnsupportedKeyType("object")));
    }

    #[test]
    fn test_volatile_functions_evaluate() {
        let now = parse("NOW()").unwrap().evaluate(&json!({}));
        assert!(now[0].as_u64().unwrap() > 0);
        let r = parse("RANDOM()").unwrap().evaluate(&json!({}));
        let v = r[0].as_f64().unwrap();
        assert!((0.0..1.0).contains(&v));
    }
}
