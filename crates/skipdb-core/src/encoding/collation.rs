use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use super::key::IndexKey;

/// Database-wide ordering of index keys.
///
/// Fixed when the database file is created and stored in the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Collation {
    /// Compare strings by their lowercase form.
    #[serde(default)]
    pub ignore_case: bool,
}

impl Collation {
    pub fn ignore_case() -> Self {
        Self { ignore_case: true }
    }

    /// Total order over keys: type rank first, then value.
    pub fn compare(&self, a: &IndexKey, b: &IndexKey) -> Ordering {
        match (a, b) {
            (IndexKey::Int(x), IndexKey::Int(y)) => x.cmp(y),
            (IndexKey::Double(x), IndexKey::Double(y)) => compare_f64(*x, *y),
            (IndexKey::Int(x), IndexKey::Double(y)) => compare_int_f64(*x, *y),
            (IndexKey::Double(x), IndexKey::Int(y)) => compare_int_f64(*y, *x).reverse(),
            (IndexKey::String(x), IndexKey::String(y)) => self.compare_str(x, y),
            (IndexKey::Boolean(x), IndexKey::Boolean(y)) => x.cmp(y),
            (IndexKey::Binary(x), IndexKey::Binary(y)) => x.cmp(y),
            (IndexKey::Array(x), IndexKey::Array(y)) => {
                for (l, r) in x.iter().zip(y.iter()) {
                    let ord = self.compare(l, r);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                x.len().cmp(&y.len())
            }
            _ => a.type_rank().cmp(&b.type_rank()),
        }
    }

    pub fn equals(&self, a: &IndexKey, b: &IndexKey) -> bool {
        self.compare(a, b) == Ordering::Equal
    }

    fn compare_str(&self, a: &str, b: &str) -> Ordering {
        if self.ignore_case {
            a.chars()
                .flat_map(char::to_lowercase)
                .cmp(b.chars().flat_map(char::to_lowercase))
        } else {
            a.cmp(b)
        }
    }
}

/// Numeric order. `-0.0` equals `0.0`. JSON has no NaN, but a decoded NaN
/// still gets a place in the order.
fn compare_f64(x: f64, y: f64) -> Ordering {
    x.partial_cmp(&y).unwrap_or_else(|| x.total_cmp(&y))
}

/// Exact comparison of an integer with a double, without rounding the
/// integer through `f64`.
fn compare_int_f64(i: i64, f: f64) -> Ordering {
    // 2^63 as f64 is exact.
    const TWO_POW_63: f64 = 9_223_372_036_854_775_808.0;
    if f.is_nan() {
        return Ordering::Less;
    }
    if f >= TWO_POW_63 {
        return Ordering::Less;
    }
    if f < -TWO_POW_63 {
        return Ordering::Greater;
    }
    let whole = f.trunc();
    match i.cmp(&(whole as i64)) {
        Ordering::Equal => compare_f64(0.0, f - whole),
        ord => ord,
    }
}
