use std::{collections::HashMap, fmt, marker::PhantomData};

use chrono::{DateTime, TimeZone, Utc};
use serde::{
    de::{MapAccess, Visitor},
    Deserialize, Deserializer,
};
use serde_json::Value;
use thiserror::Error;

use crate::render::to_fixed;

/// Tolerance used when matching a numeric breakpoint against a parsed layer label.
const LABEL_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Shape {
    #[default]
    Round,
    Cushion,
}

impl Shape {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "round" => Some(Self::Round),
            "cushion" => Some(Self::Cushion),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Round => "round",
            Self::Cushion => "cushion",
        }
    }

    pub fn cache_key(&self) -> &'static str {
        match self {
            Self::Round => "matrix_round",
            Self::Cushion => "matrix_cushion",
        }
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fixed one-decimal label used by the upstream datasets for carat keys.
pub fn carat_label(carat: f64) -> String {
    to_fixed(carat, 1)
}

#[derive(Debug, Error)]
pub enum MatrixError {
    #[error("malformed matrix document: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("declared shape {declared:?} does not match {rows} colors x {columns} clarities")]
    ShapeMismatch {
        declared: (usize, usize),
        rows: usize,
        columns: usize,
    },
    #[error("layer {label} has {actual} entries, expected {expected}")]
    LayerLength {
        label: String,
        expected: usize,
        actual: usize,
    },
    #[error("layer label {0:?} is not a carat value")]
    BadLabel(String),
}

/// Upstream wire form of a price matrix.
#[derive(Debug, Clone, Deserialize)]
struct RawPriceMatrix {
    r: Vec<String>,
    c: Vec<String>,
    l: HashMap<String, Vec<f64>>,
    s: (usize, usize),
}

/// Natural-log prices sampled at carat breakpoints, one row-major color x clarity
/// vector per breakpoint.
#[derive(Debug, Clone)]
pub struct PriceMatrix {
    rows: Vec<String>,
    columns: Vec<String>,
    layers: Vec<(f64, Vec<f64>)>,
    shape: (usize, usize),
}

impl PriceMatrix {
    pub fn from_value(value: Value) -> Result<Self, MatrixError> {
        let raw: RawPriceMatrix = serde_json::from_value(value)?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawPriceMatrix) -> Result<Self, MatrixError> {
        if raw.s != (raw.r.len(), raw.c.len()) {
            return Err(MatrixError::ShapeMismatch {
                declared: raw.s,
                rows: raw.r.len(),
                columns: raw.c.len(),
            });
        }

        let expected = raw.s.0 * raw.s.1;
        let mut layers = Vec::with_capacity(raw.l.len());
        for (label, values) in raw.l {
            let breakpoint = label
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| MatrixError::BadLabel(label.clone()))?;
            if values.len() != expected {
                return Err(MatrixError::LayerLength {
                    label,
                    expected,
                    actual: values.len(),
                });
            }
            layers.push((breakpoint, values));
        }
        layers.sort_by(|a, b| a.0.total_cmp(&b.0));

        Ok(Self {
            rows: raw.r,
            columns: raw.c,
            layers,
            shape: raw.s,
        })
    }

    pub fn shape(&self) -> (usize, usize) {
        self.shape
    }

    pub fn color_index(&self, color: &str) -> Option<usize> {
        self.rows.iter().position(|c| c == color)
    }

    pub fn clarity_index(&self, clarity: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == clarity)
    }

    pub fn layer(&self, breakpoint: f64) -> Option<&[f64]> {
        self.layers
            .iter()
            .find(|(value, _)| (value - breakpoint).abs() < LABEL_TOLERANCE)
            .map(|(_, values)| values.as_slice())
    }
}

/// Snapshot timestamp as sent upstream: epoch milliseconds or an RFC 3339 string.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct SnapshotTime(Value);

impl SnapshotTime {
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        match &self.0 {
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().map(|v| v.round() as i64))
                .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
            Value::String(s) => DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.with_timezone(&Utc)),
            _ => None,
        }
    }

    pub fn render(&self) -> String {
        match self.to_datetime() {
            Some(dt) => dt.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
            None => match &self.0 {
                Value::String(s) => s.clone(),
                Value::Null => "unknown".to_string(),
                other => other.to_string(),
            },
        }
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BasketSpec {
    pub carat: f64,
    pub color: String,
    pub clarity: String,
    pub per_carat: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IndexSnapshot {
    pub dcx: f64,
    pub trend: f64,
    pub ts: SnapshotTime,
    #[serde(default)]
    pub specs: Vec<BasketSpec>,
}

/// JSON object decoded with its upstream key order preserved.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderedMap<V>(Vec<(String, V)>);

impl<V> Default for OrderedMap<V> {
    fn default() -> Self {
        Self(Vec::new())
    }
}

impl<V> OrderedMap<V> {
    pub fn get(&self, key: &str) -> Option<&V> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'de, V: Deserialize<'de>> Deserialize<'de> for OrderedMap<V> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct OrderedVisitor<V>(PhantomData<V>);

        impl<'de, V: Deserialize<'de>> Visitor<'de> for OrderedVisitor<V> {
            type Value = OrderedMap<V>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a JSON object")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((key, value)) = access.next_entry::<String, V>()? {
                    match entries.iter_mut().find(|entry: &&mut (String, V)| entry.0 == key) {
                        Some(slot) => slot.1 = value,
                        None => entries.push((key, value)),
                    }
                }
                Ok(OrderedMap(entries))
            }
        }

        deserializer.deserialize_map(OrderedVisitor(PhantomData))
    }
}

pub type StoneCounts = OrderedMap<u64>;

impl StoneCounts {
    /// Entries by count descending; equal counts keep upstream order.
    pub fn ranked(&self) -> Vec<(&str, u64)> {
        let mut ranked: Vec<(&str, u64)> = self.iter().map(|(k, v)| (k, *v)).collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1));
        ranked
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarketDepth {
    pub ts: SnapshotTime,
    #[serde(default)]
    pub clarity: OrderedMap<StoneCounts>,
    #[serde(default)]
    pub color: OrderedMap<StoneCounts>,
    #[serde(default)]
    pub colclar: StoneCounts,
}

impl MarketDepth {
    pub fn clarity_at(&self, carat: f64) -> Option<&StoneCounts> {
        self.clarity
            .get(&carat_label(carat))
            .filter(|counts| !counts.is_empty())
    }

    pub fn color_at(&self, carat: f64) -> Option<&StoneCounts> {
        self.color
            .get(&carat_label(carat))
            .filter(|counts| !counts.is_empty())
    }

    /// Carat values covered by the clarity breakdown, ascending.
    pub fn carats(&self) -> Vec<f64> {
        let mut carats: Vec<f64> = self
            .clarity
            .keys()
            .filter_map(|k| k.trim().parse::<f64>().ok())
            .filter(|v| v.is_finite())
            .collect();
        carats.sort_by(f64::total_cmp);
        carats
    }
}
