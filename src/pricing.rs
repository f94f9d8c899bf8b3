//! Per-carat price interpolation over a sampled log-price matrix.
//!
//! Prices are sampled only at [`BREAKPOINTS`]. Between two breakpoints the
//! log-price is interpolated linearly, which makes the price itself a geometric
//! blend of the two samples. Just below an [anchor threshold](ANCHOR_THRESHOLDS)
//! the price is nudged toward the next breakpoint so the jump buyers see at
//! round carat weights is smoothed instead of appearing as a cliff.

use thiserror::Error;

use crate::models::{carat_label, PriceMatrix};

pub const CARAT_MIN: f64 = 0.3;
pub const CARAT_MAX: f64 = 6.0;

pub const BREAKPOINTS: [f64; 12] = [0.3, 0.4, 0.5, 0.7, 0.9, 1.0, 1.5, 2.0, 3.0, 4.0, 5.0, 6.0];
pub const ANCHOR_THRESHOLDS: [f64; 9] = [0.3, 0.4, 0.5, 0.7, 0.9, 1.0, 1.5, 2.0, 3.0];

const GAMMA: f64 = 0.1;
const DELTA: f64 = 300.0;
/// Distance below an anchor (in carats) inside which the boost applies.
const ANCHOR_WINDOW: f64 = 0.03;
/// Share of the gap to the next breakpoint price the boost may cover.
const BOOST_CEILING: f64 = 0.8;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PricingError {
    #[error("Carat must be a number between 0.3 and 6.0")]
    CaratOutOfRange(f64),
    #[error("Invalid color: {0}")]
    InvalidColor(String),
    #[error("Invalid clarity: {0}")]
    InvalidClarity(String),
    #[error("Missing price data around {carat}ct: no {label}ct layer")]
    MissingBreakpoint { carat: f64, label: String },
    #[error("Price matrix cell {flat} is outside the {len}-entry {label}ct layer")]
    CellOutOfRange {
        flat: usize,
        len: usize,
        label: String,
    },
}

impl PricingError {
    /// True when the caller supplied bad input, false when the dataset is at fault.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::CaratOutOfRange(_) | Self::InvalidColor(_) | Self::InvalidClarity(_)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bracket {
    pub from: f64,
    pub to: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quote {
    pub bracket: Bracket,
    pub base: f64,
    pub boost: f64,
    pub per_carat: i64,
}

pub fn validate_carat(carat: f64) -> Result<f64, PricingError> {
    if !carat.is_finite() || !(CARAT_MIN..=CARAT_MAX).contains(&carat) {
        return Err(PricingError::CaratOutOfRange(carat));
    }
    Ok(carat)
}

/// Adjacent breakpoint pair with `from <= carat < to`, or the last pair when
/// the carat sits at or past the final breakpoint.
pub fn select_bracket(carat: f64) -> Bracket {
    BREAKPOINTS
        .windows(2)
        .find(|pair| carat >= pair[0] && carat < pair[1])
        .map(|pair| Bracket {
            from: pair[0],
            to: pair[1],
        })
        .unwrap_or(Bracket {
            from: BREAKPOINTS[BREAKPOINTS.len() - 2],
            to: BREAKPOINTS[BREAKPOINTS.len() - 1],
        })
}

/// Relative boost for a carat just under an anchor threshold.
///
/// Only the first anchor above `carat` within [`ANCHOR_WINDOW`] counts, and only
/// while the next breakpoint price exceeds `base`. The raw boost decays
/// exponentially with the distance to the anchor and is capped at 80% of the
/// remaining gap to `next`.
pub fn anchor_boost(carat: f64, base: f64, next: f64) -> f64 {
    ANCHOR_THRESHOLDS
        .iter()
        .map(|threshold| threshold - carat)
        .find(|&gap| gap > 0.0 && gap < ANCHOR_WINDOW && next > base)
        .map(|gap| {
            let raw = GAMMA * (-DELTA * gap).exp();
            let max_boost = (next / base - 1.0) * BOOST_CEILING;
            raw.min(max_boost)
        })
        .unwrap_or(0.0)
}

pub fn quote(
    carat: f64,
    matrix: &PriceMatrix,
    color_index: usize,
    clarity_index: usize,
) -> Result<Quote, PricingError> {
    let bracket = select_bracket(carat);
    let lower = layer(matrix, carat, bracket.from)?;
    let upper = layer(matrix, carat, bracket.to)?;

    let flat = color_index * matrix.shape().1 + clarity_index;
    let v1 = cell(lower, flat, bracket.from)?;
    let v2 = cell(upper, flat, bracket.to)?;

    let lambda = (carat - bracket.from) / (bracket.to - bracket.from);
    let base = ((1.0 - lambda) * v1 + lambda * v2).exp();
    let boost = anchor_boost(carat, base, v2.exp());

    Ok(Quote {
        bracket,
        base,
        boost,
        per_carat: (base * (1.0 + boost)).round() as i64,
    })
}

pub fn price_per_carat(
    carat: f64,
    matrix: &PriceMatrix,
    color: &str,
    clarity: &str,
) -> Result<i64, PricingError> {
    let carat = validate_carat(carat)?;
    let color_index = matrix
        .color_index(color)
        .ok_or_else(|| PricingError::InvalidColor(color.to_string()))?;
    let clarity_index = matrix
        .clarity_index(clarity)
        .ok_or_else(|| PricingError::InvalidClarity(clarity.to_string()))?;

    Ok(quote(carat, matrix, color_index, clarity_index)?.per_carat)
}

fn layer(matrix: &PriceMatrix, carat: f64, breakpoint: f64) -> Result<&[f64], PricingError> {
    matrix
        .layer(breakpoint)
        .ok_or_else(|| PricingError::MissingBreakpoint {
            carat,
            label: carat_label(breakpoint),
        })
}

fn cell(values: &[f64], flat: usize, breakpoint: f64) -> Result<f64, PricingError> {
    values
        .get(flat)
        .copied()
        .ok_or_else(|| PricingError::CellOutOfRange {
            flat,
            len: values.len(),
            label: carat_label(breakpoint),
        })
}
