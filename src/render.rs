use rust_decimal::{Decimal, RoundingStrategy};

use crate::models::{IndexSnapshot, MarketDepth, Shape, StoneCounts};

const TOP_COMBINATIONS: usize = 10;

/// Fixed-point text with `digits` fraction digits. Exact ties round away from
/// zero; `{:.N}` would round them to even.
pub fn to_fixed(value: f64, digits: u32) -> String {
    let precision = digits as usize;
    match Decimal::from_f64_retain(value) {
        Some(decimal) => {
            let rounded =
                decimal.round_dp_with_strategy(digits, RoundingStrategy::MidpointAwayFromZero);
            format!("{rounded:.precision$}")
        }
        None => format!("{value:.precision$}"),
    }
}

/// Group digits in threes and keep at most three fraction digits, as an
/// en-US locale prints numbers.
pub fn format_number(value: f64) -> String {
    if !value.is_finite() {
        return value.to_string();
    }

    let text = to_fixed(value.abs(), 3);
    let (whole, fraction) = text.split_once('.').unwrap_or((text.as_str(), ""));
    let fraction = fraction.trim_end_matches('0');

    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, digit) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }

    let is_zero = fraction.is_empty() && whole.bytes().all(|b| b == b'0');
    let sign = if value < 0.0 && !is_zero { "-" } else { "" };
    if fraction.is_empty() {
        format!("{sign}{grouped}")
    } else {
        format!("{sign}{grouped}.{fraction}")
    }
}

pub struct PriceQuoteView<'a> {
    pub carat: f64,
    pub color: &'a str,
    pub clarity: &'a str,
    pub shape: Shape,
    pub per_carat: i64,
    pub total: f64,
}

pub fn price_quote_text(view: &PriceQuoteView<'_>) -> String {
    format!(
        "💎 **Diamond Price Quote**\n\n\
         **Specifications:**\n\
         • Carat: {carat}ct\n\
         • Color: {color}\n\
         • Clarity: {clarity}\n\
         • Shape: {shape}\n\n\
         **Pricing:**\n\
         • Per Carat: ${per_carat}\n\
         • Total Price: ${total}\n\n\
         *Prices from OpenFacet.net API*",
        carat = view.carat,
        color = view.color,
        clarity = view.clarity,
        shape = view.shape,
        per_carat = format_number(view.per_carat as f64),
        total = format_number(view.total),
    )
}

pub fn index_text(index: &IndexSnapshot) -> String {
    let icon = if index.trend > 0.0 {
        "📈"
    } else if index.trend < 0.0 {
        "📉"
    } else {
        "➡️"
    };
    let sign = if index.trend > 0.0 { "+" } else { "" };

    let basket = index
        .specs
        .iter()
        .map(|spec| {
            format!(
                "• {}ct {} {}: ${}/ct",
                spec.carat,
                spec.color,
                spec.clarity,
                format_number(spec.per_carat)
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "📊 **Diamond Composite Index (DCX)**\n\n\
         **Current Index:** ${dcx}/carat\n\
         **24h Change:** {icon} {sign}{trend}%\n\n\
         **Market Basket:**\n\
         {basket}\n\n\
         *Last Updated: {updated}*",
        dcx = format_number(index.dcx),
        trend = to_fixed(index.trend, 2),
        updated = index.ts.render(),
    )
}

pub fn depth_text(depth: &MarketDepth, carat: Option<f64>) -> String {
    let mut out = String::from("📈 **Diamond Market Depth**\n\n");

    match carat {
        Some(carat) => {
            out.push_str(&format!("**{carat}ct Diamonds:**\n\n"));
            let clarity = depth.clarity_at(carat);
            let color = depth.color_at(carat);

            if let Some(counts) = clarity {
                out.push_str("**By Clarity:**\n");
                push_ranked(&mut out, counts);
            }
            if let Some(counts) = color {
                out.push_str("\n**By Color:**\n");
                push_ranked(&mut out, counts);
            }
            if clarity.is_none() && color.is_none() {
                out.push_str(&format!("No inventory data for {carat}ct diamonds."));
            }
        }
        None => {
            let carats = depth.carats();
            let range = match (carats.first(), carats.last()) {
                (Some(low), Some(high)) => format!("{low}ct – {high}ct"),
                _ => "n/a".to_string(),
            };
            out.push_str(&format!(
                "**Available Carats:** {} options\nRange: {range}\n\n",
                carats.len()
            ));

            out.push_str(&format!(
                "**Top {TOP_COMBINATIONS} Color/Clarity Combinations:**\n"
            ));
            for (combo, count) in depth.colclar.ranked().into_iter().take(TOP_COMBINATIONS) {
                out.push_str(&format!("• {combo}: {} stones\n", format_number(count as f64)));
            }
        }
    }

    out.push_str(&format!("\n*Market snapshot: {}*", depth.ts.render()));
    out
}

fn push_ranked(out: &mut String, counts: &StoneCounts) {
    for (label, count) in counts.ranked() {
        out.push_str(&format!("• {label}: {} stones\n", format_number(count as f64)));
    }
}
