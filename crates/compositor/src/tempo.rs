//! Audio tempo chains
//!
//! `atempo` only accepts factors in `[0.5, 2.0]`, so larger or smaller speed
//! changes are decomposed into several chained stages.

pub const MIN_TEMPO: f64 = 0.5;
pub const MAX_TEMPO: f64 = 2.0;

/// Decompose `multiplier` into stage factors whose product is `multiplier`.
///
/// Non-finite or non-positive input yields a single neutral stage; callers
/// reject such factors before they get here.
pub fn build_tempo_chain(multiplier: f64) -> Vec<f64> {
    if !multiplier.is_finite() || multiplier <= 0.0 {
        return vec![1.0];
    }

    let mut stages = Vec::new();
    let mut remaining = multiplier;

    while remaining > MAX_TEMPO {
        stages.push(MAX_TEMPO);
        remaining /= MAX_TEMPO;
    }
    while remaining < MIN_TEMPO {
        stages.push(MIN_TEMPO);
        remaining /= MIN_TEMPO;
    }

    stages.push((remaining * 10_000.0).round() / 10_000.0);
    stages
}

/// `atempo=<factor>` statements for a multiplier, in application order.
pub fn tempo_stages(multiplier: f64) -> Vec<String> {
    build_tempo_chain(multiplier)
        .into_iter()
        .map(|factor| format!("atempo={}", format_factor(factor)))
        .collect()
}

/// Comma-joined chain, ready to drop into a filter statement.
pub fn tempo_filter(multiplier: f64) -> String {
    tempo_stages(multiplier).join(",")
}

fn format_factor(factor: f64) -> String {
    let text = factor.to_string();
    if text.contains('.') {
        text
    } else {
        format!("{}.0", text)
    }
}
