//! Parser for the size analyser's free-text report.
//!
//! The report holds one line per measured shrimp, e.g.
//! `Shrimp 1: 0.33 cm / 0.00 g`.

use std::sync::LazyLock;

use regex::Regex;

static SHRIMP_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Shrimp\s+\d+:\s*([\d.]+)\s*cm\s*/\s*([\d.]+)\s*g")
        .unwrap_or_else(|e| panic!("shrimp size pattern is invalid: {e}"))
});

/// Every `(length_cm, weight_g)` pair in `text`, in order.
///
/// Matches whose numbers do not parse (e.g. `1.2.3`) are skipped.
pub fn parse_size_text(text: &str) -> Vec<(f64, f64)> {
    SHRIMP_LINE
        .captures_iter(text)
        .filter_map(|caps| {
            let length = caps.get(1)?.as_str().parse::<f64>().ok()?;
            let weight = caps.get(2)?.as_str().parse::<f64>().ok()?;
            Some((length, weight))
        })
        .collect()
}

/// Mean length and weight across all measurements, or `None` when the
/// text has none.
pub fn average_size(text: &str) -> Option<(f64, f64)> {
    let pairs = parse_size_text(text);
    let count = u32::try_from(pairs.len()).ok().filter(|&n| n > 0)?;
    let (sum_len, sum_wt) = pairs
        .iter()
        .fold((0.0, 0.0), |(l, w), (pl, pw)| (l + pl, w + pw));
    let n = f64::from(count);
    Some((sum_len / n, sum_wt / n))
}
