use anyhow::{Context, Result, bail};
use chrono::{DateTime, Local};
use serde::Serialize;

/// Split a quantity such as "200g", "1.5 tbsp" or "2" into its number and
/// unit. A bare number counts as pieces.
pub(crate) fn parse_quantity(s: &str) -> Result<(f64, String)> {
    let s = s.trim();
    if s.is_empty() {
        bail!("Quantity must not be empty");
    }

    let (num_part, unit_part) = match s.find(|c: char| c.is_alphabetic()) {
        Some(0) => bail!("Invalid quantity: '{s}'. Use '200g', '2 tbsp', '3', etc."),
        Some(idx) => s.split_at(idx),
        None => (s, ""),
    };
    let qty: f64 = num_part
        .trim()
        .parse()
        .with_context(|| format!("Invalid quantity: '{s}'"))?;
    if !qty.is_finite() || qty <= 0.0 {
        bail!("Quantity must be greater than 0");
    }

    let unit = unit_part.trim();
    let unit = if unit.is_empty() { "pcs" } else { unit };
    Ok((qty, unit.to_lowercase()))
}

/// Parse a `name=value` metric, e.g. "rating=4.5".
pub(crate) fn parse_metric(s: &str) -> Result<(String, f64)> {
    let (name, value) = s
        .split_once('=')
        .with_context(|| format!("Invalid metric '{s}'. Use name=value, e.g. rating=4.5"))?;
    let name = name.trim();
    if name.is_empty() {
        bail!("Metric name must not be empty in '{s}'");
    }
    let value: f64 = value
        .trim()
        .parse()
        .with_context(|| format!("Invalid metric value in '{s}'"))?;
    if !value.is_finite() {
        bail!("Metric '{name}' must be a finite number");
    }
    Ok((name.to_string(), value))
}

/// Render an RFC 3339 timestamp as a local date. Unparseable input is shown
/// as-is.
pub(crate) fn format_date(timestamp: &str) -> String {
    DateTime::parse_from_rfc3339(timestamp).map_or_else(
        |_| timestamp.to_string(),
        |dt| dt.with_timezone(&Local).format("%Y-%m-%d").to_string(),
    )
}

pub(crate) fn json_error(message: &str) -> String {
    #[derive(Serialize)]
    struct CliError<'a> {
        error: &'a str,
    }
    serde_json::to_string(&CliError { error: message })
        .unwrap_or_else(|_| format!("{{\"error\":\"{message}\"}}"))
}

pub(crate) fn format_quantity(quantity: f64, unit: &str) -> String {
    if quantity.fract() == 0.0 {
        format!("{quantity:.0} {unit}")
    } else {
        format!("{quantity} {unit}")
    }
}

pub(crate) fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let end = s.char_indices().nth(max - 3).map_or(s.len(), |(i, _)| i);
        format!("{}...", &s[..end])
    }
}
