use chrono::{DateTime, Utc};

/// `$50,000.00` for large prices, more precision below a dollar.
pub fn format_price(price: f64) -> String {
    if !price.is_finite() {
        return "-".to_string();
    }

    let decimals = if price.abs() >= 1.0 {
        2
    } else if price.abs() >= 0.01 {
        4
    } else {
        8
    };
    let raw = format!("{:.*}", decimals, price.abs());
    let (whole, fraction) = raw.split_once('.').unwrap_or((raw.as_str(), ""));
    let sign = if price < 0.0 { "-" } else { "" };
    format!("{sign}${}.{fraction}", group_thousands(whole))
}

/// `+2.50%` / `-1.25%`.
pub fn format_percent(change: f64) -> String {
    if !change.is_finite() {
        return "-".to_string();
    }
    format!("{change:+.2}%")
}

/// `$1.23T`, `$456.70B`, `$12.00M`, `$950.00K`.
pub fn format_compact_usd(value: f64) -> String {
    if !value.is_finite() {
        return "-".to_string();
    }

    const UNITS: [(f64, &str); 4] = [(1e12, "T"), (1e9, "B"), (1e6, "M"), (1e3, "K")];
    let magnitude = value.abs();
    let sign = if value < 0.0 { "-" } else { "" };
    for (scale, suffix) in UNITS {
        if magnitude >= scale {
            return format!("{sign}${:.2}{suffix}", magnitude / scale);
        }
    }
    format!("{sign}${magnitude:.2}")
}

/// Human-relative age of `then` as seen from `now`.
pub fn relative_time(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let seconds = (now - then).num_seconds().max(0);
    match seconds {
        0..=59 => "Just now".to_string(),
        60..=3_599 => format!("{}m ago", seconds / 60),
        3_600..=86_399 => format!("{}h ago", seconds / 3_600),
        _ => format!("{}d ago", seconds / 86_400),
    }
}

fn group_thousands(digits: &str) -> String {
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (idx, ch) in digits.chars().enumerate() {
        if idx > 0 && (digits.len() - idx) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    grouped
}
