//! Year parsing for source data
//!
//! Two shapes show up in practice:
//! - Free-text labels from tabular datasets: `"1789"`, `"44 BC"`, `"c. 1200 AD"`, `"1914.0"`
//! - ISO-8601 timestamps from the graph endpoint: `"-0044-03-15T00:00:00Z"`
//!
//! Negative years are BCE. Anything else is rejected rather than guessed.

/// Parse a free-text year label.
///
/// **Accepted:**
/// - Bare integers, optionally signed, optionally with a `.0` suffix
/// - Era markers before or after the number: `BC`, `BCE`, `B.C.` (negated), `AD`, `CE`, `A.D.`
/// - A leading `c.`/`ca.`/`circa`
pub fn parse_year_label(raw: &str) -> Option<i32> {
    let mut text = raw.trim().to_lowercase();
    if text.is_empty() {
        return None;
    }

    for prefix in ["circa ", "ca. ", "ca ", "c. ", "c.", "c "] {
        if let Some(rest) = text.strip_prefix(prefix) {
            text = rest.trim().to_string();
            break;
        }
    }

    let mut negate = false;
    for (marker, bce) in [
        ("b.c.e.", true),
        ("bce", true),
        ("b.c.", true),
        ("bc", true),
        ("a.d.", false),
        ("ad", false),
        ("ce", false),
    ] {
        if let Some(rest) = text.strip_suffix(marker) {
            text = rest.trim().to_string();
            negate = bce;
            break;
        }
        if let Some(rest) = text.strip_prefix(marker) {
            if rest.starts_with(|c: char| c.is_whitespace() || c.is_ascii_digit()) {
                text = rest.trim().to_string();
                negate = bce;
                break;
            }
        }
    }

    let digits = text.strip_suffix(".0").unwrap_or(&text);
    let year: i32 = digits.parse().ok()?;
    if negate {
        if year < 0 {
            return None;
        }
        Some(-year)
    } else {
        Some(year)
    }
}

/// Extract the signed year from an ISO-8601 date or timestamp
pub fn parse_iso_year(raw: &str) -> Option<i32> {
    let text = raw.trim();
    let (negative, body) = match text.as_bytes().first()? {
        b'-' => (true, &text[1..]),
        b'+' => (false, &text[1..]),
        _ => (false, text),
    };
    let digits: &str = body.split(['-', 'T']).next()?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let year: i32 = digits.parse().ok()?;
    Some(if negative { -year } else { year })
}
