//! Free-text date normalization.

use chrono::NaiveDate;
use regex::Regex;

/// Accepted input layouts: full month name, then abbreviated month name.
const DATE_FORMATS: [&str; 2] = ["%d %B %Y", "%d %b %Y"];

/// `day month year` anywhere in a longer sentence.
const EMBEDDED_DATE: &str = r"(\d{1,2})\s+([A-Za-z]+)\s+(\d{4})";

/// Normalize a budget-style date to ISO `YYYY-MM-DD`.
///
/// Returns an empty string when no date can be recognised.
///
/// ```text
/// "16 February 2024"              -> "2024-02-16"
/// "1 Jan 2024"                    -> "2024-01-01"
/// "distributed on 3 March 2024."  -> "2024-03-03"
/// "yesterday"                     -> ""
/// ```
pub fn normalize_date(date_string: &str) -> String {
    let input = date_string.trim();

    if let Some(date) = parse_exact(input) {
        return iso(date);
    }

    let Ok(pattern) = Regex::new(EMBEDDED_DATE) else {
        return String::new();
    };

    if let Some(caps) = pattern.captures(input) {
        let candidate = format!("{} {} {}", &caps[1], &caps[2], &caps[3]);
        if let Some(date) = parse_exact(&candidate) {
            return iso(date);
        }
    }

    String::new()
}

fn parse_exact(input: &str) -> Option<NaiveDate> {
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(input, fmt).ok())
}

fn iso(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}
