//! Static MX overrides.
//!
//! ```text
//! example.com:
//!     mail1.example.com 10
//!     mail2.example.com 5
//! ```
//!
//! Each `domain:` header starts a block; `exchange preference` lines belong
//! to the block above them. Anything else is ignored.

use crate::resolver::MxRecord;

/// Blocks in file order, records sorted by ascending preference
pub fn parse_mx_overrides(text: &str) -> Vec<(String, Vec<MxRecord>)> {
    let mut blocks: Vec<(String, Vec<MxRecord>)> = Vec::new();

    for line in text.lines() {
        if let Some((exchange, preference)) = record_line(line) {
            // records before the first header have nowhere to go
            if let Some((_, records)) = blocks.last_mut() {
                records.push(MxRecord {
                    exchange: exchange.to_string(),
                    preference,
                    addresses: Vec::new(),
                });
            }
        } else if let Some(domain) = header_line(line) {
            blocks.push((domain.to_string(), Vec::new()));
        }
    }

    for (_, records) in &mut blocks {
        records.sort_by_key(|r| r.preference);
    }
    blocks
}

fn header_line(line: &str) -> Option<&str> {
    let domain = line.trim().strip_suffix(':')?.trim_end();
    if domain.is_empty() || domain.contains(|c: char| c.is_whitespace() || c == ':') {
        return None;
    }
    Some(domain)
}

fn record_line(line: &str) -> Option<(&str, u16)> {
    let mut words = line.split_whitespace();
    let exchange = words.next()?;
    let preference = words.next()?;
    if words.next().is_some() {
        return None;
    }
    let valid_name = exchange
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'));
    if !valid_name || !preference.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some((exchange, preference.parse().ok()?))
}
