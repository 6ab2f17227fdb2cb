//! Delegate roster import
//!
//! Rosters arrive as pasted spreadsheet text: one delegate per line with the
//! columns number, name and organization. The delimiter is whichever of
//! `;`, tab, `,` or `|` occurs most often in the first line.

use thiserror::Error;
use tracing::{debug, warn};

use crate::session::Delegate;

const DELIMITERS: [char; 4] = [';', '\t', ',', '|'];

const HEADER_KEYS: [&str; 4] = ["nr", "number", "nummer", "#"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RosterError {
    #[error("roster is empty")]
    Empty,

    #[error("no delegate rows found in {lines} lines")]
    NoDelegates { lines: usize },
}

/// Pick the delimiter that occurs most often in `line`; `;` on a tie or none
pub fn detect_delimiter(line: &str) -> char {
    let mut best = DELIMITERS[0];
    let mut best_count = 0;
    for delim in DELIMITERS {
        let count = line.matches(delim).count();
        if count > best_count {
            best = delim;
            best_count = count;
        }
    }
    best
}

/// Split one line into trimmed fields, honouring double-quoted fields
fn split_fields(line: &str, delim: char) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if quoted && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => quoted = !quoted,
            c if c == delim && !quoted => {
                fields.push(current.trim().to_string());
                current.clear();
            }
            c => current.push(c),
        }
    }
    fields.push(current.trim().to_string());
    fields
}

fn is_header(fields: &[String]) -> bool {
    let Some(first) = fields.first() else {
        return false;
    };
    let first = first.to_lowercase();
    !first.chars().any(|c| c.is_ascii_digit()) && HEADER_KEYS.contains(&first.as_str())
}

/// Parse roster text into delegates.
///
/// Rows without a number are skipped. Missing name or organization columns
/// are left empty.
pub fn parse_delegates(text: &str) -> Result<Vec<Delegate>, RosterError> {
    let lines: Vec<&str> = text
        .lines()
        .map(|l| l.trim_end_matches('\r'))
        .filter(|l| !l.trim().is_empty())
        .collect();

    let Some(first) = lines.first() else {
        return Err(RosterError::Empty);
    };
    let delim = detect_delimiter(first);
    debug!("Roster delimiter: {:?}", delim);

    let mut delegates = Vec::new();
    for (index, line) in lines.iter().enumerate() {
        let fields = split_fields(line, delim);
        if index == 0 && is_header(&fields) {
            continue;
        }

        let number = fields.first().cloned().unwrap_or_default();
        if number.is_empty() {
            warn!("Skipping roster line {}: no delegate number", index + 1);
            continue;
        }

        delegates.push(Delegate {
            number,
            name: fields.get(1).cloned().unwrap_or_default(),
            organization: fields.get(2).cloned().unwrap_or_default(),
        });
    }

    if delegates.is_empty() {
        return Err(RosterError::NoDelegates { lines: lines.len() });
    }
    Ok(delegates)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_delimiter() {
        assert_eq!(detect_delimiter("1;Kari;Oslo"), ';');
        assert_eq!(detect_delimiter("1\tKari\tOslo"), '\t');
        assert_eq!(detect_delimiter("1,Kari Nordmann,Oslo, Akershus;x"), ',');
        assert_eq!(detect_delimiter("1|Kari|Oslo"), '|');
        assert_eq!(detect_delimiter("just text"), ';');
    }

    #[test]
    fn test_quoted_fields() {
        let fields = split_fields(r#"12,"Nordmann, Kari","Lag ""Nord""""#, ',');
        assert_eq!(fields, vec!["12", "Nordmann, Kari", r#"Lag "Nord""#]);
    }

    #[test]
    fn test_header_detection() {
        let fields = |s: &str| split_fields(s, ';');
        assert!(is_header(&fields("Nr;Navn;Representerer")));
        assert!(is_header(&fields("number;name;org")));
        assert!(!is_header(&fields("1;Kari;Oslo")));
        assert!(!is_header(&fields("Kari;1;Oslo")));
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(parse_delegates("  \n\n"), Err(RosterError::Empty));
        assert_eq!(
            parse_delegates("Nr;Navn\n;Kari\n"),
            Err(RosterError::NoDelegates { lines: 2 })
        );
    }
}
