//! Classification of Tor stdout lines
//!
//! Tor has no stable machine-readable log format, so the supervisor keys its
//! transitions off substrings. All of that matching lives here.

/// What a single log line means to the supervisor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogEvent {
    /// Any `Bootstrapped` line, or any line containing `100%`. Tor is taken
    /// to be up; carries the reported percentage when the line has one.
    Bootstrap(Option<u8>),
    /// The line mentions the hidden service; the hostname may have changed
    HiddenServiceMention,
    /// Nothing the supervisor acts on
    Other,
}

const BOOTSTRAP_MARKER: &str = "Bootstrapped";
const COMPLETE_MARKER: &str = "100%";
const HIDDEN_SERVICE_MARKERS: &[&str] = &["hidden_service", ".onion", "onion service"];

/// Classify one line of Tor output.
///
/// A bootstrap marker wins over a hidden-service mention on the same line,
/// since bootstrap also triggers a hostname check.
pub fn classify(line: &str) -> LogEvent {
    if line.contains(BOOTSTRAP_MARKER) {
        return LogEvent::Bootstrap(bootstrap_percent(line));
    }

    if line.contains(COMPLETE_MARKER) {
        return LogEvent::Bootstrap(Some(100));
    }

    let lower = line.to_ascii_lowercase();
    if HIDDEN_SERVICE_MARKERS.iter().any(|m| lower.contains(m)) {
        return LogEvent::HiddenServiceMention;
    }

    LogEvent::Other
}

/// Extract N from `... Bootstrapped N% ...`
fn bootstrap_percent(line: &str) -> Option<u8> {
    let (_, rest) = line.split_once(BOOTSTRAP_MARKER)?;
    let rest = rest.trim_start();
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();

    if digits.is_empty() || !rest[digits.len()..].starts_with('%') {
        return None;
    }

    digits.parse::<u16>().ok().map(|p| p.min(100) as u8)
}
