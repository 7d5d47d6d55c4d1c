//! Log setup and ID formatting helpers.
//!
//! Output goes through `tracing`; [`init`] installs a `fmt` subscriber on
//! stderr filtered by `RUST_LOG` (falling back to the configured level).
//!
//! When writing to a terminal, letter IDs and member addresses get a
//! consistent colour based on their content so the same letter is easy to
//! follow across log lines.

use std::io::IsTerminal;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing_subscriber::EnvFilter;

static COLOUR_ENABLED: AtomicBool = AtomicBool::new(false);

/// Install the global subscriber. `default_level` applies when `RUST_LOG` is
/// unset. Calling this twice is harmless; the second call is ignored.
pub fn init(default_level: &str) {
    let is_terminal = std::io::stderr().is_terminal();
    COLOUR_ENABLED.store(is_terminal, Ordering::Relaxed);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("letter_vault={default_level},warn")));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(is_terminal)
        .with_target(false)
        .try_init();
}

/// Returns whether ANSI colour output is enabled.
pub fn colour_enabled() -> bool {
    COLOUR_ENABLED.load(Ordering::Relaxed)
}

const RESET: &str = "\x1b[0m";

/// Bright, visually distinct colours.
const ID_COLOURS: &[&str] = &[
    "\x1b[91m", // bright red
    "\x1b[92m", // bright green
    "\x1b[93m", // bright yellow
    "\x1b[94m", // bright blue
    "\x1b[95m", // bright magenta
    "\x1b[96m", // bright cyan
    "\x1b[31m", // red
    "\x1b[32m", // green
    "\x1b[33m", // yellow
    "\x1b[34m", // blue
    "\x1b[35m", // magenta
    "\x1b[36m", // cyan
];

/// Pick a deterministic colour for the given string.
fn hash_colour(id: &str) -> &'static str {
    let hash: u32 = id
        .bytes()
        .fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u32));
    ID_COLOURS[(hash as usize) % ID_COLOURS.len()]
}

const LOG_ID_TRUNCATE_LEN: usize = 8;

fn truncate_id(id: &str) -> &str {
    let end = id
        .char_indices()
        .nth(LOG_ID_TRUNCATE_LEN)
        .map(|(i, _)| i)
        .unwrap_or(id.len());
    &id[..end]
}

fn paint(key: &str, text: String) -> String {
    if colour_enabled() {
        format!("{}{text}{RESET}", hash_colour(key))
    } else {
        text
    }
}

/// Format a letter ID with consistent colour and truncation.
///
/// Returns e.g. `l-3f2a91c0` (plain) or `\x1b[92ml-3f2a91c0\x1b[0m` (colour).
pub fn letter_id(id: &str) -> String {
    paint(id, format!("l-{}", truncate_id(id)))
}

/// Format a member's address as its local part only.
pub fn member(email: &str) -> String {
    let local = email.split('@').next().unwrap_or(email);
    paint(email, local.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn letter_ids_are_truncated() {
        let id = "3f2a91c0-8c1e-4f7e-9d1b-2b7c0c2a9e11";
        let formatted = letter_id(id);
        assert!(formatted.contains("l-3f2a91c0"));
        assert!(!formatted.contains("8c1e"));
        assert_eq!(strip(&letter_id("abc")), "l-abc");
    }

    #[test]
    fn member_shows_local_part() {
        assert_eq!(strip(&member("andreicatigan@gmail.com")), "andreicatigan");
        assert_eq!(strip(&member("no-at-sign")), "no-at-sign");
    }

    #[test]
    fn colours_are_deterministic() {
        assert_eq!(hash_colour("abc"), hash_colour("abc"));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_id("ééééééééééé"), "éééééééé");
    }

    fn strip(s: &str) -> String {
        let mut out = String::new();
        let mut chars = s.chars();
        while let Some(c) = chars.next() {
            if c == '\x1b' {
                for c in chars.by_ref() {
                    if c == 'm' {
                        break;
                    }
                }
            } else {
                out.push(c);
            }
        }
        out
    }
}
