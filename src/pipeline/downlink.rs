//! Downlink command parsing.
//!
//! Commands arrive on the device's command topic as loosely JSON-shaped
//! text:
//!
//! ```text
//! {"message": "terminate WL-A1B2C3"}
//! ```
//!
//! The keyword before the first `:` must be `message` once braces, quotes,
//! spaces and line breaks are ignored. Up to four space-separated words
//! follow, up to a closing `}`.

use heapless::{String, Vec};
use log::{info, warn};

pub const MAX_WORDS: usize = 4;
pub const MAX_WORD_LEN: usize = 32;

pub type Word = String<MAX_WORD_LEN>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Orderly shutdown: erase the ring and stop.
    Terminate,
    /// Well-formed message with no action for this device.
    Ignored,
}

/// Split a downlink into its command words. `None` if the `message`
/// keyword is missing.
pub fn parse_words(buf: &[u8]) -> Option<Vec<Word, MAX_WORDS>> {
    let colon = buf.iter().position(|&b| b == b':')?;
    let keyword = buf[..colon]
        .iter()
        .filter(|&&b| !matches!(b, b'{' | b'"' | b' ' | b'\r' | b'\n'));
    if !keyword.copied().eq(b"message".iter().copied()) {
        return None;
    }

    let mut words: Vec<Word, MAX_WORDS> = Vec::new();
    let mut current = Word::new();
    for &b in &buf[colon + 1..] {
        match b {
            b'"' | b'\r' | b'\n' => continue,
            b'}' => break,
            b' ' => {
                if !current.is_empty() && words.push(core::mem::take(&mut current)).is_err() {
                    return Some(words);
                }
            }
            _ => {
                // overlong words are truncated
                let _ = current.push(char::from(b));
            }
        }
    }
    if !current.is_empty() {
        let _ = words.push(current);
    }
    Some(words)
}

/// Interpret a downlink for the device `device_id`.
pub fn parse(buf: &[u8], device_id: &str) -> Option<Command> {
    let Some(words) = parse_words(buf) else {
        warn!("Downlink: message keyword missing");
        return None;
    };
    info!("Downlink: {} command word(s)", words.len());

    match words.first().map(|w| w.as_str()) {
        Some("terminate") => match words.get(1) {
            None => {
                warn!("Downlink: terminate without device id");
                Some(Command::Ignored)
            }
            Some(id) if id.as_str() != device_id => {
                warn!("Downlink: terminate for other device {}", id);
                Some(Command::Ignored)
            }
            Some(_) => {
                info!("Downlink: terminate accepted");
                Some(Command::Terminate)
            }
        },
        _ => Some(Command::Ignored),
    }
}
