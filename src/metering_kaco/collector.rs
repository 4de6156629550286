use super::link::Link;
use super::KacoError;
use log::debug;
use std::time::Duration;

pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_millis(700);
const READ_CHUNK: usize = 4096;

/* ISO-8859-15 differs from Latin-1 in these eight positions */
const LATIN9_OVERRIDES: [(u8, char); 8] = [
    (0xA4, '€'),
    (0xA6, 'Š'),
    (0xA8, 'š'),
    (0xB4, 'Ž'),
    (0xB8, 'ž'),
    (0xBC, 'Œ'),
    (0xBD, 'œ'),
    (0xBE, 'Ÿ'),
];

pub fn decode_latin9(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for &b in bytes {
        let c = match LATIN9_OVERRIDES.iter().find(|(code, _)| *code == b) {
            Some((_, c)) => *c,
            None => b as char,
        };
        out.push(c);
    }
    return out;
}

/// Byte value of a character in ISO-8859-15, `None` if it has no encoding.
pub fn encode_latin9(c: char) -> Option<u8> {
    if let Some((code, _)) = LATIN9_OVERRIDES.iter().find(|(_, ch)| *ch == c) {
        return Some(*code);
    }

    let cp = c as u32;
    if cp > 0xFF {
        return None;
    }

    let b = cp as u8;
    /* the replaced Latin-1 characters are not part of ISO-8859-15 */
    if LATIN9_OVERRIDES.iter().any(|(code, _)| *code == b) {
        return None;
    }
    return Some(b);
}

/// Splits collected text into lines without CR and NUL bytes.
pub fn split_lines(text: &str) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }

    return text
        .split('\n')
        .map(|line| line.replace(['\r', '\0'], ""))
        .collect();
}

/// Reads a reply until the device stays silent for the idle timeout.
#[derive(Debug, Clone)]
pub struct ResponseCollector {
    idle_timeout: Duration,
}

impl Default for ResponseCollector {
    fn default() -> Self {
        Self::new(DEFAULT_IDLE_TIMEOUT)
    }
}

impl ResponseCollector {
    pub fn new(idle_timeout: Duration) -> Self {
        return ResponseCollector { idle_timeout };
    }

    pub fn send_cmd_and_read<L: Link + ?Sized>(&self, link: &mut L, request: &str) -> Result<Vec<String>, KacoError> {
        link.send(request.as_bytes())?;
        debug!("Sent to rs485 {:?}", request);

        let mut answer = String::new();
        while link.is_data_ready(self.idle_timeout)? {
            let chunk = link.receive(READ_CHUNK)?;
            if chunk.is_empty() {
                /* ready but nothing to read means the peer went away */
                break;
            }
            answer.push_str(&decode_latin9(&chunk));
        }

        debug!("Received for {:?}: {:?}", request, answer);
        return Ok(split_lines(&answer));
    }
}
