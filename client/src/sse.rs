//! Server-Sent Events framing.
//!
//! Only the subset the backend uses is handled: `event:` and `data:` fields,
//! comment lines, and LF or CRLF event separators. `id:` and `retry:` are
//! ignored.

/// One decoded SSE event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    /// The `event:` field, or `None` for the default `message` type.
    pub event: Option<String>,
    pub data: String,
}

fn find_event_boundary(buffer: &[u8]) -> Option<(usize, usize)> {
    let lf = buffer.windows(2).position(|w| w == b"\n\n");
    let crlf = buffer.windows(4).position(|w| w == b"\r\n\r\n");
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a <= b { (a, 2) } else { (b, 4) }),
        (Some(a), None) => Some((a, 2)),
        (None, Some(b)) => Some((b, 4)),
        (None, None) => None,
    }
}

/// Remove and return the next complete raw event from `buffer`.
pub(crate) fn drain_next_event(buffer: &mut Vec<u8>) -> Option<Vec<u8>> {
    let (pos, delim_len) = find_event_boundary(buffer)?;
    let event = buffer[..pos].to_vec();
    buffer.drain(..pos + delim_len);
    Some(event)
}

/// Parse a raw event block.
///
/// Returns `None` for blocks without any `data:` line (heartbeats and
/// comment-only keepalives).
pub(crate) fn parse_frame(block: &str) -> Option<SseFrame> {
    let mut event = None;
    let mut data = String::new();
    let mut found = false;

    for line in block.lines() {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.starts_with(':') {
            continue;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => {
                let name = value.trim();
                event = (!name.is_empty()).then(|| name.to_string());
            }
            "data" => {
                if found {
                    data.push('\n');
                }
                data.push_str(value);
                found = true;
            }
            _ => {}
        }
    }

    found.then_some(SseFrame { event, data })
}
