//! Framing and key/value parsing for kernel uevent datagrams.
//!
//! A uevent datagram is a run of NUL-terminated strings. The first string is
//! usually an `action@devpath` header, the rest are `KEY=VALUE` pairs. The
//! end of a message is marked by an empty string (two consecutive NULs),
//! which [`UeventMessage::frame`] guarantees by appending two NULs to the
//! bytes read from the socket.

use thiserror::Error;

/// Largest datagram accepted from the uevent socket.
pub const UEVENT_MSG_LEN: usize = 2048;

/// Errors that can occur while framing or parsing a uevent.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum FrameError {
    #[error("empty uevent datagram")]
    Empty,

    #[error("uevent datagram too large: {len} bytes (limit {limit})")]
    Oversized { len: usize, limit: usize },

    #[error("uevent buffer of {len} bytes is not double-NUL terminated")]
    Unterminated { len: usize },
}

impl FrameError {
    /// Short label used for error counters.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::Oversized { .. } => "oversized",
            Self::Unterminated { .. } => "unterminated",
        }
    }
}

/// One kernel datagram with its double-NUL terminator appended.
#[derive(Debug, Clone)]
pub struct UeventMessage {
    buf: Vec<u8>,
}

impl UeventMessage {
    /// Frames `datagram` as received from the socket.
    ///
    /// Zero-length reads and reads that fill the whole receive buffer are
    /// rejected; the latter may have been truncated by the kernel.
    pub fn frame(datagram: &[u8]) -> Result<Self, FrameError> {
        if datagram.is_empty() {
            return Err(FrameError::Empty);
        }
        if datagram.len() >= UEVENT_MSG_LEN {
            return Err(FrameError::Oversized {
                len: datagram.len(),
                limit: UEVENT_MSG_LEN,
            });
        }

        let mut buf = Vec::with_capacity(datagram.len() + 2);
        buf.extend_from_slice(datagram);
        buf.extend_from_slice(&[0, 0]);

        Ok(Self { buf })
    }

    /// Raw bytes including the trailing terminator.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Parses the framed message into a [`KeyValueRecord`].
    pub fn parse(&self) -> Result<KeyValueRecord<'_>, FrameError> {
        parse_record(&self.buf)
    }
}

/// Keys and values of a single uevent, in message order.
///
/// Keys are unique. A repeated key keeps the position of its first
/// occurrence and takes the value of its last one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyValueRecord<'a> {
    entries: Vec<(&'a str, &'a str)>,
    skipped: usize,
}

impl<'a> KeyValueRecord<'a> {
    /// Value for `key`, if present.
    pub fn get(&self, key: &str) -> Option<&'a str> {
        self.entries
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| *v)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Iterates `(key, value)` pairs in message order.
    pub fn iter(&self) -> impl Iterator<Item = (&'a str, &'a str)> + '_ {
        self.entries.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of segments that were not `KEY=VALUE` pairs (headers, bare
    /// words, invalid UTF-8).
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    fn push_segment(&mut self, segment: &'a [u8]) {
        let Ok(text) = std::str::from_utf8(segment) else {
            self.skipped += 1;
            return;
        };

        // Segments without '=' (e.g. "add@/devices/...") carry no key.
        let Some((key, value)) = text.split_once('=') else {
            self.skipped += 1;
            return;
        };
        if key.is_empty() {
            self.skipped += 1;
            return;
        }

        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }
}

/// Parses a double-NUL terminated buffer into a [`KeyValueRecord`].
///
/// The scan stops at the first empty segment. A buffer that runs out before
/// an empty segment is found is rejected rather than parsed partially.
pub fn parse_record(data: &[u8]) -> Result<KeyValueRecord<'_>, FrameError> {
    // Room for the appended terminator on top of the datagram limit.
    if data.len() > UEVENT_MSG_LEN + 2 {
        return Err(FrameError::Oversized {
            len: data.len(),
            limit: UEVENT_MSG_LEN + 2,
        });
    }

    let mut record = KeyValueRecord::default();
    let mut rest = data;

    loop {
        let Some(nul) = rest.iter().position(|&b| b == 0) else {
            return Err(FrameError::Unterminated { len: data.len() });
        };
        if nul == 0 {
            // A leading empty segment only terminates a record of zero
            // segments when the full double NUL is present.
            if rest.len() == data.len() && !data.starts_with(&[0, 0]) {
                return Err(FrameError::Unterminated { len: data.len() });
            }
            return Ok(record);
        }

        let (segment, tail) = rest.split_at(nul);
        record.push_segment(segment);
        rest = &tail[1..];
    }
}
