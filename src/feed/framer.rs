//! Extraction of complete alert messages out of a byte stream.

/// Start of an alert message.
const XML_START: &[u8] = b"<?xml";
/// End of an alert message, included in the frame.
const ALERT_END: &[u8] = b"</alert>";

/// Accumulates stream bytes and yields complete `<?xml ... </alert>` frames.
///
/// Bytes before the first `<?xml` are dropped; bytes after a frame are kept
/// for the next one.
///
/// # Examples
///
/// ```
/// # use alertcast::feed::FrameBuffer;
/// let mut framer = FrameBuffer::new();
/// framer.extend(b"noise<?xml version=\"1.0\"?><alert>");
/// assert!(framer.next_frame().is_none());
///
/// framer.extend(b"</alert><?xml");
/// assert_eq!(framer.next_frame().unwrap(), b"<?xml version=\"1.0\"?><alert></alert>");
/// assert!(framer.next_frame().is_none());
/// ```
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buffer: Vec<u8>,
    /// `true` once the buffer starts with [`XML_START`]
    receiving: bool,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends bytes read from the stream.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Removes and returns the next complete frame, if any.
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        if !self.receiving {
            match find(&self.buffer, XML_START) {
                Some(start) => {
                    self.buffer.drain(..start);
                    self.receiving = true;
                }
                None => {
                    // keep a tail that may be the beginning of a split marker
                    let keep = self.buffer.len().min(XML_START.len() - 1);
                    self.buffer.drain(..self.buffer.len() - keep);
                    return None;
                }
            }
        }

        let end = find(&self.buffer, ALERT_END)? + ALERT_END.len();
        self.receiving = false;
        Some(self.buffer.drain(..end).collect())
    }

    /// Number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Drops buffered bytes, used when the connection is reset.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.receiving = false;
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
