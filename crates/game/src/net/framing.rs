use super::protocol::WireError;

/// Upper bound on a single framed message. A full-state snapshot of a large
/// arena stays well under this; anything bigger is a protocol violation.
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

const HEADER_LEN: usize = 4;

/// Prefix `payload` with its big-endian u32 length.
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>, WireError> {
    if payload.len() > MAX_FRAME_SIZE {
        return Err(WireError::FrameTooLarge {
            len: payload.len(),
            max: MAX_FRAME_SIZE,
        });
    }
    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Incremental frame reassembly over an ordered byte stream. Transport
/// agnostic: callers feed whatever chunks the socket hands them and pull
/// complete payloads out.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Next complete payload, if the buffer holds one.
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>, WireError> {
        if self.buf.len() < HEADER_LEN {
            return Ok(None);
        }
        let len = u32::from_be_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]) as usize;
        if len > MAX_FRAME_SIZE {
            return Err(WireError::FrameTooLarge {
                len,
                max: MAX_FRAME_SIZE,
            });
        }
        if self.buf.len() < HEADER_LEN + len {
            return Ok(None);
        }
        let payload = self.buf[HEADER_LEN..HEADER_LEN + len].to_vec();
        self.buf.drain(..HEADER_LEN + len);
        Ok(Some(payload))
    }

    pub fn pending_bytes(&self) -> usize {
        self.buf.len()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_roundtrip() {
        let frame = encode_frame(b"hello").unwrap();
        let mut decoder = FrameDecoder::new();
        decoder.extend(&frame);
        assert_eq!(decoder.next_frame().unwrap().unwrap(), b"hello");
        assert!(decoder.next_frame().unwrap().is_none());
    }

    #[test]
    fn partial_then_complete() {
        let frame = encode_frame(&[1, 2, 3, 4, 5]).unwrap();
        let mut decoder = FrameDecoder::new();
        decoder.extend(&frame[..3]);
        assert!(decoder.next_frame().unwrap().is_none());
        decoder.extend(&frame[3..]);
        assert_eq!(decoder.next_frame().unwrap().unwrap(), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn two_frames_in_one_chunk() {
        let mut bytes = encode_frame(b"a").unwrap();
        bytes.extend(encode_frame(b"bc").unwrap());
        let mut decoder = FrameDecoder::new();
        decoder.extend(&bytes);
        assert_eq!(decoder.next_frame().unwrap().unwrap(), b"a");
        assert_eq!(decoder.next_frame().unwrap().unwrap(), b"bc");
        assert!(decoder.next_frame().unwrap().is_none());
    }

    #[test]
    fn oversized_header_rejected() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(&(u32::MAX).to_be_bytes());
        assert!(matches!(
            decoder.next_frame(),
            Err(WireError::FrameTooLarge { .. })
        ));
    }
}
