use super::protocol::{CodecError, MAX_FRAME_SIZE};

const LENGTH_PREFIX: usize = 4;

/// Prefixes a frame body with its big-endian `u32` length.
pub fn frame(body: &[u8]) -> Result<Vec<u8>, CodecError> {
    if body.len() > MAX_FRAME_SIZE {
        return Err(CodecError::FrameTooLarge(body.len()));
    }

    let mut framed = Vec::with_capacity(LENGTH_PREFIX + body.len());
    framed.extend_from_slice(&(body.len() as u32).to_be_bytes());
    framed.extend_from_slice(body);
    Ok(framed)
}

/// Reassembles length-prefixed frames from a byte stream.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>, CodecError> {
        if self.buffer.len() < LENGTH_PREFIX {
            return Ok(None);
        }

        let mut prefix = [0u8; LENGTH_PREFIX];
        prefix.copy_from_slice(&self.buffer[..LENGTH_PREFIX]);
        let length = u32::from_be_bytes(prefix) as usize;

        if length > MAX_FRAME_SIZE {
            return Err(CodecError::FrameTooLarge(length));
        }

        if self.buffer.len() < LENGTH_PREFIX + length {
            return Ok(None);
        }

        let body = self.buffer[LENGTH_PREFIX..LENGTH_PREFIX + length].to_vec();
        self.buffer.drain(..LENGTH_PREFIX + length);
        Ok(Some(body))
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_reads_reassemble() {
        let mut stream = frame(b"hello").unwrap();
        stream.extend(frame(b"world!").unwrap());

        let mut decoder = FrameDecoder::new();
        decoder.extend(&stream[..3]);
        assert_eq!(decoder.next_frame().unwrap(), None);

        decoder.extend(&stream[3..11]);
        assert_eq!(decoder.next_frame().unwrap(), Some(b"hello".to_vec()));
        assert_eq!(decoder.next_frame().unwrap(), None);

        decoder.extend(&stream[11..]);
        assert_eq!(decoder.next_frame().unwrap(), Some(b"world!".to_vec()));
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_empty_frame() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(&frame(&[]).unwrap());
        assert_eq!(decoder.next_frame().unwrap(), Some(Vec::new()));
    }

    #[test]
    fn test_oversized_length_rejected() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(&u32::MAX.to_be_bytes());
        assert!(matches!(
            decoder.next_frame(),
            Err(CodecError::FrameTooLarge(_))
        ));
    }
}
