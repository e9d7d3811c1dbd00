//! Calling convention for WebAssembly guests.
//!
//! The host hands input to a guest as raw UTF-8 bytes written into a region
//! the guest allocated with `alloc(len)`, then calls `transform(ptr, len)`.
//! The guest answers with a pointer to a *frame*:
//!
//! ```text
//! +----------------------+---------------------------+
//! | len: u32 (LE, 4 B)   | len bytes of UTF-8 text   |
//! +----------------------+---------------------------+
//! ```
//!
//! The helpers here encode and validate frames independent of any wasm
//! runtime so that both sides of the convention can be tested directly.

/// Size of the little-endian length prefix.
pub const LEN_PREFIX_BYTES: usize = 4;

/// Largest payload a guest may return.
pub const MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024;

/// A frame that does not decode to text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// Fewer bytes than the length prefix itself.
    #[error("frame is {actual} bytes, shorter than its {LEN_PREFIX_BYTES}-byte length prefix")]
    Truncated { actual: usize },

    /// The prefix declares more payload than is available.
    #[error("frame declares {declared} bytes but only {available} follow the prefix")]
    OutOfBounds { declared: usize, available: usize },

    /// The payload exceeds the size ceiling.
    #[error("frame declares {declared} bytes, above the {limit}-byte ceiling")]
    TooLarge { declared: usize, limit: usize },

    /// The payload is not valid UTF-8.
    #[error("payload is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),
}

/// Encode `text` as a length-prefixed frame.
///
/// Fails only if the text does not fit a 32-bit length.  Guests build their
/// own frames, so only the tests need this side.
#[cfg(test)]
pub(crate) fn encode_frame(text: &str) -> Result<Vec<u8>, FrameError> {
    let len = u32::try_from(text.len()).map_err(|_| FrameError::TooLarge {
        declared: text.len(),
        limit: u32::MAX as usize,
    })?;
    let mut frame = Vec::with_capacity(LEN_PREFIX_BYTES + text.len());
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(text.as_bytes());
    Ok(frame)
}

/// Read the payload length out of a length prefix.
pub fn decode_len(prefix: [u8; LEN_PREFIX_BYTES]) -> usize {
    u32::from_le_bytes(prefix) as usize
}

/// Reject payload lengths above [`MAX_OUTPUT_BYTES`].
pub fn check_len(declared: usize) -> Result<(), FrameError> {
    if declared > MAX_OUTPUT_BYTES {
        return Err(FrameError::TooLarge {
            declared,
            limit: MAX_OUTPUT_BYTES,
        });
    }
    Ok(())
}

/// Decode a complete frame.  Bytes after the declared payload are ignored.
pub fn decode_frame(frame: &[u8]) -> Result<&str, FrameError> {
    let (prefix, rest) = frame
        .split_first_chunk::<LEN_PREFIX_BYTES>()
        .ok_or(FrameError::Truncated {
            actual: frame.len(),
        })?;
    let declared = decode_len(*prefix);
    check_len(declared)?;
    let payload = rest.get(..declared).ok_or(FrameError::OutOfBounds {
        declared,
        available: rest.len(),
    })?;
    Ok(std::str::from_utf8(payload)?)
}
