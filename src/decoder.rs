use std::borrow::Cow;

use tracing::trace;

const MAX_RESIDUAL: usize = 3;

#[derive(Debug, Default)]
pub struct ByteDecoder {
    residual: Vec<u8>,
}

impl ByteDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, chunk: &[u8]) -> String {
        let bytes: Cow<'_, [u8]> = if self.residual.is_empty() {
            Cow::Borrowed(chunk)
        } else {
            let mut joined = std::mem::take(&mut self.residual);
            joined.extend_from_slice(chunk);
            Cow::Owned(joined)
        };

        let mut out = String::with_capacity(bytes.len());
        let mut rest: &[u8] = &bytes;
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    break;
                }
                Err(error) => {
                    let (valid, after) = rest.split_at(error.valid_up_to());
                    out.push_str(std::str::from_utf8(valid).unwrap_or_default());
                    match error.error_len() {
                        Some(invalid) => {
                            trace!(bytes = invalid, "substituting malformed utf-8 sequence");
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[invalid..];
                        }
                        None => {
                            debug_assert!(after.len() <= MAX_RESIDUAL);
                            self.residual.extend_from_slice(after);
                            break;
                        }
                    }
                }
            }
        }

        out
    }

    /// Flushes a dangling partial sequence at end of stream.
    pub fn finish(&mut self) -> String {
        if self.residual.is_empty() {
            return String::new();
        }
        let residual = std::mem::take(&mut self.residual);
        trace!(bytes = residual.len(), "flushing incomplete utf-8 tail");
        String::from_utf8_lossy(&residual).into_owned()
    }

    #[cfg(test)]
    pub fn pending(&self) -> usize {
        self.residual.len()
    }
}
