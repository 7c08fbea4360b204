use futures::StreamExt as _;
use futures::stream;

use crate::errors::TransportError;
use crate::transport::ByteStream;

/// Incremental UTF-8 decoder bound to a single response body.
///
/// A trailing incomplete character is held back and prefixed onto the next
/// chunk, so no returned fragment ever splits a multi-byte character.
///
/// Text decoded ahead of an invalid byte is returned first; the error is
/// held and reported by the next `push`, `take_error` or `finish`.
#[derive(Debug, Default)]
pub struct Utf8ChunkDecoder {
    pending: Vec<u8>,
    consumed: usize,
    error: Option<TransportError>,
}

impl Utf8ChunkDecoder {
    /// Decodes as much of `chunk` (plus held bytes) as forms complete characters.
    pub fn push(&mut self, chunk: &[u8]) -> Result<String, TransportError> {
        if let Some(err) = self.error.take() {
            return Err(err);
        }
        self.pending.extend_from_slice(chunk);
        let complete = match std::str::from_utf8(&self.pending) {
            Ok(_) => self.pending.len(),
            Err(err) if err.error_len().is_some() => {
                let valid = err.valid_up_to();
                let err = TransportError::decode(format!(
                    "invalid UTF-8 sequence at byte {}",
                    self.consumed + valid
                ));
                self.pending.truncate(valid);
                if valid == 0 {
                    return Err(err);
                }
                self.error = Some(err);
                valid
            }
            Err(err) => err.valid_up_to(),
        };

        let tail = self.pending.split_off(complete);
        let head = std::mem::replace(&mut self.pending, tail);
        self.consumed += head.len();
        String::from_utf8(head).map_err(|e| TransportError::decode(e.to_string()))
    }

    /// Takes the error held back behind an already returned prefix.
    pub fn take_error(&mut self) -> Option<TransportError> {
        self.error.take()
    }

    /// Number of bytes currently held back waiting for the rest of a character.
    pub fn held_bytes(&self) -> usize {
        self.pending.len()
    }

    /// Ends decoding; held bytes at this point are a truncated character.
    pub fn finish(self) -> Result<(), TransportError> {
        if let Some(err) = self.error {
            Err(err)
        } else if self.pending.is_empty() {
            Ok(())
        } else {
            Err(TransportError::decode(format!(
                "stream ended inside a multi-byte character ({} trailing bytes)",
                self.pending.len()
            )))
        }
    }
}

/// Turns a raw byte stream into a lazy stream of decoded text fragments in
/// arrival order. Empty fragments are skipped.
pub fn decode_stream(
    bytes: ByteStream,
) -> impl futures::Stream<Item = Result<String, TransportError>> + Send {
    struct State {
        bytes: ByteStream,
        decoder: Option<Utf8ChunkDecoder>,
    }

    stream::try_unfold(
        State {
            bytes,
            decoder: Some(Utf8ChunkDecoder::default()),
        },
        |mut state| async move {
            loop {
                let Some(decoder) = state.decoder.as_mut() else {
                    return Ok(None);
                };
                if let Some(err) = decoder.take_error() {
                    state.decoder = None;
                    return Err(err);
                }
                match state.bytes.next().await {
                    Some(Ok(chunk)) => {
                        let text = decoder.push(&chunk)?;
                        if text.is_empty() {
                            continue;
                        }
                        return Ok(Some((text, state)));
                    }
                    Some(Err(err)) => return Err(err),
                    None => {
                        if let Some(decoder) = state.decoder.take() {
                            decoder.finish()?;
                        }
                        return Ok(None);
                    }
                }
            }
        },
    )
}
