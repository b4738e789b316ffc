//! Block slicer — buffers incoming bytes into fixed-size blocks (§4.6).
//!
//! Pure function, not a buffer owner: takes the whole accumulator and
//! returns `(full_blocks, remainder)` so the upload FSM owns buffering and
//! calls this as a stateless function on every `augment_data` (§4.7.1).

/// Consume `accumulator` into `block_size`-sized blocks.
///
/// If `bytes_received == content_length` (this is the last chunk), any
/// non-empty tail is emitted as a final short block and the remainder is
/// `None`. Otherwise the tail — which may be empty — is returned as the
/// remainder for the caller to prepend to the next call's accumulator.
pub fn slice(accumulator: &[u8], block_size: u32, bytes_received: u64, content_length: u64) -> (Vec<Vec<u8>>, Option<Vec<u8>>) {
    let block_size = block_size as usize;
    let mut full_blocks = Vec::new();
    let mut rest = accumulator;

    if block_size > 0 {
        while rest.len() >= block_size {
            full_blocks.push(rest[..block_size].to_vec());
            rest = &rest[block_size..];
        }
    }

    if bytes_received == content_length {
        if !rest.is_empty() {
            full_blocks.push(rest.to_vec());
        }
        (full_blocks, None)
    } else {
        (full_blocks, Some(rest.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn emits_full_blocks_and_keeps_remainder() {
        let (blocks, remainder) = slice(b"abcdefghij", 4, 10, 20);
        assert_eq!(blocks, vec![b"abcd".to_vec(), b"efgh".to_vec()]);
        assert_eq!(remainder, Some(b"ij".to_vec()));
    }

    #[test]
    fn last_chunk_emits_short_tail() {
        let (blocks, remainder) = slice(b"abcdefghij", 4, 10, 10);
        assert_eq!(blocks, vec![b"abcd".to_vec(), b"efgh".to_vec(), b"ij".to_vec()]);
        assert_eq!(remainder, None);
    }

    #[test]
    fn last_chunk_with_no_tail_emits_nothing_extra() {
        let (blocks, remainder) = slice(b"abcdefgh", 4, 8, 8);
        assert_eq!(blocks, vec![b"abcd".to_vec(), b"efgh".to_vec()]);
        assert_eq!(remainder, None);
    }

    #[test]
    fn empty_input_is_a_noop() {
        let (blocks, remainder) = slice(b"", 4, 0, 10);
        assert!(blocks.is_empty());
        assert_eq!(remainder, Some(Vec::new()));
    }

    proptest! {
        /// §8 invariant 7: for any byte stream split into arbitrary chunks
        /// summing to `content_length`, the concatenation of slicer output
        /// equals the stream.
        #[test]
        fn slicer_completeness(
            stream in proptest::collection::vec(any::<u8>(), 0..4096),
            block_size in 1u32..64,
            chunk_sizes in proptest::collection::vec(1usize..32, 0..64),
        ) {
            let content_length = stream.len() as u64;
            let mut accumulator: Vec<u8> = Vec::new();
            let mut bytes_received: u64 = 0;
            let mut reassembled: Vec<u8> = Vec::new();
            let mut offset = 0usize;
            let mut remaining_chunks = chunk_sizes;

            while offset < stream.len() {
                let want = remaining_chunks.pop().unwrap_or(stream.len() - offset).min(stream.len() - offset).max(1);
                let chunk = &stream[offset..offset + want];
                offset += want;
                bytes_received += chunk.len() as u64;

                accumulator.extend_from_slice(chunk);
                let (blocks, remainder) = slice(&accumulator, block_size, bytes_received, content_length);
                for b in &blocks {
                    reassembled.extend_from_slice(b);
                }
                accumulator = remainder.unwrap_or_default();
            }
            // Any leftover accumulator from a content_length == 0 stream never entered the loop.
            if content_length == 0 {
                let (blocks, remainder) = slice(&accumulator, block_size, 0, 0);
                for b in &blocks {
                    reassembled.extend_from_slice(b);
                }
                prop_assert_eq!(remainder, None);
            }

            prop_assert_eq!(reassembled, stream);
        }
    }
}
