//! Thin adapters over the HPACK coder.
//!
//! The encoder side appends one field at a time into an owned scratch
//! buffer (the connection's header-block buffer). The decoder side
//! collects HEADERS/CONTINUATION fragments and runs the callback decode
//! once the block is complete — the coder wants whole blocks, and the
//! contiguity rule guarantees the fragments are adjacent on the wire.

use loona_hpack::decoder::DecoderError;
use tracing::trace;

use weft_h2::INITIAL_HEADER_TABLE_SIZE;

pub(crate) struct HeaderEncoder {
    enc: loona_hpack::Encoder<'static>,
    buf: Vec<u8>,
}

impl HeaderEncoder {
    pub(crate) fn new() -> Self {
        Self {
            enc: loona_hpack::Encoder::new(),
            buf: Vec::new(),
        }
    }

    /// Append one field to the block under construction.
    pub(crate) fn write_field(&mut self, name: &[u8], value: &[u8]) -> std::io::Result<()> {
        trace!(
            name = %String::from_utf8_lossy(name),
            value = %String::from_utf8_lossy(value),
            "sending header field"
        );
        self.enc.encode_header_into((name, value), &mut self.buf)
    }

    /// Take the encoded block, resetting the scratch buffer.
    pub(crate) fn take_block(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buf)
    }
}

pub(crate) struct HeaderBlockDecoder {
    dec: loona_hpack::Decoder<'static>,
    block: Vec<u8>,
}

impl HeaderBlockDecoder {
    pub(crate) fn new() -> Self {
        let mut dec = loona_hpack::Decoder::new();
        dec.set_max_allowed_table_size(INITIAL_HEADER_TABLE_SIZE);
        Self {
            dec,
            block: Vec::new(),
        }
    }

    /// Push one header-block fragment.
    pub(crate) fn push(&mut self, fragment: &[u8]) {
        self.block.extend_from_slice(fragment);
    }

    /// Decode the accumulated block, firing `cb` per field in order.
    /// Dynamic-table state carries over to the next block.
    pub(crate) fn finish(
        &mut self,
        cb: impl FnMut(std::borrow::Cow<[u8]>, std::borrow::Cow<[u8]>),
    ) -> Result<(), DecoderError> {
        let block = std::mem::take(&mut self.block);
        self.dec.decode_with_cb(&block, cb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_then_decode_preserves_fields_and_order() {
        let mut enc = HeaderEncoder::new();
        enc.write_field(b":authority", b"example.com").unwrap();
        enc.write_field(b":method", b"GET").unwrap();
        enc.write_field(b":path", b"/x?y=1").unwrap();
        enc.write_field(b":scheme", b"https").unwrap();
        enc.write_field(b"accept", b"*/*").unwrap();
        enc.write_field(b"x-multi", b"one").unwrap();
        enc.write_field(b"x-multi", b"two").unwrap();
        let block = enc.take_block();
        assert!(enc.take_block().is_empty());

        let mut dec = HeaderBlockDecoder::new();
        // split the block in two fragments, like HEADERS + CONTINUATION
        let mid = block.len() / 2;
        dec.push(&block[..mid]);
        dec.push(&block[mid..]);

        let mut fields = Vec::new();
        dec.finish(|name, value| {
            fields.push((name.to_vec(), value.to_vec()));
        })
        .unwrap();

        assert_eq!(
            fields,
            vec![
                (b":authority".to_vec(), b"example.com".to_vec()),
                (b":method".to_vec(), b"GET".to_vec()),
                (b":path".to_vec(), b"/x?y=1".to_vec()),
                (b":scheme".to_vec(), b"https".to_vec()),
                (b"accept".to_vec(), b"*/*".to_vec()),
                (b"x-multi".to_vec(), b"one".to_vec()),
                (b"x-multi".to_vec(), b"two".to_vec()),
            ]
        );
    }

    #[test]
    fn decoder_state_carries_across_blocks() {
        let mut enc = HeaderEncoder::new();
        let mut dec = HeaderBlockDecoder::new();

        for _ in 0..2 {
            enc.write_field(b"x-session", b"abcdef").unwrap();
            let block = enc.take_block();
            dec.push(&block);
            let mut n = 0;
            dec.finish(|name, _| {
                assert_eq!(&name[..], b"x-session");
                n += 1;
            })
            .unwrap();
            assert_eq!(n, 1);
        }
    }
}
