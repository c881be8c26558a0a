//! Fuzz testing for the value transformer.
//!
//! Feeds arbitrary bytes through every transform configuration's decode
//! path (which faces untrusted on-disk data) and checks that encode/decode
//! round-trips for well-formed input.

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

use ridgedb::storage::transformer::Transformer;

#[derive(Debug, Arbitrary)]
struct TransformInput {
    compress: bool,
    encrypt: bool,
    payload: Vec<u8>,
}

fuzz_target!(|input: TransformInput| {
    let mut transformer = Transformer::new();
    if input.compress {
        transformer.enable_compression();
    }
    if input.encrypt {
        transformer
            .enable_encryption(b"0123456789abcdef")
            .expect("valid key length");
    }

    // Decoding arbitrary bytes must never panic.
    let _ = transformer.decode(input.payload.clone());

    // A proper encode must always decode back to the original.
    let encoded = transformer.encode(input.payload.clone()).expect("encode");
    let decoded = transformer.decode(encoded).expect("decode");
    assert_eq!(decoded, input.payload);
});
