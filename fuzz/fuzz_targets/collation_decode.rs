#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use tds_protocol::{CodePageEncoding, Collation};

#[derive(Debug, Arbitrary)]
struct FuzzCollationInput {
    collation_bytes: [u8; 5],
    string_data: Vec<u8>,
}

fuzz_target!(|input: FuzzCollationInput| {
    let mut bytes = &input.collation_bytes[..];
    if let Ok(collation) = Collation::decode(&mut bytes) {
        if let Ok(encoding) = CodePageEncoding::resolve(collation) {
            let _ = encoding.decode(&input.string_data);
        }
    }
});
