#![no_main]

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use tds_protocol::EnvChange;

fuzz_target!(|data: &[u8]| {
    // Database, language, collation, transaction and routing changes.
    let mut bytes = Bytes::copy_from_slice(data);
    let _ = EnvChange::decode(&mut bytes);
});
