#![no_main]

use libfuzzer_sys::fuzz_target;
use tds_protocol::PreLoginResponse;

fuzz_target!(|data: &[u8]| {
    // Server-controlled: offsets and lengths must be bounds-checked.
    let _ = PreLoginResponse::decode(data);
});
