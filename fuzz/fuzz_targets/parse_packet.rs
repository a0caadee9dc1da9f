#![no_main]

use libfuzzer_sys::fuzz_target;
use tds_protocol::PacketHeader;

fuzz_target!(|data: &[u8]| {
    // Header decode must reject short input and lengths below the header size.
    let mut cursor = data;
    if let Ok(header) = PacketHeader::decode(&mut cursor) {
        assert!(usize::from(header.length) >= 8);
        let _ = header.payload_length();
    }
});
