#![no_main]

use libfuzzer_sys::fuzz_target;
use tds_protocol::{LengthRule, TokenType};

fuzz_target!(|data: &[u8]| {
    let Some((&type_byte, mut rest)) = data.split_first() else {
        return;
    };
    // Classification is total over the byte range, or a typed error.
    if let Ok(LengthRule::Prefixed(prefix)) = LengthRule::for_type_byte(type_byte) {
        if let Ok(len) = prefix.read(&mut rest) {
            let _ = len == prefix.null_marker();
        }
    }
    let _ = TokenType::from_u8(type_byte);
});
