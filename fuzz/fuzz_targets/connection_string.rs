#![no_main]

use libfuzzer_sys::fuzz_target;
use mssql_session::Config;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(config) = Config::from_connection_string(s) {
            assert!(config.packet_size >= 512 && config.packet_size <= 32767);
        }
    }
});
