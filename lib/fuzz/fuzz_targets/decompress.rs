#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let _ = vbascan::compression::decompress(data, 1024 * 1024);
});
