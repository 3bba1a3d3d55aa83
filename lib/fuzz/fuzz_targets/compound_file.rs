#![no_main]
use libfuzzer_sys::fuzz_target;
use vbascan::olecf::CompoundFile;

fuzz_target!(|data: &[u8]| {
    if let Ok(cf) = CompoundFile::parse(data) {
        for entry in cf.walk().filter(|entry| entry.is_stream()) {
            let _ = cf.read_stream(entry);
        }
        let _ = vbascan::vba::locate(&cf);
    }
});
