#![no_main]

use libfuzzer_sys::fuzz_target;
use tracepads::anchor::AnchorRegistry;
use tracepads::mapping::MappingCollection;

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        let anchors = AnchorRegistry::new();
        let _ = MappingCollection::from_toml_str(input, &anchors);
    }
});
