#![no_main]

use libfuzzer_sys::fuzz_target;
use tracepads::mapping::{PackagePath, PathMatcher};

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        // Split into pattern and candidate path at the first newline
        let (pattern, path) = input.split_once('\n').unwrap_or((input, input));
        if let Ok(matcher) = PathMatcher::new(pattern) {
            let _ = matcher.matches(&PackagePath::new(path));
        }
    }
});
