#![no_main]

use libfuzzer_sys::fuzz_target;
use tailf_core::config::{Config, ConfigPatch};
use tailf_core::timestamps::TimestampFormat;

fuzz_target!(|data: &[u8]| {
    if data.len() > 16_384 {
        return;
    }

    let input = match std::str::from_utf8(data) {
        Ok(text) => text,
        Err(_) => return,
    };

    // Any format string either fails validation or yields a usable recognizer.
    if let Ok(format) = TimestampFormat::new(input) {
        let _ = format.is_stamped(input);
    }

    if let Ok(config) = Config::from_toml_str(input) {
        let text = config.to_toml_string().expect("valid config serializes");
        let reparsed = Config::from_toml_str(&text).expect("serialized config parses");
        assert_eq!(reparsed, config);
    }

    if let Ok(patch) = toml::from_str::<ConfigPatch>(input) {
        let _ = Config::default().merged(&patch);
    }
});
