#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    // Parse and validation errors are fine; panics are not.
    if let Ok(cfg) = toml::from_str::<psu_config::Config>(data) {
        if cfg.validate().is_ok() {
            // Every accepted config must convert into controller settings.
            let _ = psu_core::ControllerCfg::from(&cfg);
        }
    }
});
