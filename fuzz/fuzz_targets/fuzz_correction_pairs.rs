#![no_main]
use libfuzzer_sys::fuzz_target;
use psu_core::CorrectionModel;

fuzz_target!(|data: &str| {
    let Ok(pairs) = psu_config::parse_correction_pairs(data) else {
        return;
    };
    // A successful fit always yields a usable model.
    if let Ok(model) = CorrectionModel::fit(&pairs.raw, &pairs.truth) {
        assert!(model.a.is_finite() && model.b.is_finite());
    }
});
