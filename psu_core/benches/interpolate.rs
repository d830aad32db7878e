use criterion::{Criterion, black_box, criterion_group, criterion_main};
use psu_core::{CalibrationPoint, CalibrationTable, CorrectionModel, voltage_to_code};

// Full default sweep (step 32) over a mildly nonlinear supply curve.
fn synth_table() -> CalibrationTable {
    (0..=4095u16)
        .step_by(32)
        .chain(std::iter::once(4095))
        .map(|code| {
            let x = f64::from(code) / 4095.0;
            CalibrationPoint::new(0.02 - 10.5 * x.powf(1.15), code)
        })
        .filter(|p| p.voltage <= 0.0)
        .collect()
}

fn bench_interpolate(c: &mut Criterion) {
    let table = synth_table();
    let targets: Vec<f64> = (0..100).map(|i| -0.1 * f64::from(i)).collect();
    c.bench_function("voltage_to_code/130pts", |b| {
        b.iter(|| {
            for &t in &targets {
                black_box(voltage_to_code(black_box(&table), t).ok());
            }
        })
    });
}

fn bench_fit(c: &mut Criterion) {
    let raw: Vec<f64> = (0..64).map(|i| f64::from(i) * 4.0).collect();
    let truth: Vec<f64> = raw.iter().map(|r| 1.78 * r - 0.28).collect();
    c.bench_function("correction_fit/64", |b| {
        b.iter(|| black_box(CorrectionModel::fit(black_box(&raw), black_box(&truth)).ok()))
    });
}

criterion_group!(benches, bench_interpolate, bench_fit);
criterion_main!(benches);
