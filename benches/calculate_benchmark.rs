// benches/calculate_benchmark.rs
use criterion::{Criterion, black_box, criterion_group, criterion_main};
use dicecalc::grammar::parse_formula;
use dicecalc::{CalculationOptions, calculate};

fn criterion_benchmark(c: &mut Criterion) {
    let attack = "D20+7>=18?#2d6e6#+4:|0|d6|";
    let options = CalculationOptions::with_critical(5.0);

    c.bench_function("parse attack formula", |b| {
        b.iter(|| parse_formula(black_box(attack)))
    });

    c.bench_function("calculate attack formula", |b| {
        b.iter(|| calculate(black_box(attack), &options))
    });

    c.bench_function("keep highest three of 4d6", |b| {
        b.iter(|| calculate(black_box("kh3(4d6)"), &CalculationOptions::default()))
    });

    c.bench_function("dice reuse", |b| {
        b.iter(|| calculate(black_box("d20+5>=15?d_1+2d8:0"), &options))
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
