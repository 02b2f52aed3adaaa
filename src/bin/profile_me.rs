// src/bin/profile_me.rs
use dicecalc::{CalculationOptions, calculate};
use std::hint::black_box;

fn main() {
    // keep, reroll, explosions, a critical-aware conditional and dice reuse
    let formulas = [
        "kh(4d6r1)+3",
        "D20+7>=18?#2d6e6#+4:|0|d6|",
        "d20+5>=15?d_1+2d8:0",
    ];
    let options = CalculationOptions::with_critical(5.0);

    let _ = calculate("1", &options);

    println!("Starting profile loop...");

    for _ in 0..2_000 {
        for formula in formulas {
            let _ = black_box(calculate(black_box(formula), &options));
        }
    }

    println!("Done.");
}
