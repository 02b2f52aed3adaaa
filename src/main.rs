use dicecalc::{CalculationOptions, calculate};

fn main() {
    let mut options = CalculationOptions::default();
    let mut formula = Vec::new();
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--crit" => {
                options.critical_enabled = true;
                match args.next().map(|rate| rate.parse::<f64>()) {
                    Some(Ok(rate)) => options.critical_rate = rate,
                    _ => {
                        eprintln!("--crit expects a rate in percent");
                        std::process::exit(2);
                    }
                }
            }
            "--exact" => options.exact_mixing = true,
            _ => formula.push(arg),
        }
    }
    if formula.is_empty() {
        eprintln!("usage: dicecalc [--crit RATE] [--exact] <formula>");
        std::process::exit(2);
    }

    let result = calculate(&formula.join(" "), &options);
    if result.success {
        println!("{:#?}", result);
    } else {
        eprintln!("error: {}", result.error.unwrap_or_default());
        std::process::exit(1);
    }
}
