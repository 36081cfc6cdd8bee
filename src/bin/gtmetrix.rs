use std::process;

fn main() {
    if let Err(err) = gtmetrix::cli::main_entry() {
        eprintln!("gtmetrix: {err:?}");
        process::exit(1);
    }
}
