fn main() {
    if let Err(err) = causerie::cli::main() {
        eprintln!("❌ Error: {err}");
        std::process::exit(1);
    }
}
