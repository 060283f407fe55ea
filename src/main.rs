fn main() {
    if let Err(e) = snapask_lib::run() {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
