fn main() {
    if let Err(err) = auphonic_upload::run() {
        eprintln!("fatal: {err:#}");
        std::process::exit(1);
    }
}
