fn main() {
    if let Err(e) = coursewalk::run() {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
