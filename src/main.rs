fn main() {
    if let Err(e) = tfluna_bridge_lib::run() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
