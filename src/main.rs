fn main() {
    if let Err(err) = smarthome_energy::app::run() {
        eprintln!("application startup failed: {err}");
        std::process::exit(1);
    }
}
