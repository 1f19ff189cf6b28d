fn main() {
    if let Err(err) = smarthome_energy::app::run() {
        eprintln!("api startup failed: {err}");
        std::process::exit(1);
    }
}
