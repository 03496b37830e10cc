//! Entry point for the command-line interface.
#![forbid(unsafe_code)]

fn main() {
    env_logger::init();
    if let Err(err) = strandline_cli::run() {
        eprintln!("strandline: {err}");
        std::process::exit(1);
    }
}
