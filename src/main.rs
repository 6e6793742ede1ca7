use colored::Colorize;

fn main() {
    synthesis::init_tracing();
    if let Err(e) = synthesis::run() {
        eprintln!("{} {}", "error:".red().bold(), e);
        std::process::exit(1);
    }
}
