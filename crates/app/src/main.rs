use clap::Parser;

mod cli;

fn main() {
    let cli = cli::Cli::parse();
    if let Err(err) = cli::handle_command(cli) {
        eprintln!("{err:?}");
        std::process::exit(1);
    }
}
