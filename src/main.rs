use e4butil::*;
use std::process::ExitCode;

#[derive(clap::Parser)]
struct Args {
    /// Show extra debugging info
    #[arg(short, long, default_value_t = false)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Converts between E4B banks and SoundFont2 files
    Convert(convert::Args),
    /// Inspects an E4B bank or SoundFont2 file
    Inspect(inspect::Args),
}

fn main() -> ExitCode {
    let args: Args = clap::Parser::parse();

    let level = match args.verbose {
        true => log::LevelFilter::Debug,
        false => log::LevelFilter::Info,
    };
    pretty_env_logger::formatted_builder()
        .filter_level(level)
        .parse_env("RUST_LOG")
        .target(pretty_env_logger::env_logger::Target::Stdout)
        .init();

    let res = match args.command {
        Commands::Convert(args) => convert::convert(args),
        Commands::Inspect(args) => inspect::inspect(args),
    };
    match res {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e}");
            ExitCode::FAILURE
        }
    }
}
