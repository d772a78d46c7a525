mod annotate;
mod cache;
mod settings;

use anyhow::Result;
use clap::Command;
use env_logger::Env;

pub mod consts {
    pub const VERSION: &str = env!("CARGO_PKG_VERSION");
    pub const PKG_NAME: &str = "varanno";
    pub const BIN_NAME: &str = "varanno";
}

fn build_parser() -> Command {
    Command::new(consts::BIN_NAME)
        .bin_name(consts::BIN_NAME)
        .version(consts::VERSION)
        .author("Databio")
        .about("Annotate variants against large reference sources through a fingerprinted, self-invalidating local cache.")
        .subcommand_required(true)
        .subcommand(annotate::cli::create_annotate_cli())
        .subcommand(cache::cli::create_cache_cli())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let app = build_parser();
    let matches = app.get_matches();

    match matches.subcommand() {
        //
        // ANNOTATE
        //
        Some((annotate::cli::ANNOTATE_CMD, matches)) => {
            annotate::handlers::run_annotate(matches)?;
        }

        //
        // CACHE
        //
        Some((cache::cli::CACHE_CMD, matches)) => {
            cache::handlers::run_cache(matches)?;
        }

        _ => unreachable!("Subcommand not found"),
    };

    Ok(())
}
