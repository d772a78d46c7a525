use clap::{Arg, ArgAction, Command};

pub const CACHE_CMD: &str = "cache";
pub const CACHE_STATUS: &str = "status";
pub const CACHE_BUILD: &str = "build";
pub const CACHE_INVALIDATE: &str = "invalidate";
pub const CACHE_INSPECT: &str = "inspect";
pub const CACHE_LIST: &str = "list";
pub const CACHE_CLEAR: &str = "clear";

fn reference_arg() -> Arg {
    Arg::new("reference")
        .long("reference")
        .short('r')
        .required(true)
        .help("Reference source (TSV or VCF, optionally gzipped)")
}

fn cache_folder_arg() -> Arg {
    Arg::new("cache-folder")
        .long("cache-folder")
        .short('f')
        .help("Cache folder path")
}

fn config_arg() -> Arg {
    Arg::new("config")
        .long("config")
        .short('c')
        .help("TOML or YAML config file with a [cache] table")
}

pub fn create_cache_cli() -> Command {
    Command::new(CACHE_CMD)
        .author("Databio")
        .about("Inspect and manage cached reference artifacts")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new(CACHE_STATUS)
                .about("Report whether the cached artifact for a reference is absent, valid or stale")
                .arg(reference_arg())
                .arg(cache_folder_arg())
                .arg(config_arg()),
        )
        .subcommand(
            Command::new(CACHE_BUILD)
                .about("Populate the cache for a reference")
                .arg(reference_arg())
                .arg(cache_folder_arg())
                .arg(config_arg())
                .arg(
                    Arg::new("force")
                        .long("force")
                        .action(ArgAction::SetTrue)
                        .help("Rebuild even if the cached artifact is valid"),
                ),
        )
        .subcommand(
            Command::new(CACHE_INVALIDATE)
                .about("Remove the cached artifact for a reference")
                .arg(reference_arg())
                .arg(cache_folder_arg())
                .arg(config_arg()),
        )
        .subcommand(
            Command::new(CACHE_INSPECT)
                .about("Print the artifact header for a reference")
                .arg(reference_arg())
                .arg(cache_folder_arg())
                .arg(config_arg()),
        )
        .subcommand(
            Command::new(CACHE_LIST)
                .about("List every artifact in the cache folder")
                .arg(cache_folder_arg())
                .arg(config_arg()),
        )
        .subcommand(
            Command::new(CACHE_CLEAR)
                .about("Remove every artifact in the cache folder")
                .arg(cache_folder_arg())
                .arg(config_arg()),
        )
}
