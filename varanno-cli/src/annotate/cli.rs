use clap::{Arg, ArgAction, Command};

pub const ANNOTATE_CMD: &str = "annotate";

pub fn create_annotate_cli() -> Command {
    Command::new(ANNOTATE_CMD)
        .author("Databio")
        .about("Annotate query variants against a cached reference source")
        .arg(
            Arg::new("reference")
                .long("reference")
                .short('r')
                .required(true)
                .help("Reference source (TSV or VCF, optionally gzipped)"),
        )
        .arg(
            Arg::new("input")
                .long("input")
                .short('i')
                .required(true)
                .help("Query variants, one per line: variant ids, VCF rows or JSON objects. Use '-' for stdin"),
        )
        .arg(
            Arg::new("output")
                .long("output")
                .short('o')
                .help("Output file (default: stdout)"),
        )
        .arg(
            Arg::new("format")
                .long("format")
                .value_parser(["tsv", "json"])
                .default_value("tsv")
                .help("Output format"),
        )
        .arg(
            Arg::new("cache-folder")
                .long("cache-folder")
                .short('f')
                .help("Cache folder path"),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .help("TOML or YAML config file with [cache] and [pipeline] tables"),
        )
        .arg(
            Arg::new("threads")
                .long("threads")
                .short('t')
                .value_parser(clap::value_parser!(usize))
                .help("Worker threads (0 = all cores)"),
        )
        .arg(
            Arg::new("batch-size")
                .long("batch-size")
                .value_parser(clap::value_parser!(usize))
                .help("Variants per batch"),
        )
        .arg(
            Arg::new("normalize")
                .long("normalize")
                .action(ArgAction::SetTrue)
                .help("Upper-case alleles before validation"),
        )
        .arg(
            Arg::new("force-refresh")
                .long("force-refresh")
                .action(ArgAction::SetTrue)
                .help("Rebuild the cached reference even if it is valid"),
        )
        .arg(
            Arg::new("no-progress")
                .long("no-progress")
                .action(ArgAction::SetTrue)
                .help("Hide the progress bar"),
        )
}
