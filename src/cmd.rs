use clap::{Parser, Subcommand};

#[derive(Debug, Parser, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Flood a host with raw packets rendered from a job file. Requires root privilege.
    Run {
        #[arg(short, long, help = "Path to the job file (TOML, or JSON with a .json extension)")]
        config: String,
        #[arg(
            short,
            long,
            default_value_t = false,
            help = "Log every rendered packet"
        )]
        debug: bool,
        #[arg(
            long,
            default_value_t = false,
            help = "Print the metrics in Prometheus text format when the job ends"
        )]
        print_metrics: bool,
        #[arg(
            long,
            default_value_t = 1000,
            help = "Period of the traffic reports, in milliseconds"
        )]
        flush_interval_ms: u64,
    },
    /// Render the packet template of a job file and print the decoded packets as JSON,
    /// without sending anything
    Render {
        #[arg(short, long, help = "Path to the job file (TOML, or JSON with a .json extension)")]
        config: String,
        #[arg(short = 'n', long, default_value_t = 1, help = "Number of packets to render")]
        count: u64,
    },
}
