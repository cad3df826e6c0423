use clap::{ArgAction, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "filinglens", about = "SEC filing intelligence and risk pipeline")]
pub struct Cli {
    #[arg(long, global = true, action = ArgAction::SetTrue)]
    pub verbose: bool,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Load the company universe from a seed file.
    Universe {
        #[arg(long, default_value = "filinglens.sqlite")]
        db: String,
        #[arg(long)]
        seed: String,
    },
    /// Run batch passes over the filings named in a manifest.
    Process {
        #[arg(long, default_value = "filinglens.sqlite")]
        db: String,
        #[arg(long)]
        manifest: String,
        #[arg(long, default_value = "chunk,embed,metrics,risks")]
        passes: String,
    },
    /// Ask a natural-language question over the indexed filings.
    Ask {
        question: String,
        #[arg(long, default_value = "filinglens.sqlite")]
        db: String,
        #[arg(long)]
        cik: Option<String>,
        #[arg(long, default_value_t = 5)]
        top_k: usize,
    },
    /// Latest metrics and anomaly flags for a company.
    Metrics {
        cik: String,
        #[arg(long, default_value = "filinglens.sqlite")]
        db: String,
    },
    /// Risk assessment summary for a company.
    Risks {
        cik: String,
        #[arg(long, default_value = "filinglens.sqlite")]
        db: String,
    },
    /// Time series for one metric of one company.
    History {
        cik: String,
        metric: String,
        #[arg(long, default_value = "filinglens.sqlite")]
        db: String,
    },
}
