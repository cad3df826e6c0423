mod cli;
mod config;
mod logging;
mod metrics_pass;
mod model;
mod pipeline;
mod risk_pass;

use anyhow::Result;
use clap::Parser;
use serde_json::json;
use tracing_subscriber::EnvFilter;

use filinglens_llm::{LlmClient, LlmRequest};
use filinglens_rag::{answer_question, AnswerRequest, EmbeddingClient, FilingStore};

use crate::cli::{Cli, Command};
use crate::config::PipelineConfig;

fn main() -> Result<()> {
    let cli = Cli::parse();
    let verbose = if cli.verbose {
        true
    } else {
        logging::env_flag()
    };
    logging::init(verbose);
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(if verbose { "info" } else { "warn" })),
        )
        .with_writer(std::io::stderr)
        .init();
    match cli.command {
        Command::Universe { db, seed } => pipeline::load_universe(&db, &seed),
        Command::Process {
            db,
            manifest,
            passes,
        } => pipeline::run_process(&db, &manifest, &passes),
        Command::Ask {
            question,
            db,
            cik,
            top_k,
        } => ask(&question, &db, cik, top_k),
        Command::Metrics { cik, db } => {
            let store = FilingStore::open(&db)?;
            print_json(&store.company_metrics_summary(&cik)?)
        }
        Command::Risks { cik, db } => {
            let store = FilingStore::open(&db)?;
            print_json(&store.company_risk_summary(&cik)?)
        }
        Command::History { cik, metric, db } => {
            let store = FilingStore::open(&db)?;
            let history = store.metric_history(&cik, &metric)?;
            print_json(&json!({
                "cik": cik,
                "metric": metric,
                "history": history
                    .iter()
                    .map(|(period_end, value)| json!({
                        "period_end": period_end,
                        "value": value,
                    }))
                    .collect::<Vec<_>>(),
            }))
        }
    }
}

fn ask(question: &str, db: &str, cik: Option<String>, top_k: usize) -> Result<()> {
    let config = PipelineConfig::from_env()?;
    let store = FilingStore::open(db)?;
    let embeddings = EmbeddingClient::from_env()?;
    let llm = LlmClient::new(config.provider, config.model)?;
    let invoke = |system: Option<&str>, user: &str| {
        llm.chat_blocking(&LlmRequest {
            system: system.map(str::to_string),
            user: user.to_string(),
        })
    };
    let mut request = AnswerRequest::new(question);
    request.company_filter = cik;
    request.top_k = top_k;
    let answer = answer_question(&store, &embeddings, &invoke, &request)?;
    print_json(&answer)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
