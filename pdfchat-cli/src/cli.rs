use std::path::PathBuf;

use clap::{Parser, Subcommand};
use pdfchat_rag::{Answer, GeminiClient, IngestReport, Pipeline, RagConfig};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;

use crate::server::{AppState, ServerConfig, run_server};
use crate::setup::{GlobalArgs, build_pipeline, load_config, read_documents};

/// Chat with your PDFs: index documents, then ask questions answered only from them.
#[derive(Debug, Parser)]
#[command(name = "pdfchat", version, about)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Index the given documents, replacing any previous index
    Process {
        /// PDF or text files to index
        files: Vec<PathBuf>,
    },
    /// Answer one question from the indexed documents
    Ask {
        question: String,
        /// Number of chunks to retrieve
        #[arg(long)]
        top_k: Option<usize>,
        /// Print the chunks the answer was based on
        #[arg(long)]
        sources: bool,
    },
    /// Ask questions interactively
    Chat {
        /// Print the chunks each answer was based on
        #[arg(long)]
        sources: bool,
    },
    /// List the Gemini models available to GOOGLE_API_KEY
    Models,
    /// Serve the HTTP API
    Serve {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Process { files } => {
            let pipeline = build_pipeline(&cli.global)?;
            let documents = read_documents(&files).await?;
            let report = pipeline.ingest(&documents).await?;
            print_report(&report);
        }
        Command::Ask { question, top_k, sources } => {
            let pipeline = build_pipeline(&cli.global)?;
            let top_k = top_k.unwrap_or(pipeline.config().top_k);
            let answer = pipeline.ask_with_top_k(&question, top_k).await?;
            print_answer(&answer, sources);
        }
        Command::Chat { sources } => {
            let pipeline = build_pipeline(&cli.global)?;
            chat(&pipeline, sources).await?;
        }
        Command::Models => {
            let config = load_config(&cli.global)?;
            list_models(&config).await?;
        }
        Command::Serve { host, port } => {
            let pipeline = build_pipeline(&cli.global)?;
            run_server(AppState::new(pipeline), ServerConfig { host, port }).await?;
        }
    }
    Ok(())
}

fn print_report(report: &IngestReport) {
    for warning in &report.warnings {
        eprintln!("warning: {warning}");
    }
    if report.indexed() {
        println!(
            "Indexed {} document(s): {} page(s), {} chunk(s), {} dimensions.",
            report.documents, report.pages, report.chunks, report.dimensions
        );
    }
}

fn print_answer(answer: &Answer, sources: bool) {
    println!("{}", answer.text.trim());
    if sources {
        for (i, result) in answer.sources.iter().enumerate() {
            println!();
            println!(
                "Chunk {} ({}, score {:.3}):",
                i + 1,
                result.chunk.source,
                result.score
            );
            println!("{}", result.chunk.text);
            println!("---");
        }
    }
}

async fn chat(pipeline: &Pipeline, sources: bool) -> anyhow::Result<()> {
    let mut editor = DefaultEditor::new()?;
    println!("Ask a question about your documents (Ctrl-D or 'exit' to quit).");

    loop {
        let line = match editor.readline("> ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        };
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if matches!(question, "exit" | "quit") {
            break;
        }
        editor.add_history_entry(question)?;

        match pipeline.ask(question).await {
            Ok(answer) => print_answer(&answer, sources),
            Err(e) => eprintln!("{}", e.user_message()),
        }
        println!();
    }
    Ok(())
}

async fn list_models(config: &RagConfig) -> anyhow::Result<()> {
    let client = GeminiClient::from_env(config.request_timeout)?
        .with_retry_policy(config.retry_policy());
    for model in client.list_models().await? {
        println!("Model name: {}", model.name);
        println!("  Display name: {}", model.display_name);
        println!("  Description: {}", model.description);
        println!("  Input token limit: {}", model.input_token_limit);
        println!("  Output token limit: {}", model.output_token_limit);
        println!("{}", "-".repeat(60));
    }
    Ok(())
}
