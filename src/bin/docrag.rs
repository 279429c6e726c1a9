use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use docrag::logging;
use docrag::{build_pipeline, Document, Pipeline, PipelineArgs, ProviderArgs, Session};
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "docrag",
    about = "Ask questions about PDF or text documents, answered strictly from their content"
)]
struct Cli {
    /// Document to index (repeatable); PDFs and plain text are supported
    #[arg(long = "doc", value_name = "PATH")]
    docs: Vec<PathBuf>,

    /// Ask one question and exit instead of starting the prompt loop
    #[arg(long)]
    question: Option<String>,

    /// Answer from the stored index without re-reading documents
    #[arg(long, default_value_t = false)]
    from_index: bool,

    #[command(flatten)]
    pipeline: PipelineArgs,

    #[command(flatten)]
    providers: ProviderArgs,
}

fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    logging::init(logging::DEFAULT_FILTER);
    let cli = Cli::parse();

    let pipeline = build_pipeline(&cli.pipeline, &cli.providers)?;
    let documents = load_documents(&cli.docs)?;
    info!(
        documents = documents.len(),
        index_dir = %pipeline.settings().index_dir.display(),
        "docrag ready"
    );

    let mut session = Session::new();
    if let Some(question) = cli.question.as_deref() {
        ask(&pipeline, &mut session, &documents, cli.from_index, question);
        return Ok(());
    }

    println!("Ask a question about your documents. Commands: /history, /end, /quit");
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!("> ");
        io::stdout().flush().context("failed to flush stdout")?;
        let Some(line) = lines.next() else {
            break;
        };
        let line = line.context("failed to read from stdin")?;
        match line.trim() {
            "" => continue,
            "/quit" | "/exit" => break,
            "/end" => println!("{}", session.clear()),
            "/history" => print_history(&session),
            question => ask(&pipeline, &mut session, &documents, cli.from_index, question),
        }
    }
    Ok(())
}

fn load_documents(paths: &[PathBuf]) -> Result<Vec<Document>> {
    paths
        .iter()
        .map(|path| {
            Document::from_path(path).with_context(|| format!("failed to read {}", path.display()))
        })
        .collect()
}

fn ask(
    pipeline: &Pipeline,
    session: &mut Session,
    documents: &[Document],
    from_index: bool,
    question: &str,
) {
    let outcome = if from_index {
        pipeline.ask_indexed(session, question)
    } else {
        pipeline.ask(session, documents, question)
    };
    for warning in &outcome.warnings {
        eprintln!("warning: {warning}");
    }
    println!("--- Answer ---\n{}\n", outcome.message);
    print_history(session);
}

fn print_history(session: &Session) {
    if session.is_empty() {
        println!("--- Conversation History ---\n(empty)\n");
    } else {
        println!("--- Conversation History ---\n{}\n", session.render_text());
    }
}
