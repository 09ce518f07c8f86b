use anyhow::{Context, bail};
use clap::Parser;
use report_flow::{
    CaseMetadata, ExecutionStatus, FlowRunner, InMemoryProtocolStore, InMemorySessionStorage,
    ModelQuestionPolicy, ProtocolLibrary, QuestionKind, QuestionPolicy, Response, RigCompletion,
    StaticQuestionPolicy, TextCompletion, case_workflow,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing_subscriber::EnvFilter;

/// Walks a single case in the terminal: one question at a time, then the report.
#[derive(Parser)]
#[command(name = "interactive_case")]
#[command(about = "Answer a radiology checklist interview and print the report")]
struct Cli {
    /// Study type as listed in the protocol library (e.g. ct_chest)
    #[arg(long)]
    study_type: String,
    /// Patient age
    #[arg(long)]
    age: String,
    /// Patient gender
    #[arg(long, default_value = "")]
    gender: String,
    /// Clinical history / indication
    #[arg(long)]
    history: String,
    /// Case id (defaults to a timestamp id)
    #[arg(long)]
    case_id: Option<String>,
    /// Protocol library YAML
    #[arg(long, default_value = "protocols/library.yaml")]
    library: PathBuf,
    /// OpenRouter model name
    #[arg(long, default_value = "openai/gpt-4o-mini")]
    model: String,
    /// Ask the fixed questions only (no refinement or follow-ups)
    #[arg(long)]
    static_questions: bool,
    /// Also write the structured report as JSON
    #[arg(long)]
    save_json: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();

    let cli = Cli::parse();
    let api_key = std::env::var("OPENROUTER_API_KEY")
        .context("OPENROUTER_API_KEY environment variable is required")?;

    let library = ProtocolLibrary::load(&cli.library).await?;
    let protocols = InMemoryProtocolStore::from_library(&library);
    let study_types = protocols.study_types();
    if !study_types.contains(&cli.study_type) {
        bail!(
            "unknown study type '{}'; available: {}",
            cli.study_type,
            study_types.join(", ")
        );
    }

    let model: Arc<dyn TextCompletion> =
        Arc::new(RigCompletion::new(&api_key, cli.model.clone(), 0.2));
    let policy: Arc<dyn QuestionPolicy> = if cli.static_questions {
        Arc::new(StaticQuestionPolicy)
    } else {
        Arc::new(ModelQuestionPolicy::new(model.clone()))
    };
    let workflow = case_workflow(model, Arc::new(protocols), policy, library.techniques);
    let runner = FlowRunner::new(Arc::new(workflow), Arc::new(InMemorySessionStorage::new()));

    let mut case = CaseMetadata::new(cli.age, cli.gender, cli.history, cli.study_type);
    if let Some(id) = cli.case_id {
        case = case.with_case_id(id);
    }

    println!("Generating checklist and questions for {}...", case.study_type);
    let (session, mut result) = runner.start(case).await?;
    let case_id = session.id.clone();
    if session.compiled.as_ref().is_some_and(|c| c.used_fallback) {
        println!("Note: the generic question set is in use.");
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while result.status == ExecutionStatus::WaitingForInput {
        let session = runner.load(&case_id).await?;
        let Some(question) = session.interview.current().cloned() else {
            break;
        };
        let progress = session.interview.progress();

        println!();
        println!(
            "[{}/{}] {} > {}",
            progress.position, progress.visible_total, question.category, question.subcategory
        );
        let response = ask_yes_no(&mut lines, &question.prompt_text).await?;

        let mut details = String::new();
        if response == Response::Yes {
            if let QuestionKind::Specific { follow_up, .. } = &question.kind {
                println!("{}", follow_up.render());
                details = ask(&mut lines, "Details: ").await?;
            }
        }

        result = runner.submit_answer(&case_id, response, details).await?;
    }

    let session = runner.load(&case_id).await?;
    let Some(report) = session.report else {
        bail!("case {case_id} finished without a report");
    };
    println!();
    println!("{}", report.to_markdown());

    if let Some(path) = cli.save_json {
        let json = serde_json::to_string_pretty(&report)?;
        tokio::fs::write(&path, json).await?;
        println!("Report saved to {}", path.display());
    }

    Ok(())
}

async fn ask(lines: &mut Lines<BufReader<Stdin>>, prompt: &str) -> anyhow::Result<String> {
    print!("{prompt}");
    std::io::Write::flush(&mut std::io::stdout())?;
    let line = lines.next_line().await?.context("input closed")?;
    Ok(line.trim().to_string())
}

async fn ask_yes_no(
    lines: &mut Lines<BufReader<Stdin>>,
    question: &str,
) -> anyhow::Result<Response> {
    loop {
        let answer = ask(lines, &format!("{question} (y/n): ")).await?;
        match answer.parse() {
            Ok(response) => return Ok(response),
            Err(e) => println!("{e}"),
        }
    }
}
