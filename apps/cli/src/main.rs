use std::{
    io::{self, Write},
    sync::Arc,
    time::Duration,
};

use anyhow::Result;
use clap::{Parser, Subcommand};
use client_core::{
    top_dimensions, ApiClient, EvaluationApi, FlowController, FlowPhase, HistoryLog, StartOutcome,
    StepOutcome, SubmitOutcome,
};
use shared::protocol::EvaluationResult;
use storage::{keys, KvStore};
use tracing::debug;

mod settings;

#[derive(Parser, Debug)]
#[command(name = "aiteni", about = "Tennis self-assessment client")]
struct Args {
    #[arg(long)]
    server_url: Option<String>,
    #[arg(long)]
    database_url: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Exchange a host login code for a bearer token.
    Login {
        #[arg(long)]
        code: String,
    },
    /// Take the assessment interactively.
    Run,
    /// List locally stored results.
    History,
    /// Clear saved assessment progress.
    Reset,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    let args = Args::parse();

    let mut settings = settings::load_settings();
    if let Some(url) = args.server_url {
        settings.server_url = url;
    }
    if let Some(url) = args.database_url {
        settings.database_url = url;
    }
    debug!(?settings, "settings resolved");

    let store = Arc::new(KvStore::new(&settings.database_url).await?);
    store.health_check().await?;
    let api = Arc::new(
        ApiClient::new(settings.server_url, store.clone())
            .with_timeout(Duration::from_secs(settings.request_timeout_secs)),
    );

    match args.command {
        Command::Login { code } => {
            let login = api.login(&code).await?;
            println!("Logged in as {}", login.user.open_id);
        }
        Command::Run => run_assessment(api, store).await?,
        Command::History => show_history(store).await?,
        Command::Reset => {
            store
                .remove_many(&[keys::CURRENT_ANSWERS, keys::CURRENT_STAGE, keys::BASIC_ANSWERS])
                .await?;
            println!("Saved progress cleared.");
        }
    }

    Ok(())
}

async fn run_assessment(api: Arc<ApiClient>, store: Arc<KvStore>) -> Result<()> {
    let eval: Arc<dyn EvaluationApi> = api;
    let controller = FlowController::new(eval, store);

    match controller.start().await? {
        StartOutcome::Fresh { total } => {
            println!("Starting assessment: {total} questions.");
        }
        StartOutcome::SavedProgress {
            stage,
            answered,
            total,
        } => {
            let prompt =
                format!("Found an unfinished {stage} assessment ({answered}/{total} answered). Continue it?");
            if prompt_yes_no(&prompt)? {
                controller.resume().await?;
            } else {
                controller.discard_saved().await?;
                println!("Starting over: {total} questions.");
            }
        }
    }

    loop {
        match controller.phase().await {
            FlowPhase::Basic | FlowPhase::Advanced => {
                if !answer_stage(&controller).await? {
                    println!("Progress saved. Run `aiteni run` to continue later.");
                    return Ok(());
                }
            }
            FlowPhase::AwaitingAdvancedDecision => {
                if prompt_yes_no("A short advanced round will refine your rating. Continue?")? {
                    controller.accept_advanced().await?;
                } else {
                    controller.decline_advanced().await?;
                }
            }
            FlowPhase::Done => {
                if let Some(result) = controller.result().await {
                    print_result(&result);
                }
                return Ok(());
            }
            FlowPhase::Idle | FlowPhase::Submitting => return Ok(()),
        }
    }
}

/// Returns `false` when the user quits mid-stage.
async fn answer_stage(controller: &FlowController) -> Result<bool> {
    loop {
        let Some(question) = controller.current_question().await else {
            // The phase moved on (submission or stage transition).
            return Ok(true);
        };
        let snapshot = controller.progress().await;
        if let Some(snapshot) = snapshot {
            println!(
                "\n[{}] question {}/{}",
                question.dimension,
                snapshot.current_index + 1,
                snapshot.total
            );
        }
        println!("{}", question.text);
        for (pos, option) in question.options.iter().enumerate() {
            println!("  {}) {}", pos + 1, option.text);
        }
        if controller.selected_answer().await.is_some() {
            println!("  (already answered; pick again to change)");
        }

        let input = read_line("answer number, (b)ack, (q)uit: ")?;
        match input.as_str() {
            "b" => {
                if controller.previous().await?.is_none() {
                    println!("Already at the first question.");
                }
            }
            "q" => {
                controller.abandon().await;
                return Ok(false);
            }
            other => match other.parse::<usize>() {
                Ok(choice) if (1..=question.options.len()).contains(&choice) => {
                    let option = question.options[choice - 1].id.clone();
                    controller.select_answer(option).await?;
                    match controller.next().await? {
                        StepOutcome::Moved { .. } => {}
                        StepOutcome::StageComplete => {
                            submit_stage(controller).await?;
                            return Ok(true);
                        }
                    }
                }
                _ => println!("Enter a number between 1 and {}.", question.options.len()),
            },
        }
    }
}

async fn submit_stage(controller: &FlowController) -> Result<()> {
    let mut allow_partial = false;
    loop {
        match controller.submit_stage(allow_partial).await {
            Ok(SubmitOutcome::ConfirmPartial { unanswered }) => {
                let prompt = format!(
                    "{} question(s) are still unanswered. Submit anyway?",
                    unanswered.len()
                );
                if prompt_yes_no(&prompt)? {
                    allow_partial = true;
                } else {
                    return Ok(());
                }
            }
            Ok(SubmitOutcome::AdvancedOffered { rounded_level }) => {
                println!("Preliminary level: {rounded_level:.1}");
                return Ok(());
            }
            Ok(SubmitOutcome::Completed(_)) => return Ok(()),
            Err(err) if err.is_retryable() => {
                if !prompt_yes_no(&format!("Submission failed ({err}). Retry?"))? {
                    return Ok(());
                }
            }
            Err(err) => return Err(err.into()),
        }
    }
}

async fn show_history(store: Arc<KvStore>) -> Result<()> {
    let history = HistoryLog::new(store);
    let entries = history.list().await?;
    if entries.is_empty() {
        println!("No local results yet.");
        return Ok(());
    }
    for (pos, result) in entries.iter().enumerate() {
        let best = top_dimensions(result, 3)
            .iter()
            .map(|dimension| dimension.as_str().to_string())
            .collect::<Vec<_>>()
            .join(", ");
        println!(
            "{:>2}. {}  level {:.1} ({})  best: {}",
            pos + 1,
            result.timestamp.format("%Y-%m-%d %H:%M"),
            result.overall_level,
            result.level_label,
            best
        );
    }
    Ok(())
}

fn print_result(result: &EvaluationResult) {
    println!("\nOverall level: {:.1} ({})", result.overall_level, result.level_label);
    println!("Dimension scores:");
    for (dimension, score) in &result.dimensions {
        println!("  {:<14} {score:.1}", dimension.as_str());
    }
    if !result.advantages.is_empty() {
        println!("Strengths: {}", result.advantages.join(", "));
    }
    if !result.weaknesses.is_empty() {
        println!("Focus areas: {}", result.weaknesses.join(", "));
    }
    for (dimension, tips) in &result.suggestions {
        for tip in tips {
            println!("  tip ({}): {tip}", dimension.as_str());
        }
    }
}

fn read_line(prompt: &str) -> Result<String> {
    print!("{prompt}");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

fn prompt_yes_no(prompt: &str) -> Result<bool> {
    loop {
        let answer = read_line(&format!("{prompt} [y/n] "))?;
        match answer.to_ascii_lowercase().as_str() {
            "y" | "yes" => return Ok(true),
            "n" | "no" => return Ok(false),
            _ => println!("Please answer y or n."),
        }
    }
}
