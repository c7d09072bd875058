//! A simple terminal front end for the `parley` conversation engine.

#[macro_use]
extern crate tracing;

use std::env;
use std::future::poll_fn;
use std::io::Write as _;
use std::pin::pin;
use std::sync::{Arc, Mutex};

use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;
use parley::tools::ShellTool;
use parley_core::{
    AgentBuilder, AgentDirectory, Permission, RunEvent, RunOutcome,
    ToolRegistry,
};
use parley_model::{
    ModelMessage, ModelProvider, ModelRequest, ModelResponse,
};
use parley_openai_model::{OpenAIConfigBuilder, OpenAIProvider};
use tokio::io::{self, AsyncBufReadExt};

const BAR_CHAR: &str = "▎";

const SIDEKICK_PROMPT: &str = "You are Sidekick, a terse research \
assistant. Peers route questions to you; answer them in plain text, in \
one or two sentences, with no commands.";

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let Ok(api_key) = env::var("OPENAI_API_KEY") else {
        eprintln!("OPENAI_API_KEY environment variable is not set");
        return;
    };
    let Ok(base_url) = env::var("OPENAI_BASE_URL") else {
        eprintln!("OPENAI_BASE_URL environment variable is not set");
        return;
    };
    let Ok(model) = env::var("OPENAI_MODEL") else {
        eprintln!("OPENAI_MODEL environment variable is not set");
        return;
    };

    // Validate the endpoint configuration with a one-shot buffered
    // request before anything else starts.
    let probe_config = OpenAIConfigBuilder::with_api_key(api_key.clone())
        .with_base_url(base_url.clone())
        .with_model(model.clone())
        .with_streaming(false)
        .build();
    if let Err(err) = probe_endpoint(&OpenAIProvider::new(probe_config)).await
    {
        eprintln!("endpoint check failed: {err}");
        eprintln!("check OPENAI_BASE_URL, OPENAI_MODEL and OPENAI_API_KEY");
        return;
    }

    let config = OpenAIConfigBuilder::with_api_key(api_key)
        .with_base_url(base_url)
        .with_model(model)
        .build();

    let registry = ToolRegistry::new();
    let directory = AgentDirectory::new();
    registry.register(ShellTool, Permission::agents(["parley"]));

    let _sidekick =
        AgentBuilder::with_model_provider(OpenAIProvider::new(config.clone()))
            .with_name("sidekick")
            .with_system_prompt(SIDEKICK_PROMPT)
            .with_registry(registry.clone())
            .with_directory(directory.clone())
            .build()
            .expect("sidekick configuration is incomplete");

    let spinner: Arc<Mutex<Option<ProgressBar>>> = Arc::default();
    let agent =
        AgentBuilder::with_model_provider(OpenAIProvider::new(config))
            .with_name("parley")
            .with_system_prompt(
                include_str!("./system_prompt.md")
                    .replace("{{HOST_OS}}", host_os()),
            )
            .with_registry(registry)
            .with_directory(directory)
            .on_event({
                let spinner = Arc::clone(&spinner);
                move |event| print_event(event, &spinner)
            })
            .build()
            .expect("agent configuration is incomplete");

    let progress_style = ProgressStyle::with_template("{spinner} {wide_msg}")
        .unwrap()
        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏");

    loop {
        print!("> ");
        std::io::stdout().flush().unwrap();

        let Some(line) = read_line().await else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let progress_bar = ProgressBar::new_spinner();
        progress_bar.set_style(progress_style.clone());
        progress_bar.set_message("🤔 Thinking...");
        progress_bar.enable_steady_tick(std::time::Duration::from_millis(100));
        *spinner.lock().unwrap() = Some(progress_bar);

        let outcome = agent.run(line).await;
        if let Some(progress_bar) = spinner.lock().unwrap().take() {
            progress_bar.finish_and_clear();
        }

        match outcome {
            Ok(RunOutcome::Finished(_)) => println!(),
            Ok(RunOutcome::Completed(_)) => {
                // The engine only ends the run; whether that also ends
                // the session is this front end's call.
                println!("{}", "task complete, bye".bright_green());
                break;
            }
            Ok(RunOutcome::BudgetExceeded) => {
                println!(
                    "{}",
                    "the agent ran out of turns for this request".yellow()
                );
            }
            Err(err) => {
                eprintln!("{}", format!("run failed: {err}").bright_red());
            }
        }
    }
}

fn print_event(event: RunEvent, spinner: &Mutex<Option<ProgressBar>>) {
    // Clear the spinner before the first output of a turn.
    if let Some(progress_bar) = spinner.lock().unwrap().take() {
        progress_bar.finish_and_clear();
    }
    match event {
        RunEvent::Fragment(fragment) => {
            print!("{fragment}");
            std::io::stdout().flush().unwrap();
        }
        RunEvent::ToolInvocation(name) => {
            println!(
                "\n{}🔧 running {}",
                BAR_CHAR.bright_yellow(),
                name.bright_white().bold()
            );
        }
        RunEvent::Usage(usage) => {
            println!(
                "\n{}{}",
                BAR_CHAR.bright_cyan(),
                format!(
                    "used {} prompt + {} completion = {} tokens",
                    usage.prompt_tokens,
                    usage.completion_tokens,
                    usage.total_tokens
                )
                .dimmed()
            );
        }
        RunEvent::Completed(report) => {
            if let Some(report) = report {
                println!(
                    "\n{}📋 {}",
                    BAR_CHAR.bright_green(),
                    report.bright_white()
                );
            }
        }
    }
}

/// Sends a minimal buffered request and drains the response, verifying
/// that the endpoint, model and credential actually work together.
async fn probe_endpoint(provider: &OpenAIProvider) -> Result<(), String> {
    let request = ModelRequest {
        messages: vec![ModelMessage::User("hello".to_owned())],
    };
    let response = provider
        .send_request(&request)
        .await
        .map_err(|err| err.to_string())?;
    let mut response = pin!(response);
    while poll_fn(|cx| response.as_mut().poll_next_event(cx))
        .await
        .map_err(|err| err.to_string())?
        .is_some()
    {}
    Ok(())
}

async fn read_line() -> Option<String> {
    let mut stdin = io::BufReader::new(io::stdin());
    let mut line = String::new();

    match stdin.read_line(&mut line).await {
        Ok(count) => {
            if count == 0 {
                return None;
            }
            Some(line)
        }
        Err(err) => {
            error!("error reading input: {}", err);
            None
        }
    }
}

#[inline]
fn host_os() -> &'static str {
    let os = std::env::consts::OS;
    match os {
        "linux" => "Linux",
        "macos" => "macOS",
        "windows" => "Windows",
        _ => "some other OS",
    }
}
