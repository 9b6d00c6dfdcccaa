use std::io::Write;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use futures::StreamExt;
use tracing_subscriber::EnvFilter;

use studio_chat::chat::CompletionRequest;
use studio_chat::relay::StreamEvent;
use studio_chat::tokens::{self, Encoding};
use studio_chat::{Config, Daemon};

/// Studio chat - completion pipeline for bot-builder conversations
#[derive(Parser)]
#[command(name = "studio-chat", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the HTTP API (default)
    Serve {
        /// Port to listen on
        #[arg(long, env = "STUDIO_PORT")]
        port: Option<u16>,
    },
    /// Run one completion and print it as it streams
    Chat {
        /// Bot to answer as
        #[arg(short, long)]
        bot: String,
        /// User the conversation belongs to
        #[arg(short, long)]
        user: String,
        /// Conversation UUID
        #[arg(short, long)]
        conversation: String,
        /// Organization; defaults to the bot's
        #[arg(long)]
        org: Option<String>,
        /// Model name
        #[arg(short, long, default_value = studio_chat::config::DEFAULT_MODEL)]
        model: String,
        /// Ask for a short, list-free answer
        #[arg(long)]
        brevity: bool,
        /// Ignore prior turns of the conversation
        #[arg(long)]
        exclude_history: bool,
        /// Message to send
        message: String,
    },
    /// Count tokens of a text
    Tokens {
        /// Model whose encoding to use
        #[arg(short, long, default_value = studio_chat::config::DEFAULT_MODEL)]
        model: String,
        /// Text to count
        text: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,studio_chat=info",
        1 => "info,studio_chat=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command.unwrap_or(Command::Serve { port: None }) {
        Command::Serve { port } => serve(port).await,
        Command::Chat {
            bot,
            user,
            conversation,
            org,
            model,
            brevity,
            exclude_history,
            message,
        } => {
            let request = CompletionRequest {
                message,
                model,
                bot_id: bot,
                session_id: conversation,
                user_id: user,
                organization_id: org.unwrap_or_default(),
                brevity,
                exclude_history,
                ..CompletionRequest::default()
            };
            chat(request).await
        }
        Command::Tokens { model, text } => count_tokens(&model, &text),
    }
}

async fn serve(port: Option<u16>) -> anyhow::Result<()> {
    let config = Config::load()?;
    tracing::debug!(?config, "loaded configuration");

    let daemon = Daemon::new(config)?;
    daemon.run(port).await?;
    Ok(())
}

async fn chat(request: CompletionRequest) -> anyhow::Result<()> {
    let daemon = Daemon::new(Config::load()?)?;
    let chat = daemon.chat();

    let Some(hub) = daemon.local_hub() else {
        // Events go to an external service; print once complete
        let message = chat.create_completion(&request, None).await?;
        println!("{message}");
        return Ok(());
    };

    let channel = format!("cli-{}", uuid::Uuid::new_v4());
    let mut events = hub.listen(&channel);
    let printer = tokio::spawn(async move {
        let mut stdout = std::io::stdout();
        while let Some(item) = events.next().await {
            let Ok(event) = item else {
                continue;
            };
            match event {
                StreamEvent::Token { content } => {
                    let _ = write!(stdout, "{content}");
                    let _ = stdout.flush();
                }
                StreamEvent::End => break,
                StreamEvent::Start => {}
            }
        }
        println!();
    });

    // Validation and bot lookup fail before the channel opens, so no `end` follows
    let message = chat
        .create_completion(&request, Some(&channel))
        .await
        .inspect_err(|_| printer.abort())?;
    printer.await?;
    tracing::debug!(chars = message.len(), "completion printed");
    Ok(())
}

fn count_tokens(model: &str, text: &str) -> anyhow::Result<()> {
    let encoding = Encoding::for_model(model);
    let exact = tokens::exact_text_tokens(text, encoding)?;
    let approx = tokens::approx_text_tokens(text);

    println!("encoding: {}", encoding.name());
    println!("exact:    {exact}");
    println!("approx:   {approx:.2}");
    Ok(())
}
