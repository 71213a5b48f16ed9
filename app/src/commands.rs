use crate::render::ReplyPrinter;
use anyhow::{anyhow, bail, Context, Result};
use clap::Subcommand;
use std::io::{self, BufRead};
use tokio::sync::mpsc;
use tracing::info;
use triage_core::{ApiClient, ChatApi, ChatMode, ClientError, SessionGate};

pub const PASSWORD_ENV: &str = "TRIAGE_PASSWORD";

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Sign in and store the tokens for later commands.
    Login {
        username: String,
        /// Read from TRIAGE_PASSWORD or stdin when omitted.
        #[arg(long)]
        password: Option<String>,
    },
    /// Forget the stored tokens.
    Logout,
    /// Show the signed-in user.
    Whoami,
    /// List chat sessions.
    Sessions {
        #[arg(long, default_value_t = ChatMode::Kb)]
        mode: ChatMode,
    },
    /// Ask a question and stream the answer.
    Chat {
        message: String,
        /// Continue an existing session instead of starting a new one.
        #[arg(long)]
        session: Option<String>,
        #[arg(long, default_value_t = ChatMode::Kb)]
        mode: ChatMode,
        /// Echo the model's reasoning to stderr.
        #[arg(long)]
        show_thinking: bool,
    },
}

pub async fn run(command: Command, client: ApiClient) -> Result<()> {
    let gate = SessionGate::new(client.clone());
    match command {
        Command::Login { username, password } => {
            let password = match password {
                Some(password) => password,
                None => read_password()?,
            };
            gate.login(&username, &password).await.map_err(describe)?;
            let user = gate
                .current_user()
                .ok_or_else(|| anyhow!("login succeeded without a user profile"))?;
            println!("Signed in as {} ({})", user.display_name(), user.role);
        }
        Command::Logout => {
            gate.logout();
            println!("Signed out");
        }
        Command::Whoami => {
            if !gate.initialize().await {
                bail!("not signed in; run `triage login` first");
            }
            if let Some(user) = gate.current_user() {
                println!("{} ({})", user.display_name(), user.role);
            }
        }
        Command::Sessions { mode } => {
            let sessions = ChatApi::new(client).list_sessions(mode).await.map_err(describe)?;
            if sessions.is_empty() {
                println!("No {mode} sessions");
            }
            for session in sessions {
                println!(
                    "{}\t{}\t{}",
                    session.id,
                    session.updated_at.or(session.created_at).unwrap_or_default(),
                    session.title
                );
            }
        }
        Command::Chat {
            message,
            session,
            mode,
            show_thinking,
        } => {
            let chat = ChatApi::new(client);
            let (tx, rx) = mpsc::unbounded_channel();
            let handle = match &session {
                Some(id) => chat.send_message_stream(id, &message, mode, tx).await,
                None => chat.send_message_auto_session(&message, mode, tx).await,
            }
            .map_err(describe)?;
            info!(session = %handle.id(), "awaiting reply");

            let printer = ReplyPrinter::new(io::stdout(), io::stderr(), show_thinking);
            let printer = tokio::select! {
                printer = print_updates(rx, printer) => printer?,
                _ = tokio::signal::ctrl_c() => {
                    handle.cancel();
                    eprintln!("\ncancelled");
                    return Ok(());
                }
            };
            if let Some(err) = printer.failure() {
                return Err(describe(err.clone()));
            }
            if let Some(message) = &printer.reply().error {
                bail!("server reported an error: {message}");
            }
        }
    }
    Ok(())
}

async fn print_updates(
    mut rx: mpsc::UnboundedReceiver<triage_core::SessionUpdate>,
    mut printer: ReplyPrinter<io::Stdout, io::Stderr>,
) -> Result<ReplyPrinter<io::Stdout, io::Stderr>> {
    while let Some(update) = rx.recv().await {
        printer.handle(update)?;
    }
    Ok(printer)
}

fn read_password() -> Result<String> {
    if let Ok(password) = std::env::var(PASSWORD_ENV) {
        return Ok(password);
    }
    eprint!("password: ");
    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("failed to read password from stdin")?;
    let password = line.trim_end_matches(['\r', '\n']).to_string();
    if password.is_empty() {
        bail!("no password given");
    }
    Ok(password)
}

fn describe(err: ClientError) -> anyhow::Error {
    let message = err.user_message();
    anyhow::Error::new(err).context(message)
}
