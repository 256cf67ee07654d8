use clap::{ArgAction, Args, Parser};
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

use chat_escalation_driver::config::{config_path, load_config};
use chat_escalation_driver::desktop::system_desktop;
use chat_escalation_driver::driver::Driver;
use chat_escalation_driver::logging;
use chat_escalation_driver::protocol::{
    read_command, write_result, Action, Command, CommandResult, JsonlReader, Params,
};

#[derive(Parser, Debug)]
#[command(
    name = "chat-escalation-driver",
    version,
    about = "Drives a desktop chat app to escalate a prompt into a named conversation and return the reply"
)]
struct Cli {
    /// Config file (default: $CHAT_ESCALATION_CONFIG, then ~/.chat-escalation/config.json)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Read JSONL commands from stdin and answer each on its own stdout line
    #[arg(long, action = ArgAction::SetTrue, conflicts_with = "action")]
    serve: bool,
    /// Build the command from flags instead of reading it from stdin
    #[arg(long, value_parser = parse_action)]
    action: Option<Action>,
    #[command(flatten)]
    params: ParamArgs,
}

#[derive(Args, Debug, Default)]
struct ParamArgs {
    /// Conversation title
    #[arg(long, requires = "action")]
    label: Option<String>,
    /// Folder/group holding the conversation
    #[arg(long, requires = "action")]
    container_label: Option<String>,
    /// Prompt text
    #[arg(long, requires = "action")]
    message: Option<String>,
    /// Response wait in milliseconds
    #[arg(long, requires = "action")]
    timeout_ms: Option<u64>,
    /// Correlation id echoed in the result (default: random uuid)
    #[arg(long, requires = "action")]
    run_id: Option<String>,
}

impl From<ParamArgs> for Params {
    fn from(args: ParamArgs) -> Self {
        Params {
            label: args.label,
            container_label: args.container_label,
            message: args.message,
            timeout_ms: args.timeout_ms,
            run_id: args.run_id,
        }
    }
}

fn parse_action(raw: &str) -> Result<Action, String> {
    raw.parse()
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Loader warnings go to stderr before the real subscriber exists
    let path = config_path(cli.config.as_deref());
    let config = tracing::subscriber::with_default(
        tracing_subscriber::fmt()
            .with_writer(io::stderr)
            .compact()
            .finish(),
        || load_config(&path),
    );
    let _guard = logging::init(&config.log);
    info!(
        config = %path.display(),
        version = env!("CARGO_PKG_VERSION"),
        serve = cli.serve,
        "chat-escalation-driver starting"
    );

    let desktop = system_desktop();
    let mut driver = match Driver::new(desktop.as_ref(), config) {
        Ok(driver) => driver,
        Err(e) => {
            error!(error = %e, "Driver setup failed");
            let result = CommandResult::failure(&uuid::Uuid::new_v4().to_string(), &e);
            return emit(&result);
        }
    };

    if cli.serve {
        return serve(&mut driver);
    }

    let result = match cli.action {
        Some(action) => driver.execute(Command::new(action, cli.params.into())),
        None => match read_command(io::stdin().lock()) {
            Ok(command) => driver.execute(command),
            Err(e) => driver.reject(&e),
        },
    };
    emit(&result)
}

/// Print the one-shot result; the exit code mirrors `success`.
fn emit(result: &CommandResult) -> ExitCode {
    let mut stdout = io::stdout().lock();
    if let Err(e) = write_result(&mut stdout, result) {
        error!(error = %e, "Failed to write result");
        return ExitCode::FAILURE;
    }
    ExitCode::from(result.exit_code() as u8)
}

/// Answer JSONL commands until stdin closes. Exits non-zero only on I/O failure.
fn serve(driver: &mut Driver<'_>) -> ExitCode {
    let mut reader = JsonlReader::new(io::stdin().lock());
    let mut stdout = io::stdout().lock();
    let mut handled = 0u64;
    loop {
        let result = match reader.next_command() {
            Ok(Some(Ok(command))) => driver.execute(command),
            Ok(Some(Err(e))) => driver.reject(&e),
            Ok(None) => break,
            Err(e) => {
                error!(error = %e, "Failed to read command stream");
                return ExitCode::FAILURE;
            }
        };
        handled += 1;
        if let Err(e) = write_result(&mut stdout, &result) {
            error!(error = %e, "Failed to write result");
            return ExitCode::FAILURE;
        }
    }
    info!(handled, "Command stream closed");
    if let Err(e) = stdout.flush() {
        error!(error = %e, "Failed to flush stdout");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
