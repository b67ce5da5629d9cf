//! Command-line utility for managing a running herald instance
//!
//! This tool talks to the control socket to:
//! - Inspect the notification queue (list, view, stats)
//! - Retry or clear failed notifications
//! - Queue a test notification
//! - Check system status

use clap::{Parser, Subcommand, ValueEnum};
use herald_control::{
    ControlClient, DEFAULT_CONTROL_SOCKET, QueueCommand, Request, ResponseData, ResponsePayload,
    SystemCommand,
};

/// Command-line utility for managing herald
#[derive(Parser, Debug)]
#[command(name = "heraldctl")]
#[command(about = "Manage a running herald instance", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the control socket
    #[arg(short = 'c', long, default_value = DEFAULT_CONTROL_SOCKET)]
    control_socket: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Queue inspection and operator actions
    Queue {
        #[command(subcommand)]
        action: QueueAction,
    },
    /// System status and health
    System {
        #[command(subcommand)]
        action: SystemAction,
    },
    /// Queue a test notification for the given address
    SendTest {
        /// Recipient address
        recipient: String,
    },
}

#[derive(Subcommand, Debug)]
enum SystemAction {
    /// Check if herald is responding
    Ping,
    /// Get system status and queue statistics
    Status,
}

#[derive(Subcommand, Debug)]
enum QueueAction {
    /// List messages in the queue
    List {
        /// Filter by status
        #[arg(long, value_enum)]
        status: Option<StatusFilter>,
    },
    /// View detailed information about a specific message
    View {
        /// Message ID to view
        message_id: String,
    },
    /// Give a failed message a fresh retry budget
    Retry {
        /// Message ID to retry
        message_id: String,
    },
    /// Give every failed message a fresh retry budget
    RetryFailed,
    /// Remove every failed message
    ClearFailed,
    /// Show queue statistics
    Stats {
        /// Watch mode - continuously update statistics
        #[arg(long)]
        watch: bool,

        /// Update interval in seconds (for watch mode)
        #[arg(long, default_value = "2")]
        interval: u64,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum StatusFilter {
    Pending,
    InFlight,
    Sent,
    Failed,
}

impl StatusFilter {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InFlight => "in-flight",
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let client = check_control_socket(&cli.control_socket)?;

    match cli.command {
        Commands::System { action } => handle_system_command(&client, action).await,
        Commands::Queue {
            action: QueueAction::Stats { watch, interval },
        } => cmd_stats(&client, watch, interval).await,
        Commands::Queue { action } => handle_queue_command(&client, action).await,
        Commands::SendTest { recipient } => {
            let data = request_data(&client, Request::queue(QueueCommand::SendTest { recipient }))
                .await?;
            print_data(data.as_ref());
            Ok(())
        }
    }
}

fn check_control_socket(socket_path: &str) -> anyhow::Result<ControlClient> {
    let client = ControlClient::new(socket_path);

    // Check if socket exists first for better error messages
    if let Err(e) = client.check_socket_exists() {
        anyhow::bail!(
            "Cannot connect to herald control socket at {socket_path}.\n\
             Error: {e}\n\
             \n\
             Is herald running?\n\
             You can configure the socket path with --control-socket or in herald.config.ron"
        );
    }

    Ok(client)
}

/// Send a request, returning the data it answered with (if any)
async fn request_data(
    client: &ControlClient,
    request: Request,
) -> anyhow::Result<Option<ResponseData>> {
    let response = client.send_request(request).await?;

    match response.payload {
        ResponsePayload::Ok => Ok(None),
        ResponsePayload::Data(data) => Ok(Some(*data)),
        ResponsePayload::Error(err) => anyhow::bail!("Server error: {err}"),
    }
}

fn print_data(data: Option<&ResponseData>) {
    match data {
        None => println!("✓ Command completed successfully"),
        Some(ResponseData::Message(msg)) => println!("✓ {msg}"),
        Some(ResponseData::Affected(count)) => println!("✓ {count} message(s) affected"),
        Some(ResponseData::QueueStats(stats)) => {
            println!("=== Herald Queue Statistics ===\n");
            print!("{stats}");
        }
        Some(ResponseData::QueueList(messages)) => {
            if messages.is_empty() {
                println!("Queue is empty");
            } else {
                println!("=== Queue ({} message(s)) ===\n", messages.len());
                for message in messages {
                    println!("{message}");
                }
            }
        }
        Some(ResponseData::QueueMessageDetails(details)) => print!("{details}"),
        Some(ResponseData::SystemStatus(status)) => {
            println!("=== Herald Status ===\n");
            println!("Version:   {}", status.version);
            println!("Uptime:    {}", format_duration(status.uptime_secs));
            print!("{}", status.queue);
        }
    }
}

/// Handle system management commands
async fn handle_system_command(client: &ControlClient, action: SystemAction) -> anyhow::Result<()> {
    let request = match action {
        SystemAction::Ping => Request::system(SystemCommand::Ping),
        SystemAction::Status => Request::system(SystemCommand::Status),
    };

    match request_data(client, request).await? {
        None => println!("✓ Pong! herald is responding"),
        data => print_data(data.as_ref()),
    }

    Ok(())
}

/// Handle queue commands other than `stats`
async fn handle_queue_command(client: &ControlClient, action: QueueAction) -> anyhow::Result<()> {
    let command = match action {
        QueueAction::List { status } => QueueCommand::List {
            status: status.map(|s| s.as_str().to_string()),
        },
        QueueAction::View { message_id } => QueueCommand::View { message_id },
        QueueAction::Retry { message_id } => QueueCommand::Retry { message_id },
        QueueAction::RetryFailed => QueueCommand::RetryAllFailed,
        QueueAction::ClearFailed => QueueCommand::ClearFailed,
        QueueAction::Stats { .. } => QueueCommand::Stats,
    };

    let data = request_data(client, Request::queue(command)).await?;
    print_data(data.as_ref());

    Ok(())
}

async fn cmd_stats(client: &ControlClient, watch: bool, interval: u64) -> anyhow::Result<()> {
    if watch {
        loop {
            // Clear screen
            print!("\x1B[2J\x1B[1;1H");

            let data = request_data(client, Request::queue(QueueCommand::Stats)).await?;
            print_data(data.as_ref());

            println!("\nPress Ctrl+C to exit");

            tokio::time::sleep(std::time::Duration::from_secs(interval.max(1))).await;
        }
    } else {
        let data = request_data(client, Request::queue(QueueCommand::Stats)).await?;
        print_data(data.as_ref());
    }

    Ok(())
}

/// Format duration in human-readable form
fn format_duration(secs: u64) -> String {
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        let mins = secs / 60;
        let rem_secs = secs % 60;
        format!("{mins}m {rem_secs}s")
    } else if secs < 86400 {
        let hours = secs / 3600;
        let rem_mins = (secs % 3600) / 60;
        format!("{hours}h {rem_mins}m")
    } else {
        let days = secs / 86400;
        let rem_hours = (secs % 86400) / 3600;
        format!("{days}d {rem_hours}h")
    }
}
