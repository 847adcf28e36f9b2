use anyhow::{Context, Result};
use clap::Parser;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tradewire::{
    ActionChannel, Command as TradeCommand, Event, EventChannel, EventKind, SessionIdentity,
    cli::{Args, AuthArgs, Command},
    config::Config,
    credentials::{AuthStateFile, CredentialSource, StaticCredential},
    formatter::EventFormatter,
    monitoring::setup_metrics,
    tracing_setup::setup_tracing,
    transport::WebSocketConnector,
};

use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    setup_tracing(&args.log_level, args.json_logs)?;

    info!("Starting tradewire v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_args(&args)?;

    if config.metrics.enabled {
        setup_metrics(config.metrics.port).await?;
        info!("Metrics server started on port {}", config.metrics.port);
    }

    let connector = Arc::new(WebSocketConnector::new()?);

    match args.command.clone() {
        Command::Listen {
            user_id,
            transaction_id,
        } => listen(&config, connector, SessionIdentity::new(user_id, transaction_id)).await,
        Command::Pay {
            trade_id,
            money,
            point,
            auth,
        } => {
            publish(
                &config,
                connector,
                &auth,
                TradeCommand::payment(trade_id, money, point),
            )
            .await
        }
        Command::Confirm { trade_id, auth } => {
            publish(&config, connector, &auth, TradeCommand::trade_confirm(trade_id)).await
        }
    }
}

async fn listen(
    config: &Config,
    connector: Arc<WebSocketConnector>,
    identity: SessionIdentity,
) -> Result<()> {
    let channel = EventChannel::new(config.events.clone(), connector);
    let formatter = Arc::new(Mutex::new(EventFormatter::new(
        config.output.format,
        config.output.colored,
    )));

    if let Some(header) = formatter.lock().header() {
        println!("{}", header);
    }

    let (failed_tx, mut failed_rx) = mpsc::unbounded_channel();
    for kind in EventKind::ALL {
        let formatter = formatter.clone();
        let failed_tx = failed_tx.clone();
        channel.add_event_listener(kind, move |payload| {
            let event = Event::new(kind, payload.clone());
            formatter.lock().print_event(&event);
            if kind == EventKind::ConnectionFailed {
                let _ = failed_tx.send(());
            }
        });
    }

    channel.connect(identity)?;

    let mut states = channel.watch_state();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl+C received, shutting down");
                break;
            }
            _ = failed_rx.recv() => {
                error!("Event stream gave up after repeated failures");
                break;
            }
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *states.borrow_and_update();
                info!("{}", formatter.lock().format_state(state));
            }
        }
    }

    channel.disconnect();
    channel.wait_closed().await;
    info!(health = %channel.stats().to_json(), "Listener stopped");
    Ok(())
}

async fn publish(
    config: &Config,
    connector: Arc<WebSocketConnector>,
    auth: &AuthArgs,
    command: TradeCommand,
) -> Result<()> {
    let credentials: Arc<dyn CredentialSource> = match (&auth.token, &auth.auth_file) {
        (Some(token), _) => Arc::new(StaticCredential::new(token.clone())),
        (None, Some(path)) => Arc::new(AuthStateFile::new(path)),
        (None, None) => Arc::new(StaticCredential::none()),
    };

    let channel = ActionChannel::new(config.actions.clone(), connector, credentials);
    channel
        .connect()
        .context("provide a token with --token, TRADEWIRE_TOKEN or --auth-file")?;
    channel.wait_until_open().await?;

    channel.send_command(&command)?;
    info!(destination = %command.destination, body = %command.body, "Command submitted");
    warn!("Commands are not acknowledged on this channel; watch the event stream for the result");

    channel.disconnect();
    channel.wait_closed().await;
    Ok(())
}
