use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::{io::AsyncWriteExt, net::TcpListener};
use tracing::{info, warn};

use transaction_log_kv::{
    api::AppState,
    cli::{Backend, Cli, Command, ServeArgs},
    logger::{
        replay_file, replay_table, FileTransactionLogger, SqliteTransactionLogger,
        TransactionLogger,
    },
    replay::restore,
    server::Server,
    store::KvStore,
};

fn init_tracing() {
    use std::io::IsTerminal;
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve(args) => serve(args).await?,
        Command::Dump { backend } => dump(backend).await?,
    }

    Ok(())
}

async fn open_logger(backend: &Backend) -> Result<Arc<dyn TransactionLogger>> {
    let logger: Arc<dyn TransactionLogger> = match backend {
        Backend::File(args) => {
            let logger = FileTransactionLogger::open(&args.path, args.options())
                .await
                .with_context(|| format!("failed to open {}", args.path.display()))?;
            Arc::new(logger)
        }
        Backend::Sqlite(args) => {
            let params = args.params();
            let logger = tokio::task::spawn_blocking(move || SqliteTransactionLogger::open(params))
                .await?
                .with_context(|| format!("failed to open {}", args.path.display()))?;
            Arc::new(logger)
        }
    };
    Ok(logger)
}

async fn serve(args: ServeArgs) -> Result<()> {
    let logger = open_logger(&args.backend).await?;
    let store = Arc::new(KvStore::new());

    restore(logger.as_ref(), &store)
        .await
        .context("refusing to serve: transaction log replay failed")?;

    let listener = TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("failed to bind {}", args.listen))?;
    let server = Server::new(listener, AppState::new(store, logger));
    let addr = server.local_addr()?;
    info!("kv store listening on {}", addr);

    if let Err(err) = server.run_until_signal().await {
        warn!("server exited with error: {err:?}");
        return Err(err);
    }
    Ok(())
}

/// Prints the log without opening it for writing, so it can run next to a
/// live server.
async fn dump(backend: Backend) -> Result<()> {
    let (mut events, mut errors) = match &backend {
        Backend::File(args) => replay_file(&args.path),
        Backend::Sqlite(args) => replay_table(args.params()),
    };

    let mut stdout = tokio::io::stdout();
    while let Some(event) = events.recv().await {
        let mut line = serde_json::to_vec(&event)?;
        line.push(b'\n');
        stdout.write_all(&line).await?;
    }
    stdout.flush().await?;

    if let Some(err) = errors.recv().await {
        return Err(anyhow::Error::new(err).context("transaction log cannot be replayed"));
    }
    Ok(())
}
