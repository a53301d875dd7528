use anyhow::Result;
use clap::Parser;
use tokio::sync::mpsc;

use taskwire::{
    config::Settings,
    dashboard,
    store::{ProgressRow, SqliteStore},
    transport::WsConnector,
    utils::now_ts,
    ConnectionManager, ConnectionState, MessageKind, RealtimeData, Snapshot,
};

#[derive(Debug, Parser)]
#[command(name = "taskwire", version)]
struct Cli {
    /// Override REALTIME_URL
    #[arg(long)]
    url: Option<String>,

    /// Task id to follow (repeatable); replaces TASK_IDS
    #[arg(long = "task")]
    tasks: Vec<String>,

    /// Log every frame at info level
    #[arg(long)]
    debug: bool,

    /// Do not start the HTTP dashboard
    #[arg(long)]
    no_dashboard: bool,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let mut settings = Settings::load()?;
    if let Some(url) = cli.url {
        settings.realtime_url = url;
    }
    if !cli.tasks.is_empty() {
        settings.task_ids = cli.tasks;
    }
    if cli.debug {
        settings.realtime_debug = true;
    }
    if cli.no_dashboard {
        settings.dashboard_enabled = false;
    }
    settings.validate()?;

    let store = SqliteStore::new(&settings.sqlite_path)?;
    store.init_db()?;

    log::info!(
        "app.start url={} tasks={} sqlite={}",
        settings.realtime_url,
        settings.task_ids.join(","),
        store.path()
    );

    let manager = ConnectionManager::spawn(settings.connection_options(), WsConnector)?;

    if settings.dashboard_enabled {
        let st = settings.clone();
        let db = store.clone();
        let mgr = manager.clone();
        tokio::spawn(async move {
            if let Err(e) = dashboard::serve_dashboard(st, db, mgr).await {
                log::error!("dashboard.error {}", e);
            }
        });
    }

    let (journal_tx, journal_rx) = mpsc::unbounded_channel::<RealtimeData>();
    tokio::spawn(run_journal(store.clone(), journal_rx));
    tokio::spawn(watch_status(store.clone(), manager.clone()));

    for task_id in &settings.task_ids {
        let tx = journal_tx.clone();
        manager.subscribe(task_id, move |data: &RealtimeData| {
            let _ = tx.send(data.clone());
        });
    }
    drop(journal_tx);

    let first_task = settings.task_ids.first().map(String::as_str);
    if let Err(e) = manager.connect(first_task).await {
        // Retries are exhausted or disabled; the dashboard can still force a reconnect.
        log::error!("app.connect_failed url={} err={}", settings.realtime_url, e);
    }

    tokio::signal::ctrl_c().await?;
    log::info!("app.shutdown");
    manager.shutdown().await;
    Ok(())
}

/// Persists every message for followed tasks and keeps the per-task progress row current.
async fn run_journal(store: SqliteStore, mut rx: mpsc::UnboundedReceiver<RealtimeData>) {
    while let Some(data) = rx.recv().await {
        let Some(task_id) = data.task_id().map(str::to_string) else {
            continue;
        };
        let ts = data.timestamp as f64 / 1000.0;
        if let Err(e) = store.insert_task_event(ts, &task_id, data.kind.as_str(), &data.value) {
            log::warn!("journal.insert_failed task_id={} err={}", task_id, e);
        }

        let res = match data.kind {
            MessageKind::Progress => data.progress().map(|p| {
                store.upsert_task_progress(
                    &task_id,
                    ts,
                    &ProgressRow {
                        progress: Some(p.progress),
                        stage: p.stage.as_deref(),
                        message: p.message.as_deref(),
                        ..Default::default()
                    },
                )
            }),
            MessageKind::Status => data.status().map(|s| {
                store.upsert_task_progress(
                    &task_id,
                    ts,
                    &ProgressRow {
                        status: Some(&s.status),
                        message: s.message.as_deref(),
                        ..Default::default()
                    },
                )
            }),
            MessageKind::Error => data.task_error().map(|err| {
                store.upsert_task_progress(
                    &task_id,
                    ts,
                    &ProgressRow {
                        status: Some("error"),
                        message: Some(&err.message),
                        ..Default::default()
                    },
                )
            }),
            _ => None,
        };
        if let Some(Err(e)) = res {
            log::warn!("journal.progress_failed task_id={} err={}", task_id, e);
        }
    }
}

/// Mirrors manager state changes into the runtime_status table.
async fn watch_status(store: SqliteStore, manager: ConnectionManager) {
    let mut rx = manager.watch();
    loop {
        let snap: Snapshot = rx.borrow_and_update().clone();
        let level = match snap.state {
            ConnectionState::Connected => "info",
            ConnectionState::Connecting | ConnectionState::Reconnecting | ConnectionState::Disconnected => {
                "warn"
            }
            ConnectionState::Error | ConnectionState::Timeout => "error",
        };
        let detail = serde_json::to_string(&snap.metrics).ok();
        if let Err(e) = store.upsert_runtime_status("realtime", level, snap.state.as_str(), detail.as_deref(), now_ts())
        {
            log::warn!("status.write_failed err={}", e);
        }
        if rx.changed().await.is_err() {
            break;
        }
    }
}
