use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tabsync_core::{
    load_config, DurableMirror, Identity, LocalHub, MemoryMirror, MirrorError, RocksMirror,
    RocksMirrorConfig, Session, SessionConfig, SessionSnapshot,
};

#[derive(Parser)]
#[command(
    name = "tabsync-demo",
    version,
    about = "Simulate several tabs syncing users, a counter and chat without a server"
)]
struct Cli {
    /// Path to JSON config file (millisecond fields)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
    /// Number of simulated tabs
    #[arg(long, default_value_t = 3)]
    tabs: usize,
    /// Persist the shared mirror in RocksDB at this path instead of memory
    #[arg(long, value_name = "DIR")]
    data_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), MirrorError> {
    env_logger::init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => load_config(path),
        None => SessionConfig::default(),
    };
    let mirror: Arc<dyn DurableMirror> = match &cli.data_dir {
        Some(dir) => Arc::new(RocksMirror::open(RocksMirrorConfig {
            path: dir.clone(),
            ..RocksMirrorConfig::default()
        })?),
        None => Arc::new(MemoryMirror::new()),
    };
    let hub = LocalHub::default();

    let mut tabs: Vec<Session> = (0..cli.tabs.max(1))
        .map(|_| {
            Session::start(
                Identity::generate(),
                Arc::new(hub.clone()),
                mirror.clone(),
                config.clone(),
            )
        })
        .collect();

    // Let the first presence round close.
    tokio::time::sleep(config.probe_window + Duration::from_millis(100)).await;

    tabs[0].increment().await;
    tabs[0].increment().await;
    if let Some(tab) = tabs.get(1) {
        tab.decrement().await;
        tab.mark_typing(true).await;
    }
    let last = tabs.len() - 1;
    tabs[last].send_message("hello from the last tab", None).await;
    tabs[0].send_message("this one expires in a minute", Some(Duration::from_secs(60))).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    for tab in &tabs {
        report(&tab.snapshot().await);
    }

    if tabs.len() > 1 {
        let mut closed = tabs.remove(last);
        log::info!("Closing tab {}", closed.identity().name);
        closed.shutdown();
        tokio::time::sleep(config.presence_interval + config.probe_window * 2).await;
        report(&tabs[0].snapshot().await);
    }

    for tab in &mut tabs {
        tab.shutdown();
    }
    Ok(())
}

fn report(snapshot: &SessionSnapshot) {
    let me = &snapshot.current_user;
    let active: Vec<_> = snapshot
        .active_ids
        .iter()
        .map(|id| snapshot.display_name(id))
        .collect();
    let typing: Vec<_> = snapshot
        .typing_users
        .iter()
        .map(|t| snapshot.display_name(&t.user_id))
        .collect();
    log::info!(
        "[{}] active: {:?} | count: {} (last by {}) | messages: {} | typing: {:?}",
        me.name,
        active,
        snapshot.count,
        snapshot
            .last_modified_by
            .as_deref()
            .map(|id| snapshot.display_name(id))
            .unwrap_or_else(|| "nobody".to_string()),
        snapshot.messages.len(),
        typing,
    );
    for message in &snapshot.messages {
        log::info!(
            "[{}]   {}: {}",
            me.name,
            snapshot.display_name(&message.user_id),
            message.text
        );
    }
}
