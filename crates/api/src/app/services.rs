//! Infrastructure wiring: event store, bus, back office and the push
//! notifier worker.

use std::sync::{Arc, Mutex};

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;

use shopdesk_events::InMemoryEventBus;
use shopdesk_infra::backoffice::{Backoffice, SharedStore};
use shopdesk_infra::event_store::{InMemoryEventStore, PostgresEventStore};
use shopdesk_infra::notifier::{Notifier, NotifierHandle};
use shopdesk_notifications::LoggingPushSender;

use crate::config::AppConfig;

const PG_MAX_CONNECTIONS: u32 = 10;

pub struct AppServices {
    pub backoffice: Arc<Backoffice>,
    pub notifier: Notifier,
    worker: Mutex<Option<NotifierHandle>>,
}

impl std::fmt::Debug for AppServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppServices")
            .field("backoffice", &self.backoffice)
            .finish_non_exhaustive()
    }
}

impl AppServices {
    /// Stops the notifier worker. Safe to call more than once.
    pub fn shutdown(&self) {
        let handle = match self.worker.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            handle.shutdown();
        }
    }
}

/// Builds the store selected by `config`, replays the log into the read
/// models and starts the notifier. Must run inside a tokio runtime.
pub async fn build_services(config: &AppConfig) -> anyhow::Result<AppServices> {
    let store: SharedStore = match &config.database_url {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(PG_MAX_CONNECTIONS)
                .connect(url)
                .await
                .context("failed to connect to DATABASE_URL")?;
            let store = PostgresEventStore::new(pool);
            store
                .ensure_schema()
                .await
                .context("failed to create event store schema")?;
            tracing::info!("using postgres event store");
            Arc::new(store)
        }
        None => {
            tracing::info!("using in-memory event store");
            Arc::new(InMemoryEventStore::new())
        }
    };

    let bus = Arc::new(InMemoryEventBus::new());
    let backoffice = Arc::new(Backoffice::new(store, bus, config.backoffice.clone()));

    let replayed = backoffice.rebuild().context("failed to rebuild read models")?;
    tracing::info!(events = replayed, "read models rebuilt");

    let notifier = Notifier::new(
        backoffice.clone(),
        Arc::new(LoggingPushSender),
        tokio::runtime::Handle::current(),
    );
    let worker = notifier
        .clone()
        .spawn(backoffice.bus())
        .context("failed to start push notifier")?;

    Ok(AppServices {
        backoffice,
        notifier,
        worker: Mutex::new(Some(worker)),
    })
}
