use std::path::Path;

use tokio::sync::{mpsc, oneshot};

use kiroku_core::error::KirokuError;
use kiroku_core::models::{ListItemRow, UserList};
use kiroku_core::storage::Storage;

/// Read access to the library from async code.
///
/// The scheduler owns the writing connection; this handle owns a second one
/// on a dedicated thread and answers queries over a channel.
#[derive(Clone)]
pub struct StoreHandle {
    tx: mpsc::UnboundedSender<StoreCommand>,
}

enum StoreCommand {
    Lists {
        reply: oneshot::Sender<Result<Vec<UserList>, KirokuError>>,
    },
    ListItems {
        list_id: i64,
        reply: oneshot::Sender<Result<Vec<ListItemRow>, KirokuError>>,
    },
}

impl StoreHandle {
    pub fn open(path: &Path) -> Result<Self, KirokuError> {
        let storage = Storage::open(path)?;
        let (tx, rx) = mpsc::unbounded_channel();

        std::thread::Builder::new()
            .name("store-reader".into())
            .spawn(move || actor_loop(storage, rx))?;

        Ok(Self { tx })
    }

    pub async fn lists(&self) -> Result<Vec<UserList>, KirokuError> {
        let (reply, rx) = oneshot::channel();
        let _ = self.tx.send(StoreCommand::Lists { reply });
        rx.await.unwrap_or_else(|_| Err(closed()))
    }

    pub async fn list_items(&self, list_id: i64) -> Result<Vec<ListItemRow>, KirokuError> {
        let (reply, rx) = oneshot::channel();
        let _ = self.tx.send(StoreCommand::ListItems { list_id, reply });
        rx.await.unwrap_or_else(|_| Err(closed()))
    }
}

fn closed() -> KirokuError {
    KirokuError::Config("store reader closed".into())
}

fn actor_loop(storage: Storage, mut rx: mpsc::UnboundedReceiver<StoreCommand>) {
    while let Some(cmd) = rx.blocking_recv() {
        match cmd {
            StoreCommand::Lists { reply } => {
                let _ = reply.send(storage.lists());
            }
            StoreCommand::ListItems { list_id, reply } => {
                let _ = reply.send(storage.list_items(list_id));
            }
        }
    }
    tracing::debug!("Store reader stopped");
}
