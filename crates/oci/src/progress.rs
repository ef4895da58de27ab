use std::sync::Arc;

use indexmap::IndexMap;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;

const TRANSFER_PROGRESS_QUEUE_LEN: usize = 100;

/// Per-item byte counters plus the aggregate summary the upload executor maintains
/// while a transfer is active.
#[derive(Clone, Debug)]
pub struct TransferProgress {
    pub phase: TransferPhase,
    pub items: IndexMap<String, ItemProgress>,
    pub completed: u64,
    pub total: u64,
}

impl Default for TransferProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl TransferProgress {
    pub fn new() -> Self {
        TransferProgress {
            phase: TransferPhase::Planning,
            items: IndexMap::new(),
            completed: 0,
            total: 0,
        }
    }

    pub fn add_item(&mut self, key: &str, total: u64) {
        self.items.insert(
            key.to_string(),
            ItemProgress {
                key: key.to_string(),
                received: 0,
                sent: 0,
                total,
            },
        );
        self.total += 1;
    }

    pub fn receiving(&mut self, key: &str, received: u64, total: u64) {
        if let Some(entry) = self.items.get_mut(key) {
            entry.received = received;
            entry.total = total;
        }
    }

    pub fn sending(&mut self, key: &str, sent: u64) {
        if let Some(entry) = self.items.get_mut(key) {
            entry.sent = sent;
        }
    }

    pub fn item_complete(&mut self, key: &str) {
        if let Some(entry) = self.items.get_mut(key) {
            entry.sent = entry.total;
            entry.received = entry.total;
        }
        self.completed += 1;
        if self.completed == self.total {
            self.phase = TransferPhase::Complete;
        }
    }

    /// `completed/total transfers: <pct>% complete`, the aggregate summary emitted at
    /// the configured cadence while a transfer is active.
    pub fn summary(&self) -> String {
        let pct = if self.total == 0 {
            0
        } else {
            (self.completed * 100) / self.total
        };
        format!(
            "{}/{} transfers: {}% complete",
            self.completed, self.total, pct
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransferPhase {
    Planning,
    Transferring,
    Complete,
}

#[derive(Clone, Debug)]
pub struct ItemProgress {
    pub key: String,
    pub received: u64,
    pub sent: u64,
    pub total: u64,
}

#[derive(Clone)]
pub struct TransferProgressContext {
    sender: broadcast::Sender<TransferProgress>,
}

impl TransferProgressContext {
    pub fn create() -> (TransferProgressContext, broadcast::Receiver<TransferProgress>) {
        let (sender, receiver) = broadcast::channel(TRANSFER_PROGRESS_QUEUE_LEN);
        (TransferProgressContext::new(sender), receiver)
    }

    pub fn new(sender: broadcast::Sender<TransferProgress>) -> TransferProgressContext {
        TransferProgressContext { sender }
    }

    pub fn update(&self, progress: &TransferProgress) {
        let _ = self.sender.send(progress.clone());
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TransferProgress> {
        self.sender.subscribe()
    }
}

/// A `TransferProgress` bound to a broadcast context, so callers can mutate it
/// without threading the sender through every layer of the upload executor.
#[derive(Clone)]
pub struct BoundTransferProgress {
    context: TransferProgressContext,
    instance: Arc<Mutex<TransferProgress>>,
}

impl BoundTransferProgress {
    pub fn new(context: TransferProgressContext, progress: TransferProgress) -> BoundTransferProgress {
        BoundTransferProgress {
            context,
            instance: Arc::new(Mutex::new(progress)),
        }
    }

    pub async fn update(&self, function: impl FnOnce(&mut TransferProgress)) {
        let mut progress = self.instance.lock().await;
        function(&mut progress);
        self.context.update(&progress);
    }

    pub async fn also_update(&self, context: TransferProgressContext) -> JoinHandle<()> {
        let progress = self.instance.lock().await.clone();
        context.update(&progress);
        let mut receiver = self.context.subscribe();
        tokio::task::spawn(async move {
            while let Ok(progress) = receiver.recv().await {
                if context.sender.send(progress).is_err() {
                    break;
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_reports_percent_complete() {
        let mut progress = TransferProgress::new();
        progress.add_item("a", 10);
        progress.add_item("b", 10);
        assert_eq!(progress.summary(), "0/2 transfers: 0% complete");
        progress.item_complete("a");
        assert_eq!(progress.summary(), "1/2 transfers: 50% complete");
        progress.item_complete("b");
        assert_eq!(progress.summary(), "2/2 transfers: 100% complete");
        assert_eq!(progress.phase, TransferPhase::Complete);
    }
}
