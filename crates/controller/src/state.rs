use tokio::sync::watch;

/// Everything the controller has learned about a single function's cloud resources.
/// Every field is independently optional and transitions unknown -> resolved ->
/// (cleared on delete); re-read from the cloud on each invocation rather than cached
/// across invocations (§3 Lifecycle).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ObservedState {
    pub role_name: Option<String>,
    pub role_arn: Option<String>,
    pub role_id: Option<String>,
    pub qualifier: Option<String>,
    pub function_arn: Option<String>,
    pub image_uri: Option<String>,
    pub function_version: Option<String>,
    pub alias_arn: Option<String>,
    pub function_url: Option<String>,
}

/// The "single-value replayable stream" design note (§9) implemented as one
/// `tokio::sync::watch` channel carrying the whole `ObservedState` snapshot, rather
/// than one broadcast channel per field: `watch` already gives last-value-wins,
/// replay-on-subscribe semantics, and a subscriber naturally observes "whenever any
/// field changes" by awaiting `changed()` on the single channel instead of `select!`ing
/// across nine. See DESIGN.md for why this was chosen over a literal per-field cell.
pub struct StateCell {
    sender: watch::Sender<ObservedState>,
}

impl StateCell {
    pub fn new() -> (StateCell, watch::Receiver<ObservedState>) {
        let (sender, receiver) = watch::channel(ObservedState::default());
        (StateCell { sender }, receiver)
    }

    /// Applies `mutate` to the current snapshot and publishes the result, waking every
    /// subscriber. The producer never blocks on subscribers (watch's defining property).
    pub fn update(&self, mutate: impl FnOnce(&mut ObservedState)) {
        self.sender.send_modify(mutate);
    }

    pub fn current(&self) -> ObservedState {
        self.sender.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ObservedState> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_observes_each_field_update() {
        let (cell, mut receiver) = StateCell::new();
        cell.update(|s| s.role_arn = Some("arn:aws:iam::123:role/x".to_string()));
        receiver.changed().await.unwrap();
        assert_eq!(receiver.borrow().role_arn.as_deref(), Some("arn:aws:iam::123:role/x"));

        cell.update(|s| s.function_arn = Some("arn:aws:lambda:us-east-1:123:function:x".to_string()));
        receiver.changed().await.unwrap();
        assert!(receiver.borrow().function_arn.is_some());
        // role_arn, set before this subscriber's last observation, is still visible:
        // the snapshot carries every field, not just the one that last changed.
        assert!(receiver.borrow().role_arn.is_some());
    }

    #[tokio::test]
    async fn late_subscriber_replays_latest_snapshot() {
        let (cell, _receiver) = StateCell::new();
        cell.update(|s| s.qualifier = Some("$LATEST".to_string()));
        let late = cell.subscribe();
        assert_eq!(late.borrow().qualifier.as_deref(), Some("$LATEST"));
    }
}
