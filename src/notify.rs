//! Fire-and-forget notification dispatch (spec.md §4.6, design notes:
//! "model as a queued send to a notification channel consumed by a
//! separate worker; the phase does not await").

use bitcoin::Txid;
use tokio::sync::mpsc;
use tracing::warn;

use crate::store::WalletId;

#[derive(Debug, Clone)]
pub struct NewTransactionsNotification {
    pub wallet_id: WalletId,
    pub txids: Vec<Txid>,
}

/// The producing half phases hold onto. Cloning is cheap; every clone
/// shares the same bounded queue.
#[derive(Clone)]
pub struct Notifier {
    sender: mpsc::Sender<NewTransactionsNotification>,
}

impl Notifier {
    /// Creates a channel pair. The caller is responsible for driving the
    /// returned receiver with its own worker loop; dropping it turns
    /// [`Notifier::notify_new_transactions`] into a silent no-op.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<NewTransactionsNotification>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Self { sender }, receiver)
    }

    /// Enqueues a notification without awaiting delivery. Per spec.md
    /// §4.6, failures here must never propagate into the pipeline: a full
    /// queue or a dropped receiver is logged and swallowed.
    pub fn notify_new_transactions(&self, wallet_id: WalletId, txids: Vec<Txid>) {
        if txids.is_empty() {
            return;
        }
        let notification = NewTransactionsNotification { wallet_id, txids };
        if let Err(err) = self.sender.try_send(notification) {
            warn!(%wallet_id, %err, "dropping new-transaction notification");
        }
    }
}

#[cfg(test)]
mod tests {
    use bitcoin::hashes::Hash;

    use super::*;

    #[tokio::test]
    async fn notify_delivers_to_receiver() {
        let (notifier, mut rx) = Notifier::channel(4);
        notifier.notify_new_transactions(1, vec![Txid::all_zeros()]);
        let received = rx.recv().await.unwrap();
        assert_eq!(received.wallet_id, 1);
        assert_eq!(received.txids.len(), 1);
    }

    #[test]
    fn notify_with_no_txids_is_a_noop() {
        let (notifier, _rx) = Notifier::channel(4);
        notifier.notify_new_transactions(1, vec![]);
    }

    #[test]
    fn notify_after_receiver_dropped_does_not_panic() {
        let (notifier, rx) = Notifier::channel(1);
        drop(rx);
        notifier.notify_new_transactions(1, vec![Txid::all_zeros()]);
    }
}
