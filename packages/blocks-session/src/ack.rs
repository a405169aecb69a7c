use log::trace;
use tokio::sync::oneshot;

use crate::session::SessionError;

pub(crate) type AckWaiter = oneshot::Receiver<Result<(), SessionError>>;

/// The single outstanding "wait for the next ack" continuation.
///
/// A waiter is always completed, either by [`AckSlot::resolve`] or with
/// [`SessionError::Closed`] by [`AckSlot::cancel`]. Arming the slot cancels
/// whatever waiter it held before.
#[derive(Debug, Default)]
pub(crate) struct AckSlot {
    waiter: Option<oneshot::Sender<Result<(), SessionError>>>,
}

impl AckSlot {
    pub fn arm(&mut self) -> AckWaiter {
        self.cancel();

        let (tx, rx) = oneshot::channel();
        self.waiter = Some(tx);
        rx
    }

    /// Completes the waiter successfully. Returns `false` if nothing was waiting.
    pub fn resolve(&mut self) -> bool {
        match self.waiter.take() {
            Some(tx) => {
                // The receiver may already be gone if its wait timed out.
                let _ = tx.send(Ok(()));
                true
            }
            None => false,
        }
    }

    pub fn cancel(&mut self) {
        if let Some(tx) = self.waiter.take() {
            trace!("Cancelling pending ack wait");
            let _ = tx.send(Err(SessionError::Closed));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::AckSlot;
    use crate::SessionError;

    #[test]
    fn resolves_once() {
        let mut slot = AckSlot::default();
        let mut waiter = slot.arm();

        assert!(slot.resolve());
        assert!(!slot.resolve());
        assert!(matches!(waiter.try_recv(), Ok(Ok(()))));
    }

    #[test]
    fn rearming_cancels_previous_waiter() {
        let mut slot = AckSlot::default();
        let mut first = slot.arm();
        let mut second = slot.arm();

        assert!(matches!(first.try_recv(), Ok(Err(SessionError::Closed))));
        assert!(second.try_recv().is_err());

        slot.cancel();
        assert!(!slot.resolve());
        assert!(matches!(second.try_recv(), Ok(Err(SessionError::Closed))));
    }
}
