use tokio::sync::oneshot;

/// A broadcast one-shot.
///
/// Zero or more waiters register through [`wait`](Notifier::wait); the next
/// [`fire`](Notifier::fire) delivers the same result to all of them and
/// empties the waiter list. Firing with no waiters registered is a no-op.
///
/// Delivery goes through oneshot channels, so no lock is held while waiters
/// wake up; waiters routinely re-enter the controller that fired them.
pub(crate) struct Notifier<T> {
    waiters: Vec<oneshot::Sender<T>>,
}

impl<T: Clone> Notifier<T> {
    pub fn new() -> Self {
        Self {
            waiters: Vec::new(),
        }
    }

    /// Register a waiter for the next firing.
    pub fn wait(&mut self) -> Waiter<T> {
        let (sender, receiver) = oneshot::channel();
        self.waiters.push(sender);
        Waiter { receiver }
    }

    /// Deliver `result` to every registered waiter and reset.
    pub fn fire(&mut self, result: T) {
        for waiter in self.waiters.drain(..) {
            // a waiter that dropped its future is no longer interested
            let _ = waiter.send(result.clone());
        }
    }

    /// Whether at least one waiter is still pending.
    pub fn has_waiters(&self) -> bool {
        self.waiters.iter().any(|waiter| !waiter.is_closed())
    }
}

/// Registered interest in the next [`Notifier::fire`].
pub(crate) struct Waiter<T> {
    receiver: oneshot::Receiver<T>,
}

impl<T> Waiter<T> {
    /// Resolves with the fired result, or `None` if the notifier went away
    /// without firing.
    pub async fn recv(self) -> Option<T> {
        self.receiver.await.ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_same_result_to_all_waiters() {
        let mut notifier: Notifier<u32> = Notifier::new();

        let first = notifier.wait();
        let second = notifier.wait();
        assert!(notifier.has_waiters());

        notifier.fire(7);

        assert_eq!(first.recv().await, Some(7));
        assert_eq!(second.recv().await, Some(7));
        assert!(!notifier.has_waiters());
    }

    #[tokio::test]
    async fn firing_without_waiters_is_a_no_op() {
        let mut notifier: Notifier<u32> = Notifier::new();
        notifier.fire(1);

        // waiters registered afterwards see the next firing, not the last one
        let waiter = notifier.wait();
        notifier.fire(2);
        assert_eq!(waiter.recv().await, Some(2));
    }

    #[tokio::test]
    async fn dropped_waiters_do_not_count() {
        let mut notifier: Notifier<u32> = Notifier::new();

        let waiter = notifier.wait();
        drop(waiter);
        assert!(!notifier.has_waiters());

        // still safe to fire
        notifier.fire(3);
    }

    #[tokio::test]
    async fn waiter_resolves_to_none_when_notifier_is_dropped() {
        let mut notifier: Notifier<u32> = Notifier::new();
        let waiter = notifier.wait();
        drop(notifier);

        assert_eq!(waiter.recv().await, None);
    }
}
