// ABOUTME: Interrupt flag shared by the pipeline and the sandbox driver
// ABOUTME: Raised once by Ctrl-C or by hand, and observed at every await point of a run

use std::sync::Arc;
use std::task::Poll;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::warn;

/// Raises the interrupt seen by every clone of the paired [`InterruptSignal`]
#[derive(Clone)]
pub struct InterruptTrigger {
    sender: Arc<watch::Sender<bool>>,
}

/// Read side of an interrupt. Once raised it stays raised.
#[derive(Clone)]
pub struct InterruptSignal {
    receiver: watch::Receiver<bool>,
}

pub fn interrupt_channel() -> (InterruptTrigger, InterruptSignal) {
    let (sender, receiver) = watch::channel(false);
    (
        InterruptTrigger {
            sender: Arc::new(sender),
        },
        InterruptSignal { receiver },
    )
}

impl InterruptTrigger {
    pub fn raise(&self) {
        self.sender.send_replace(true);
    }

    /// Raise on the next Ctrl-C.
    ///
    /// The process-wide handler is installed before this returns, so from then on
    /// SIGINT no longer terminates the process. Abort the returned task when the
    /// run is over.
    pub async fn raise_on_ctrl_c(&self) -> JoinHandle<()> {
        let mut ctrl_c = Box::pin(tokio::signal::ctrl_c());
        // The first poll registers the handler
        let first = futures::poll!(&mut ctrl_c);

        let trigger = self.clone();
        tokio::spawn(async move {
            let received = match first {
                Poll::Ready(result) => result,
                Poll::Pending => ctrl_c.await,
            };
            match received {
                Ok(()) => {
                    warn!("Interrupt received; cleaning up the sandbox run");
                    trigger.raise();
                }
                Err(e) => warn!("Failed to listen for Ctrl-C: {}", e),
            }
        })
    }
}

impl InterruptSignal {
    pub fn is_raised(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolves once raised. Never resolves if every trigger is gone unraised.
    pub async fn raised(&self) {
        let mut receiver = self.receiver.clone();
        if receiver.wait_for(|raised| *raised).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_raise_reaches_every_clone() {
        let (trigger, signal) = interrupt_channel();
        let other = signal.clone();
        assert!(!signal.is_raised());

        trigger.raise();

        assert!(signal.is_raised());
        assert!(other.is_raised());
        tokio::time::timeout(Duration::from_secs(1), other.raised())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_raised_waits_for_a_later_raise() {
        let (trigger, signal) = interrupt_channel();
        let waiter = tokio::spawn(async move { signal.raised().await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        trigger.raise();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_dropped_trigger_never_fires() {
        let (trigger, signal) = interrupt_channel();
        drop(trigger);

        let waited = tokio::time::timeout(Duration::from_millis(50), signal.raised()).await;

        assert!(waited.is_err());
        assert!(!signal.is_raised());
    }
}
