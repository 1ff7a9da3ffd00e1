//! Settle-once completion.
//!
//! Only the first `resolve` or `reject` takes effect. A completion whose
//! settlers are all dropped unsettled yields `StreamClosed`.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::sync::oneshot;

use crate::utils::errors::{AgentError, Result};

pub struct Settler<T> {
    slot: Arc<Mutex<Option<oneshot::Sender<Result<T>>>>>,
}

pub struct Settled<T> {
    rx: oneshot::Receiver<Result<T>>,
}

pub fn channel<T>() -> (Settler<T>, Settled<T>) {
    let (tx, rx) = oneshot::channel();
    (
        Settler {
            slot: Arc::new(Mutex::new(Some(tx))),
        },
        Settled { rx },
    )
}

impl<T> Settler<T> {
    pub fn resolve(&self, value: T) -> bool {
        self.settle(Ok(value))
    }

    pub fn reject(&self, error: AgentError) -> bool {
        self.settle(Err(error))
    }

    pub fn is_settled(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_none()
    }

    fn settle(&self, outcome: Result<T>) -> bool {
        let tx = self
            .slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        match tx {
            Some(tx) => {
                // A dropped receiver still counts as settled
                let _ = tx.send(outcome);
                true
            }
            None => false,
        }
    }
}

impl<T> Clone for Settler<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T> Future for Settled<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(AgentError::StreamClosed)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_first_settlement_wins() {
        let (settler, settled) = channel::<u32>();
        let other = settler.clone();

        assert!(!settler.is_settled());
        assert!(settler.resolve(7));
        assert!(!other.reject(AgentError::StreamClosed));
        assert!(!other.resolve(8));
        assert!(other.is_settled());

        assert_eq!(settled.await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_reject() {
        let (settler, settled) = channel::<()>();
        settler.reject(AgentError::Entry {
            path: "a.proto".into(),
            message: "boom".into(),
        });
        assert!(matches!(settled.await, Err(AgentError::Entry { .. })));
    }

    #[tokio::test]
    async fn test_dropped_settler_closes() {
        let (settler, settled) = channel::<()>();
        drop(settler);
        assert!(matches!(settled.await, Err(AgentError::StreamClosed)));
    }

    #[tokio::test]
    async fn test_settle_after_receiver_dropped() {
        let (settler, settled) = channel::<()>();
        drop(settled);
        assert!(settler.resolve(()));
        assert!(settler.is_settled());
    }
}
