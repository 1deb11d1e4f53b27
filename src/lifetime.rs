//! External lifetime token observed by the resolver factory.
//!
//! The owner ends a lifetime either by cancelling it
//! ([`LifetimeOwner::cancel`]) or with an error reason
//! ([`LifetimeOwner::fail`]). The factory treats either ending as fatal and
//! terminates the process; the [`Ending`] only decides what gets logged.
//! Dropping the owner leaves the lifetime running forever.

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;

/// How a lifetime ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ending {
    Cancelled,
    Failed(Arc<str>),
}

/// Observer side of a lifetime.
#[derive(Debug, Clone)]
pub struct Lifetime {
    state: watch::Receiver<Option<Ending>>,
}

/// Controlling side of a lifetime.
#[derive(Debug)]
pub struct LifetimeOwner {
    state: watch::Sender<Option<Ending>>,
}

impl Lifetime {
    pub fn channel() -> (LifetimeOwner, Lifetime) {
        let (tx, rx) = watch::channel(None);
        (LifetimeOwner { state: tx }, Lifetime { state: rx })
    }

    /// A lifetime nobody can end.
    pub fn background() -> Lifetime {
        Self::channel().1
    }

    /// Whether the lifetime has already ended.
    pub fn is_ended(&self) -> bool {
        self.state.borrow().is_some()
    }

    /// Wait until the lifetime ends.
    ///
    /// Never completes if the owner is dropped without ending it.
    pub async fn ended(mut self) -> Ending {
        loop {
            if let Some(ending) = self.state.borrow_and_update().clone() {
                return ending;
            }
            if self.state.changed().await.is_err() {
                if let Some(ending) = self.state.borrow().clone() {
                    return ending;
                }
                return std::future::pending().await;
            }
        }
    }
}

impl LifetimeOwner {
    /// End the lifetime without an error.
    pub fn cancel(self) {
        self.end(Ending::Cancelled);
    }

    /// End the lifetime with an error.
    pub fn fail(self, reason: impl fmt::Display) {
        self.end(Ending::Failed(reason.to_string().into()));
    }

    fn end(&self, ending: Ending) {
        self.state.send_if_modified(|state| {
            if state.is_none() {
                *state = Some(ending);
                true
            } else {
                false
            }
        });
    }
}
