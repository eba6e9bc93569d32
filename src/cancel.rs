//! Cooperative cancellation.
//!
//! A [`Canceler`] is created by the caller of an asynchronous operation and handed down to
//! everything that operation waits on. Collaborators register cleanup callbacks with
//! [`Canceler::on_cancel`]; [`Canceler::cancel`] runs each of them exactly once. A callback
//! registered after cancellation has already happened runs immediately, so a late
//! registration is never lost.
use std::fmt;
use std::sync::{Arc, Mutex};

use crate::{Error, Result};

type Callback = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct State {
    canceled: bool,
    callbacks: Vec<Callback>,
}

/// Shared cancellation token. Clones refer to the same token.
#[derive(Clone, Default)]
pub struct Canceler {
    state: Arc<Mutex<State>>,
}

impl Canceler {
    pub fn new() -> Canceler {
        Canceler::default()
    }

    /// Register `f` to run on cancellation. Runs `f` right away if already canceled.
    pub fn on_cancel<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.state.lock().unwrap();
        if state.canceled {
            drop(state);
            f();
        } else {
            state.callbacks.push(Box::new(f));
        }
    }

    /// Cancel and run all registered callbacks. Subsequent calls do nothing.
    pub fn cancel(&self) {
        let callbacks = {
            let mut state = self.state.lock().unwrap();
            if state.canceled {
                return;
            }
            state.canceled = true;
            std::mem::take(&mut state.callbacks)
        };

        // Callbacks may register further callbacks, so the lock is released first.
        for f in callbacks {
            f();
        }
    }

    pub fn is_canceled(&self) -> bool {
        self.state.lock().unwrap().canceled
    }

    /// `Err(Error::Canceled)` once canceled.
    pub fn check(&self) -> Result<()> {
        if self.is_canceled() {
            Err(Error::Canceled)
        } else {
            Ok(())
        }
    }
}

impl fmt::Debug for Canceler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock().unwrap();
        f.debug_struct("Canceler")
            .field("canceled", &state.canceled)
            .field("callbacks", &state.callbacks.len())
            .finish()
    }
}
