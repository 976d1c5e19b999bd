use std::future::Future;
use std::sync::Mutex;

use futures::future::BoxFuture;
use tracing::debug;

type ShutdownOp = BoxFuture<'static, ()>;

/// One-shot fan-out of the shutdown signal to registered cleanup
/// operations.
///
/// Each registered operation runs exactly once: buffered while the
/// broadcast is pending, spawned immediately if it has already fired.
/// `broadcast` itself fires at most once.
pub(crate) struct Broadcaster {
    state: Mutex<State>,
}

enum State {
    Pending(Vec<ShutdownOp>),
    Fired,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::Pending(Vec::new())),
        }
    }

    pub fn register<F>(&self, op: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut state = self.state.lock().expect("poisoned broadcaster lock");
        match &mut *state {
            State::Pending(ops) => ops.push(Box::pin(op)),
            State::Fired => {
                drop(state);
                tokio::spawn(op);
            }
        }
    }

    pub fn broadcast(&self) {
        let ops = {
            let mut state = self.state.lock().expect("poisoned broadcaster lock");
            match std::mem::replace(&mut *state, State::Fired) {
                State::Pending(ops) => ops,
                State::Fired => return,
            }
        };
        debug!(operations = ops.len(), "broadcasting shutdown");
        for op in ops {
            tokio::spawn(op);
        }
    }
}
