use tokio::sync::watch;

use crate::{model::QuizState, mutation::Mutator};

/// What a view renders: the session state and whether the first snapshot arrived.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreView {
    /// Session state; `None` before loading or when the session does not exist.
    pub state: Option<QuizState>,
    /// The first snapshot (or the not-found outcome) arrived.
    pub is_loaded: bool,
}

/// In-memory copy of the session state owned by one client.
///
/// Every change is published on a `watch` channel; updates that leave the view unchanged are
/// not announced.
#[derive(Debug)]
pub struct LocalStore {
    view: watch::Sender<StoreView>,
}

impl Default for LocalStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalStore {
    /// Empty, not yet loaded store.
    pub fn new() -> Self {
        Self {
            view: watch::Sender::new(StoreView::default()),
        }
    }

    /// Current state and loaded flag. Never blocks.
    pub fn read(&self) -> StoreView {
        self.view.borrow().clone()
    }

    /// Receiver notified on every change of the view.
    pub fn subscribe(&self) -> watch::Receiver<StoreView> {
        self.view.subscribe()
    }

    /// Apply `mutator` to the current state and adopt the result right away.
    ///
    /// Returns the new state, or `None` when nothing is loaded.
    pub fn write(&self, mutator: &dyn Mutator) -> Option<QuizState> {
        let mut written = None;
        self.view.send_if_modified(|view| {
            let Some(current) = view.state.as_ref() else {
                return false;
            };
            let next = mutator.apply(current);
            let changed = &next != current;
            written = Some(next.clone());
            view.state = Some(next);
            changed
        });
        written
    }

    /// Adopt a snapshot received from the channel. Returns whether the view changed.
    pub fn adopt_remote(&self, state: Option<QuizState>) -> bool {
        self.view.send_if_modified(|view| {
            if view.is_loaded && view.state == state {
                return false;
            }
            view.state = state;
            view.is_loaded = true;
            true
        })
    }

    /// A session was selected and its first snapshot is pending.
    pub fn mark_loading(&self) {
        self.replace(StoreView::default());
    }

    /// Joining failed or the session does not exist.
    pub fn mark_failed(&self) {
        self.replace(StoreView {
            state: None,
            is_loaded: true,
        });
    }

    /// Use `state` as the local value before any remote copy exists.
    pub fn seed(&self, state: QuizState) {
        self.replace(StoreView {
            state: Some(state),
            is_loaded: true,
        });
    }

    fn replace(&self, next: StoreView) {
        self.view.send_if_modified(|view| {
            if *view == next {
                return false;
            }
            *view = next;
            true
        });
    }
}
