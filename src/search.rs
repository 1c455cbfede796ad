use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Result;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::{Mutex, RwLock};

use crate::api::{SearchKind, Suggestion};
use crate::data::SearchService;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(240);
pub const DEFAULT_SUGGESTION_LIMIT: u32 = 10;

/// What the UI renders from: the suggestion list plus panel state. Replaced
/// wholesale on every applied response.
#[derive(Debug, Clone, Default)]
pub struct SuggestState {
    pub items: Vec<Suggestion>,
    pub open: bool,
    pub loading: bool,
}

/// Outcome of picking a suggestion; the coordinator decides between
/// scrolling to an already-loaded post and opening a full search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    ScrollTo { post_id: String },
    OpenSearch { query: String, kind: SearchKind },
}

#[derive(Debug, Clone)]
pub struct Options {
    pub debounce: Duration,
    pub limit: u32,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            debounce: DEFAULT_DEBOUNCE,
            limit: DEFAULT_SUGGESTION_LIMIT,
        }
    }
}

enum Event {
    Input(String),
    Shutdown,
}

struct Inner {
    service: Arc<dyn SearchService>,
    limit: u32,
    kind: RwLock<SearchKind>,
    // Latest issued request; only a response carrying this value may touch
    // the state. Bumping it silently strands every straggler.
    seq: AtomicU64,
    state: Mutex<SuggestState>,
}

/// Debounced, cancellable suggestion pipeline. Keystrokes funnel through a
/// worker that restarts a fixed delay window on every input; only the
/// window that survives un-reset issues a request, and only the
/// highest-sequence response in flight may replace the suggestion list.
pub struct Suggester {
    inner: Arc<Inner>,
    tx: Sender<Event>,
    worker: Option<thread::JoinHandle<()>>,
}

impl Suggester {
    pub fn new(service: Arc<dyn SearchService>, opts: Options) -> Self {
        let inner = Arc::new(Inner {
            service,
            limit: opts.limit,
            kind: RwLock::new(SearchKind::default()),
            seq: AtomicU64::new(0),
            state: Mutex::new(SuggestState::default()),
        });

        let (tx, rx) = unbounded();
        let worker_inner = inner.clone();
        let debounce = opts.debounce;
        let worker = thread::spawn(move || debounce_loop(worker_inner, rx, debounce));

        Suggester {
            inner,
            tx,
            worker: Some(worker),
        }
    }

    /// Feed one keystroke's worth of query text. Blank input clears the
    /// panel immediately and schedules nothing; any in-flight response is
    /// invalidated so it cannot repopulate the list.
    pub fn input(&self, text: &str) {
        if text.trim().is_empty() {
            self.dismiss();
            return;
        }
        self.inner.state.lock().loading = true;
        let _ = self.tx.send(Event::Input(text.to_string()));
    }

    pub fn set_kind(&self, kind: SearchKind) {
        *self.inner.kind.write() = kind;
    }

    pub fn kind(&self) -> SearchKind {
        *self.inner.kind.read()
    }

    pub fn state(&self) -> SuggestState {
        self.inner.state.lock().clone()
    }

    /// Closes the panel and strands in-flight responses.
    pub fn dismiss(&self) {
        self.inner.invalidate();
        let mut state = self.inner.state.lock();
        state.items.clear();
        state.open = false;
        state.loading = false;
        let _ = self.tx.send(Event::Input(String::new()));
    }

    #[cfg(test)]
    fn begin_request(&self) -> u64 {
        self.inner.begin_request()
    }

    #[cfg(test)]
    fn apply_response(&self, seq: u64, items: Result<Vec<Suggestion>>) {
        self.inner.apply_response(seq, items);
    }
}

impl Drop for Suggester {
    fn drop(&mut self) {
        self.inner.invalidate();
        let _ = self.tx.send(Event::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn debounce_loop(inner: Arc<Inner>, rx: Receiver<Event>, debounce: Duration) {
    let mut pending: Option<String> = None;
    loop {
        let event = if let Some(query) = pending.clone() {
            match rx.recv_timeout(debounce) {
                Ok(event) => event,
                Err(RecvTimeoutError::Timeout) => {
                    // The window survived un-reset; this query fires.
                    pending = None;
                    inner.clone().fire(query);
                    continue;
                }
                Err(RecvTimeoutError::Disconnected) => return,
            }
        } else {
            match rx.recv() {
                Ok(event) => event,
                Err(_) => return,
            }
        };

        match event {
            Event::Input(text) => {
                pending = if text.trim().is_empty() {
                    None
                } else {
                    Some(text)
                };
            }
            Event::Shutdown => return,
        }
    }
}

impl Inner {
    fn begin_request(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn invalidate(&self) {
        self.seq.fetch_add(1, Ordering::SeqCst);
    }

    /// Issues the request on its own thread. In-flight HTTP is not
    /// cancellable, so a superseded response is dropped at application
    /// time instead of aborted at the transport level.
    fn fire(self: Arc<Self>, query: String) {
        let seq = self.begin_request();
        let kind = *self.kind.read();
        let limit = self.limit;
        thread::spawn(move || {
            let result = self.service.suggestions(&query, kind, limit);
            self.apply_response(seq, result);
        });
    }

    fn apply_response(&self, seq: u64, items: Result<Vec<Suggestion>>) {
        let mut state = self.state.lock();
        if seq != self.seq.load(Ordering::SeqCst) {
            // A newer query has been issued; this response is stale.
            return;
        }
        match items {
            Ok(items) => {
                state.items = items;
                state.open = true;
            }
            Err(err) => {
                log::debug!("suggestion request failed: {err:#}");
                state.items.clear();
            }
        }
        state.loading = false;
    }
}
