use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Result;
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use parking_lot::Mutex;

pub const DEFAULT_DWELL: Duration = Duration::from_millis(250);
pub const DEFAULT_VISIBILITY_THRESHOLD: f64 = 0.6;

/// Receives the view event once a post has dwelled long enough. The call is
/// best-effort; the tracker logs failures and moves on.
pub trait ViewSink: Send + Sync {
    fn register_view(&self, post_id: &str) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct Options {
    pub dwell: Duration,
    pub visibility_threshold: f64,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            dwell: DEFAULT_DWELL,
            visibility_threshold: DEFAULT_VISIBILITY_THRESHOLD,
        }
    }
}

struct PendingTimer {
    token: u64,
    cancel: Sender<()>,
}

#[derive(Default)]
struct TrackState {
    // seen is monotonic within one session; reset() is the only way back.
    seen: HashSet<String>,
    pending: HashMap<String, PendingTimer>,
}

struct Inner {
    sink: Arc<dyn ViewSink>,
    dwell: Duration,
    threshold: f64,
    next_token: AtomicU64,
    state: Mutex<TrackState>,
}

/// Converts visibility changes into at-most-one view event per post per
/// session. A post crossing into substantial visibility arms a cancellable
/// dwell timer; leaving before expiry cancels it under the same lock the
/// firing path re-checks, so cancellation is race-free.
pub struct Tracker {
    inner: Arc<Inner>,
}

impl Tracker {
    pub fn new(sink: Arc<dyn ViewSink>, opts: Options) -> Self {
        Tracker {
            inner: Arc::new(Inner {
                sink,
                dwell: opts.dwell,
                threshold: opts.visibility_threshold,
                next_token: AtomicU64::new(0),
                state: Mutex::new(TrackState::default()),
            }),
        }
    }

    /// Reports the visible fraction of a rendered post.
    pub fn visibility(&self, post_id: &str, ratio: f64) {
        if ratio >= self.inner.threshold {
            self.entered(post_id);
        } else {
            self.left(post_id);
        }
    }

    fn entered(&self, post_id: &str) {
        let token = self.inner.next_token.fetch_add(1, Ordering::SeqCst);
        let (cancel_tx, cancel_rx) = bounded::<()>(1);
        {
            let mut state = self.inner.state.lock();
            if state.seen.contains(post_id) || state.pending.contains_key(post_id) {
                return;
            }
            state.pending.insert(
                post_id.to_string(),
                PendingTimer {
                    token,
                    cancel: cancel_tx,
                },
            );
        }

        let inner = self.inner.clone();
        let post_id = post_id.to_string();
        let dwell = inner.dwell;
        thread::spawn(move || match cancel_rx.recv_timeout(dwell) {
            Err(RecvTimeoutError::Timeout) => inner.fire(&post_id, token),
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {}
        });
    }

    fn left(&self, post_id: &str) {
        let mut state = self.inner.state.lock();
        if let Some(timer) = state.pending.remove(post_id) {
            let _ = timer.cancel.try_send(());
        }
    }

    pub fn has_seen(&self, post_id: &str) -> bool {
        self.inner.state.lock().seen.contains(post_id)
    }

    /// Clears the seen-set and cancels every pending dwell timer. Called on
    /// any session replacement: "seen" is scoped to one session, not to
    /// the device.
    pub fn reset(&self) {
        let mut state = self.inner.state.lock();
        state.seen.clear();
        for (_, timer) in state.pending.drain() {
            let _ = timer.cancel.try_send(());
        }
    }
}

impl Drop for Tracker {
    fn drop(&mut self) {
        self.reset();
    }
}

impl Inner {
    fn fire(&self, post_id: &str, token: u64) {
        {
            let mut state = self.state.lock();
            match state.pending.get(post_id) {
                // A concurrent cancellation or reset already removed the
                // entry (or replaced it with a newer timer); stand down.
                Some(timer) if timer.token == token => {}
                _ => return,
            }
            state.pending.remove(post_id);
            if !state.seen.insert(post_id.to_string()) {
                return;
            }
        }
        if let Err(err) = self.sink.register_view(post_id) {
            log::warn!("view registration for {post_id} failed: {err:#}");
        }
    }
}
