//! Thread-scoped ticker binding.
//!
//! Several workers run concurrently, and nested tool calls deep inside a
//! stage need to know which ticker their thread is working on. A single
//! shared "current ticker" field would be clobbered across workers, so
//! the binding is thread-local, installed at worker entry and cleared on
//! exit via an RAII guard (including on panic).

use std::cell::RefCell;

use crate::domain::TickerId;

thread_local! {
    static CURRENT_TICKER: RefCell<Option<TickerId>> = RefCell::new(None);
}

/// The ticker bound to the calling thread, if any.
pub fn current_ticker() -> Option<TickerId> {
    CURRENT_TICKER.with(|cell| cell.borrow().clone())
}

/// RAII guard binding a ticker to the current thread.
///
/// Restores the previous binding on drop, so nested fan-out threads that
/// re-bind (e.g. per-analyst scoped threads) unwind cleanly.
#[derive(Debug)]
pub struct TickerBinding {
    previous: Option<TickerId>,
}

impl TickerBinding {
    pub fn bind(ticker: TickerId) -> Self {
        let previous = CURRENT_TICKER.with(|cell| cell.borrow_mut().replace(ticker));
        Self { previous }
    }
}

impl Drop for TickerBinding {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT_TICKER.with(|cell| *cell.borrow_mut() = previous);
    }
}
