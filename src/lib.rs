//! Quest Trail core crate.
//!
//! Tracks progress through a fixed, linear sequence of embedded game steps on a
//! single page. Completion of each step is persisted in localStorage, reported
//! by the embedded games through completion events, and reflected in the
//! page's navigation controls and reward counters.
//!
//! The state machine (`progression`), classifier (`listener`) and store
//! (`store`) are plain Rust and unit tested natively; `page` binds them to the
//! DOM and exposes the wasm entry points.

use wasm_bindgen::prelude::*;

pub mod config;
pub mod counter;
pub mod error;
pub mod listener;
pub mod logging;
pub mod page;
pub mod progression;
pub mod store;

pub use config::{DomSelectors, ProgressionConfig};
pub use error::{ProgressionError, StoreError};
pub use listener::{
    CompletionEvent, CompletionListener, CompletionPolicy, DefaultPolicy, StepCompletionSignal,
};
pub use progression::{
    CounterKind, CounterSlot, Direction, MarkOutcome, ProgressionEngine, ScrollTarget, StepView,
};
pub use store::{CompletionStore, KeyValueStore, MemoryStore};

// Optional small allocator for size (feature gated)
#[cfg(feature = "wee_alloc")]
#[global_allocator]
static ALLOC: wee_alloc::WeeAlloc = wee_alloc::WeeAlloc::INIT;

#[wasm_bindgen(start)]
pub fn wasm_start() {
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();
    logging::init();
}
