// UI capability the engine drives. The browser implementation lives in
// `crate::page`; tests use an in-memory recorder.

/// Which reward counter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CounterKind {
    Points,
    Coins,
}

/// Each counter is shown twice on the page (header and sticky footer).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CounterSlot {
    Primary,
    Mirror,
}

impl CounterSlot {
    pub const ALL: [CounterSlot; 2] = [CounterSlot::Primary, CounterSlot::Mirror];
}

/// Scroll destination requested after a transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScrollTarget {
    /// Align the top of step `n` with the viewport top.
    StepStart(usize),
    /// Center step `n` in the viewport.
    StepCenter(usize),
    /// The persistent navigation bar.
    Navigation,
}

pub trait StepView {
    fn set_next_enabled(&mut self, enabled: bool);
    /// "previous" is enabled and shown together, or disabled and hidden.
    fn set_previous_enabled(&mut self, enabled: bool);
    /// `index` is 1-based.
    fn set_step_visible(&mut self, index: usize, visible: bool);
    fn set_finish_visible(&mut self, visible: bool);
    fn counter_text(&self, kind: CounterKind, slot: CounterSlot) -> Option<String>;
    fn set_counter_text(&mut self, kind: CounterKind, slot: CounterSlot, text: &str);
    /// Smooth scroll, optionally deferred by `delay_ms` (fire-and-forget).
    fn scroll_to(&mut self, target: ScrollTarget, delay_ms: u32);
    fn celebrate(&mut self);
}
