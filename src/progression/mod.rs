//! Step progression state machine.
//!
//! The engine owns the current step (1-based, always within `1..=N`) and
//! derives every piece of navigation UI from it plus the completion store:
//!
//! - "next" is enabled iff the current step is completed and is not the last;
//! - "previous" is enabled and shown iff the current step is not the first;
//! - exactly one step region, the current one, is visible;
//! - "finish" is shown iff every step is completed, the last step is current,
//!   and the terminal grant has not been persisted.
//!
//! Completion state is never cached across renders; every render reads the
//! store. Rewards and the terminal grant are guarded by persisted flags so a
//! reload cannot replay them.

mod view;

pub use view::{CounterKind, CounterSlot, ScrollTarget, StepView};

use tracing::{debug, info};

use crate::config::ProgressionConfig;
use crate::counter;
use crate::error::ProgressionError;
use crate::store::{CompletionStore, KeyValueStore};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

/// Result of [`ProgressionEngine::mark_step_complete`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MarkOutcome {
    /// Newly recorded; effects applied.
    Marked { all_levels_completed: bool },
    /// Already recorded; nothing happened.
    AlreadyCompleted,
    /// Index outside `1..=N`; ignored.
    OutOfRange,
}

pub struct ProgressionEngine<V, S> {
    slug: String,
    step_count: usize,
    current_step: usize,
    has_completed_all_levels: bool,
    store: CompletionStore<S>,
    view: V,
    config: ProgressionConfig,
}

impl<V: StepView, S: KeyValueStore> ProgressionEngine<V, S> {
    /// Build the engine for one page load and render the initial state.
    /// A blank slug or zero steps aborts before touching the view.
    pub fn new(
        slug: impl Into<String>,
        step_count: usize,
        backing: S,
        view: V,
        config: ProgressionConfig,
    ) -> Result<Self, ProgressionError> {
        let slug = slug.into();
        if slug.trim().is_empty() {
            return Err(ProgressionError::MissingSlug);
        }
        if step_count == 0 {
            return Err(ProgressionError::NoSteps);
        }
        let store = CompletionStore::new(config.storage_namespace.clone(), backing);
        let mut engine = Self {
            slug,
            step_count,
            current_step: 1,
            has_completed_all_levels: false,
            store,
            view,
            config,
        };
        engine.apply_state();
        info!(
            slug = %engine.slug,
            steps = engine.step_count,
            first_completed = engine.is_step_completed(1),
            "progression initialized"
        );
        Ok(engine)
    }

    pub fn slug(&self) -> &str {
        &self.slug
    }

    pub fn step_count(&self) -> usize {
        self.step_count
    }

    pub fn current_step(&self) -> usize {
        self.current_step
    }

    pub fn has_completed_all_levels(&self) -> bool {
        self.has_completed_all_levels
    }

    pub fn is_step_completed(&self, index: usize) -> bool {
        self.store.get(&self.slug, index)
    }

    pub fn terminal_granted(&self) -> bool {
        self.store.get_terminal(&self.slug)
    }

    pub fn view(&self) -> &V {
        &self.view
    }

    pub fn view_mut(&mut self) -> &mut V {
        &mut self.view
    }

    pub fn config(&self) -> &ProgressionConfig {
        &self.config
    }

    /// Sync every navigation control and step region with the current step.
    pub fn apply_state(&mut self) {
        let current = self.current_step;
        let last = self.step_count;
        let next_enabled = current < last && self.is_step_completed(current);
        self.view.set_next_enabled(next_enabled);
        self.view.set_previous_enabled(current > 1);
        for index in 1..=last {
            self.view.set_step_visible(index, index == current);
        }
        self.has_completed_all_levels = (1..=last).all(|index| self.is_step_completed(index));
        let finish_visible =
            self.has_completed_all_levels && current == last && !self.terminal_granted();
        self.view.set_finish_visible(finish_visible);
        debug!(current, last, next_enabled, finish_visible, "state applied");
    }

    /// Move one step. Returns `false` (and changes nothing) at either end.
    pub fn advance(&mut self, direction: Direction) -> bool {
        let target = match direction {
            Direction::Forward if self.current_step < self.step_count => self.current_step + 1,
            Direction::Backward if self.current_step > 1 => self.current_step - 1,
            _ => {
                debug!(?direction, current = self.current_step, "advance ignored at boundary");
                return false;
            }
        };
        self.view.set_step_visible(self.current_step, false);
        self.current_step = target;
        self.apply_state();
        let scroll = match direction {
            Direction::Forward => ScrollTarget::StepStart(target),
            Direction::Backward => ScrollTarget::StepCenter(target),
        };
        self.view.scroll_to(scroll, 0);
        info!(?direction, current = target, "advanced");
        true
    }

    /// Record step `index` as completed and apply its one-shot effects.
    ///
    /// `raw_score`, when present, is added to the points counters and also
    /// grants the fixed coin reward. Calling this again for a recorded step
    /// is a no-op. The record is persisted before any reward is shown, so a
    /// failed write grants nothing.
    pub fn mark_step_complete(
        &mut self,
        index: usize,
        raw_score: Option<f64>,
    ) -> Result<MarkOutcome, ProgressionError> {
        if index == 0 || index > self.step_count {
            debug!(index, "mark ignored: out of range");
            return Ok(MarkOutcome::OutOfRange);
        }
        if self.is_step_completed(index) {
            debug!(index, "mark ignored: already completed");
            return Ok(MarkOutcome::AlreadyCompleted);
        }
        self.store.set(&self.slug, index)?;

        if let Some(raw) = raw_score {
            let points = if raw.is_finite() { raw.max(0.0).round() as u64 } else { 0 };
            self.add_to_counter(CounterKind::Points, points);
            self.add_to_counter(CounterKind::Coins, self.config.coin_reward);
        }
        self.apply_state();
        self.view.scroll_to(ScrollTarget::Navigation, self.config.scroll_delay_ms);
        self.view.celebrate();
        info!(
            index,
            ?raw_score,
            all_levels_completed = self.has_completed_all_levels,
            "step completed"
        );
        Ok(MarkOutcome::Marked { all_levels_completed: self.has_completed_all_levels })
    }

    /// One-shot terminal grant behind the "finish" control. Only fires when
    /// every step is completed, the last step is current, and the grant has
    /// not been persisted yet.
    pub fn finish(&mut self) -> Result<bool, ProgressionError> {
        if self.terminal_granted() {
            self.view.set_finish_visible(false);
            debug!("finish ignored: already granted");
            return Ok(false);
        }
        if !self.has_completed_all_levels || self.current_step != self.step_count {
            debug!(current = self.current_step, "finish ignored: sequence not complete");
            return Ok(false);
        }
        self.store.set_terminal(&self.slug)?;
        self.view.set_finish_visible(false);
        info!(slug = %self.slug, "all levels reward granted");
        Ok(true)
    }

    fn add_to_counter(&mut self, kind: CounterKind, delta: u64) {
        let separator = self.config.thousands_separator;
        for slot in CounterSlot::ALL {
            let Some(text) = self.view.counter_text(kind, slot) else {
                continue;
            };
            let updated = counter::increment_text(&text, delta, separator);
            self.view.set_counter_text(kind, slot, &updated);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::collections::HashMap;

    #[derive(Default)]
    struct Recorder {
        next: bool,
        previous: bool,
        finish: bool,
        visible: HashMap<usize, bool>,
        counters: HashMap<(CounterKind, CounterSlot), String>,
        scrolls: Vec<(ScrollTarget, u32)>,
        celebrations: usize,
    }

    impl Recorder {
        fn with_counters() -> Self {
            let mut r = Self::default();
            for kind in [CounterKind::Points, CounterKind::Coins] {
                for slot in CounterSlot::ALL {
                    r.counters.insert((kind, slot), "0".to_string());
                }
            }
            r
        }

        fn visible_steps(&self) -> Vec<usize> {
            let mut v: Vec<usize> =
                self.visible.iter().filter(|(_, on)| **on).map(|(i, _)| *i).collect();
            v.sort_unstable();
            v
        }
    }

    impl StepView for Recorder {
        fn set_next_enabled(&mut self, enabled: bool) {
            self.next = enabled;
        }
        fn set_previous_enabled(&mut self, enabled: bool) {
            self.previous = enabled;
        }
        fn set_step_visible(&mut self, index: usize, visible: bool) {
            self.visible.insert(index, visible);
        }
        fn set_finish_visible(&mut self, visible: bool) {
            self.finish = visible;
        }
        fn counter_text(&self, kind: CounterKind, slot: CounterSlot) -> Option<String> {
            self.counters.get(&(kind, slot)).cloned()
        }
        fn set_counter_text(&mut self, kind: CounterKind, slot: CounterSlot, text: &str) {
            self.counters.insert((kind, slot), text.to_string());
        }
        fn scroll_to(&mut self, target: ScrollTarget, delay_ms: u32) {
            self.scrolls.push((target, delay_ms));
        }
        fn celebrate(&mut self) {
            self.celebrations += 1;
        }
    }

    fn engine(steps: usize) -> ProgressionEngine<Recorder, MemoryStore> {
        ProgressionEngine::new(
            "intro",
            steps,
            MemoryStore::new(),
            Recorder::with_counters(),
            ProgressionConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn rejects_missing_context() {
        let cfg = ProgressionConfig::default();
        let err = ProgressionEngine::new(" ", 3, MemoryStore::new(), Recorder::default(), cfg.clone())
            .err();
        assert_eq!(err, Some(ProgressionError::MissingSlug));
        let err = ProgressionEngine::new("intro", 0, MemoryStore::new(), Recorder::default(), cfg).err();
        assert_eq!(err, Some(ProgressionError::NoSteps));
    }

    #[test]
    fn exactly_one_region_visible_for_every_step() {
        for n in 1..=5 {
            let mut e = engine(n);
            for expected in 1..=n {
                assert_eq!(e.view().visible_steps(), vec![expected]);
                assert_eq!(e.view().previous, expected > 1);
                e.mark_step_complete(expected, None).unwrap();
                e.advance(Direction::Forward);
            }
            assert_eq!(e.current_step(), n);
        }
    }

    #[test]
    fn next_requires_completion_of_current() {
        let mut e = engine(3);
        assert!(!e.view().next);
        e.mark_step_complete(1, Some(10.0)).unwrap();
        assert!(e.view().next);
    }

    #[test]
    fn next_stays_disabled_on_last_step_even_when_completed() {
        let mut e = engine(2);
        e.mark_step_complete(1, None).unwrap();
        e.advance(Direction::Forward);
        e.mark_step_complete(2, None).unwrap();
        e.apply_state();
        assert!(!e.view().next);
    }

    #[test]
    fn advance_is_noop_at_boundaries() {
        let mut e = engine(1);
        assert!(!e.advance(Direction::Backward));
        assert!(!e.advance(Direction::Forward));
        assert_eq!(e.current_step(), 1);
        assert!(e.view().scrolls.is_empty());
    }

    #[test]
    fn scroll_targets_are_asymmetric() {
        let mut e = engine(3);
        e.advance(Direction::Forward);
        e.advance(Direction::Backward);
        assert_eq!(
            e.view().scrolls,
            vec![(ScrollTarget::StepStart(2), 0), (ScrollTarget::StepCenter(1), 0)]
        );
    }

    #[test]
    fn mark_applies_rewards_once() {
        let mut e = engine(3);
        let first = e.mark_step_complete(1, Some(850.0)).unwrap();
        assert_eq!(first, MarkOutcome::Marked { all_levels_completed: false });
        let again = e.mark_step_complete(1, Some(850.0)).unwrap();
        assert_eq!(again, MarkOutcome::AlreadyCompleted);
        for slot in CounterSlot::ALL {
            assert_eq!(e.view().counter_text(CounterKind::Points, slot).unwrap(), "850");
            assert_eq!(e.view().counter_text(CounterKind::Coins, slot).unwrap(), "200");
        }
        assert_eq!(e.view().celebrations, 1);
        assert_eq!(e.view().scrolls, vec![(ScrollTarget::Navigation, 250)]);
    }

    #[test]
    fn mark_without_score_skips_rewards() {
        let mut e = engine(2);
        e.mark_step_complete(1, None).unwrap();
        assert_eq!(e.view().counter_text(CounterKind::Coins, CounterSlot::Primary).unwrap(), "0");
        assert_eq!(e.view().celebrations, 1);
    }

    #[test]
    fn out_of_range_mark_is_ignored() {
        let mut e = engine(2);
        assert_eq!(e.mark_step_complete(0, None).unwrap(), MarkOutcome::OutOfRange);
        assert_eq!(e.mark_step_complete(3, None).unwrap(), MarkOutcome::OutOfRange);
        assert_eq!(e.view().celebrations, 0);
    }

    #[test]
    fn finish_appears_only_on_last_step_and_grants_once() {
        let mut e = engine(2);
        e.mark_step_complete(1, None).unwrap();
        assert!(!e.finish().unwrap());
        e.advance(Direction::Forward);
        let outcome = e.mark_step_complete(2, None).unwrap();
        assert_eq!(outcome, MarkOutcome::Marked { all_levels_completed: true });
        assert!(e.view().finish);
        assert!(e.finish().unwrap());
        assert!(!e.view().finish);
        assert!(e.terminal_granted());
        assert!(!e.finish().unwrap());
    }

    #[test]
    fn finish_follows_current_step() {
        let mut e = engine(2);
        e.mark_step_complete(1, None).unwrap();
        e.advance(Direction::Forward);
        e.mark_step_complete(2, None).unwrap();
        assert!(e.view().finish);

        e.advance(Direction::Backward);
        assert!(!e.view().finish);
        assert!(!e.finish().unwrap());
        assert!(!e.terminal_granted());

        e.advance(Direction::Forward);
        assert!(e.view().finish);
        assert!(e.finish().unwrap());
    }

    // Step records persist; the terminal flag write is rejected.
    #[derive(Default)]
    struct TerminalQuotaStore(MemoryStore);

    impl KeyValueStore for TerminalQuotaStore {
        fn get_item(&self, key: &str) -> Result<Option<String>, crate::error::StoreError> {
            self.0.get_item(key)
        }
        fn set_item(&mut self, key: &str, value: &str) -> Result<(), crate::error::StoreError> {
            if key.ends_with(":all-levels") {
                return Err(crate::error::StoreError::Write {
                    key: key.to_string(),
                    reason: "quota".into(),
                });
            }
            self.0.set_item(key, value)
        }
    }

    #[test]
    fn failed_terminal_write_keeps_finish_offered() {
        let mut e = ProgressionEngine::new(
            "intro",
            1,
            TerminalQuotaStore::default(),
            Recorder::default(),
            ProgressionConfig::default(),
        )
        .unwrap();
        e.mark_step_complete(1, None).unwrap();
        assert!(e.view().finish);
        assert!(matches!(e.finish(), Err(ProgressionError::Store(_))));
        assert!(e.view().finish);
        assert!(!e.terminal_granted());
    }

    #[test]
    fn single_step_sequence_restores_finish_after_reload() {
        let mut store = MemoryStore::new();
        store.set_item("quest-trail:solo:step-1", "true").unwrap();
        let e = ProgressionEngine::new(
            "solo",
            1,
            store,
            Recorder::default(),
            ProgressionConfig::default(),
        )
        .unwrap();
        assert!(e.has_completed_all_levels());
        assert!(e.view().finish);
        assert!(!e.view().next);
    }
}
