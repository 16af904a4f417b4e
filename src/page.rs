//! Browser adapter: binds the engine to the hosting page.
//!
//! `start_progression()` discovers the slug, step regions and controls, builds
//! the engine, then wires click, `hashchange` and completion-event listeners.
//! Discovery happens before anything is touched, so a page missing its
//! context is left exactly as it was; listeners go on last and are detached
//! again if any of them fails to attach.

use std::cell::RefCell;

use tracing::{debug, info, warn};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{
    window, CustomEvent, Document, Element, HtmlElement, ScrollBehavior, ScrollIntoViewOptions,
    ScrollLogicalPosition, Storage,
};

use crate::config::{DomSelectors, ProgressionConfig};
use crate::error::{ProgressionError, StoreError};
use crate::listener::CompletionListener;
use crate::progression::{
    CounterKind, CounterSlot, Direction, MarkOutcome, ProgressionEngine, ScrollTarget, StepView,
};
use crate::store::{KeyValueStore, MemoryStore};

type PageEngine = ProgressionEngine<DomView, BrowserStorage>;

thread_local! {
    static ENGINE: RefCell<Option<PageEngine>> = const { RefCell::new(None) };
    static LISTENER: CompletionListener = CompletionListener::default();
}

// --- Storage -----------------------------------------------------------------

/// localStorage, or an in-memory map when the browser refuses storage access.
pub enum BrowserStorage {
    Local(Storage),
    Memory(MemoryStore),
}

impl BrowserStorage {
    fn open(win: &web_sys::Window) -> Self {
        match win.local_storage() {
            Ok(Some(storage)) => BrowserStorage::Local(storage),
            Ok(None) => {
                warn!("localStorage unavailable; progress will not survive reload");
                BrowserStorage::Memory(MemoryStore::new())
            }
            Err(err) => {
                warn!(error = ?err, "localStorage access denied; progress will not survive reload");
                BrowserStorage::Memory(MemoryStore::new())
            }
        }
    }
}

impl KeyValueStore for BrowserStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StoreError> {
        match self {
            BrowserStorage::Local(storage) => storage.get_item(key).map_err(|e| StoreError::Read {
                key: key.to_string(),
                reason: format!("{e:?}"),
            }),
            BrowserStorage::Memory(mem) => mem.get_item(key),
        }
    }

    fn set_item(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        match self {
            BrowserStorage::Local(storage) => {
                storage.set_item(key, value).map_err(|e| StoreError::Write {
                    key: key.to_string(),
                    reason: format!("{e:?}"),
                })
            }
            BrowserStorage::Memory(mem) => mem.set_item(key, value),
        }
    }
}

// --- View --------------------------------------------------------------------

pub struct DomView {
    document: Document,
    previous: HtmlElement,
    next: HtmlElement,
    finish: Option<HtmlElement>,
    steps: Vec<HtmlElement>,
    navigation: Option<Element>,
    counters: Vec<(CounterKind, CounterSlot, Element)>,
    celebrate_event: String,
}

impl DomView {
    fn discover(document: &Document, sel: &DomSelectors) -> Result<Self, ProgressionError> {
        let nodes = document.query_selector_all(&sel.steps).map_err(ProgressionError::dom)?;
        let mut steps = Vec::with_capacity(nodes.length() as usize);
        for i in 0..nodes.length() {
            if let Some(el) = nodes.get(i).and_then(|n| n.dyn_into::<HtmlElement>().ok()) {
                steps.push(el);
            }
        }
        if steps.is_empty() {
            return Err(ProgressionError::NoSteps);
        }

        let html_by_id = |id: &str| -> Option<HtmlElement> {
            document.get_element_by_id(id).and_then(|el| el.dyn_into::<HtmlElement>().ok())
        };
        let previous = html_by_id(&sel.previous_button)
            .ok_or_else(|| ProgressionError::MissingControl(sel.previous_button.clone()))?;
        let next = html_by_id(&sel.next_button)
            .ok_or_else(|| ProgressionError::MissingControl(sel.next_button.clone()))?;

        let mut counters = Vec::new();
        for (kind, slot, id) in [
            (CounterKind::Points, CounterSlot::Primary, &sel.points_counter),
            (CounterKind::Points, CounterSlot::Mirror, &sel.points_counter_mirror),
            (CounterKind::Coins, CounterSlot::Primary, &sel.coins_counter),
            (CounterKind::Coins, CounterSlot::Mirror, &sel.coins_counter_mirror),
        ] {
            if let Some(el) = document.get_element_by_id(id) {
                counters.push((kind, slot, el));
            }
        }

        Ok(Self {
            document: document.clone(),
            previous,
            next,
            finish: html_by_id(&sel.finish_button),
            steps,
            navigation: document.get_element_by_id(&sel.navigation_anchor),
            counters,
            celebrate_event: sel.celebrate_event.clone(),
        })
    }

    fn step_count(&self) -> usize {
        self.steps.len()
    }

    fn counter(&self, kind: CounterKind, slot: CounterSlot) -> Option<&Element> {
        self.counters
            .iter()
            .find(|(k, s, _)| *k == kind && *s == slot)
            .map(|(_, _, el)| el)
    }

    fn step(&self, index: usize) -> Option<&HtmlElement> {
        index.checked_sub(1).and_then(|i| self.steps.get(i))
    }
}

fn set_disabled(el: &HtmlElement, disabled: bool) {
    if disabled {
        el.set_attribute("disabled", "").ok();
    } else {
        el.remove_attribute("disabled").ok();
    }
    el.set_attribute("aria-disabled", if disabled { "true" } else { "false" }).ok();
}

fn scroll_element(el: &Element, block: ScrollLogicalPosition) {
    let opts = ScrollIntoViewOptions::new();
    opts.set_behavior(ScrollBehavior::Smooth);
    opts.set_block(block);
    el.scroll_into_view_with_scroll_into_view_options(&opts);
}

/// `setTimeout` takes a signed 32-bit delay; longer delays saturate.
fn timeout_arg(delay_ms: u32) -> i32 {
    i32::try_from(delay_ms).unwrap_or(i32::MAX)
}

/// Run `f` after `delay_ms` on the event loop. Not cancelable.
fn defer(delay_ms: u32, f: impl FnOnce() + 'static) {
    let Some(win) = window() else { return };
    let callback = Closure::once_into_js(f);
    if let Err(err) = win.set_timeout_with_callback_and_timeout_and_arguments_0(
        callback.unchecked_ref(),
        timeout_arg(delay_ms),
    ) {
        warn!(error = ?err, "setTimeout failed");
    }
}

impl StepView for DomView {
    fn set_next_enabled(&mut self, enabled: bool) {
        set_disabled(&self.next, !enabled);
    }

    fn set_previous_enabled(&mut self, enabled: bool) {
        set_disabled(&self.previous, !enabled);
        self.previous.set_hidden(!enabled);
    }

    fn set_step_visible(&mut self, index: usize, visible: bool) {
        if let Some(step) = self.step(index) {
            step.set_hidden(!visible);
        }
    }

    fn set_finish_visible(&mut self, visible: bool) {
        if let Some(finish) = &self.finish {
            finish.set_hidden(!visible);
        }
    }

    fn counter_text(&self, kind: CounterKind, slot: CounterSlot) -> Option<String> {
        self.counter(kind, slot).map(|el| el.text_content().unwrap_or_default())
    }

    fn set_counter_text(&mut self, kind: CounterKind, slot: CounterSlot, text: &str) {
        if let Some(el) = self.counter(kind, slot) {
            el.set_text_content(Some(text));
        }
    }

    fn scroll_to(&mut self, target: ScrollTarget, delay_ms: u32) {
        let (el, block): (Option<Element>, _) = match target {
            ScrollTarget::StepStart(i) => {
                (self.step(i).map(|s| s.clone().into()), ScrollLogicalPosition::Start)
            }
            ScrollTarget::StepCenter(i) => {
                (self.step(i).map(|s| s.clone().into()), ScrollLogicalPosition::Center)
            }
            ScrollTarget::Navigation => (self.navigation.clone(), ScrollLogicalPosition::Start),
        };
        let Some(el) = el else {
            debug!(?target, "scroll target not on page");
            return;
        };
        if delay_ms == 0 {
            scroll_element(&el, block);
        } else {
            defer(delay_ms, move || scroll_element(&el, block));
        }
    }

    fn celebrate(&mut self) {
        // Dispatched on the next tick: host listeners may call back into the
        // exports while the engine is still borrowed.
        let document = self.document.clone();
        let name = self.celebrate_event.clone();
        defer(0, move || match CustomEvent::new(&name) {
            Ok(event) => {
                document.dispatch_event(&event).ok();
            }
            Err(err) => warn!(error = ?err, "could not create celebration event"),
        });
    }
}

// --- Engine access -----------------------------------------------------------

fn with_engine<R>(f: impl FnOnce(&mut PageEngine) -> R) -> Option<R> {
    ENGINE.with(|cell| match cell.try_borrow_mut() {
        Ok(mut guard) => guard.as_mut().map(f),
        Err(_) => {
            warn!("progression engine busy; call dropped");
            None
        }
    })
}

fn read_slug(document: &Document, sel: &DomSelectors) -> Result<String, ProgressionError> {
    document
        .query_selector(&sel.slug_host)
        .map_err(ProgressionError::dom)?
        .and_then(|el| el.get_attribute(&sel.slug_attribute))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or(ProgressionError::MissingSlug)
}

type Listener = Closure<dyn FnMut(web_sys::Event)>;

/// DOM listeners attached during startup. Dropping the set detaches them, so
/// a startup that fails halfway leaves no handlers behind; `keep()` hands them
/// to the page for its lifetime.
#[derive(Default)]
struct ListenerSet {
    attached: Vec<(web_sys::EventTarget, &'static str, Listener)>,
}

impl ListenerSet {
    fn listen(
        &mut self,
        target: &web_sys::EventTarget,
        kind: &'static str,
        mut handler: impl FnMut() + 'static,
    ) -> Result<(), ProgressionError> {
        let closure: Listener =
            Closure::wrap(Box::new(move |_evt: web_sys::Event| handler()) as Box<dyn FnMut(_)>);
        target
            .add_event_listener_with_callback(kind, closure.as_ref().unchecked_ref())
            .map_err(ProgressionError::dom)?;
        self.attached.push((target.clone(), kind, closure));
        Ok(())
    }

    fn keep(mut self) {
        for (_, _, closure) in self.attached.drain(..) {
            closure.forget();
        }
    }
}

impl Drop for ListenerSet {
    fn drop(&mut self) {
        for (target, kind, closure) in self.attached.drain(..) {
            target
                .remove_event_listener_with_callback(kind, closure.as_ref().unchecked_ref())
                .ok();
        }
    }
}

fn attach_listeners(win: &web_sys::Window, view: &DomView) -> Result<(), ProgressionError> {
    let mut listeners = ListenerSet::default();
    listeners.listen(&view.next, "click", || {
        with_engine(|e| e.advance(Direction::Forward));
    })?;
    listeners.listen(&view.previous, "click", || {
        with_engine(|e| e.advance(Direction::Backward));
    })?;
    if let Some(finish) = &view.finish {
        listeners.listen(finish, "click", || {
            if let Some(Err(err)) = with_engine(|e| e.finish()) {
                warn!(error = %err, "finish failed");
            }
        })?;
    }
    // In-page hash navigation can leave the view stale relative to storage.
    listeners.listen(win, "hashchange", || {
        with_engine(|e| e.apply_state());
    })?;
    listeners.keep();

    subscribe_dispatcher(win);
    Ok(())
}

/// Hook `H5P.externalDispatcher.on('xAPI', ..)` when the page provides it.
fn subscribe_dispatcher(win: &web_sys::Window) {
    let dispatcher = js_sys::Reflect::get(win, &"H5P".into())
        .ok()
        .filter(|v| v.is_object())
        .and_then(|h5p| js_sys::Reflect::get(&h5p, &"externalDispatcher".into()).ok())
        .filter(|v| v.is_object());
    let Some(dispatcher) = dispatcher else {
        debug!("no external dispatcher; expecting handle_completion_event() calls");
        return;
    };
    let Some(on) = js_sys::Reflect::get(&dispatcher, &"on".into())
        .ok()
        .and_then(|f| f.dyn_into::<js_sys::Function>().ok())
    else {
        warn!("external dispatcher has no on()");
        return;
    };
    let closure = Closure::wrap(Box::new(move |evt: JsValue| {
        if let Err(err) = dispatch_event_value(&evt) {
            warn!(error = %err, "completion event failed");
        }
    }) as Box<dyn FnMut(_)>);
    match on.call2(&dispatcher, &"xAPI".into(), closure.as_ref()) {
        Ok(_) => {
            closure.forget();
            info!("subscribed to external dispatcher");
        }
        Err(err) => warn!(error = ?err, "dispatcher subscription failed"),
    }
}

/// Forward a raw JS event (or dispatcher envelope) to the listener.
fn dispatch_event_value(event: &JsValue) -> Result<Option<MarkOutcome>, ProgressionError> {
    // Dispatcher events carry the statement under `data.statement` next to
    // methods and back-references that do not serialize; pick it out first.
    let statement = js_sys::Reflect::get(event, &"data".into())
        .ok()
        .filter(|d| d.is_object())
        .and_then(|data| js_sys::Reflect::get(&data, &"statement".into()).ok())
        .filter(|s| s.is_object());
    let payload = statement.as_ref().unwrap_or(event);
    let Some(json) = js_sys::JSON::stringify(payload).ok().and_then(|s| s.as_string()) else {
        debug!("completion event not serializable; ignored");
        return Ok(None);
    };
    LISTENER
        .with(|listener| with_engine(|engine| listener.handle_json(engine, &json)))
        .unwrap_or(Ok(None))
}

// --- WASM exports ------------------------------------------------------------

/// Initialize progression for this page. `config_json` optionally overrides
/// any subset of [`ProgressionConfig`].
#[wasm_bindgen]
pub fn start_progression(config_json: Option<String>) -> Result<(), JsValue> {
    start(config_json.as_deref()).map_err(|err| {
        warn!(error = %err, "progression not started");
        JsValue::from(err)
    })
}

fn start(config_json: Option<&str>) -> Result<(), ProgressionError> {
    if ENGINE.with(|cell| cell.borrow().is_some()) {
        return Err(ProgressionError::AlreadyStarted);
    }
    let config = ProgressionConfig::from_json(config_json)?;
    let win = window().ok_or_else(|| ProgressionError::Dom("no window".into()))?;
    let doc = win.document().ok_or_else(|| ProgressionError::Dom("no document".into()))?;

    let slug = read_slug(&doc, &config.selectors)?;
    let view = DomView::discover(&doc, &config.selectors)?;
    let steps = view.step_count();
    let storage = BrowserStorage::open(&win);
    let engine = ProgressionEngine::new(slug, steps, storage, view, config)?;
    attach_listeners(&win, engine.view())?;
    ENGINE.with(|cell| cell.replace(Some(engine)));
    Ok(())
}

/// Feed one completion event. Returns `true` when it newly completed the
/// current step.
#[wasm_bindgen]
pub fn handle_completion_event(event: JsValue) -> Result<bool, JsValue> {
    let outcome = dispatch_event_value(&event)?;
    Ok(matches!(outcome, Some(MarkOutcome::Marked { .. })))
}

#[wasm_bindgen]
pub fn current_step() -> u32 {
    with_engine(|e| e.current_step() as u32).unwrap_or(0)
}

#[wasm_bindgen]
pub fn step_count() -> u32 {
    with_engine(|e| e.step_count() as u32).unwrap_or(0)
}

#[wasm_bindgen]
pub fn is_step_completed(index: u32) -> bool {
    with_engine(|e| e.is_step_completed(index as usize)).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_delay_saturates_instead_of_wrapping() {
        assert_eq!(timeout_arg(0), 0);
        assert_eq!(timeout_arg(250), 250);
        assert_eq!(timeout_arg(i32::MAX as u32), i32::MAX);
        assert_eq!(timeout_arg(u32::MAX), i32::MAX);
    }
}
