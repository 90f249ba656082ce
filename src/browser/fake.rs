//! Scriptable in-memory browser for driver tests.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use super::{Browser, BrowserError, ElementId, Key, Locator};

type ClickHook = Box<dyn FnMut(&mut FakeState) + Send>;
type KeyHook = Box<dyn FnMut(&mut FakeState, Key) + Send>;

/// Page model: which locators resolve to which elements, per frame.
#[derive(Default)]
pub(crate) struct FakeState {
    pub url: String,
    elements: HashMap<(Option<String>, Locator), Vec<ElementId>>,
    hidden: HashSet<ElementId>,
    disabled: HashSet<ElementId>,
    /// Elements reported disabled for this many more `is_enabled` checks
    enabling: HashMap<ElementId, usize>,
    texts: HashMap<ElementId, String>,
    attributes: HashMap<(ElementId, String), String>,
    values: HashMap<ElementId, String>,
    find_counts: HashMap<Locator, usize>,
    click_hooks: HashMap<ElementId, ClickHook>,
    key_hook: Option<KeyHook>,
    /// Currently selected frame, `None` for the top-level document
    pub frame: Option<String>,
    pub focused: Option<ElementId>,
    pub visited: Vec<String>,
    pub clicks: Vec<ElementId>,
    pub typed: Vec<(ElementId, String)>,
    pub keys: Vec<Key>,
    pub screenshots: usize,
    pub closed: bool,
}

impl FakeState {
    pub fn add(&mut self, locator: Locator, id: &str) {
        self.elements
            .entry((None, locator))
            .or_default()
            .push(ElementId::new(id));
    }

    pub fn add_in_frame(&mut self, frame: &str, locator: Locator, id: &str) {
        self.elements
            .entry((Some(frame.to_string()), locator))
            .or_default()
            .push(ElementId::new(id));
    }

    pub fn set_elements(&mut self, locator: Locator, ids: &[String]) {
        self.elements
            .insert((None, locator), ids.iter().map(ElementId::new).collect());
    }

    pub fn hide(&mut self, id: &str) {
        self.hidden.insert(ElementId::new(id));
    }

    pub fn disable(&mut self, id: &str) {
        self.disabled.insert(ElementId::new(id));
    }

    /// Disabled until `is_enabled` has been asked `checks` times.
    pub fn enable_after(&mut self, id: &str, checks: usize) {
        self.enabling.insert(ElementId::new(id), checks);
    }

    pub fn set_text(&mut self, id: &str, text: &str) {
        self.texts.insert(ElementId::new(id), text.to_string());
    }

    pub fn set_attribute(&mut self, id: &str, name: &str, value: &str) {
        self.attributes
            .insert((ElementId::new(id), name.to_string()), value.to_string());
    }

    pub fn value_of(&self, id: &str) -> String {
        self.values.get(&ElementId::new(id)).cloned().unwrap_or_default()
    }

    pub fn set_value(&mut self, id: &str, value: &str) {
        self.values.insert(ElementId::new(id), value.to_string());
    }

    pub fn find_count(&self, locator: &Locator) -> usize {
        self.find_counts.get(locator).copied().unwrap_or(0)
    }

    /// Text typed into `id`, in order
    pub fn typed_into(&self, id: &str) -> Vec<String> {
        self.typed
            .iter()
            .filter(|(el, _)| el.0 == id)
            .map(|(_, text)| text.clone())
            .collect()
    }

    pub fn clicked(&self, id: &str) -> bool {
        self.clicks.iter().any(|el| el.0 == id)
    }

    pub fn on_click(&mut self, id: &str, hook: impl FnMut(&mut FakeState) + Send + 'static) {
        self.click_hooks.insert(ElementId::new(id), Box::new(hook));
    }

    pub fn on_key(&mut self, hook: impl FnMut(&mut FakeState, Key) + Send + 'static) {
        self.key_hook = Some(Box::new(hook));
    }
}

pub(crate) struct FakeBrowser {
    state: Mutex<FakeState>,
}

impl FakeBrowser {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState {
                url: "about:blank".to_string(),
                ..FakeState::default()
            }),
        }
    }

    pub fn with_state<R>(&self, f: impl FnOnce(&mut FakeState) -> R) -> R {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }
}

#[async_trait]
impl Browser for FakeBrowser {
    async fn goto(&self, url: &str) -> Result<(), BrowserError> {
        self.with_state(|s| {
            s.url = url.to_string();
            s.visited.push(url.to_string());
        });
        Ok(())
    }

    async fn current_url(&self) -> Result<String, BrowserError> {
        Ok(self.with_state(|s| s.url.clone()))
    }

    async fn find_all(&self, locator: &Locator) -> Result<Vec<ElementId>, BrowserError> {
        Ok(self.with_state(|s| {
            *s.find_counts.entry(locator.clone()).or_insert(0) += 1;
            s.elements
                .get(&(s.frame.clone(), locator.clone()))
                .cloned()
                .unwrap_or_default()
        }))
    }

    async fn is_displayed(&self, element: &ElementId) -> Result<bool, BrowserError> {
        Ok(self.with_state(|s| !s.hidden.contains(element)))
    }

    async fn is_enabled(&self, element: &ElementId) -> Result<bool, BrowserError> {
        Ok(self.with_state(|s| {
            if let Some(remaining) = s.enabling.get_mut(element) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return false;
                }
            }
            !s.disabled.contains(element)
        }))
    }

    async fn click(&self, element: &ElementId) -> Result<(), BrowserError> {
        self.with_state(|s| {
            s.clicks.push(element.clone());
            s.focused = Some(element.clone());
            if let Some(mut hook) = s.click_hooks.remove(element) {
                hook(s);
                s.click_hooks.entry(element.clone()).or_insert(hook);
            }
        });
        Ok(())
    }

    async fn clear(&self, element: &ElementId) -> Result<(), BrowserError> {
        self.with_state(|s| {
            s.values.insert(element.clone(), String::new());
        });
        Ok(())
    }

    async fn type_text(&self, element: &ElementId, text: &str) -> Result<(), BrowserError> {
        self.with_state(|s| {
            s.typed.push((element.clone(), text.to_string()));
            s.values.entry(element.clone()).or_default().push_str(text);
            s.focused = Some(element.clone());
        });
        Ok(())
    }

    async fn text(&self, element: &ElementId) -> Result<String, BrowserError> {
        Ok(self.with_state(|s| s.texts.get(element).cloned().unwrap_or_default()))
    }

    async fn attribute(
        &self,
        element: &ElementId,
        name: &str,
    ) -> Result<Option<String>, BrowserError> {
        Ok(self.with_state(|s| {
            s.attributes
                .get(&(element.clone(), name.to_string()))
                .cloned()
        }))
    }

    async fn press_key(&self, key: Key) -> Result<(), BrowserError> {
        self.with_state(|s| {
            s.keys.push(key);
            if let Some(mut hook) = s.key_hook.take() {
                hook(s, key);
                s.key_hook.get_or_insert(hook);
            }
        });
        Ok(())
    }

    async fn switch_to_frame(&self, frame: &ElementId) -> Result<(), BrowserError> {
        self.with_state(|s| s.frame = Some(frame.0.clone()));
        Ok(())
    }

    async fn switch_to_parent_frame(&self) -> Result<(), BrowserError> {
        self.with_state(|s| s.frame = None);
        Ok(())
    }

    async fn screenshot_png(&self) -> Result<Vec<u8>, BrowserError> {
        self.with_state(|s| s.screenshots += 1);
        // PNG signature only; enough for artifact writing
        Ok(vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A])
    }

    async fn close(&self) -> Result<(), BrowserError> {
        self.with_state(|s| s.closed = true);
        Ok(())
    }
}
