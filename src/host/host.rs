use serde::{Deserialize, Serialize};
use std::future::Future;

use crate::errors::HostError;

/// Where on the page the signal lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ElementSelector {
    /// Attribute `name` of the first element matching `css`.
    Attribute { css: String, name: String },
    /// Text content of the first element matching `css`.
    Text { css: String },
    /// Regex over the page's visible text. The first capture group is the
    /// raw signal, or the whole match when the pattern has no groups.
    Pattern { regex: String },
}

impl Default for ElementSelector {
    fn default() -> Self {
        ElementSelector::Attribute {
            css: "[data-active-count]".to_string(),
            name: "data-active-count".to_string(),
        }
    }
}

/// Lifecycle notifications coming from the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageEvent {
    Visibility(bool),
    ManualRefresh,
    Stop,
}

/// The page the watcher is attached to.
///
/// Only `reload` changes what the viewer sees; everything else is
/// bookkeeping around it.
pub trait PageHost: Send + Sync {
    /// Raw string at `selector`, `None` when the element or attribute is
    /// absent. `Pattern` selectors are resolved by the caller, hosts only
    /// see `Attribute` and `Text`.
    fn query(
        &self,
        selector: &ElementSelector,
    ) -> impl Future<Output = Result<Option<String>, HostError>> + Send;

    fn scroll_offset(&self) -> f64;

    fn scroll_to(&self, offset: f64);

    fn reload(&self);

    fn show_manual_control(&self, label: &str);
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory page used by the watcher tests.
    #[derive(Default)]
    pub struct FakePage {
        pub elements: Mutex<HashMap<String, String>>,
        pub scroll: Mutex<f64>,
        pub scrolled_to: Mutex<Vec<f64>>,
        pub reloads: Mutex<usize>,
        pub control_label: Mutex<Option<String>>,
    }

    impl FakePage {
        pub fn with_element(css: &str, value: &str) -> Self {
            let page = FakePage::default();
            page.set(css, value);
            page
        }

        pub fn set(&self, css: &str, value: &str) {
            self.elements
                .lock()
                .unwrap()
                .insert(css.to_string(), value.to_string());
        }

        pub fn remove(&self, css: &str) {
            self.elements.lock().unwrap().remove(css);
        }

        pub fn reload_count(&self) -> usize {
            *self.reloads.lock().unwrap()
        }
    }

    impl PageHost for FakePage {
        async fn query(&self, selector: &ElementSelector) -> Result<Option<String>, HostError> {
            let css = match selector {
                ElementSelector::Attribute { css, .. } | ElementSelector::Text { css } => css,
                ElementSelector::Pattern { .. } => return Ok(None),
            };
            Ok(self.elements.lock().unwrap().get(css).cloned())
        }

        fn scroll_offset(&self) -> f64 {
            *self.scroll.lock().unwrap()
        }

        fn scroll_to(&self, offset: f64) {
            *self.scroll.lock().unwrap() = offset;
            self.scrolled_to.lock().unwrap().push(offset);
        }

        fn reload(&self) {
            *self.reloads.lock().unwrap() += 1;
        }

        fn show_manual_control(&self, label: &str) {
            *self.control_label.lock().unwrap() = Some(label.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selector_wire_format() {
        let selector = ElementSelector::default();
        let json = serde_json::to_string(&selector).unwrap();
        assert!(json.contains("\"kind\":\"attribute\""));
        assert!(json.contains("\"name\":\"data-active-count\""));
    }

    #[test]
    fn test_selector_from_toml() {
        let selector: ElementSelector =
            toml::from_str("kind = \"pattern\"\nregex = 'Pending: (\\d+)'").unwrap();
        assert_eq!(
            selector,
            ElementSelector::Pattern {
                regex: r"Pending: (\d+)".to_string()
            }
        );
    }
}
