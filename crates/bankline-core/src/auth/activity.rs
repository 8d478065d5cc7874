//! Classification of user input as qualifying activity.
//!
//! Only an explicit click on an interactive element resets the session
//! countdown. Pointer movement, scrolling, key presses and visibility
//! changes do not, so the "still active?" prompt needs a real answer.

use std::fmt;
use std::sync::Arc;

/// Tags that count as interactive on their own
const INTERACTIVE_TAGS: [&str; 3] = ["button", "a", "input"];

/// Tags that make every descendant interactive
const INTERACTIVE_ANCESTOR_TAGS: [&str; 2] = ["button", "a"];

/// Classes conventionally used for button-styled elements
const BUTTON_CLASSES: [&str; 2] = ["btn", "button"];

/// The target of a click, as seen by the activity filter.
///
/// Implemented by whatever element model the host uses.
pub trait EventTarget {
    fn tag_name(&self) -> &str;

    fn role(&self) -> Option<&str>;

    fn has_class(&self, class: &str) -> bool;

    fn parent(&self) -> Option<&dyn EventTarget>;
}

/// Default predicate: is a click on `target` a qualifying activity signal?
pub fn is_activity_signal(target: &dyn EventTarget) -> bool {
    let tag = target.tag_name();
    if INTERACTIVE_TAGS.iter().any(|t| tag.eq_ignore_ascii_case(t))
        || has_button_role(target)
        || BUTTON_CLASSES.iter().any(|c| target.has_class(c))
    {
        return true;
    }

    // Walk up to the nearest interactive ancestor
    let mut current = target.parent();
    while let Some(node) = current {
        let tag = node.tag_name();
        if INTERACTIVE_ANCESTOR_TAGS.iter().any(|t| tag.eq_ignore_ascii_case(t))
            || has_button_role(node)
        {
            return true;
        }
        current = node.parent();
    }
    false
}

fn has_button_role(target: &dyn EventTarget) -> bool {
    target.role().is_some_and(|r| r.eq_ignore_ascii_case("button"))
}

/// Injected predicate deciding which clicks reset the countdown.
/// Clone is cheap - the predicate is shared.
#[derive(Clone)]
pub struct ActivityFilter(Arc<dyn Fn(&dyn EventTarget) -> bool + Send + Sync>);

impl ActivityFilter {
    pub fn new(predicate: impl Fn(&dyn EventTarget) -> bool + Send + Sync + 'static) -> Self {
        Self(Arc::new(predicate))
    }

    pub fn matches(&self, target: &dyn EventTarget) -> bool {
        (self.0)(target)
    }
}

impl Default for ActivityFilter {
    fn default() -> Self {
        Self::new(is_activity_signal)
    }
}

impl fmt::Debug for ActivityFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ActivityFilter")
    }
}

/// Minimal owned element tree for hosts without their own DOM.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Element {
    pub tag: String,
    pub role: Option<String>,
    pub classes: Vec<String>,
    pub parent: Option<Box<Element>>,
}

impl Element {
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_string(),
            ..Self::default()
        }
    }

    pub fn with_role(mut self, role: &str) -> Self {
        self.role = Some(role.to_string());
        self
    }

    pub fn with_class(mut self, class: &str) -> Self {
        self.classes.push(class.to_string());
        self
    }

    /// Nest this element inside `parent`
    pub fn inside(mut self, parent: Element) -> Self {
        self.parent = Some(Box::new(parent));
        self
    }
}

impl EventTarget for Element {
    fn tag_name(&self) -> &str {
        &self.tag
    }

    fn role(&self) -> Option<&str> {
        self.role.as_deref()
    }

    fn has_class(&self, class: &str) -> bool {
        self.classes.iter().any(|c| c == class)
    }

    fn parent(&self) -> Option<&dyn EventTarget> {
        self.parent.as_deref().map(|p| p as &dyn EventTarget)
    }
}
