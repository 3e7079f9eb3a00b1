//! Observable browser state handed to the reasoning engine each turn.

use crate::PageId;

#[cfg_attr(feature = "serde-full", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde-full", serde(rename_all = "snake_case"))]
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum DialogKind {
    Alert,
    Confirm,
    Prompt,
    BeforeUnload,
    FilePicker,
}

#[cfg_attr(feature = "serde-full", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DialogInfo {
    pub kind: DialogKind,
    pub message: String,
}

#[cfg_attr(feature = "serde-full", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TabInfo {
    pub page: PageId,
    pub url: String,
    pub title: Option<String>,
}

/// Interactive element addressed by index, e.g. `[3]<button>Sign in</button>`.
#[cfg_attr(feature = "serde-full", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InteractiveElement {
    pub index: u32,
    pub tag: String,
    pub text: String,
}

#[cfg_attr(feature = "serde-full", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct BrowserSnapshot {
    pub url: String,
    pub title: Option<String>,
    pub active_page: Option<PageId>,
    #[cfg_attr(feature = "serde-full", serde(default))]
    pub tabs: Vec<TabInfo>,
    #[cfg_attr(feature = "serde-full", serde(default))]
    pub elements: Vec<InteractiveElement>,
    #[cfg_attr(feature = "serde-full", serde(default))]
    pub dialog: Option<DialogInfo>,
    #[cfg_attr(feature = "serde-full", serde(default))]
    pub downloads: Vec<String>,
}

impl BrowserSnapshot {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn dialog_open(&self) -> bool {
        self.dialog.is_some()
    }

    pub fn file_picker_open(&self) -> bool {
        matches!(
            self.dialog,
            Some(DialogInfo {
                kind: DialogKind::FilePicker,
                ..
            })
        )
    }

    pub fn element(&self, index: u32) -> Option<&InteractiveElement> {
        self.elements.iter().find(|el| el.index == index)
    }

    /// Indexed element listing in the `[i]<tag>text</tag>` form.
    pub fn element_tree(&self) -> String {
        self.elements
            .iter()
            .map(|el| format!("[{}]<{}>{}</{}>", el.index, el.tag, el.text, el.tag))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_picker_is_a_dialog() {
        let mut snap = BrowserSnapshot::new("https://example.com");
        assert!(!snap.dialog_open());
        snap.dialog = Some(DialogInfo {
            kind: DialogKind::FilePicker,
            message: String::new(),
        });
        assert!(snap.dialog_open());
        assert!(snap.file_picker_open());
    }

    #[test]
    fn element_tree_lists_indices() {
        let mut snap = BrowserSnapshot::new("https://example.com");
        snap.elements.push(InteractiveElement {
            index: 0,
            tag: "button".into(),
            text: "Submit".into(),
        });
        assert_eq!(snap.element_tree(), "[0]<button>Submit</button>");
        assert!(snap.element(0).is_some());
        assert!(snap.element(1).is_none());
    }
}
