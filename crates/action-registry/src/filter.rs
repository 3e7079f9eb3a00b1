use std::fmt;
use std::sync::Arc;

use url::Url;
use webpilot_core_types::BrowserSnapshot;

type Predicate = Arc<dyn Fn(&BrowserSnapshot) -> bool + Send + Sync>;

/// Restricts when an action is offered and dispatchable.
#[derive(Clone, Default)]
pub enum DomainFilter {
    #[default]
    Always,
    /// Host patterns; `*.example.com` also matches `example.com` itself.
    UrlDomains(Vec<String>),
    DialogOpen,
    FilePickerOpen,
    Custom { label: String, predicate: Predicate },
}

impl DomainFilter {
    pub fn domains<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::UrlDomains(patterns.into_iter().map(Into::into).collect())
    }

    pub fn custom<F>(label: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&BrowserSnapshot) -> bool + Send + Sync + 'static,
    {
        Self::Custom {
            label: label.into(),
            predicate: Arc::new(predicate),
        }
    }

    pub fn admits(&self, snapshot: &BrowserSnapshot) -> bool {
        match self {
            DomainFilter::Always => true,
            DomainFilter::UrlDomains(patterns) => {
                let Some(host) = host_of(&snapshot.url) else {
                    return false;
                };
                patterns.iter().any(|pattern| host_matches(pattern, &host))
            }
            DomainFilter::DialogOpen => snapshot.dialog_open(),
            DomainFilter::FilePickerOpen => snapshot.file_picker_open(),
            DomainFilter::Custom { predicate, .. } => predicate(snapshot),
        }
    }

    /// Human readable condition, `None` for unrestricted entries.
    pub fn describe(&self) -> Option<String> {
        match self {
            DomainFilter::Always => None,
            DomainFilter::UrlDomains(patterns) => {
                Some(format!("only on domains: {}", patterns.join(", ")))
            }
            DomainFilter::DialogOpen => Some("only while a dialog is open".to_string()),
            DomainFilter::FilePickerOpen => Some("only while a file picker is open".to_string()),
            DomainFilter::Custom { label, .. } => Some(label.clone()),
        }
    }
}

impl fmt::Debug for DomainFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DomainFilter::Always => f.write_str("Always"),
            DomainFilter::UrlDomains(patterns) => f.debug_tuple("UrlDomains").field(patterns).finish(),
            DomainFilter::DialogOpen => f.write_str("DialogOpen"),
            DomainFilter::FilePickerOpen => f.write_str("FilePickerOpen"),
            DomainFilter::Custom { label, .. } => f.debug_struct("Custom").field("label", label).finish(),
        }
    }
}

fn host_of(raw: &str) -> Option<String> {
    let parsed = Url::parse(raw).ok()?;
    parsed.host_str().map(|host| host.to_ascii_lowercase())
}

fn host_matches(pattern: &str, host: &str) -> bool {
    let pattern = pattern.trim().to_ascii_lowercase();
    match pattern.strip_prefix("*.") {
        Some(base) => host == base || host.ends_with(&format!(".{base}")),
        None => host == pattern,
    }
}
