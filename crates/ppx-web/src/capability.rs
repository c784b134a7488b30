#![forbid(unsafe_code)]

//! Whether the overlay may run on a tab.
//!
//! Two checks combine: a static URL policy (browser-internal schemes and
//! extension stores are off limits) and an opaque host probe that tries a
//! no-op script injection. The tab must also have finished loading.

use serde::{Deserialize, Serialize};

/// Browser tab identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TabId(pub i32);

/// What the host knows about a tab.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TabInfo {
    pub id: Option<TabId>,
    pub url: Option<String>,
    /// Load status as reported by the browser (`"loading"`, `"complete"`).
    pub status: Option<String>,
}

const COMPLETE: &str = "complete";

/// URL prefixes the overlay can never be injected into.
pub const UNSUPPORTED_SCHEMES: [&str; 10] = [
    "chrome://",
    "chrome-extension://",
    "moz-extension://",
    "edge://",
    "about://",
    "data:",
    "javascript:",
    "mailto:",
    "tel:",
    "ftp://",
];

/// Extension-store pages, matched as substrings of the URL.
pub const UNSUPPORTED_HOSTS: [&str; 3] = [
    "chrome.google.com/webstore",
    "addons.mozilla.org",
    "microsoftedge.microsoft.com",
];

/// Static part of the page check.
///
/// `file://` passes; access to local files is left to the injection probe.
#[must_use]
pub fn is_supported_url(url: Option<&str>) -> bool {
    let Some(url) = url.filter(|u| !u.is_empty()) else {
        return false;
    };
    if UNSUPPORTED_SCHEMES.iter().any(|scheme| url.starts_with(scheme)) {
        return false;
    }
    !UNSUPPORTED_HOSTS.iter().any(|host| url.contains(host))
}

/// Host-provided probe: can a script actually be injected into the tab?
#[allow(async_fn_in_trait)]
pub trait InjectionProbe {
    async fn can_inject(&self, tab: TabId, url: &str) -> bool;
}

/// Full capability check: loaded, allowed URL, and injectable.
///
/// The probe is skipped when the cheaper checks already fail.
pub async fn can_use_extension<P: InjectionProbe>(tab: &TabInfo, probe: &P) -> bool {
    let (Some(id), Some(url)) = (tab.id, tab.url.as_deref()) else {
        return false;
    };
    if tab.status.as_deref() != Some(COMPLETE) || !is_supported_url(Some(url)) {
        return false;
    }
    let allowed = probe.can_inject(id, url).await;
    tracing::debug!(tab = id.0, allowed, "injection probe");
    allowed
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct Probe {
        answer: bool,
        calls: Cell<u32>,
    }

    impl InjectionProbe for Probe {
        async fn can_inject(&self, _tab: TabId, _url: &str) -> bool {
            self.calls.set(self.calls.get() + 1);
            self.answer
        }
    }

    fn tab(url: &str, status: &str) -> TabInfo {
        TabInfo {
            id: Some(TabId(7)),
            url: Some(url.to_owned()),
            status: Some(status.to_owned()),
        }
    }

    #[test]
    fn rejects_internal_schemes_and_stores() {
        for url in [
            "chrome://settings",
            "chrome-extension://abc/popup.html",
            "about://blank",
            "data:text/html,hi",
            "javascript:void(0)",
            "https://chrome.google.com/webstore/detail/x",
            "https://addons.mozilla.org/en-US/firefox/",
            "https://microsoftedge.microsoft.com/addons",
        ] {
            assert!(!is_supported_url(Some(url)), "{url}");
        }
        assert!(!is_supported_url(None));
        assert!(!is_supported_url(Some("")));
    }

    #[test]
    fn allows_web_and_file_pages() {
        assert!(is_supported_url(Some("https://example.com/page")));
        assert!(is_supported_url(Some("http://localhost:5173/")));
        assert!(is_supported_url(Some("file:///home/me/mock.html")));
    }

    #[test]
    fn requires_complete_status_before_probing() {
        let probe = Probe {
            answer: true,
            calls: Cell::new(0),
        };
        let loading = tab("https://example.com", "loading");
        assert!(!pollster::block_on(can_use_extension(&loading, &probe)));
        assert_eq!(probe.calls.get(), 0);

        let done = tab("https://example.com", "complete");
        assert!(pollster::block_on(can_use_extension(&done, &probe)));
        assert_eq!(probe.calls.get(), 1);
    }

    #[test]
    fn probe_has_final_say() {
        let probe = Probe {
            answer: false,
            calls: Cell::new(0),
        };
        let done = tab("file:///tmp/a.html", "complete");
        assert!(!pollster::block_on(can_use_extension(&done, &probe)));
        assert_eq!(probe.calls.get(), 1);
    }

    proptest::proptest! {
        #[test]
        fn internal_prefixes_always_rejected(
            scheme in proptest::sample::select(UNSUPPORTED_SCHEMES.to_vec()),
            rest in "[a-z0-9/._-]{0,24}",
        ) {
            let url = format!("{scheme}{rest}");
            proptest::prop_assert!(!is_supported_url(Some(&url)));
        }

        #[test]
        fn plain_https_pages_pass(host in "[a-z]{1,12}", path in "[a-z0-9/]{0,16}") {
            let url = format!("https://{host}.example/{path}");
            proptest::prop_assert!(is_supported_url(Some(&url)));
        }
    }
}
