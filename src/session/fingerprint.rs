use serde::Serialize;
use sha2::{Digest, Sha256};

/// Derives the moderation key for a connection: the first 16 hex characters
/// of `sha256(address ++ user_agent)`.
///
/// Two clients behind the same address with the same browser build collide.
pub fn fingerprint(address: &str, user_agent: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(address.as_bytes());
    hasher.update(user_agent.as_bytes());
    let mut digest = hex::encode(hasher.finalize());
    digest.truncate(16);
    digest
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    pub browser: &'static str,
    pub os: &'static str,
    pub device_type: &'static str,
}

/// Coarse user-agent classification. First match wins, so Edge (which also
/// advertises Chrome) is reported as Chrome.
pub fn parse_user_agent(user_agent: &str) -> ClientInfo {
    let has = |needle: &str| user_agent.contains(needle);

    let browser = if has("Chrome") {
        "Chrome"
    } else if has("Firefox") {
        "Firefox"
    } else if has("Safari") {
        "Safari"
    } else if has("Edge") {
        "Edge"
    } else {
        "Unknown"
    };

    let os = if has("Windows") {
        "Windows"
    } else if has("Mac") {
        "macOS"
    } else if has("Linux") {
        "Linux"
    } else if has("Android") {
        "Android"
    } else if has("iOS") {
        "iOS"
    } else {
        "Unknown"
    };

    let device_type = if has("Mobile") {
        "Mobile"
    } else if has("Tablet") {
        "Tablet"
    } else {
        "Desktop"
    };

    ClientInfo { browser, os, device_type }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIREFOX_LINUX: &str = "Mozilla/5.0 (X11; Linux x86_64; rv:128.0) Gecko/20100101 Firefox/128.0";

    #[test]
    fn fingerprint_is_stable_and_short() {
        let a = fingerprint("10.0.0.1", FIREFOX_LINUX);
        assert_eq!(a.len(), 16);
        assert_eq!(a, fingerprint("10.0.0.1", FIREFOX_LINUX));
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn fingerprint_changes_with_address_or_agent() {
        let base = fingerprint("10.0.0.1", FIREFOX_LINUX);
        assert_ne!(base, fingerprint("10.0.0.2", FIREFOX_LINUX));
        assert_ne!(base, fingerprint("10.0.0.1", "curl/8.0"));
    }

    #[test]
    fn classifies_desktop_firefox_on_linux() {
        let info = parse_user_agent(FIREFOX_LINUX);
        assert_eq!(info, ClientInfo { browser: "Firefox", os: "Linux", device_type: "Desktop" });
    }

    #[test]
    fn android_chrome_reports_linux_mobile() {
        // Android agents also carry "Linux", which is checked first.
        let info = parse_user_agent("Mozilla/5.0 (Linux; Android 14) AppleWebKit/537.36 Chrome/126.0 Mobile Safari/537.36");
        assert_eq!(info.browser, "Chrome");
        assert_eq!(info.os, "Linux");
        assert_eq!(info.device_type, "Mobile");
    }

    #[test]
    fn unknown_agent() {
        let info = parse_user_agent("unknown");
        assert_eq!(info, ClientInfo { browser: "Unknown", os: "Unknown", device_type: "Desktop" });
    }
}
