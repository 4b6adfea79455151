use crate::config::ConnectionProfile;

/// One question from an interactive authentication round.
/// `echo == false` marks the answer as sensitive.
#[derive(Debug, Clone)]
pub struct PromptEntry {
    pub text: String,
    pub echo: bool,
}

/// What a server prompt is asking for, as far as substring matching can
/// tell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialCategory {
    /// One-time code. Never auto-filled: the value is single-use and
    /// time-bound, so a stored secret would be stale by definition.
    Otp,
    StaticPassword,
    Challenge,
    Unclassified,
}

/// Read-only credential view for one target host. Built from a
/// [`ConnectionProfile`]; the negotiator only ever reads it.
#[derive(Debug, Clone, Default)]
pub struct CredentialStore {
    pub key_path: Option<String>,
    pub static_secret: Option<String>,
    pub challenge_secret: Option<String>,
}

impl CredentialStore {
    pub fn from_profile(profile: &ConnectionProfile) -> Self {
        Self {
            key_path: profile.key_path.clone(),
            static_secret: profile.static_secret.clone(),
            challenge_secret: profile.challenge_secret.clone(),
        }
    }
}

/// Markers that force the human path: one-time codes, provider-branded
/// verification prompts, and the localized "dynamic code" wording.
const OTP_MARKERS: &[&str] = &["code", "verification", "otp", "microsoft", "动态"];

/// Map a server-issued prompt to a credential category.
///
/// Rules are evaluated in priority order, first match wins, matched
/// case-insensitively against substrings. Separating the static secret
/// from the challenge secret lets one profile serve both a conventional
/// password host and a PIN-gated gateway without re-entry per prompt.
pub fn classify(prompt: &str, store: &CredentialStore) -> CredentialCategory {
    let lower = prompt.to_lowercase();

    if OTP_MARKERS.iter().any(|marker| lower.contains(marker)) {
        return CredentialCategory::Otp;
    }

    if lower.contains("password") && !lower.contains("pin") && store.static_secret.is_some() {
        return CredentialCategory::StaticPassword;
    }

    if lower.contains("pin") && store.challenge_secret.is_some() {
        return CredentialCategory::Challenge;
    }

    CredentialCategory::Unclassified
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(static_secret: Option<&str>, challenge_secret: Option<&str>) -> CredentialStore {
        CredentialStore {
            key_path: None,
            static_secret: static_secret.map(String::from),
            challenge_secret: challenge_secret.map(String::from),
        }
    }

    #[test]
    fn test_otp_markers_win_regardless_of_stored_secrets() {
        let full = store(Some("pw"), Some("1234"));
        for prompt in [
            "Enter code:",
            "Verification Code:",
            "OTP:",
            "Microsoft Authenticator:",
            "请输入动态密码:",
        ] {
            assert_eq!(classify(prompt, &full), CredentialCategory::Otp, "{prompt}");
        }
    }

    #[test]
    fn test_password_prompt_with_static_secret() {
        assert_eq!(
            classify("Password:", &store(Some("pw"), None)),
            CredentialCategory::StaticPassword
        );
        // No stored secret: nothing to auto-fill
        assert_eq!(
            classify("Password:", &store(None, None)),
            CredentialCategory::Unclassified
        );
    }

    #[test]
    fn test_pin_prompt_with_challenge_secret() {
        assert_eq!(
            classify("PortalPIN:", &store(None, Some("1234"))),
            CredentialCategory::Challenge
        );
        assert_eq!(
            classify("PortalPIN:", &store(None, None)),
            CredentialCategory::Unclassified
        );
    }

    #[test]
    fn test_pin_in_password_prompt_is_not_static() {
        // "PIN password" must not leak the static secret
        assert_eq!(
            classify("PIN Password:", &store(Some("pw"), Some("1234"))),
            CredentialCategory::Challenge
        );
    }

    #[test]
    fn test_matching_is_case_insensitive() {
        assert_eq!(
            classify("PASSWORD for deploy:", &store(Some("pw"), None)),
            CredentialCategory::StaticPassword
        );
    }

    #[test]
    fn test_unknown_prompt_is_unclassified() {
        assert_eq!(
            classify("Realm token:", &store(Some("pw"), Some("1234"))),
            CredentialCategory::Unclassified
        );
    }
}
