//! Recognition of synthetic no-reply author addresses.
//!
//! Forges hand out commit emails of the form
//! `<id>+<login>@users.noreply.<provider>` (and a legacy variant without the
//! numeric id) so users can commit without exposing a real address. The
//! login embedded in the address is authoritative, which lets resolution
//! skip the identity API entirely for these commits.

use crate::types::{AuthorEmail, Username};

const NOREPLY_LABEL: &str = "users.noreply.";

/// An identity read straight out of a no-reply address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoReplyIdentity {
    pub username: Username,
    /// Host the address belongs to (`github.com` for
    /// `users.noreply.github.com`).
    pub provider: String,
}

impl NoReplyIdentity {
    /// Profile page on the provider that issued the address.
    pub fn profile_url(&self) -> String {
        format!("https://{}/{}", self.provider, self.username)
    }
}

/// Parses `email` as a no-reply address, accepting both the modern
/// `<id>+<login>` local part and the legacy bare `<login>` form. Returns
/// `None` for anything else, including malformed lookalikes.
pub fn parse(email: &AuthorEmail) -> Option<NoReplyIdentity> {
    let (local, domain) = email.as_str().rsplit_once('@')?;
    let domain = domain.to_ascii_lowercase();
    let provider = domain.strip_prefix(NOREPLY_LABEL)?;
    if provider.is_empty() {
        return None;
    }

    let login = match local.split_once('+') {
        Some((id, login)) => {
            if id.is_empty() || !id.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            login
        }
        None => local,
    };

    is_valid_login(login).then(|| NoReplyIdentity {
        username: Username::new(login),
        provider: provider.to_string(),
    })
}

/// Forge logins: ASCII alphanumerics and interior hyphens.
fn is_valid_login(login: &str) -> bool {
    !login.is_empty()
        && !login.starts_with('-')
        && !login.ends_with('-')
        && login.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn email(s: &str) -> AuthorEmail {
        AuthorEmail::from(s)
    }

    #[test]
    fn modern_form_extracts_login_and_provider() {
        let id = parse(&email("1234567+octocat@users.noreply.github.com")).unwrap();
        assert_eq!(id.username, Username::new("octocat"));
        assert_eq!(id.provider, "github.com");
        assert_eq!(id.profile_url(), "https://github.com/octocat");
    }

    #[test]
    fn legacy_form_extracts_login() {
        let id = parse(&email("alice@users.noreply.example.com")).unwrap();
        assert_eq!(id.username, Username::new("alice"));
        assert_eq!(id.profile_url(), "https://example.com/alice");
    }

    #[test]
    fn domain_match_ignores_case() {
        let id = parse(&email("42+Bob-2@Users.NoReply.GitHub.com")).unwrap();
        assert_eq!(id.username, Username::new("Bob-2"));
        assert_eq!(id.provider, "github.com");
    }

    #[test]
    fn ordinary_addresses_do_not_match() {
        assert_eq!(parse(&email("alice@example.com")), None);
        assert_eq!(parse(&email("alice@noreply.github.com")), None);
        assert_eq!(parse(&email("no-at-sign")), None);
        assert_eq!(parse(&email("")), None);
    }

    #[test]
    fn non_numeric_id_prefix_is_rejected() {
        assert_eq!(parse(&email("abc+alice@users.noreply.github.com")), None);
        assert_eq!(parse(&email("+alice@users.noreply.github.com")), None);
        assert_eq!(parse(&email("12a34+alice@users.noreply.github.com")), None);
    }

    #[test]
    fn bad_logins_are_rejected() {
        assert_eq!(parse(&email("123+@users.noreply.github.com")), None);
        assert_eq!(parse(&email("123+-alice@users.noreply.github.com")), None);
        assert_eq!(parse(&email("123+alice-@users.noreply.github.com")), None);
        assert_eq!(parse(&email("123+al ice@users.noreply.github.com")), None);
        assert_eq!(parse(&email("@users.noreply.github.com")), None);
    }

    #[test]
    fn bare_noreply_domain_is_rejected() {
        assert_eq!(parse(&email("123+alice@users.noreply.")), None);
    }

    proptest! {
        #[test]
        fn any_valid_modern_address_round_trips(
            id in 0u64..=9_999_999_999,
            login in "[A-Za-z0-9]([A-Za-z0-9-]{0,20}[A-Za-z0-9])?",
        ) {
            let addr = email(&format!("{id}+{login}@users.noreply.github.com"));
            let parsed = parse(&addr).unwrap();
            prop_assert_eq!(parsed.username.as_str(), login.as_str());
            prop_assert_eq!(parsed.provider.as_str(), "github.com");
        }

        #[test]
        fn parse_never_panics(raw in "\\PC{0,60}") {
            let _ = parse(&email(&raw));
        }
    }
}
