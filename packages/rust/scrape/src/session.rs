//! Session providers for cookie-authenticated admin pages.
//!
//! Admin pages reject API tokens; they need the `Cookie` header of a logged-in
//! browser session. A provider decides where that header comes from.

use std::io::{BufRead, Write};

use tracing::{debug, info};

use tenantmove_shared::{Instance, MigrationError, Result};

use crate::global_permissions::GLOBAL_PERMISSIONS_PATH;

/// Supplies the browser `Cookie` header for an instance.
pub trait SessionProvider: Send + Sync {
    fn session_cookie(&self, instance: &Instance) -> Result<String>;
}

type Lookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Reads a previously captured cookie header from an environment variable.
pub struct StoredCookieSession {
    var: String,
    lookup: Lookup,
}

impl StoredCookieSession {
    pub fn from_env(var: impl Into<String>) -> Self {
        Self::with_lookup(var, |name| std::env::var(name).ok())
    }

    /// Use `lookup` instead of the process environment.
    pub fn with_lookup(
        var: impl Into<String>,
        lookup: impl Fn(&str) -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            var: var.into(),
            lookup: Box::new(lookup),
        }
    }
}

impl SessionProvider for StoredCookieSession {
    fn session_cookie(&self, instance: &Instance) -> Result<String> {
        let cookie = (self.lookup)(&self.var)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                MigrationError::Session(format!(
                    "{} has no session cookie; set {} or use --interactive",
                    instance.host(),
                    self.var
                ))
            })?;
        debug!(host = instance.host(), var = %self.var, "using stored session cookie");
        Ok(cookie)
    }
}

/// Asks the operator to log in with a browser and paste the cookie header.
/// Blocks on stdin.
#[derive(Debug, Default, Clone, Copy)]
pub struct InteractiveSession;

impl SessionProvider for InteractiveSession {
    fn session_cookie(&self, instance: &Instance) -> Result<String> {
        let stdin = std::io::stdin();
        prompt_for_cookie(instance, &mut stdin.lock(), &mut std::io::stderr())
    }
}

/// Print login instructions to `out` and read one cookie line from `input`.
pub fn prompt_for_cookie(
    instance: &Instance,
    input: &mut impl BufRead,
    out: &mut impl Write,
) -> Result<String> {
    let page = format!(
        "{}{GLOBAL_PERMISSIONS_PATH}",
        instance.base_url.as_str().trim_end_matches('/')
    );
    let prompt_err = |e: std::io::Error| MigrationError::Session(format!("prompt failed: {e}"));

    writeln!(out, "Log in to {} in your browser and open:", instance.host()).map_err(prompt_err)?;
    writeln!(out, "  {page}").map_err(prompt_err)?;
    write!(out, "Paste the request's Cookie header and press Enter: ").map_err(prompt_err)?;
    out.flush().map_err(prompt_err)?;

    let mut line = String::new();
    input.read_line(&mut line).map_err(prompt_err)?;

    let cookie = line.trim();
    let cookie = cookie.strip_prefix("Cookie:").map(str::trim).unwrap_or(cookie);
    if cookie.is_empty() {
        return Err(MigrationError::Session(format!(
            "no cookie entered for {}",
            instance.host()
        )));
    }
    info!(host = instance.host(), "session cookie captured interactively");
    Ok(cookie.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance() -> Instance {
        Instance {
            base_url: "https://acme.atlassian.net/".parse().unwrap(),
            email: "admin@acme.com".into(),
            token: "t".into(),
        }
    }

    #[test]
    fn stored_cookie_comes_from_lookup() {
        let provider = StoredCookieSession::with_lookup("SRC_COOKIE", |name| {
            (name == "SRC_COOKIE").then(|| " tenant.session.token=abc \n".to_string())
        });
        assert_eq!(
            provider.session_cookie(&instance()).unwrap(),
            "tenant.session.token=abc"
        );
    }

    #[test]
    fn missing_stored_cookie_names_the_variable() {
        let provider = StoredCookieSession::with_lookup("SRC_COOKIE", |_| None);
        let err = provider.session_cookie(&instance()).unwrap_err();
        assert!(matches!(err, MigrationError::Session(_)));
        assert!(err.to_string().contains("SRC_COOKIE"));
    }

    #[test]
    fn prompt_reads_one_line_and_strips_header_name() {
        let mut input = "Cookie: tenant.session.token=xyz\n".as_bytes();
        let mut out = Vec::new();
        let cookie = prompt_for_cookie(&instance(), &mut input, &mut out).unwrap();
        assert_eq!(cookie, "tenant.session.token=xyz");

        let shown = String::from_utf8(out).unwrap();
        assert!(shown.contains("https://acme.atlassian.net/secure/admin/GlobalPermissions!default.jspa"));
    }

    #[test]
    fn empty_prompt_answer_is_an_error() {
        let mut input = "\n".as_bytes();
        let err = prompt_for_cookie(&instance(), &mut input, &mut Vec::<u8>::new()).unwrap_err();
        assert!(matches!(err, MigrationError::Session(_)));
    }
}
