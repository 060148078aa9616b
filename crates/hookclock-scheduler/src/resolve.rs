//! Webhook URL and header resolution against the environment.

use hookclock_core::{HeaderConf, WebhookRef};
use std::collections::HashMap;

use crate::error::{Result, SchedulerError};

/// A header ready to send. `from_env` marks values that must not be logged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedHeader {
    pub name: String,
    pub value: String,
    pub from_env: bool,
}

/// Turns configured webhook references into concrete URLs and header values.
pub trait WebhookResolver: Send + Sync {
    fn resolve_url(&self, webhook: &WebhookRef) -> Result<String>;
    fn resolve_headers(&self, headers: &[HeaderConf]) -> Result<Vec<ResolvedHeader>>;
}

/// Reads the process environment, with optional injected values taking precedence.
///
/// Supports `{ from_env = "VAR" }` webhooks, `{{VAR}}` templates inside literal
/// URLs and `value_from_env` headers.
#[derive(Debug, Clone, Default)]
pub struct EnvResolver {
    overrides: HashMap<String, String>,
}

impl EnvResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            overrides: vars.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }

    fn var(&self, name: &str) -> Result<String> {
        if let Some(value) = self.overrides.get(name) {
            return Ok(value.clone());
        }
        std::env::var(name)
            .map_err(|_| SchedulerError::Resolve(format!("environment variable '{name}' not set")))
    }

    /// Expand every `{{VAR}}` in `template`.
    fn expand(&self, template: &str) -> Result<String> {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;
        while let Some(start) = rest.find("{{") {
            let Some(len) = rest[start + 2..].find("}}") else {
                break;
            };
            out.push_str(&rest[..start]);
            let name = rest[start + 2..start + 2 + len].trim();
            out.push_str(&self.var(name)?);
            rest = &rest[start + 2 + len + 2..];
        }
        out.push_str(rest);
        Ok(out)
    }
}

impl WebhookResolver for EnvResolver {
    fn resolve_url(&self, webhook: &WebhookRef) -> Result<String> {
        let url = match webhook {
            WebhookRef::Url(template) => self.expand(template)?,
            WebhookRef::FromEnv { from_env } => self.var(from_env)?,
        };
        if url.trim().is_empty() {
            return Err(SchedulerError::Resolve(format!("webhook '{webhook}' resolved to an empty URL")));
        }
        Ok(url)
    }

    fn resolve_headers(&self, headers: &[HeaderConf]) -> Result<Vec<ResolvedHeader>> {
        headers
            .iter()
            .map(|header| match header {
                HeaderConf::Static { name, value } => Ok(ResolvedHeader {
                    name: name.clone(),
                    value: value.clone(),
                    from_env: false,
                }),
                HeaderConf::FromEnv { name, value_from_env } => Ok(ResolvedHeader {
                    name: name.clone(),
                    value: self.var(value_from_env)?,
                    from_env: true,
                }),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> EnvResolver {
        EnvResolver::with_vars([("HOOK_HOST", "hooks.internal"), ("HOOK_TOKEN", "s3cret")])
    }

    #[test]
    fn test_literal_and_template_urls() {
        let r = resolver();
        assert_eq!(
            r.resolve_url(&WebhookRef::Url("http://example.com/a".into())).unwrap(),
            "http://example.com/a"
        );
        assert_eq!(
            r.resolve_url(&WebhookRef::Url("https://{{ HOOK_HOST }}/cron/{{HOOK_HOST}}".into()))
                .unwrap(),
            "https://hooks.internal/cron/hooks.internal"
        );
        // Unclosed braces are left alone.
        assert_eq!(
            r.resolve_url(&WebhookRef::Url("http://x/{{oops".into())).unwrap(),
            "http://x/{{oops"
        );
    }

    #[test]
    fn test_from_env_url() {
        let r = EnvResolver::with_vars([("NIGHTLY_URL", "http://nightly")]);
        let url = r
            .resolve_url(&WebhookRef::FromEnv { from_env: "NIGHTLY_URL".into() })
            .unwrap();
        assert_eq!(url, "http://nightly");
    }

    #[test]
    fn test_missing_variable_is_an_error() {
        let r = resolver();
        let err = r
            .resolve_url(&WebhookRef::Url("http://{{HOOKCLOCK_SURELY_UNSET_VAR}}/".into()))
            .unwrap_err();
        assert!(matches!(err, SchedulerError::Resolve(_)));

        let headers = vec![HeaderConf::FromEnv {
            name: "X-Key".into(),
            value_from_env: "HOOKCLOCK_SURELY_UNSET_VAR".into(),
        }];
        assert!(r.resolve_headers(&headers).is_err());
    }

    #[test]
    fn test_headers() {
        let headers = vec![
            HeaderConf::Static { name: "X-Static".into(), value: "abc".into() },
            HeaderConf::FromEnv { name: "X-Token".into(), value_from_env: "HOOK_TOKEN".into() },
        ];
        let resolved = resolver().resolve_headers(&headers).unwrap();
        assert_eq!(resolved[0].value, "abc");
        assert!(!resolved[0].from_env);
        assert_eq!(resolved[1].value, "s3cret");
        assert!(resolved[1].from_env);
    }
}
