//! Placeholder resolution for scenario bodies.
//!
//! Two placeholder forms are understood by the standard rules:
//!
//! - `${eProtect.key}`: a value supplied by the external value source.
//! - `#{scenario.field.subfield}`: a field of an earlier scenario's
//!   result, read from the response cache.
//!
//! Rules are tried in order on every string scalar; the first rule that
//! matches replaces its matched span and no other rule looks at that
//! string again. Substituted text is never re-scanned, but a placeholder
//! left in the untouched remainder of the string is an error.

use crate::cache::ResponseCache;
use crate::error::{CertError, Result};
use crate::source::ExternalValueSource;
use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use std::ops::Range;
use std::sync::LazyLock;
use tracing::debug;

/// Namespace used by the gateway's hosted tokenization page.
pub const DEFAULT_SOURCE_NAMESPACE: &str = "eProtect";

/// A placeholder found in a string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaceholderMatch {
    /// Byte span of the whole placeholder.
    pub span: Range<usize>,
    /// Captured key, e.g. `token1` or `L_AC_1.requestId`.
    pub key: String,
}

/// State a rule may read while fetching a value.
pub struct ResolveScope<'a> {
    pub cache: &'a ResponseCache,
    pub source: &'a mut dyn ExternalValueSource,
}

/// One kind of placeholder and how to fetch its value.
#[async_trait]
pub trait PlaceholderRule: Send + Sync {
    /// Short label for logs.
    fn name(&self) -> &str;

    /// First placeholder of this kind in `text`, if any.
    fn find(&self, text: &str) -> Option<PlaceholderMatch>;

    async fn fetch(
        &self,
        key: &str,
        scope: &mut ResolveScope<'_>,
    ) -> Result<String>;
}

/// Resolves `${<namespace>.<key>}` against the external value source.
#[derive(Debug)]
pub struct ExternalSourceRule {
    namespace: String,
    pattern: Regex,
}

impl ExternalSourceRule {
    pub fn new(namespace: impl Into<String>) -> Self {
        let namespace = namespace.into();
        let pattern = Regex::new(&format!(
            r"\$\{{{}\.([^{{}}]+)\}}",
            regex::escape(&namespace)
        ))
        .expect("escaped namespace always forms a valid pattern");
        Self { namespace, pattern }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }
}

#[async_trait]
impl PlaceholderRule for ExternalSourceRule {
    fn name(&self) -> &str {
        "external-source"
    }

    fn find(&self, text: &str) -> Option<PlaceholderMatch> {
        capture_first(&self.pattern, text)
    }

    async fn fetch(
        &self,
        key: &str,
        scope: &mut ResolveScope<'_>,
    ) -> Result<String> {
        scope.source.fetch_value(key).await
    }
}

/// Resolves `#{<scenario>.<field>...}` against the response cache.
#[derive(Debug, Default)]
pub struct PriorResultRule;

impl PriorResultRule {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PlaceholderRule for PriorResultRule {
    fn name(&self) -> &str {
        "prior-result"
    }

    fn find(&self, text: &str) -> Option<PlaceholderMatch> {
        static PRIOR_RESULT_RE: LazyLock<Regex> = LazyLock::new(|| {
            Regex::new(r"#\{([^{}.]+(?:\.[^{}.]+)+)\}")
                .expect("failed to compile prior result regex")
        });
        capture_first(&PRIOR_RESULT_RE, text)
    }

    async fn fetch(
        &self,
        key: &str,
        scope: &mut ResolveScope<'_>,
    ) -> Result<String> {
        let path: Vec<&str> = key.split('.').collect();
        let value = scope.cache.access_value(&path)?;
        Ok(match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }
}

fn capture_first(pattern: &Regex, text: &str) -> Option<PlaceholderMatch> {
    let caps = pattern.captures(text)?;
    let whole = caps.get(0)?;
    let key = caps.get(1)?;
    Some(PlaceholderMatch {
        span: whole.range(),
        key: key.as_str().trim().to_string(),
    })
}

/// Rewrites scenario bodies using an ordered list of rules.
pub struct PlaceholderResolver {
    rules: Vec<Box<dyn PlaceholderRule>>,
}

impl PlaceholderResolver {
    pub fn new(rules: Vec<Box<dyn PlaceholderRule>>) -> Self {
        Self { rules }
    }

    /// External source placeholders first, then prior results.
    pub fn standard(namespace: &str) -> Self {
        Self::new(vec![
            Box::new(ExternalSourceRule::new(namespace)),
            Box::new(PriorResultRule::new()),
        ])
    }

    /// Return a copy of `body` with every matched placeholder replaced.
    ///
    /// Traversal is depth-first in document order. Object keys are left
    /// alone and non-string scalars are never tested.
    pub async fn resolve(
        &self,
        scenario: &str,
        body: &Value,
        scope: &mut ResolveScope<'_>,
    ) -> Result<Value> {
        let mut resolved = body.clone();
        {
            let mut pending: Vec<&mut Value> = vec![&mut resolved];
            while let Some(node) = pending.pop() {
                match node {
                    Value::Object(map) => pending.extend(map.values_mut().rev()),
                    Value::Array(items) => {
                        pending.extend(items.iter_mut().rev())
                    }
                    Value::String(text) => {
                        if let Some(replaced) =
                            self.resolve_text(scenario, text, scope).await?
                        {
                            *text = replaced;
                        }
                    }
                    _ => {}
                }
            }
        }
        Ok(resolved)
    }

    /// Apply the first matching rule to `text`. `None` when nothing
    /// matched. Any placeholder left outside the replaced span is an error.
    pub async fn resolve_text(
        &self,
        scenario: &str,
        text: &str,
        scope: &mut ResolveScope<'_>,
    ) -> Result<Option<String>> {
        for rule in &self.rules {
            let Some(found) = rule.find(text) else {
                continue;
            };
            let placeholder = &text[found.span.clone()];
            let untouched = [&text[..found.span.start], &text[found.span.end..]];
            if let Some(leftover) = untouched
                .into_iter()
                .find_map(|part| self.find_any(part).map(|m| &part[m.span]))
            {
                return Err(CertError::Resolution {
                    scenario: scenario.to_string(),
                    placeholder: leftover.to_string(),
                    source: Box::new(CertError::UnresolvedPlaceholder),
                });
            }
            debug!(
                "Resolving {} placeholder '{}' in scenario '{}'",
                rule.name(),
                placeholder,
                scenario
            );
            let value = rule.fetch(&found.key, scope).await.map_err(|e| {
                CertError::Resolution {
                    scenario: scenario.to_string(),
                    placeholder: placeholder.to_string(),
                    source: Box::new(e),
                }
            })?;

            let mut replaced = String::with_capacity(text.len() + value.len());
            replaced.push_str(&text[..found.span.start]);
            replaced.push_str(&value);
            replaced.push_str(&text[found.span.end..]);
            return Ok(Some(replaced));
        }
        Ok(None)
    }

    fn find_any(&self, text: &str) -> Option<PlaceholderMatch> {
        self.rules.iter().find_map(|rule| rule.find(text))
    }
}
