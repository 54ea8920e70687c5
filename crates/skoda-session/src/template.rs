//! `$name` placeholder substitution for vendor URLs

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};

static VAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$([A-Za-z_][A-Za-z0-9_]*)").expect("static regex"));

/// Fills `$name` placeholders from a fixed variable map plus per-call values.
///
/// Substitution is a single pass: text inserted for one placeholder is never
/// scanned again. Unknown placeholders are left as they are.
#[derive(Debug, Clone, Default)]
pub struct Templater {
    vars: HashMap<String, String>,
}

impl Templater {
    pub fn new<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: vars
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    /// Render `template`; `extra` (e.g. `vin`, `homeregion`) wins over the map.
    pub fn render(&self, template: &str, extra: &[(&str, &str)]) -> String {
        VAR_RE
            .replace_all(template, |caps: &Captures<'_>| {
                let name = &caps[1];
                extra
                    .iter()
                    .find(|(k, _)| *k == name)
                    .map(|(_, v)| (*v).to_string())
                    .or_else(|| self.vars.get(name).cloned())
                    .unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned()
    }
}
