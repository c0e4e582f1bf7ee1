//! Case-normalized ticker symbols.
//!
//! Every symbol entering the hub (consumer input, inbound price messages,
//! config files) goes through [`Symbol::parse`], so the registry and the cache
//! can use the uppercase form as their only key.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

/// An uppercase ticker identifier such as `"BTC"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    /// Trim and uppercase `raw`. Returns `None` for empty or blank input.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        Some(Self(trimmed.to_ascii_uppercase()))
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Symbol {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for Symbol {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Symbol::parse(&raw).ok_or_else(|| serde::de::Error::custom("empty symbol"))
    }
}

/// Normalize a list of raw symbols, dropping blanks and duplicates while
/// keeping first-seen order.
pub fn normalize_symbols<I, S>(raw: I) -> Vec<Symbol>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<Symbol> = Vec::new();
    for s in raw {
        if let Some(sym) = Symbol::parse(s.as_ref())
            && !out.contains(&sym)
        {
            out.push(sym);
        }
    }
    out
}
