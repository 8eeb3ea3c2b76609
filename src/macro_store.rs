//! `${name}` macro expansion (component L2).
//!
//! A plain string-to-string store shared by every fixture in a test. Readers
//! may run concurrently with a single writer, so it is backed by a
//! `RwLock` rather than a `Mutex` -- the executor reads macros far more
//! often than fixtures define new ones.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::error::{Error, Result};

/// Shared, thread-safe macro name to value mapping.
#[derive(Clone, Debug, Default)]
pub struct MacroStore {
    inner: Arc<RwLock<HashMap<String, String>>>,
}

impl MacroStore {
    /// Create an empty store.
    pub fn new() -> MacroStore {
        MacroStore::default()
    }

    /// Define or overwrite a macro.
    pub async fn set(&self, name: impl Into<String>, value: impl Into<String>) {
        self.inner.write().await.insert(name.into(), value.into());
    }

    /// Remove a macro, if present (used when a server unbinds).
    pub async fn remove(&self, name: &str) {
        self.inner.write().await.remove(name);
    }

    /// Look up a single macro's current value.
    pub async fn get(&self, name: &str) -> Option<String> {
        self.inner.read().await.get(name).cloned()
    }

    /// Expand every `${name}` occurrence in `text`.
    ///
    /// Fails on the first undefined macro. Expansion is a fixed point:
    /// expanding already-expanded text (which by construction contains no
    /// `${...}` tokens unless a substituted value itself introduced one --
    /// which this core does not recursively re-expand) returns it unchanged.
    pub async fn expand(&self, text: &str) -> Result<String> {
        let map = self.inner.read().await;
        expand_with(text, |name| map.get(name).cloned())
    }
}

fn expand_with(text: &str, mut lookup: impl FnMut(&str) -> Option<String>) -> Result<String> {
    let mut out = String::with_capacity(text.len());
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' && i + 1 < bytes.len() && bytes[i + 1] == b'{' {
            let start = i + 2;
            match text[start..].find('}') {
                Some(rel_end) => {
                    let name = &text[start..start + rel_end];
                    match lookup(name) {
                        Some(value) => {
                            out.push_str(&value);
                            i = start + rel_end + 1;
                        }
                        None => {
                            return Err(Error::new(crate::error::Kind::UndefinedMacro)
                                .with_cause(UndefinedMacro(name.to_string())));
                        }
                    }
                }
                None => {
                    out.push_str(&text[i..]);
                    break;
                }
            }
        } else {
            let ch_len = utf8_len(bytes[i]);
            out.push_str(&text[i..i + ch_len]);
            i += ch_len;
        }
    }
    Ok(out)
}

fn utf8_len(lead: u8) -> usize {
    if lead & 0x80 == 0 {
        1
    } else if lead & 0xE0 == 0xC0 {
        2
    } else if lead & 0xF0 == 0xE0 {
        3
    } else {
        4
    }
}

#[derive(Debug)]
struct UndefinedMacro(String);

impl std::fmt::Display for UndefinedMacro {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "undefined macro ${{{}}}", self.0)
    }
}

impl std::error::Error for UndefinedMacro {}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn expands_known_macros() {
        let store = MacroStore::new();
        store.set("host", "localhost").await;
        store.set("port", "8080").await;
        let out = store.expand("http://${host}:${port}/").await.unwrap();
        assert_eq!(out, "http://localhost:8080/");
    }

    #[tokio::test]
    async fn undefined_macro_is_an_error() {
        let store = MacroStore::new();
        let err = store.expand("${missing}").await.unwrap_err();
        assert!(format!("{}", err).contains("undefined"));
    }

    #[tokio::test]
    async fn expansion_is_a_fixed_point() {
        let store = MacroStore::new();
        store.set("a", "plain text, no dollars").await;
        let once = store.expand("${a}").await.unwrap();
        let twice = store.expand(&once).await.unwrap();
        assert_eq!(once, twice);
    }

    #[tokio::test]
    async fn text_without_macros_is_unchanged() {
        let store = MacroStore::new();
        let out = store.expand("no macros here").await.unwrap();
        assert_eq!(out, "no macros here");
    }

    #[tokio::test]
    async fn unset_removes_a_macro() {
        let store = MacroStore::new();
        store.set("x", "1").await;
        store.remove("x").await;
        assert!(store.expand("${x}").await.is_err());
    }
}
