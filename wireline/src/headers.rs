//! Header storage shared by requests and responses.
//!
//! Names are stored as first set and looked up by exact name, matching the
//! manager's contract: one combined value per header, `Append` folding new
//! values in with `", "`.

/// Case-preserving header map with a single combined value per name.
#[derive(Debug, Clone, Default)]
pub struct HeaderMap {
    entries: Vec<(String, String)>,
}

impl HeaderMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Value of `name`, if set. Exact-name lookup.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Set `name` to `value`, replacing any previous value.
    ///
    /// An empty value is kept: blanking a header is how the default `Expect`
    /// suppression is expressed.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == name) {
            Some((_, v)) => *v = value,
            None => self.entries.push((name, value)),
        }
    }

    /// Fold `value` into `name` with a `", "` separator.
    ///
    /// No-op when either the name or the value is empty.
    pub fn append(&mut self, name: &str, value: &str) {
        if name.is_empty() || value.is_empty() {
            return;
        }
        match self.get(name) {
            Some(prev) if !prev.is_empty() => {
                let folded = format!("{prev}, {value}");
                self.set(name, folded);
            }
            _ => self.set(name, value),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate `(name, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Render every header as `"Name: value"`.
    pub fn combined(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|(k, v)| combine_key_value(k, v))
            .collect()
    }
}

/// Render one header as `"Name: value"`.
pub fn combine_key_value(name: &str, value: &str) -> String {
    let mut combined = String::with_capacity(name.len() + 2 + value.len());
    combined.push_str(name);
    combined.push_str(": ");
    combined.push_str(value);
    combined
}

/// True iff every byte of `payload` is in `[A-Za-z0-9-_.~]`.
///
/// Bodies that pass may be sent without an explicit Content-Type; anything
/// else requires the caller to say what it is sending.
pub fn is_url_encoded(payload: &[u8]) -> bool {
    payload
        .iter()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'~'))
}
