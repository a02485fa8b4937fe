use indexmap::IndexMap;
use regex::Regex;
use std::sync::Mutex;

/// Maximum number of compiled patterns kept in the cache.
const CACHE_CAPACITY: usize = 128;

/// Anchored glob matching over path strings.
///
/// Syntax: `*` matches within one path component, `**` crosses components,
/// a leading `**/` also matches zero components, `?` matches one character,
/// `.` is literal. Compiled patterns are kept in a small LRU cache since the
/// same filter is re-applied to every candidate of a search.
pub struct GlobMatcher {
    cache: Mutex<IndexMap<String, Option<Regex>>>,
}

impl GlobMatcher {
    pub fn new() -> Self {
        Self {
            cache: Mutex::new(IndexMap::new()),
        }
    }

    /// Whether `path` matches `pattern`. Invalid patterns never match.
    pub fn matches(&self, pattern: &str, path: &str) -> bool {
        let mut cache = self.cache.lock().expect("glob cache poisoned");
        if let Some(compiled) = cache.shift_remove(pattern) {
            // Re-insert at the back to keep recently used patterns alive.
            let hit = compiled
                .as_ref()
                .map(|re| re.is_match(path))
                .unwrap_or(false);
            cache.insert(pattern.to_string(), compiled);
            return hit;
        }

        let compiled = Regex::new(&glob_to_regex(pattern)).ok();
        let hit = compiled
            .as_ref()
            .map(|re| re.is_match(path))
            .unwrap_or(false);
        if cache.len() >= CACHE_CAPACITY {
            cache.shift_remove_index(0);
        }
        cache.insert(pattern.to_string(), compiled);
        hit
    }
}

impl Default for GlobMatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Translate a glob pattern into an anchored regular expression.
pub fn glob_to_regex(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() + 8);
    out.push('^');

    let bytes = pattern.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'*' => {
                if bytes.get(i + 1) == Some(&b'*') {
                    if bytes.get(i + 2) == Some(&b'/') {
                        // `**/` may match zero or more leading components.
                        out.push_str("(.*/)?");
                        i += 3;
                    } else {
                        out.push_str(".*");
                        i += 2;
                    }
                } else {
                    out.push_str("[^/]*");
                    i += 1;
                }
            }
            b'?' => {
                out.push('.');
                i += 1;
            }
            c => {
                let ch = c as char;
                if ch.is_ascii_alphanumeric() || ch == '/' || ch == '_' || ch == '-' {
                    out.push(ch);
                } else {
                    out.push('\\');
                    out.push(ch);
                }
                i += 1;
            }
        }
    }

    out.push('$');
    out
}
