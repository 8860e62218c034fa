//! Plain `key=value` property files.

use std::collections::BTreeMap;

/// Parse `key=value` lines.
///
/// Blank lines and lines starting with `#` or `!` are skipped. The first `=`
/// (or `:` if there is no `=`) separates key and value; both are trimmed.
/// Later duplicates win.
pub fn parse(text: &str) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
            continue;
        }
        let split = line.find('=').or_else(|| line.find(':'));
        let (key, value) = match split {
            Some(idx) => (&line[..idx], &line[idx + 1..]),
            None => (line, ""),
        };
        out.insert(key.trim().to_string(), value.trim().to_string());
    }
    out
}

/// Render properties in key order, one per line.
pub fn render(header: &str, props: &BTreeMap<String, String>) -> String {
    let mut out = String::new();
    for line in header.lines() {
        out.push_str("# ");
        out.push_str(line);
        out.push('\n');
    }
    for (key, value) in props {
        out.push_str(key);
        out.push('=');
        out.push_str(value);
        out.push('\n');
    }
    out
}
