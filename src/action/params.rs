//! Parameter wire format.
//!
//! Commands are serialized as `Kind key1='value1' key2='value2'`. Inside a quoted value a
//! backslash escapes the next character. Unquoted values run up to the next whitespace, which
//! keeps hand-written scripts short (`nx=64`). Keys are case-insensitive and stored lowercase.
//!
//! Typed command fields convert to and from the string form through [`Parameter`].

use crate::error::ParseError;

/// A value that can cross the string boundary.
pub trait Parameter: Sized {
    fn export_value(&self) -> String;
    fn import_value(text: &str) -> Result<Self, String>;
}

impl Parameter for String {
    fn export_value(&self) -> String {
        self.clone()
    }

    fn import_value(text: &str) -> Result<Self, String> {
        Ok(text.to_string())
    }
}

impl Parameter for bool {
    fn export_value(&self) -> String {
        if *self { "true" } else { "false" }.to_string()
    }

    fn import_value(text: &str) -> Result<Self, String> {
        match text.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            other => Err(format!("'{}' is not a boolean", other)),
        }
    }
}

macro_rules! numeric_parameter {
    ($($ty:ty),*) => {
        $(
            impl Parameter for $ty {
                fn export_value(&self) -> String {
                    self.to_string()
                }

                fn import_value(text: &str) -> Result<Self, String> {
                    text.trim()
                        .parse::<$ty>()
                        .map_err(|e| format!("'{}' is not a valid {}: {}", text, stringify!($ty), e))
                }
            }
        )*
    };
}

numeric_parameter!(i64, u32, u64, usize, f64);

/// Lists travel as `[a,b,c]`. Inside the brackets a backslash escapes the next character and
/// unescaped whitespace around an item is dropped, so hand-written `[a, b]` works. An empty item is
/// written `""` to keep `[""]` apart from `[]`.
impl Parameter for Vec<String> {
    fn export_value(&self) -> String {
        let items: Vec<String> = self.iter().map(|item| escape_list_item(item)).collect();
        format!("[{}]", items.join(","))
    }

    fn import_value(text: &str) -> Result<Self, String> {
        let text = text.trim();
        let inner = match (text.strip_prefix('['), text.ends_with(']')) {
            (Some(rest), true) => &rest[..rest.len() - 1],
            (None, false) => text,
            _ => return Err(format!("unbalanced brackets in list '{}'", text)),
        };
        if inner.trim().is_empty() {
            return Ok(Vec::new());
        }

        // (char, escaped)
        let mut items = Vec::new();
        let mut current: Vec<(char, bool)> = Vec::new();
        let mut chars = inner.chars();
        while let Some(c) = chars.next() {
            match c {
                '\\' => match chars.next() {
                    Some(escaped) => current.push((escaped, true)),
                    None => return Err("dangling escape at end of list".to_string()),
                },
                ',' => items.push(finish_list_item(std::mem::take(&mut current))),
                other => current.push((other, false)),
            }
        }
        items.push(finish_list_item(current));
        Ok(items)
    }
}

fn finish_list_item(chars: Vec<(char, bool)>) -> String {
    let loose = |&(c, escaped): &(char, bool)| !escaped && c.is_whitespace();
    let start = chars.iter().position(|c| !loose(c)).unwrap_or(chars.len());
    let end = chars.iter().rposition(|c| !loose(c)).map_or(start, |i| i + 1);
    let body = &chars[start..end];
    if body == [('"', false), ('"', false)] {
        return String::new();
    }
    body.iter().map(|&(c, _)| c).collect()
}

fn escape_list_item(item: &str) -> String {
    if item.is_empty() {
        return "\"\"".to_string();
    }
    let first = item.find(|c: char| !c.is_whitespace()).unwrap_or(item.len());
    let last = item
        .rfind(|c: char| !c.is_whitespace())
        .map_or(first, |i| i + item[i..].chars().next().map_or(1, char::len_utf8));
    let mut escaped = String::with_capacity(item.len());
    for (i, c) in item.char_indices() {
        let edge_space = c.is_whitespace() && (i < first || i >= last);
        if edge_space || matches!(c, '\\' | ',' | ']' | '[' | '"') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Quote a value for the wire format.
pub fn quote_value(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('\'');
    for c in value.chars() {
        if c == '\\' || c == '\'' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('\'');
    quoted
}

/// Format ordered pairs as `key='value' key='value'`.
pub fn format_pairs<'a, I>(pairs: I) -> String
where
    I: IntoIterator<Item = (&'a str, String)>,
{
    pairs
        .into_iter()
        .map(|(key, value)| format!("{}={}", key, quote_value(&value)))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Split a command line into its kind token and the remaining key/value text.
pub fn split_kind(input: &str) -> Result<(&str, &str), ParseError> {
    let trimmed = input.trim_start();
    if trimmed.trim_end().is_empty() {
        return Err(ParseError::EmptyCommand);
    }
    let end = trimmed
        .find(char::is_whitespace)
        .unwrap_or(trimmed.len());
    Ok((&trimmed[..end], &trimmed[end..]))
}

/// Scan `key='value'` pairs in order of appearance.
pub fn scan_pairs(input: &str) -> Result<Vec<(String, String)>, ParseError> {
    let chars: Vec<(usize, char)> = input.char_indices().collect();
    let n = chars.len();
    let byte_at = |i: usize| if i < n { chars[i].0 } else { input.len() };

    let mut pairs = Vec::new();
    let mut i = 0;
    loop {
        while i < n && chars[i].1.is_whitespace() {
            i += 1;
        }
        if i >= n {
            break;
        }

        let key_start = i;
        while i < n && (chars[i].1.is_ascii_alphanumeric() || chars[i].1 == '_') {
            i += 1;
        }
        if i == key_start {
            return Err(ParseError::InvalidKey {
                position: byte_at(key_start),
            });
        }
        let key = input[byte_at(key_start)..byte_at(i)].to_ascii_lowercase();

        if i >= n || chars[i].1 != '=' {
            return Err(ParseError::MissingEquals {
                position: byte_at(i),
            });
        }
        i += 1;

        let value = if i < n && (chars[i].1 == '\'' || chars[i].1 == '"') {
            let quote = chars[i].1;
            let open = byte_at(i);
            i += 1;
            let mut value = String::new();
            let mut closed = false;
            while i < n {
                let c = chars[i].1;
                if c == '\\' && i + 1 < n {
                    value.push(chars[i + 1].1);
                    i += 2;
                    continue;
                }
                i += 1;
                if c == quote {
                    closed = true;
                    break;
                }
                value.push(c);
            }
            if !closed {
                return Err(ParseError::UnterminatedQuote { position: open });
            }
            value
        } else {
            let start = i;
            while i < n && !chars[i].1.is_whitespace() {
                i += 1;
            }
            input[byte_at(start)..byte_at(i)].to_string()
        };

        if i < n && !chars[i].1.is_whitespace() {
            return Err(ParseError::InvalidKey {
                position: byte_at(i),
            });
        }
        pairs.push((key, value));
    }

    Ok(pairs)
}
