//! Embedding free-form text in generated Python.
//!
//! Every string that reaches the output passes through [`OpaqueLiteral`],
//! which must be told how the text is going to be used.

use std::sync::OnceLock;

use regex::Regex;

/// How a piece of text is embedded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Escaping {
    /// A double-quoted string literal.
    String,
    /// A string literal holding a filesystem path.
    Path,
    /// A triple-quoted docstring.
    DocString,
    /// Source code, emitted as-is.
    Code,
}

/// Text of unknown content together with its escaping rule.
#[derive(Debug, Clone, Copy)]
pub struct OpaqueLiteral<'a> {
    text: &'a str,
    escaping: Escaping,
}

impl<'a> OpaqueLiteral<'a> {
    pub fn new(text: &'a str, escaping: Escaping) -> Self {
        Self { text, escaping }
    }

    pub fn string(text: &'a str) -> Self {
        Self::new(text, Escaping::String)
    }

    pub fn path(text: &'a str) -> Self {
        Self::new(text, Escaping::Path)
    }

    pub fn doc(text: &'a str) -> Self {
        Self::new(text, Escaping::DocString)
    }

    pub fn code(text: &'a str) -> Self {
        Self::new(text, Escaping::Code)
    }

    /// Render the literal. The error is a human-readable reason.
    pub fn render(&self) -> Result<String, String> {
        if self.text.contains('\0') {
            return Err("contains a NUL byte".to_string());
        }
        let text = normalize_newlines(self.text);
        Ok(match self.escaping {
            Escaping::String if is_path_like(&text) => quote(&to_forward_slashes(&text)),
            Escaping::String => quote(&text),
            Escaping::Path => quote(&to_forward_slashes(&text)),
            Escaping::DocString => doc_quote(&text),
            Escaping::Code => normalize_path_literals(&text),
        })
    }
}

/// Render a float as a Python literal.
pub fn float(value: f32) -> Result<String, String> {
    if !value.is_finite() {
        return Err(format!("{} is not a finite number", value));
    }
    Ok(format!("{:?}", value))
}

/// Python `True` / `False`.
pub fn boolean(value: bool) -> &'static str {
    if value {
        "True"
    } else {
        "False"
    }
}

fn normalize_newlines(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

/// Windows drive paths, UNC paths and `.\` relative paths.
pub fn is_path_like(text: &str) -> bool {
    let t = text.trim();
    let b = t.as_bytes();
    let drive = b.len() >= 3 && b[0].is_ascii_alphabetic() && b[1] == b':' && b[2] == b'\\';
    drive || t.starts_with("\\\\") || t.starts_with(".\\") || t.starts_with("..\\")
}

fn to_forward_slashes(text: &str) -> String {
    static RUNS: OnceLock<Regex> = OnceLock::new();
    let re = RUNS.get_or_init(|| Regex::new(r"\\+").unwrap());
    let t = text.trim();
    // A UNC prefix keeps its double slash.
    if let Some(rest) = t.strip_prefix("\\\\") {
        return format!("//{}", re.replace_all(rest, "/"));
    }
    re.replace_all(t, "/").into_owned()
}

fn quote(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                out.push_str(&format!("\\x{:02x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

fn doc_quote(text: &str) -> String {
    let mut body = text.replace('\\', "\\\\").replace("\"\"\"", "\\\"\\\"\\\"");
    if body.ends_with('"') {
        body.pop();
        body.push_str("\\\"");
    }
    format!("\"\"\"{}\"\"\"", body)
}

/// Rewrite path-like string literals inside code to forward slashes.
///
/// Only a drive prefix (`C:\`) or a relative prefix followed by a segment
/// (`.\dir`) marks a literal as a path. A literal opening with an escaped
/// backslash (`"\\"`, `"\\n"`) is ordinary code and stays untouched.
fn normalize_path_literals(code: &str) -> String {
    static LITERALS: OnceLock<[Regex; 2]> = OnceLock::new();
    let [double, single] = LITERALS.get_or_init(|| {
        [
            Regex::new(r#""((?:[A-Za-z]:\\|\.{1,2}\\+[\w-])[^"\n]*)""#).unwrap(),
            Regex::new(r"'((?:[A-Za-z]:\\|\.{1,2}\\+[\w-])[^'\n]*)'").unwrap(),
        ]
    });
    let pass = double.replace_all(code, |caps: &regex::Captures| {
        format!("\"{}\"", to_forward_slashes(&caps[1]))
    });
    single
        .replace_all(&pass, |caps: &regex::Captures| {
            format!("'{}'", to_forward_slashes(&caps[1]))
        })
        .into_owned()
}
