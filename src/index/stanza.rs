// src/index/stanza.rs

//! Shared stanza state machine for line-oriented feeds
//!
//! Debian `Packages`, Nix `.narinfo` and Alpine `APKINDEX` are all sequences
//! of field blocks. The reader walks lines in one of two states:
//!
//! - `OutsideStanza`: blank lines are skipped; the first header opens a stanza.
//! - `InStanza`: headers and continuation lines accumulate; a blank line or a
//!   repeated name field closes the stanza.
//!
//! What counts as a header is decided by a [`StanzaSyntax`]. Lines that fit
//! neither shape are skipped with a debug log.

use tracing::debug;

use crate::error::{Error, Result};

/// How a header line is spelled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderStyle {
    /// `Field-Name: value`, continuation lines start with whitespace;
    /// field names are case-insensitive
    Colon,
    /// `X:value` with a single-character, case-sensitive code
    SingleLetter,
}

/// Field-tag table for one feed format
#[derive(Debug, Clone, Copy)]
pub struct StanzaSyntax {
    pub style: HeaderStyle,
    /// Field whose repetition starts a new stanza
    pub name_field: &'static str,
}

impl StanzaSyntax {
    pub const DEBIAN: Self = Self {
        style: HeaderStyle::Colon,
        name_field: "Package",
    };

    pub const NARINFO: Self = Self {
        style: HeaderStyle::Colon,
        name_field: "StorePath",
    };

    pub const APKINDEX: Self = Self {
        style: HeaderStyle::SingleLetter,
        name_field: "P",
    };

    fn key_eq(&self, a: &str, b: &str) -> bool {
        match self.style {
            HeaderStyle::Colon => a.eq_ignore_ascii_case(b),
            HeaderStyle::SingleLetter => a == b,
        }
    }

    fn split_header<'a>(&self, line: &'a str) -> Option<(&'a str, &'a str)> {
        let (key, value) = line.split_once(':')?;
        let valid = match self.style {
            HeaderStyle::Colon => {
                !key.is_empty() && !key.contains(char::is_whitespace)
            }
            HeaderStyle::SingleLetter => key.chars().count() == 1,
        };
        if !valid {
            return None;
        }
        let value = match self.style {
            HeaderStyle::Colon => value.trim(),
            HeaderStyle::SingleLetter => value.trim_end(),
        };
        Some((key, value))
    }

    fn is_continuation(&self, line: &str) -> bool {
        self.style == HeaderStyle::Colon && line.starts_with([' ', '\t'])
    }
}

/// One completed field block
#[derive(Debug, Clone, Default)]
pub struct Stanza {
    /// 1-based line number of the first header
    pub line: usize,
    fields: Vec<(String, String)>,
    case_sensitive: bool,
}

impl Stanza {
    fn new(line: usize, syntax: &StanzaSyntax) -> Self {
        Self {
            line,
            fields: Vec::new(),
            case_sensitive: syntax.style == HeaderStyle::SingleLetter,
        }
    }

    fn key_eq(&self, a: &str, b: &str) -> bool {
        if self.case_sensitive {
            a == b
        } else {
            a.eq_ignore_ascii_case(b)
        }
    }

    /// First value of a field
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| self.key_eq(k, key))
            .map(|(_, v)| v.as_str())
    }

    /// First non-empty value of a field
    pub fn get_nonempty(&self, key: &str) -> Option<&str> {
        self.get(key).filter(|v| !v.is_empty())
    }

    /// Every value of a repeated field, in order
    pub fn get_all<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.fields
            .iter()
            .filter(move |(k, _)| self.key_eq(k, key))
            .map(|(_, v)| v.as_str())
    }

    /// Value of a mandatory field
    pub fn require(&self, key: &str) -> Result<&str> {
        self.get_nonempty(key).ok_or_else(|| {
            Error::Format(format!(
                "stanza at line {} is missing mandatory field '{}'",
                self.line, key
            ))
        })
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    fn push(&mut self, key: &str, value: &str) {
        self.fields.push((key.to_string(), value.to_string()));
    }

    fn append_continuation(&mut self, line: &str) -> bool {
        match self.fields.last_mut() {
            Some((_, value)) => {
                let text = line.trim();
                value.push('\n');
                // A lone "." stands for an empty line in folded values
                if text != "." {
                    value.push_str(text);
                }
                true
            }
            None => false,
        }
    }
}

enum State {
    OutsideStanza,
    InStanza(Stanza),
}

/// Iterator over the stanzas of a text feed
pub struct Stanzas<'a> {
    syntax: StanzaSyntax,
    lines: std::iter::Enumerate<std::str::Lines<'a>>,
    state: State,
}

impl<'a> Stanzas<'a> {
    pub fn new(text: &'a str, syntax: StanzaSyntax) -> Self {
        Self {
            syntax,
            lines: text.lines().enumerate(),
            state: State::OutsideStanza,
        }
    }

    fn finish(&mut self) -> Option<Stanza> {
        match std::mem::replace(&mut self.state, State::OutsideStanza) {
            State::InStanza(stanza) if !stanza.is_empty() => Some(stanza),
            _ => None,
        }
    }
}

impl Iterator for Stanzas<'_> {
    type Item = Stanza;

    fn next(&mut self) -> Option<Stanza> {
        loop {
            let Some((idx, line)) = self.lines.next() else {
                return self.finish();
            };
            let line_no = idx + 1;

            if line.trim().is_empty() {
                if let Some(stanza) = self.finish() {
                    return Some(stanza);
                }
                continue;
            }

            if self.syntax.is_continuation(line) {
                let appended = match &mut self.state {
                    State::InStanza(stanza) => stanza.append_continuation(line),
                    State::OutsideStanza => false,
                };
                if !appended {
                    debug!("Skipping stray continuation line {}", line_no);
                }
                continue;
            }

            let Some((key, value)) = self.syntax.split_header(line) else {
                debug!("Skipping malformed line {}: {:?}", line_no, line);
                continue;
            };

            let repeats_name = self.syntax.key_eq(key, self.syntax.name_field)
                && matches!(&self.state, State::InStanza(s) if s.contains(self.syntax.name_field));

            if repeats_name {
                let mut next = Stanza::new(line_no, &self.syntax);
                next.push(key, value);
                let done = std::mem::replace(&mut self.state, State::InStanza(next));
                if let State::InStanza(stanza) = done {
                    return Some(stanza);
                }
                continue;
            }

            match &mut self.state {
                State::InStanza(stanza) => stanza.push(key, value),
                State::OutsideStanza => {
                    let mut stanza = Stanza::new(line_no, &self.syntax);
                    stanza.push(key, value);
                    self.state = State::InStanza(stanza);
                }
            }
        }
    }
}

/// Iterate the stanzas of a text feed
pub fn stanzas(text: &str, syntax: StanzaSyntax) -> Stanzas<'_> {
    Stanzas::new(text, syntax)
}

/// Interpret feed bytes as UTF-8 text
pub fn feed_text(feed: &[u8]) -> Result<&str> {
    std::str::from_utf8(feed).map_err(|e| Error::Format(format!("feed is not valid UTF-8: {e}")))
}
