//! Chat message bodies.
//!
//! A [`Message`] is a sequence of text and emoticon segments. Segmentation is
//! lossless: rendering a constructed message yields exactly the input text.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Emoticon metadata as delivered in the `emots` table of a chat message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Emoticon {
    pub descript: String,
    pub emoji: String,
    pub emoticon_id: i64,
    pub emoticon_unique: String,
    pub height: i64,
    pub width: i64,
    pub url: String,
}

impl Emoticon {
    /// An emoticon that only knows its display name.
    pub fn named(emoji: impl Into<String>) -> Self {
        let emoji = emoji.into();
        Self {
            descript: emoji.clone(),
            emoji,
            ..Default::default()
        }
    }
}

/// Table of emoticons referenced by a message, keyed by token name.
///
/// Upstream keys sometimes include the surrounding brackets (`"[dog]"`) and
/// sometimes do not; lookups accept both.
pub type EmoticonTable = HashMap<String, Emoticon>;

/// One piece of a message body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Segment {
    Text(String),
    Emoticon {
        /// Token text between the brackets.
        name: String,
        emoticon: Emoticon,
    },
}

impl Segment {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    pub fn is_text(&self) -> bool {
        matches!(self, Self::Text(_))
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => f.write_str(text),
            Self::Emoticon { name, .. } => write!(f, "[{name}]"),
        }
    }
}

/// A segmented chat message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Message(Vec<Segment>);

impl Message {
    /// Segment `content`, resolving `[name]` tokens against `emots`.
    ///
    /// Each unresolved token is kept verbatim as its own text segment, as is an
    /// unterminated trailing `[`. A stray `]` stays inside the text around it.
    pub fn construct(content: &str, emots: Option<&EmoticonTable>) -> Self {
        let mut scanner = Scanner::new(emots);
        for ch in content.chars() {
            scanner.push(ch);
        }
        scanner.finish()
    }

    /// A message consisting of a single text segment.
    pub fn text(content: impl Into<String>) -> Self {
        let content = content.into();
        if content.is_empty() {
            return Self::default();
        }
        Self(vec![Segment::Text(content)])
    }

    pub fn segments(&self) -> &[Segment] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Concatenated text segments, emoticons left out.
    pub fn plain_text(&self) -> String {
        self.0
            .iter()
            .filter_map(|seg| match seg {
                Segment::Text(text) => Some(text.as_str()),
                Segment::Emoticon { .. } => None,
            })
            .collect()
    }

    /// Emoticon segments in order of appearance.
    pub fn emoticons(&self) -> impl Iterator<Item = &Emoticon> {
        self.0.iter().filter_map(|seg| match seg {
            Segment::Emoticon { emoticon, .. } => Some(emoticon),
            Segment::Text(_) => None,
        })
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for seg in &self.0 {
            write!(f, "{seg}")?;
        }
        Ok(())
    }
}

impl From<Vec<Segment>> for Message {
    fn from(segments: Vec<Segment>) -> Self {
        Self(segments)
    }
}

impl IntoIterator for Message {
    type Item = Segment;
    type IntoIter = std::vec::IntoIter<Segment>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Single-pass bracket scanner.
///
/// Every `[` ends the pending text segment. A bracketed token becomes an
/// emoticon when it resolves and its own literal text segment otherwise.
struct Scanner<'a> {
    emots: Option<&'a EmoticonTable>,
    segments: Vec<Segment>,
    text: String,
    token: Option<String>,
}

impl<'a> Scanner<'a> {
    fn new(emots: Option<&'a EmoticonTable>) -> Self {
        Self {
            emots,
            segments: Vec::new(),
            text: String::new(),
            token: None,
        }
    }

    fn push(&mut self, ch: char) {
        match (ch, self.token.take()) {
            ('[', Some(pending)) => {
                // Nested opener: the earlier one was literal.
                self.segments.push(Segment::Text(format!("[{pending}")));
                self.token = Some(String::new());
            }
            ('[', None) => {
                self.flush_text();
                self.token = Some(String::new());
            }
            (']', Some(name)) => self.close(name),
            (ch, Some(mut pending)) => {
                pending.push(ch);
                self.token = Some(pending);
            }
            (ch, None) => self.text.push(ch),
        }
    }

    fn close(&mut self, name: String) {
        let segment = match self.lookup(&name) {
            Some(emoticon) => Segment::Emoticon { name, emoticon },
            None => Segment::Text(format!("[{name}]")),
        };
        self.segments.push(segment);
    }

    fn lookup(&self, name: &str) -> Option<Emoticon> {
        if name.is_empty() {
            return None;
        }
        let emots = self.emots?;
        emots
            .get(name)
            .or_else(|| emots.get(&format!("[{name}]")))
            .cloned()
    }

    fn flush_text(&mut self) {
        if !self.text.is_empty() {
            self.segments
                .push(Segment::Text(std::mem::take(&mut self.text)));
        }
    }

    fn finish(mut self) -> Message {
        self.flush_text();
        if let Some(pending) = self.token.take() {
            self.segments.push(Segment::Text(format!("[{pending}")));
        }
        Message(self.segments)
    }
}
