//! Extraction of command blocks from model output.
//!
//! The model embeds commands in its text as balanced same-name tag
//! pairs, `<name>...</name>`. This module finds them with a single
//! left-to-right pass over a restricted grammar: blocks never nest at
//! the same scan level, and a field value that itself contains balanced
//! `<tag>...</tag>` text is captured verbatim as text, not parsed
//! recursively.

use std::error::Error as StdError;
use std::fmt::{self, Display};
use std::ops::Range;

/// Wrapper tags that carry no executable meaning. Stripping removes the
/// tags themselves and keeps their content, so they never interfere
/// with command detection.
pub const PRESENTATIONAL_TAGS: &[&str] = &["out_text", "thinking"];

/// Error raised when a matched block's interior cannot be parsed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MalformedCommand {
    /// The name of the command block that failed to parse.
    pub command: String,
    /// What was wrong with it.
    pub reason: String,
}

impl Display for MalformedCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "malformed command <{}>: {}", self.command, self.reason)
    }
}

impl StdError for MalformedCommand {}

/// A parsed command block: the unit of dispatch for one tool call.
///
/// Lives only for the duration of one turn's processing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandBlock {
    name: String,
    raw: String,
    fields: Vec<(String, String)>,
}

impl CommandBlock {
    /// The tag name, which is the command name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The raw text span of the whole block, tags included.
    #[inline]
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Returns the trimmed text of the first child field with the given
    /// name, if present.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value.as_str())
    }

    /// All child fields, in order of appearance.
    #[inline]
    pub fn fields(&self) -> &[(String, String)] {
        &self.fields
    }
}

/// Removes the presentational wrapper tags from `text`, keeping their
/// content.
pub fn strip_presentational(text: &str) -> String {
    let mut out = text.to_owned();
    for tag in PRESENTATIONAL_TAGS {
        out = out.replace(&format!("<{tag}>"), "");
        out = out.replace(&format!("</{tag}>"), "");
    }
    out
}

/// Removes every balanced `<name>...</name>` block from `text`,
/// content included, and trims the remainder. Assistant turns are
/// stored in this form so a replayed history cannot re-trigger the
/// same commands.
pub fn remove_blocks(text: &str) -> String {
    let mut out = String::new();
    let mut pos = 0;
    while let Some(span) = next_block(text, pos) {
        out.push_str(&text[pos..span.start]);
        pos = span.end;
    }
    out.push_str(&text[pos..]);
    out.trim().to_owned()
}

/// Finds every command block in `text`, in left-to-right order.
///
/// A block that matched but whose interior cannot be parsed yields a
/// [`MalformedCommand`] in its place, so one broken block never hides
/// the others. Extraction is stateless: running it twice on the same
/// text yields identical results.
pub fn extract(text: &str) -> Vec<Result<CommandBlock, MalformedCommand>> {
    let mut blocks = Vec::new();
    let mut pos = 0;
    while let Some(span) = next_block(text, pos) {
        blocks.push(parse_block(text, &span));
        pos = span.end;
    }
    blocks
}

struct BlockSpan {
    start: usize,
    end: usize,
    name: String,
    inner: Range<usize>,
}

/// Finds the next balanced `<name>...</name>` block at or after `from`.
fn next_block(text: &str, from: usize) -> Option<BlockSpan> {
    let mut search = from;
    while let Some(rel) = text[search..].find('<') {
        let open = search + rel;
        if let Some((name, inner_start)) = open_tag(text, open) {
            let close_tag = format!("</{name}>");
            if let Some(rel_close) = text[inner_start..].find(&close_tag) {
                let inner_end = inner_start + rel_close;
                return Some(BlockSpan {
                    start: open,
                    end: inner_end + close_tag.len(),
                    name: name.to_owned(),
                    inner: inner_start..inner_end,
                });
            }
        }
        search = open + 1;
    }
    None
}

/// Parses an opening tag at `open` (pointing at `<`). Returns the tag
/// name and the offset just past `>`. The name must be a non-empty run
/// of word characters.
fn open_tag(text: &str, open: usize) -> Option<(&str, usize)> {
    let rest = &text[open + 1..];
    for (i, c) in rest.char_indices() {
        if c == '>' {
            if i == 0 {
                return None;
            }
            return Some((&rest[..i], open + 1 + i + 1));
        }
        if !(c.is_ascii_alphanumeric() || c == '_') {
            return None;
        }
    }
    None
}

fn parse_block(
    text: &str,
    span: &BlockSpan,
) -> Result<CommandBlock, MalformedCommand> {
    let inner = &text[span.inner.clone()];
    let mut fields = Vec::new();
    let mut pos = 0;
    while let Some(rel) = inner[pos..].find('<') {
        let open = pos + rel;
        let Some((name, body_start)) = open_tag(inner, open) else {
            pos = open + 1;
            continue;
        };
        let close_tag = format!("</{name}>");
        let Some(rel_close) = inner[body_start..].find(&close_tag) else {
            return Err(MalformedCommand {
                command: span.name.clone(),
                reason: format!("field <{name}> is never closed"),
            });
        };
        let body = &inner[body_start..body_start + rel_close];
        fields.push((name.to_owned(), body.trim().to_owned()));
        pos = body_start + rel_close + close_tag.len();
    }
    Ok(CommandBlock {
        name: span.name.clone(),
        raw: text[span.start..span.end].to_owned(),
        fields,
    })
}
