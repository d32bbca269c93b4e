//! The structured offer block embedded in assistant text.
//!
//! ```text
//! <offer_tag artifact_id="new">
//! customer_name: "UAB Vandenys"
//! notes: |
//!   Delivery in 3 weeks.
//!   Installation included.
//! </offer_tag>
//! ```
//!
//! Blocks may be partial while streaming, so every function here tolerates
//! a missing close tag.

/// Prefix of the open tag. Attributes may follow before `>`.
pub const OPEN_TAG: &str = "<offer_tag";
/// The close tag.
pub const CLOSE_TAG: &str = "</offer_tag>";
/// The `artifact_id` value that asks for a fresh artifact.
pub const NEW_ARTIFACT_ID: &str = "new";

/// An offer block found in a text.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OfferBlock {
    /// Value of the `artifact_id` attribute.
    pub artifact_id: Option<String>,
    /// The payload between the tags, trimmed.
    pub content: String,
    /// Whether the close tag was found.
    pub closed: bool,
}

impl OfferBlock {
    /// Returns `true` if the block asks for a fresh artifact.
    #[inline]
    pub fn wants_new_artifact(&self) -> bool {
        self.artifact_id.as_deref() == Some(NEW_ARTIFACT_ID)
    }
}

/// A text split into its chat-visible part and the offer payload, for
/// live previews.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StreamSplit {
    /// Text outside the offer block.
    pub chat: String,
    /// The payload received so far, once the open tag is complete.
    pub artifact: Option<String>,
    /// Whether the close tag has arrived.
    pub closed: bool,
}

enum OpenTag<'a> {
    Complete {
        start: usize,
        attrs: &'a str,
        content_start: usize,
    },
    Partial {
        start: usize,
    },
}

fn find_open_tag(text: &str) -> Option<OpenTag<'_>> {
    let mut from = 0;
    while let Some(pos) = text[from..].find(OPEN_TAG) {
        let start = from + pos;
        let after = start + OPEN_TAG.len();
        let rest = &text[after..];
        match rest.chars().next() {
            None => return Some(OpenTag::Partial { start }),
            Some(c) if c == '>' || c.is_whitespace() => {
                return Some(match rest.find('>') {
                    Some(end) => OpenTag::Complete {
                        start,
                        attrs: &rest[..end],
                        content_start: after + end + 1,
                    },
                    None => OpenTag::Partial { start },
                });
            }
            // Some other tag like `<offer_tagline>`.
            Some(_) => from = after,
        }
    }
    None
}

/// Length of the longest suffix of `text` that is a proper prefix of `tag`.
fn partial_suffix_len(text: &str, tag: &str) -> usize {
    (1..tag.len())
        .rev()
        .find(|&len| text.ends_with(&tag[..len]))
        .unwrap_or(0)
}

fn attribute(attrs: &str, name: &str) -> Option<String> {
    let mut rest = attrs;
    while let Some(pos) = rest.find(name) {
        let after = rest[pos + name.len()..].trim_start();
        let preceded_by_space = rest[..pos]
            .chars()
            .next_back()
            .is_none_or(char::is_whitespace);
        if let (true, Some(value)) = (preceded_by_space, after.strip_prefix('='))
        {
            let value = value.trim_start();
            let quote = value.chars().next()?;
            if quote == '"' || quote == '\'' {
                let value = &value[1..];
                let end = value.find(quote)?;
                return Some(value[..end].to_owned());
            }
            let end = value.find(char::is_whitespace).unwrap_or(value.len());
            return Some(value[..end].to_owned());
        }
        rest = &rest[pos + name.len()..];
    }
    None
}

/// Finds the first offer block in `text`.
///
/// Returns `None` until the open tag is complete.
pub fn find_block(text: &str) -> Option<OfferBlock> {
    let OpenTag::Complete {
        attrs,
        content_start,
        ..
    } = find_open_tag(text)?
    else {
        return None;
    };
    let rest = &text[content_start..];
    let (content, closed) = match rest.find(CLOSE_TAG) {
        Some(end) => (&rest[..end], true),
        None => (rest, false),
    };
    Some(OfferBlock {
        artifact_id: attribute(attrs, "artifact_id"),
        content: content.trim().to_owned(),
        closed,
    })
}

/// Splits a partially received text for live previews.
///
/// A trailing fragment that may grow into a tag is held back from both
/// parts, so a half-received `<offer_` never flashes in the chat.
pub fn split_streaming(text: &str) -> StreamSplit {
    match find_open_tag(text) {
        None => {
            let held = partial_suffix_len(text, OPEN_TAG);
            StreamSplit {
                chat: text[..text.len() - held].to_owned(),
                artifact: None,
                closed: false,
            }
        }
        Some(OpenTag::Partial { start }) => StreamSplit {
            chat: text[..start].to_owned(),
            artifact: None,
            closed: false,
        },
        Some(OpenTag::Complete {
            start,
            content_start,
            ..
        }) => {
            let rest = &text[content_start..];
            match rest.find(CLOSE_TAG) {
                Some(end) => {
                    let tail = &rest[end + CLOSE_TAG.len()..];
                    let held = partial_suffix_len(tail, OPEN_TAG);
                    let mut chat = text[..start].to_owned();
                    chat.push_str(&tail[..tail.len() - held]);
                    StreamSplit {
                        chat,
                        artifact: Some(rest[..end].trim().to_owned()),
                        closed: true,
                    }
                }
                None => {
                    let held = partial_suffix_len(rest, CLOSE_TAG);
                    StreamSplit {
                        chat: text[..start].to_owned(),
                        artifact: Some(
                            rest[..rest.len() - held].trim().to_owned(),
                        ),
                        closed: false,
                    }
                }
            }
        }
    }
}

/// Parses the offer payload into ordered `(key, value)` pairs.
///
/// Supported values are double or single quoted scalars, bare scalars and
/// pipe block scalars whose indented lines are joined with `\n`. Lines
/// that don't start with a key are skipped.
pub fn parse_fields(content: &str) -> Vec<(String, String)> {
    let lines: Vec<&str> = content.lines().collect();
    let mut fields = Vec::new();
    let mut idx = 0;
    while idx < lines.len() {
        let line = lines[idx];
        idx += 1;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let Some((key, value)) = trimmed.split_once(':') else {
            trace!("skipping offer line without key: {trimmed}");
            continue;
        };
        let key = key.trim();
        if key.is_empty()
            || !key
                .chars()
                .all(|c| c.is_alphanumeric() || c == '_' || c == '-' || c == '.')
        {
            trace!("skipping offer line with invalid key: {trimmed}");
            continue;
        }

        let value = value.trim();
        if value == "|" || value == "|-" {
            let mut block = Vec::new();
            while idx < lines.len() {
                let next = lines[idx];
                if !next.trim().is_empty() && !next.starts_with([' ', '\t']) {
                    break;
                }
                block.push(next);
                idx += 1;
            }
            while block.last().is_some_and(|l| l.trim().is_empty()) {
                block.pop();
            }
            let indent = block
                .iter()
                .filter(|l| !l.trim().is_empty())
                .map(|l| l.len() - l.trim_start().len())
                .min()
                .unwrap_or(0);
            let text = block
                .iter()
                .map(|l| l.get(indent..).unwrap_or("").trim_end())
                .collect::<Vec<_>>()
                .join("\n");
            fields.push((key.to_owned(), text));
            continue;
        }

        fields.push((key.to_owned(), unquote(value)));
    }
    fields
}

fn unquote(value: &str) -> String {
    let quoted = |q: char| {
        value.len() >= 2 && value.starts_with(q) && value.ends_with(q)
    };
    if quoted('"') {
        let inner = &value[1..value.len() - 1];
        let mut out = String::with_capacity(inner.len());
        let mut chars = inner.chars();
        while let Some(c) = chars.next() {
            if c != '\\' {
                out.push(c);
                continue;
            }
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some(other) => out.push(other),
                None => out.push('\\'),
            }
        }
        out
    } else if quoted('\'') {
        value[1..value.len() - 1].replace("''", "'")
    } else {
        value.to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_block() {
        let text = r#"Price: <offer_tag artifact_id="new">key: "v"</offer_tag>"#;
        let block = find_block(text).unwrap();
        assert_eq!(block.content, r#"key: "v""#);
        assert!(block.closed);
        assert!(block.wants_new_artifact());

        let block = find_block("<offer_tag>\na: 1\n").unwrap();
        assert_eq!(block.artifact_id, None);
        assert_eq!(block.content, "a: 1");
        assert!(!block.closed);

        assert!(find_block("<offer_tag artifact_id=\"x\"").is_none());
        assert!(find_block("<offer_tagline>x</offer_tagline>").is_none());
    }

    #[test]
    fn test_attribute_forms() {
        assert_eq!(
            attribute(" artifact_id='a-1' other=\"x\"", "artifact_id"),
            Some("a-1".to_owned())
        );
        assert_eq!(
            attribute(" artifact_id = b2 ", "artifact_id"),
            Some("b2".to_owned())
        );
        assert_eq!(attribute(" my_artifact_id=\"c\"", "artifact_id"), None);
    }

    #[test]
    fn test_split_streaming() {
        let split = split_streaming("Price: <off");
        assert_eq!(split.chat, "Price: ");
        assert_eq!(split.artifact, None);

        let split = split_streaming("Price: <offer_tag artifact_id=\"new\">key: \"v\"</off");
        assert_eq!(split.chat, "Price: ");
        assert_eq!(split.artifact.as_deref(), Some("key: \"v\""));
        assert!(!split.closed);

        let split = split_streaming(
            "Price: <offer_tag artifact_id=\"new\">key: \"v\"</offer_tag> Done.",
        );
        assert_eq!(split.chat, "Price:  Done.");
        assert!(split.closed);

        let split = split_streaming("Use <b>bold</b>");
        assert_eq!(split.chat, "Use <b>bold</b>");
    }

    #[test]
    fn test_parse_fields() {
        let content = r#"customer_name: "UAB \"Vandenys\""
equipment: HNVN10
notes: |
  Delivery in 3 weeks.

  Installation included.
price: '1 200 EUR'
not a field
"#;
        let fields = parse_fields(content);
        assert_eq!(
            fields,
            vec![
                ("customer_name".to_owned(), "UAB \"Vandenys\"".to_owned()),
                ("equipment".to_owned(), "HNVN10".to_owned()),
                (
                    "notes".to_owned(),
                    "Delivery in 3 weeks.\n\nInstallation included.".to_owned()
                ),
                ("price".to_owned(), "1 200 EUR".to_owned()),
            ]
        );
    }
}
