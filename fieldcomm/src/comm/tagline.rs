/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! ASCII tag/value lines.
//!
//! Controllers on ASCII links answer with a single line of letter tags each
//! followed by a decimal value, e.g. `a2b0c0d7`.  Line endings vary by
//! firmware (`\r`, `\n`, `\r\n`, even `\r\r\n`); any run of CR/LF counts as
//! one boundary and blank lines never reach the caller.

use std::collections::BTreeMap;
use std::io::Read;

use super::error::CommError;
use super::property::read_byte;

/// Longest line accepted before the stream is treated as garbage.
pub const MAX_LINE: usize = 256;

fn is_eol(b: u8) -> bool {
    b == b'\r' || b == b'\n'
}

/// Read the next non-empty line, without its terminator.
///
/// Terminator characters left over from the previous line are skipped, so
/// the stream stays aligned whatever mix of CR/LF the controller sends.
pub fn read_line(rx: &mut dyn Read) -> Result<String, CommError> {
    let mut line = Vec::new();
    loop {
        let b = read_byte(rx)?;
        if is_eol(b) {
            if line.is_empty() {
                continue;
            }
            break;
        }
        if line.len() >= MAX_LINE {
            return Err(CommError::framing(format!("line exceeds {} bytes", MAX_LINE)));
        }
        line.push(b);
    }
    String::from_utf8(line).map_err(|_| CommError::parsing("line is not ASCII"))
}

/// Split `text` into its non-empty lines.  Idempotent: joining the result
/// with any terminator and splitting again yields the same lines.
pub fn split_lines(text: &str) -> Vec<&str> {
    text.split(['\r', '\n']).filter(|l| !l.is_empty()).collect()
}

/// Value of the decimal run following `tag` in `line`.
///
/// # Errors
/// [`CommError::Parsing`] when the tag is absent or not followed by digits.
pub fn parse_tag(line: &str, tag: char) -> Result<u32, CommError> {
    let start = line
        .find(tag)
        .ok_or_else(|| CommError::parsing(format!("missing tag '{}' in {:?}", tag, line)))?
        + tag.len_utf8();
    let digits: &str = {
        let rest = &line[start..];
        let end = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        &rest[..end]
    };
    if digits.is_empty() {
        return Err(CommError::parsing(format!("no value for tag '{}' in {:?}", tag, line)));
    }
    digits
        .parse()
        .map_err(|_| CommError::parsing(format!("value for tag '{}' out of range", tag)))
}

/// Every tag of a line, keyed by letter.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TagLine {
    fields: BTreeMap<char, u32>,
}

impl TagLine {
    /// Parse a whole line of `<letter><digits>` pairs.  A tag may appear
    /// only once.
    pub fn parse(line: &str) -> Result<Self, CommError> {
        let mut fields = BTreeMap::new();
        for (i, c) in line.char_indices() {
            if c.is_ascii_alphabetic() {
                if fields.insert(c, parse_tag(&line[i..], c)?).is_some() {
                    return Err(CommError::parsing(format!("duplicate tag '{}' in {:?}", c, line)));
                }
            } else if !c.is_ascii_digit() {
                return Err(CommError::parsing(format!("unexpected {:?} in {:?}", c, line)));
            }
        }
        if fields.is_empty() {
            return Err(CommError::parsing(format!("no tags in {:?}", line)));
        }
        Ok(Self { fields })
    }

    pub fn get(&self, tag: char) -> Result<u32, CommError> {
        self.fields
            .get(&tag)
            .copied()
            .ok_or_else(|| CommError::parsing(format!("missing tag '{}'", tag)))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn any_terminator_run_is_one_boundary() {
        let mut rx: &[u8] = b"a1b0\r\r\na2b0\n\na3b1\r";
        assert_eq!(read_line(&mut rx).unwrap(), "a1b0");
        assert_eq!(read_line(&mut rx).unwrap(), "a2b0");
        assert_eq!(read_line(&mut rx).unwrap(), "a3b1");
        assert!(matches!(read_line(&mut rx), Err(CommError::Truncated { .. })));
    }

    #[test]
    fn splitting_is_idempotent() {
        let text = "a1b0\r\r\n\r\na2b0\n";
        let once = split_lines(text);
        assert_eq!(once, vec!["a1b0", "a2b0"]);
        let rejoined = once.join("\r\n");
        assert_eq!(split_lines(&rejoined), once);
    }

    #[test]
    fn tags_parse_as_decimal_runs() {
        let line = "a12b0c3d255";
        assert_eq!(parse_tag(line, 'a').unwrap(), 12);
        assert_eq!(parse_tag(line, 'd').unwrap(), 255);
        let all = TagLine::parse(line).unwrap();
        assert_eq!(all.len(), 4);
        assert_eq!(all.get('c').unwrap(), 3);
    }

    #[test]
    fn missing_or_empty_tags_are_parsing_errors() {
        assert!(matches!(parse_tag("a1b2", 'c'), Err(CommError::Parsing(_))));
        assert!(matches!(parse_tag("a1bc2", 'b'), Err(CommError::Parsing(_))));
        assert!(matches!(TagLine::parse("a1b"), Err(CommError::Parsing(_))));
        assert!(matches!(TagLine::parse("a1 b2"), Err(CommError::Parsing(_))));
        assert!(matches!(TagLine::parse("42"), Err(CommError::Parsing(_))));
    }

    #[test]
    fn repeated_tag_is_a_parsing_error() {
        let err = TagLine::parse("a2b0a4").unwrap_err();
        assert!(matches!(err, CommError::Parsing(ref m) if m.contains("duplicate tag 'a'")));
    }

    #[test]
    fn runaway_line_is_a_framing_error() {
        let long = vec![b'a'; MAX_LINE + 10];
        let mut rx: &[u8] = &long;
        assert!(matches!(read_line(&mut rx), Err(CommError::Framing(_))));
    }
}
