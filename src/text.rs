//! Line-at-a-time access to text input, shared by the OUTCAR scanners and the trajectory reader.
//!
//! Logs can run to many gigabytes, so nothing here holds more than the current line.

use std::{io, io::BufRead, str::FromStr};

use crate::error::{Error, Result};

/// One line of input, without its terminator, and its 1-based line number.
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct Line<'a> {
    pub num: usize,
    pub text: &'a str,
}

/// A forward-only cursor over the lines of a reader. One line buffer is reused for the whole
/// stream; the most recent line can be handed back with [`LineCursor::unread`], so a scanner
/// that overshoots a section boundary can leave the boundary line for the next scanner.
pub struct LineCursor<R> {
    reader: R,
    buf: String,
    line_num: usize,
    bytes_read: u64,
    pending: bool,
    at_eof: bool,
}

impl<R: BufRead> LineCursor<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: String::new(),
            line_num: 0,
            bytes_read: 0,
            pending: false,
            at_eof: false,
        }
    }

    /// The next line, without its line terminator. `None` at end of input.
    pub fn next_line(&mut self) -> io::Result<Option<Line<'_>>> {
        if self.pending {
            self.pending = false;
            return Ok(Some(self.current()));
        }

        if self.at_eof {
            return Ok(None);
        }

        self.buf.clear();
        let n = self.reader.read_line(&mut self.buf)?;
        if n == 0 {
            self.at_eof = true;
            return Ok(None);
        }

        self.line_num += 1;
        self.bytes_read += n as u64;

        Ok(Some(self.current()))
    }

    fn current(&self) -> Line<'_> {
        Line {
            num: self.line_num,
            text: self.buf.trim_end_matches(['\n', '\r']),
        }
    }

    /// Like `next_line`, but running out of input is an error: we're inside `context`.
    pub fn expect_line(&mut self, context: &'static str) -> Result<Line<'_>> {
        let line_num = self.line_num;
        match self.next_line()? {
            Some(line) => Ok(line),
            None => Err(Error::UnexpectedEndOfStream {
                line: line_num,
                context,
            }),
        }
    }

    /// Hand the most recent line back; the next call to `next_line` returns it again.
    pub fn unread(&mut self) {
        if self.line_num > 0 && !self.at_eof {
            self.pending = true;
        }
    }

    /// 1-based number of the most recently returned line.
    pub fn line_number(&self) -> usize {
        self.line_num
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}

/// Parse one whitespace-delimited token, reporting the line on failure.
pub fn parse_token<T: FromStr>(token: &str, line: usize, expected: &'static str) -> Result<T> {
    token.parse::<T>().map_err(|_| Error::NumericParse {
        line,
        token: token.to_owned(),
        expected,
    })
}

/// Whitespace-separated tokens following the first `=` on a line, e.g. the values of
/// `   POMASS =  28.09 16.00`.
pub fn tokens_after_eq(line: &str) -> impl Iterator<Item = &str> {
    line.split_once('=')
        .map(|(_, rest)| rest)
        .unwrap_or("")
        .split_whitespace()
}

/// Every token after the first `=`, parsed. `None` if there are no tokens at all.
pub fn parse_list_after_eq<T: FromStr>(
    line: &str,
    line_num: usize,
    expected: &'static str,
) -> Result<Option<Vec<T>>> {
    let vals = tokens_after_eq(line)
        .map(|t| parse_token(t, line_num, expected))
        .collect::<Result<Vec<T>>>()?;

    if vals.is_empty() {
        Ok(None)
    } else {
        Ok(Some(vals))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn text(cursor: &mut LineCursor<Cursor<&str>>) -> Option<String> {
        cursor.next_line().unwrap().map(|l| l.text.to_owned())
    }

    #[test]
    fn reads_lines_and_counts() {
        let mut cursor = LineCursor::new(Cursor::new("a\r\nbb\nccc"));

        assert_eq!(text(&mut cursor), Some("a".to_owned()));
        assert_eq!(text(&mut cursor), Some("bb".to_owned()));
        assert_eq!(cursor.line_number(), 2);

        let last = cursor.next_line().unwrap().unwrap();
        assert_eq!(last, Line { num: 3, text: "ccc" });
        assert_eq!(text(&mut cursor), None);
        assert_eq!(cursor.bytes_read(), 9);
    }

    #[test]
    fn unread_returns_the_same_line() {
        let mut cursor = LineCursor::new(Cursor::new("first\nsecond\n"));

        assert_eq!(text(&mut cursor), Some("first".to_owned()));
        cursor.unread();
        assert_eq!(text(&mut cursor), Some("first".to_owned()));
        assert_eq!(cursor.line_number(), 1);
        assert_eq!(text(&mut cursor), Some("second".to_owned()));
    }

    #[test]
    fn expect_line_fails_at_eof() {
        let mut cursor = LineCursor::new(Cursor::new("only\n"));
        cursor.expect_line("test").unwrap();

        let err = cursor.expect_line("lattice vectors").unwrap_err();
        assert!(matches!(
            err,
            Error::UnexpectedEndOfStream {
                context: "lattice vectors",
                ..
            }
        ));
    }

    #[test]
    fn list_after_eq() {
        let masses: Vec<f64> = parse_list_after_eq("   POMASS =  28.09 16.00", 3, "a mass")
            .unwrap()
            .unwrap();
        assert_eq!(masses, vec![28.09, 16.0]);

        let empty: Option<Vec<f64>> = parse_list_after_eq("   POMASS =", 3, "a mass").unwrap();
        assert!(empty.is_none());

        let err = parse_list_after_eq::<usize>("ions per type = 4 x", 9, "an ion count")
            .unwrap_err();
        assert!(matches!(err, Error::NumericParse { line: 9, .. }));
    }
}
