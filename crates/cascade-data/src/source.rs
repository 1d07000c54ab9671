//! The example-source contract.
//!
//! A source produces one [`MultiExample`] per logical unit of input: a
//! single-line task yields a group of one, a multi-line task yields every
//! example up to (and excluding) the empty separator line. The consumer is
//! agnostic to the underlying format; this crate ships the text-format
//! source.

use std::io::BufRead;

use cascade_core::Example;

use crate::error::Result;
use crate::pool::ExamplePool;
use crate::text::TextParser;

/// One logical unit of input: an ordered group of examples.
pub type MultiExample = Vec<Example>;

/// Anything that yields example groups until exhausted.
pub trait ExampleSource {
    /// The next group, or `None` at end of input.
    fn next_group(&mut self, pool: &ExamplePool) -> Result<Option<MultiExample>>;
}

/// Text-format source over any buffered reader.
pub struct TextSource<R: BufRead> {
    reader: R,
    parser: TextParser,
    multiline: bool,
    line: String,
}

impl<R: BufRead> TextSource<R> {
    pub fn new(reader: R, parser: TextParser, multiline: bool) -> Self {
        Self {
            reader,
            parser,
            multiline,
            line: String::new(),
        }
    }

    fn next_example(&mut self, pool: &ExamplePool) -> Result<Option<Example>> {
        self.line.clear();
        let n = self.reader.read_line(&mut self.line)?;
        if n == 0 {
            return Ok(None);
        }
        let mut ex = pool.acquire();
        self.parser.parse_line(&self.line, &mut ex);
        Ok(Some(ex))
    }
}

impl<R: BufRead> ExampleSource for TextSource<R> {
    fn next_group(&mut self, pool: &ExamplePool) -> Result<Option<MultiExample>> {
        if !self.multiline {
            loop {
                match self.next_example(pool)? {
                    None => return Ok(None),
                    Some(ex) if ex.is_newline => {
                        // Separator lines carry nothing in single-line mode.
                        pool.release(ex);
                    }
                    Some(ex) => return Ok(Some(vec![ex])),
                }
            }
        }
        let mut group = MultiExample::new();
        loop {
            match self.next_example(pool)? {
                None => {
                    if group.is_empty() {
                        return Ok(None);
                    }
                    return Ok(Some(group));
                }
                Some(ex) if ex.is_newline => {
                    pool.release(ex);
                    if !group.is_empty() {
                        return Ok(Some(group));
                    }
                }
                Some(ex) => group.push(ex),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cascade_core::hashing::HashFamily;
    use cascade_core::LabelType;
    use std::io::Cursor;

    fn parser() -> TextParser {
        TextParser::new(HashFamily::AllBytes, LabelType::Simple, true, false)
    }

    #[test]
    fn test_single_line_groups() {
        let input = "1 | a:1\n-1 | b:1\n";
        let mut source = TextSource::new(Cursor::new(input), parser(), false);
        let pool = ExamplePool::default();
        let g1 = source.next_group(&pool).unwrap().unwrap();
        assert_eq!(g1.len(), 1);
        let g2 = source.next_group(&pool).unwrap().unwrap();
        assert_eq!(g2.len(), 1);
        assert!(source.next_group(&pool).unwrap().is_none());
    }

    #[test]
    fn test_single_line_skips_separators() {
        let input = "\n\n1 | a:1\n";
        let mut source = TextSource::new(Cursor::new(input), parser(), false);
        let pool = ExamplePool::default();
        let g = source.next_group(&pool).unwrap().unwrap();
        assert_eq!(g.len(), 1);
        assert!(!g[0].is_newline);
    }

    #[test]
    fn test_multiline_groups_split_on_blank() {
        let input = "1 | a:1\n-1 | b:1\n\n1 | c:1\n";
        let mut source = TextSource::new(Cursor::new(input), parser(), true);
        let pool = ExamplePool::default();
        let g1 = source.next_group(&pool).unwrap().unwrap();
        assert_eq!(g1.len(), 2);
        let g2 = source.next_group(&pool).unwrap().unwrap();
        assert_eq!(g2.len(), 1);
        assert!(source.next_group(&pool).unwrap().is_none());
    }
}
