use std::io::{self, Read};

use super::table_config::Dialect;

/// Marker written in place of empty fields, the default `NULL` of
/// PostgreSQL's text `COPY` format.
pub const NULL_MARKER: &[u8] = b"\\N";

const BUFFER_SIZE: usize = 64 * 1024;

/// Reader adapter that rewrites unquoted empty CSV fields as [`NULL_MARKER`]
/// and drops NUL bytes.  Quoted empty fields and blank lines pass through.
pub struct NullMarking<R> {
    inner: R,
    delimiter: u8,
    quote: u8,
    input: Vec<u8>,
    output: Vec<u8>,
    pos: usize,
    in_quotes: bool,
    field_start: bool,
    line_start: bool,
    eof: bool,
}

impl<R: Read> NullMarking<R> {
    pub fn new(inner: R, dialect: Dialect) -> Self {
        NullMarking {
            inner,
            delimiter: dialect.delimiter,
            quote: dialect.quote,
            input: vec![0; BUFFER_SIZE],
            output: Vec::with_capacity(BUFFER_SIZE + BUFFER_SIZE / 2),
            pos: 0,
            in_quotes: false,
            field_start: true,
            line_start: true,
            eof: false,
        }
    }

    fn fill(&mut self) -> io::Result<()> {
        self.output.clear();
        self.pos = 0;
        while self.output.is_empty() && !self.eof {
            let n = self.inner.read(&mut self.input)?;
            if n == 0 {
                self.eof = true;
                if self.field_start && !self.line_start {
                    self.output.extend_from_slice(NULL_MARKER);
                }
                break;
            }
            for i in 0..n {
                let b = self.input[i];
                self.push(b);
            }
        }
        Ok(())
    }

    fn push(&mut self, b: u8) {
        if b == 0 {
            return;
        }
        if self.in_quotes {
            if b == self.quote {
                self.in_quotes = false;
            }
            self.output.push(b);
            return;
        }
        match b {
            _ if b == self.delimiter => {
                if self.field_start {
                    self.output.extend_from_slice(NULL_MARKER);
                }
                self.field_start = true;
                self.line_start = false;
            }
            b'\n' => {
                if self.field_start && !self.line_start {
                    self.output.extend_from_slice(NULL_MARKER);
                }
                self.field_start = true;
                self.line_start = true;
            }
            b'\r' => {
                if self.field_start && !self.line_start {
                    self.output.extend_from_slice(NULL_MARKER);
                }
                self.field_start = false;
            }
            _ if b == self.quote => {
                self.in_quotes = true;
                self.field_start = false;
                self.line_start = false;
            }
            _ => {
                self.field_start = false;
                self.line_start = false;
            }
        }
        self.output.push(b);
    }
}

impl<R: Read> Read for NullMarking<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos >= self.output.len() {
            if self.eof {
                return Ok(0);
            }
            self.fill()?;
        }
        let available = &self.output[self.pos..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.pos += n;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error;
    use std::io::Read;

    use super::*;

    fn rewrite(input: &[u8]) -> Result<String, Box<dyn Error>> {
        let mut out = Vec::new();
        NullMarking::new(input, Dialect::EXCEL_SEMICOLON).read_to_end(&mut out)?;
        Ok(String::from_utf8(out)?)
    }

    /// Reads one byte at a time, to check state survives buffer boundaries.
    struct Trickle<'a>(&'a [u8]);

    impl Read for Trickle<'_> {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.0.is_empty() || buf.is_empty() {
                return Ok(0);
            }
            buf[0] = self.0[0];
            self.0 = &self.0[1..];
            Ok(1)
        }
    }

    #[test]
    fn empty_fields_become_null() -> Result<(), Box<dyn Error>> {
        assert_eq!(rewrite(b"a;;b\n")?, "a;\\N;b\n");
        assert_eq!(rewrite(b";a\n")?, "\\N;a\n");
        assert_eq!(rewrite(b"a;\n")?, "a;\\N\n");
        assert_eq!(rewrite(b"a;\r\nb;c\r\n")?, "a;\\N\r\nb;c\r\n");
        assert_eq!(rewrite(b"a;")?, "a;\\N");
        Ok(())
    }

    #[test]
    fn quoted_and_blank_untouched() -> Result<(), Box<dyn Error>> {
        assert_eq!(rewrite(b"\"\";x\n")?, "\"\";x\n");
        assert_eq!(rewrite(b"\"a;;b\";c\n")?, "\"a;;b\";c\n");
        assert_eq!(rewrite(b"\"say \"\"hi\"\"\";\n")?, "\"say \"\"hi\"\"\";\\N\n");
        assert_eq!(rewrite(b"a\n\nb\n")?, "a\n\nb\n");
        assert_eq!(rewrite(b"")?, "");
        Ok(())
    }

    #[test]
    fn nul_bytes_dropped() -> Result<(), Box<dyn Error>> {
        assert_eq!(rewrite(b"a\0b;c\n")?, "ab;c\n");
        Ok(())
    }

    #[test]
    fn independent_of_read_size() -> Result<(), Box<dyn Error>> {
        let input = b"h1;h2;h3\n1;;3\n;\"\";\n";
        let mut out = Vec::new();
        NullMarking::new(Trickle(input), Dialect::EXCEL_SEMICOLON).read_to_end(&mut out)?;
        assert_eq!(String::from_utf8(out)?, rewrite(input)?);
        assert_eq!(rewrite(input)?, "h1;h2;h3\n1;\\N;3\n\\N;\"\";\\N\n");
        Ok(())
    }
}
