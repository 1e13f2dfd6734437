use std::io::Write;

#[derive(PartialEq, Eq, Clone, Copy, Debug)]
enum State {
    LineStart,
    Text,
    Escape,
}

const CSI: (char, char) = ('\x1b', '[');

/// Wraps text written through it at a fixed column and indents the continuation lines.
///
/// ANSI escape sequences pass through untouched and do not count towards the width, so the
/// colourised output of `Visualize` and the tracing formatter wrap at the same place.
pub struct FormatWriter<W> {
    inner: W,
    max_width: u16,
    width: u16,
    padding: &'static str,
    padding_width: u16,
    state: State,
    resume: State,
}

impl<W: Write> FormatWriter<W> {
    /// Wraps at the terminal width, or 80 columns when there is no terminal.
    pub fn new(writer: W, padding: &'static str) -> Self {
        let max_width = termsize::get().map(|s| s.cols).unwrap_or(80);
        Self::with_width(writer, padding, max_width)
    }
    pub fn with_width(writer: W, mut padding: &'static str, max_width: u16) -> Self {
        let mut padding_width = u16::try_from(display_width(padding)).unwrap_or(u16::MAX);

        if padding_width >= max_width {
            padding = "";
            padding_width = 0;
        }

        Self {
            inner: writer,
            max_width: max_width.max(1),
            width: 0,
            padding,
            padding_width,
            state: State::Text,
            resume: State::Text,
        }
    }
    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> std::io::Write for FormatWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut chars = std::str::from_utf8(buf)
            .map_err(|_| {
                std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "FormatWriter received non-utf8 bytes",
                )
            })?
            .chars();

        while let Some(next) = chars.next() {
            let mut tmp = [0u8; 4];
            let encoded = next.encode_utf8(&mut tmp).as_bytes();

            if self.state == State::Escape {
                self.inner.write_all(encoded)?;
                // final byte of a control sequence
                if let '\x40'..='\x7e' = next {
                    self.state = self.resume;
                }
                continue;
            }

            if next == '\n' {
                self.inner.write_all(b"\n")?;
                self.state = State::LineStart;
                self.width = 0;
                continue;
            }

            if self.state == State::LineStart {
                self.width = self.padding_width;
                self.inner.write_all(self.padding.as_bytes())?;
                self.state = State::Text;
            }

            if next == CSI.0 && chars.clone().next() == Some(CSI.1) {
                self.resume = self.state;
                self.state = State::Escape;
                chars.next();
                self.inner.write_all(b"\x1b[")?;
                continue;
            }

            self.inner.write_all(encoded)?;
            self.width += 1;
            if self.width >= self.max_width {
                self.inner.write_all(b"\n")?;
                self.state = State::LineStart;
                self.width = 0;
            }
        }

        Ok(buf.len())
    }
    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

impl<W: Write> std::fmt::Write for FormatWriter<W> {
    fn write_str(&mut self, s: &str) -> std::fmt::Result {
        self.write_all(s.as_bytes()).map_err(|_| std::fmt::Error)
    }
}

/// Number of printed columns, skipping ANSI control sequences.
pub fn display_width(str: &str) -> usize {
    let mut i = 0;
    let mut chars = str.chars();
    'outer: while let Some(next) = chars.next() {
        if next == CSI.0 && chars.clone().next() == Some(CSI.1) {
            chars.next();
            for next in chars.by_ref() {
                if let '\x40'..='\x7e' = next {
                    continue 'outer;
                }
            }
        }
        i += 1;
    }
    i
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_width_skips_escapes() {
        assert_eq!(display_width("abc"), 3);
        assert_eq!(display_width("\x1b[31mabc\x1b[0m"), 3);
        assert_eq!(display_width(""), 0);
    }

    #[test]
    fn test_wraps_and_pads() {
        let mut writer = FormatWriter::with_width(Vec::new(), "  ", 4);
        write!(writer, "abcde\nx").unwrap();
        let out = String::from_utf8(writer.into_inner()).unwrap();
        assert_eq!(out, "abcd\n  e\n  x");
    }

    #[test]
    fn test_escapes_do_not_wrap() {
        let mut writer = FormatWriter::with_width(Vec::new(), "", 3);
        write!(writer, "\x1b[1mab\x1b[0m").unwrap();
        let out = String::from_utf8(writer.into_inner()).unwrap();
        assert_eq!(out, "\x1b[1mab\x1b[0m");
    }
}
