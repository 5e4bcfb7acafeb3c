//! Human-readable echo of logged entries.
//!
//! The echo is a side channel for watching a run in a terminal. It never
//! affects the durable log or the broadcast: a failed echo is reported with
//! `tracing::warn!` and otherwise ignored.

use std::fmt::Write as _;
use std::io::{self, Write};

use serde_json::Value;
use tracing::warn;

use crate::entry::Entry;

/// Renders an entry as one line of text.
pub trait Formatter: Send {
    fn format(&self, entry: &Entry) -> String;
}

impl<F> Formatter for F
where
    F: Fn(&Entry) -> String + Send,
{
    fn format(&self, entry: &Entry) -> String {
        self(entry)
    }
}

/// `key: value | key: value`, floats with four decimals.
///
/// # Examples
///
/// ```
/// # use exp_logger::{entry, DefaultFormatter, Formatter};
/// let line = DefaultFormatter.format(&entry! { "epoch": 2, "loss": 0.123456, "tag": "warm" });
/// assert_eq!(line, "epoch: 2 | loss: 0.1235 | tag: warm");
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultFormatter;

impl DefaultFormatter {
    fn write_value(out: &mut String, value: &Value) {
        match value {
            Value::Number(n) if n.is_f64() => {
                let _ = write!(out, "{:.4}", n.as_f64().unwrap_or(f64::NAN));
            }
            Value::String(s) => out.push_str(s),
            other => {
                let _ = write!(out, "{}", other);
            }
        }
    }
}

impl Formatter for DefaultFormatter {
    fn format(&self, entry: &Entry) -> String {
        let mut out = String::new();
        for (i, (key, value)) in entry.iter().enumerate() {
            if i > 0 {
                out.push_str(" | ");
            }
            out.push_str(key);
            out.push_str(": ");
            Self::write_value(&mut out, value);
        }
        out
    }
}

/// Formatter plus the writer its lines go to (stdout by default).
pub struct Echo {
    formatter: Box<dyn Formatter>,
    out: Box<dyn Write + Send>,
}

impl Echo {
    pub fn new(formatter: Box<dyn Formatter>, out: Box<dyn Write + Send>) -> Self {
        Self { formatter, out }
    }

    pub fn stdout(formatter: Box<dyn Formatter>) -> Self {
        Self::new(formatter, Box::new(io::stdout()))
    }

    /// Writes one formatted line; failures are logged and swallowed.
    pub fn emit(&mut self, entry: &Entry) {
        let line = self.formatter.format(entry);
        let written = writeln!(self.out, "{}", line).and_then(|_| self.out.flush());
        if let Err(e) = written {
            warn!(error = %e, "echo of log entry failed");
        }
    }
}

impl Default for Echo {
    fn default() -> Self {
        Self::stdout(Box::new(DefaultFormatter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_default_formatter_renders_nested_values() {
        let line = DefaultFormatter.format(&entry! { "ok": true, "xs": [1, 2], "none": null });
        assert_eq!(line, "ok: true | xs: [1,2] | none: null");
    }

    #[test]
    fn test_closure_formatter_and_echo_output() {
        let buf = SharedBuf::default();
        let mut echo = Echo::new(
            Box::new(|e: &Entry| format!("{} keys", e.len())),
            Box::new(buf.clone()),
        );
        echo.emit(&entry! { "a": 1, "b": 2 });
        echo.emit(&entry! {});
        assert_eq!(&*buf.0.lock().unwrap(), b"2 keys\n0 keys\n");
    }

    #[test]
    fn test_echo_failure_is_swallowed() {
        let mut echo = Echo::new(Box::new(DefaultFormatter), Box::new(BrokenPipe));
        echo.emit(&entry! { "a": 1 });
    }
}
