//! Console output shared by the chat loop, observers, and startup
//! diagnostics. Wraps stdout and stderr behind one cloneable handle so
//! tests can swap in buffers.

use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use super::markdown;

#[derive(Clone)]
pub struct Console {
    inner: Arc<ConsoleInner>,
}

struct ConsoleInner {
    stdout: Mutex<Box<dyn Write + Send>>,
    stderr: Mutex<Box<dyn Write + Send>>,
    markdown: bool,
}

impl Console {
    /// Console over the process stdio. `markdown` turns ANSI rendering of
    /// model replies on or off.
    pub fn stdio(markdown: bool) -> Self {
        Self::with_writers(Box::new(io::stdout()), Box::new(io::stderr()), markdown)
    }

    pub fn with_writers(
        stdout: Box<dyn Write + Send>,
        stderr: Box<dyn Write + Send>,
        markdown: bool,
    ) -> Self {
        Self {
            inner: Arc::new(ConsoleInner {
                stdout: Mutex::new(stdout),
                stderr: Mutex::new(stderr),
                markdown,
            }),
        }
    }

    /// Writes without a trailing newline and flushes, for prompts and
    /// progress lines that a later write completes.
    pub fn print(&self, text: &str) -> io::Result<()> {
        self.with_stdout(|out| {
            out.write_all(text.as_bytes())?;
            out.flush()
        })
    }

    pub fn line(&self, text: &str) -> io::Result<()> {
        self.with_stdout(|out| {
            out.write_all(text.as_bytes())?;
            out.write_all(b"\n")?;
            out.flush()
        })
    }

    /// Renders a reply body. Markdown-styled when enabled, otherwise the
    /// text passes through with a single trailing newline.
    pub fn print_markdown(&self, text: &str) -> io::Result<()> {
        let rendered = if self.inner.markdown {
            markdown::render_ansi(text)
        } else {
            let mut plain = text.trim_end().to_string();
            plain.push('\n');
            plain
        };
        self.with_stdout(|out| {
            out.write_all(rendered.as_bytes())?;
            out.flush()
        })
    }

    /// Best-effort prompt label, left open for the user's input.
    pub fn prompt_label(&self, text: &str) {
        let _ = self.print(text);
    }

    /// Best-effort start of a progress line, completed by
    /// [`Console::status_result`].
    pub fn status(&self, text: &str) {
        let _ = self.print(text);
    }

    pub fn status_result(&self, text: &str) {
        let _ = self.line(text);
    }

    /// Best-effort diagnostic line on stderr.
    pub fn error(&self, text: &str) {
        if let Ok(mut guard) = self.inner.stderr.lock() {
            let _ = guard.write_all(text.as_bytes());
            let _ = guard.write_all(b"\n");
            let _ = guard.flush();
        }
    }

    fn with_stdout(&self, write: impl FnOnce(&mut dyn Write) -> io::Result<()>) -> io::Result<()> {
        let mut guard = self
            .inner
            .stdout
            .lock()
            .map_err(|_| io::Error::other("console writer lock poisoned"))?;
        write(guard.as_mut())
    }
}
