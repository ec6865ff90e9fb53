// Incremental printing of a streamed reply on a terminal that cannot redraw.

use std::io::{self, Write};

use dukkho_app::{SessionEvent, APOLOGY};

/// Tracks how much of the reply has been printed.
///
/// The display text can still lose a trailing score tag, so everything from
/// the last `||` (or a lone trailing `|`) onward is held back until the
/// exchange completes.
#[derive(Debug, Default)]
pub struct ReplyPrinter {
    printed: usize,
}

impl ReplyPrinter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Text newly safe to print for the current display string.
    pub fn update<'a>(&mut self, display: &'a str) -> &'a str {
        let stable = match display.rfind("||") {
            Some(idx) => &display[..idx],
            None => display.strip_suffix('|').unwrap_or(display),
        };
        match stable.get(self.printed..) {
            Some(delta) if !delta.is_empty() => {
                self.printed = stable.len();
                delta
            }
            _ => "",
        }
    }

    /// Whatever of the final text has not been printed yet.
    pub fn finish<'a>(&mut self, text: &'a str) -> &'a str {
        let rest = text.get(self.printed..).unwrap_or("");
        self.printed = text.len();
        rest
    }
}

/// Write one session event to the terminal.
pub fn render_event(out: &mut impl Write, printer: &mut ReplyPrinter, event: SessionEvent) -> io::Result<()> {
    match event {
        SessionEvent::ChatCreated { title, .. } => writeln!(out, "(chat: {title})"),
        SessionEvent::Display(display) => write!(out, "{}", printer.update(&display)),
        SessionEvent::Completed { text, score, total } => {
            writeln!(out, "{}", printer.finish(&text))?;
            match score {
                Some(score) => writeln!(out, "[দুঃখ স্কোর +{score} = {total}]"),
                None => writeln!(out, "[দুঃখ স্কোর {total}]"),
            }
        }
        // Whatever was held back stays on screen, a cut-off tag included.
        SessionEvent::Failed { partial, error } => {
            writeln!(out, "{}", printer.finish(&partial))?;
            writeln!(out, "{APOLOGY}")?;
            writeln!(out, "({error})")
        }
    }
}
