use std::io::{self, Write};

use autoscript_chat::{Message, Role, TranscriptEvent};

use crate::extract::{extract_steps, extract_url, step_label};

const USER_LABEL: &str = "you> ";
const MODEL_LABEL: &str = "model> ";

/// Writes transcript events to a terminal as they happen.
#[derive(Debug, Default)]
pub struct TerminalRenderer {
    /// A streaming model line has been started and not yet terminated.
    line_open: bool,
}

impl TerminalRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn render<W: Write>(&mut self, event: &TranscriptEvent, out: &mut W) -> io::Result<()> {
        match event {
            TranscriptEvent::Appended(message) => self.render_appended(message, out)?,
            TranscriptEvent::FragmentAppended { fragment, .. } => {
                out.write_all(fragment.as_bytes())?;
            }
            TranscriptEvent::StreamingCompleted(_) => self.close_line(out)?,
        }
        out.flush()
    }

    fn render_appended<W: Write>(&mut self, message: &Message, out: &mut W) -> io::Result<()> {
        // A failed exchange leaves its placeholder line open.
        self.close_line(out)?;

        match message.role {
            Role::User => {
                writeln!(out, "{USER_LABEL}{}", message.text)?;
                Self::render_banner(&message.text, out)
            }
            Role::Model if message.is_streaming => {
                write!(out, "{MODEL_LABEL}{}", message.text)?;
                self.line_open = true;
                Ok(())
            }
            Role::Model => writeln!(out, "{MODEL_LABEL}{}", message.text),
        }
    }

    fn render_banner<W: Write>(text: &str, out: &mut W) -> io::Result<()> {
        if let Some(url) = extract_url(text) {
            writeln!(out, "  target: {url}")?;
        }

        let steps = extract_steps(text);
        if !steps.is_empty() {
            writeln!(out, "  detected actions:")?;
            for (index, step) in steps.iter().enumerate() {
                writeln!(out, "    {}. {}", index + 1, step_label(step))?;
            }
        }
        Ok(())
    }

    fn close_line<W: Write>(&mut self, out: &mut W) -> io::Result<()> {
        if self.line_open {
            writeln!(out)?;
            self.line_open = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use autoscript_chat::{REMOTE_FAILURE_TEXT, Transcript};

    use super::*;

    fn render_all(transcript: &mut Transcript, build: impl FnOnce(&mut Transcript)) -> String {
        let mut subscription = transcript.subscribe();
        build(transcript);

        let mut renderer = TerminalRenderer::new();
        let mut out = Vec::new();
        for event in subscription.drain() {
            renderer.render(&event, &mut out).expect("render to memory");
        }
        String::from_utf8(out).expect("utf-8 output")
    }

    #[test]
    fn streams_fragments_onto_one_model_line() {
        let mut transcript = Transcript::new();
        let output = render_all(&mut transcript, |transcript| {
            transcript.append_user("https://example.com");
            let placeholder = transcript.append_model_placeholder();
            transcript.append_fragment(placeholder.id, "Analyzing ");
            transcript.append_fragment(placeholder.id, "the page.");
            transcript.complete_streaming(placeholder.id);
        });

        assert_eq!(
            output,
            "you> https://example.com\n  target: https://example.com\nmodel> Analyzing the page.\n"
        );
    }

    #[test]
    fn error_after_stuck_placeholder_starts_a_new_line() {
        let mut transcript = Transcript::new();
        let output = render_all(&mut transcript, |transcript| {
            transcript.append_user("hi");
            let placeholder = transcript.append_model_placeholder();
            transcript.append_fragment(placeholder.id, "par");
            transcript.append_error(REMOTE_FAILURE_TEXT);
        });

        assert_eq!(
            output,
            format!("you> hi\nmodel> par\nmodel> {REMOTE_FAILURE_TEXT}\n")
        );
    }

    #[test]
    fn banner_lists_detected_steps() {
        let mut transcript = Transcript::new();
        let output = render_all(&mut transcript, |transcript| {
            transcript.append_user("https://shop.example\n1. open cart\n- pay");
        });

        assert!(output.contains("  target: https://shop.example\n"));
        assert!(output.contains("  detected actions:\n    1. open cart\n    2. pay\n"));
    }
}
