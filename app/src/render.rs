use std::io::{self, Write};
use triage_core::{ClientError, ReplyAccumulator, SessionUpdate, StreamEventKind};

/// Writes a streamed reply to a terminal as it arrives.
///
/// Answer text goes to `out`. Reasoning goes to `aux` when `show_thinking`
/// is set, prefixed once per block.
pub struct ReplyPrinter<O, A> {
    out: O,
    aux: A,
    show_thinking: bool,
    in_thinking: bool,
    reply: ReplyAccumulator,
    failure: Option<ClientError>,
}

impl<O: Write, A: Write> ReplyPrinter<O, A> {
    pub fn new(out: O, aux: A, show_thinking: bool) -> Self {
        Self {
            out,
            aux,
            show_thinking,
            in_thinking: false,
            reply: ReplyAccumulator::new(),
            failure: None,
        }
    }

    pub fn handle(&mut self, update: SessionUpdate) -> io::Result<()> {
        match update {
            SessionUpdate::Event(event) => {
                self.reply.apply(&event);
                match event.kind {
                    StreamEventKind::Thinking if self.show_thinking => {
                        if !self.in_thinking {
                            write!(self.aux, "[thinking] ")?;
                            self.in_thinking = true;
                        }
                        write!(self.aux, "{}", event.content.unwrap_or_default())?;
                        self.aux.flush()?;
                    }
                    StreamEventKind::Answer => {
                        self.end_thinking()?;
                        write!(self.out, "{}", event.content.unwrap_or_default())?;
                        self.out.flush()?;
                    }
                    StreamEventKind::Error => self.end_thinking()?,
                    _ => {}
                }
            }
            SessionUpdate::Failed(err) => {
                self.end_thinking()?;
                self.failure = Some(err);
            }
            SessionUpdate::Completed => {
                self.end_thinking()?;
                if !self.reply.answer.is_empty() {
                    writeln!(self.out)?;
                }
            }
        }
        Ok(())
    }

    pub fn reply(&self) -> &ReplyAccumulator {
        &self.reply
    }

    pub fn failure(&self) -> Option<&ClientError> {
        self.failure.as_ref()
    }

    pub fn into_parts(self) -> (O, A) {
        (self.out, self.aux)
    }

    fn end_thinking(&mut self) -> io::Result<()> {
        if self.in_thinking {
            writeln!(self.aux)?;
            self.in_thinking = false;
        }
        Ok(())
    }
}
