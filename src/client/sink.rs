//! Display sinks
//!
//! A `ChatSession` never prints by itself; every line it wants shown goes
//! through a `DisplaySink`. The console client uses `ConsoleSink`, a UI or a
//! test can use `ChannelSink` and consume `DisplayEvent`s.

use std::io::{self, Write};

use chrono::{DateTime, Local};
use tokio::sync::mpsc::UnboundedSender;

use crate::client::presence::PresenceNotice;

/// Name shown on lines produced locally by the client.
pub const SYSTEM: &str = "System";

pub trait DisplaySink {
    fn notify(&mut self, from: &str, text: &str);

    fn presence(&mut self, notice: &PresenceNotice) {
        self.notify(SYSTEM, &notice.to_string());
    }
}

/// `[10/19 18:02:11 alice]: hello`
pub fn format_line(now: DateTime<Local>, from: &str, text: &str) -> String {
    format!("[{} {}]: {}", now.format("%m/%d %H:%M:%S"), from, text)
}

/// Writes timestamped lines to a writer, stdout by default.
pub struct ConsoleSink<W: Write = io::Stdout> {
    out: W,
}

impl ConsoleSink {
    pub fn stdout() -> Self {
        Self { out: io::stdout() }
    }
}

impl<W: Write> ConsoleSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> DisplaySink for ConsoleSink<W> {
    fn notify(&mut self, from: &str, text: &str) {
        // a closed stdout is not worth tearing the session down for
        let _ = writeln!(self.out, "{}", format_line(Local::now(), from, text));
        let _ = self.out.flush();
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayEvent {
    Line { from: String, text: String },
    Presence(PresenceNotice),
}

/// Forwards everything to a channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: UnboundedSender<DisplayEvent>,
}

impl ChannelSink {
    pub fn new(tx: UnboundedSender<DisplayEvent>) -> Self {
        Self { tx }
    }
}

impl DisplaySink for ChannelSink {
    fn notify(&mut self, from: &str, text: &str) {
        let _ = self.tx.send(DisplayEvent::Line {
            from: from.to_string(),
            text: text.to_string(),
        });
    }

    fn presence(&mut self, notice: &PresenceNotice) {
        let _ = self.tx.send(DisplayEvent::Presence(notice.clone()));
    }
}
