//! User-facing console messages.
//!
//! Prefixed lines (`info:`, `warn:`, ...) are colored only when the stream they go to
//! is a terminal. Informational lines go to stdout, problems to stderr.

use owo_colors::{OwoColorize, Style};

#[derive(Clone, Copy)]
enum Stream {
    Out,
    Err,
}

impl Stream {
    fn is_tty(self) -> bool {
        match self {
            Stream::Out => atty::is(atty::Stream::Stdout),
            Stream::Err => atty::is(atty::Stream::Stderr),
        }
    }
}

fn emit(stream: Stream, prefix: &str, style: Style, msg: &str) {
    let line = if stream.is_tty() {
        format!("{} {msg}", prefix.style(style))
    } else {
        format!("{prefix} {msg}")
    };
    match stream {
        Stream::Out => println!("{line}"),
        Stream::Err => eprintln!("{line}"),
    }
}

pub fn print_info(msg: &str) {
    emit(Stream::Out, "info:", Style::new().cyan().bold(), msg);
}

pub fn print_warn(msg: &str) {
    emit(Stream::Err, "warn:", Style::new().yellow().bold(), msg);
}

pub fn print_error(msg: &str) {
    emit(Stream::Err, "error:", Style::new().red().bold(), msg);
}

pub fn print_success(msg: &str) {
    emit(Stream::Out, "ok:", Style::new().green().bold(), msg);
}

/// Plain line without prefix, for output meant to be piped (listings, JSON).
pub fn print_user(msg: &str) {
    println!("{msg}");
}
