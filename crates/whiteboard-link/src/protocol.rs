//! Text-level protocol of the whiteboard controller.
//!
//! Commands go out as single G-code lines terminated by `\n`. The controller
//! answers each one with zero or more `//` debug lines followed by either
//! `ok` (possibly carrying data) or `rs`, which asks for the same line again.
//!
//! Everything in this module is pure: [`sanitize`] prepares a line for the
//! wire, [`classify`] sorts a received line, and [`decode_position`] reads
//! the position reply.

use whiteboard_core::error::{Error, Result};
use whiteboard_core::types::Position;

/// Command that makes the controller report its position.
pub const POSITION_QUERY: &str = "M118";

/// Commands the controller does not implement. They are dropped instead of
/// being sent.
pub const NO_OP_COMMANDS: [&str; 5] = ["G21", "M3", "M5", "M2", "G19"];

/// How a received line affects the request at the head of the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    /// `//...`: diagnostic output, keep waiting.
    Debug,
    /// `rs`: transmit the same command again.
    Resend,
    /// `ok...`: the oldest outstanding request is complete.
    Terminal,
    /// Anything else. Logged, resolves nothing.
    Other,
}

impl ReplyKind {
    /// Whether a line of this kind completes the request at the head of the
    /// queue.
    pub fn resolves_request(self) -> bool {
        matches!(self, ReplyKind::Terminal | ReplyKind::Resend)
    }
}

/// Classify one received line (without its terminator).
pub fn classify(line: &str) -> ReplyKind {
    if line.starts_with("//") {
        ReplyKind::Debug
    } else if line == "rs" {
        ReplyKind::Resend
    } else if line.starts_with("ok") {
        ReplyKind::Terminal
    } else {
        ReplyKind::Other
    }
}

/// Reduce a raw G-code line to what the controller should receive.
///
/// Parenthesized comments, everything after `;`, and `%` markers are removed,
/// commands the controller ignores become empty, and feed-rate words
/// (`F<number>`) are stripped since the firmware runs at a fixed speed. An
/// empty result means the line must not be transmitted.
///
/// ```
/// use whiteboard_link::protocol::sanitize;
///
/// assert_eq!(sanitize("G1 X10 F500 ; comment"), "G1 X10");
/// assert_eq!(sanitize("M3"), "");
/// ```
pub fn sanitize(raw: &str) -> String {
    let without_parens = strip_parenthesized(raw);
    let code = match without_parens.find(';') {
        Some(idx) => &without_parens[..idx],
        None => without_parens.as_str(),
    };
    let code: String = code.chars().filter(|&c| c != '%').collect();
    let code = code.trim();
    if is_no_op(code) {
        return String::new();
    }

    let stripped = strip_feed_rates(code);
    let stripped = stripped.trim();
    // "M3 F100" only becomes a no-op once the feed rate is gone.
    if is_no_op(stripped) {
        return String::new();
    }
    stripped.to_string()
}

fn is_no_op(command: &str) -> bool {
    NO_OP_COMMANDS.contains(&command)
}

/// Remove every `(` ... `)` span, pairing each `(` with the nearest `)`
/// after it. An unmatched `(` and the rest of the text are left alone.
fn strip_parenthesized(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(open) = rest.find('(') {
        let Some(close) = rest[open..].find(')') else {
            break;
        };
        out.push_str(&rest[..open]);
        rest = &rest[open + close + 1..];
    }
    out.push_str(rest);
    out
}

/// Remove every `F` followed by at least one digit, `.` or `-`.
fn strip_feed_rates(text: &str) -> String {
    let is_arg = |c: char| c.is_ascii_digit() || c == '.' || c == '-';
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c == 'F' && chars.peek().is_some_and(|&next| is_arg(next)) {
            while chars.peek().is_some_and(|&next| is_arg(next)) {
                chars.next();
            }
            continue;
        }
        out.push(c);
    }
    out
}

/// Decode a position reply of the form `ok X:<num> Y:<num> Z:<num>`.
///
/// The reply is split on single spaces and tokens 1, 2 and 3 are read after
/// skipping their two-character axis prefix; the prefixes themselves are not
/// checked and extra tokens are ignored. `nan` in any letter case decodes to
/// NaN.
pub fn decode_position(reply: &str) -> Result<Position> {
    let tokens: Vec<&str> = reply.split(' ').collect();
    let x = axis_value(&tokens, 1, reply)?;
    let y = axis_value(&tokens, 2, reply)?;
    let z = axis_value(&tokens, 3, reply)?;
    Ok(Position::new(x, y, z))
}

fn axis_value(tokens: &[&str], index: usize, reply: &str) -> Result<f64> {
    let token = tokens.get(index).ok_or_else(|| {
        Error::MalformedTelemetry(format!("missing axis {index} in {reply:?}"))
    })?;
    let number = token.get(2..).ok_or_else(|| {
        Error::MalformedTelemetry(format!("axis token {token:?} too short in {reply:?}"))
    })?;
    if number.eq_ignore_ascii_case("nan") {
        return Ok(f64::NAN);
    }
    number
        .parse::<f64>()
        .map_err(|e| Error::MalformedTelemetry(format!("bad axis value {number:?}: {e}")))
}
