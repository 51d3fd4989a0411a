//! Line-oriented chat protocol (IRC framing)
//!
//! Wire format: `[@tags ][:origin ]COMMAND param1 param2 :trailing param\r\n`.
//! TCP delivers a byte stream, so reads are accumulated in a [`LineBuffer`]
//! and only complete lines are parsed.

use tracing::{debug, warn};

/// Line terminator for outbound lines
const CRLF: &str = "\r\n";

/// Partial lines longer than this are discarded
const MAX_PARTIAL_LINE: usize = 8192;

/// Accumulates received bytes and yields complete lines
#[derive(Debug, Default)]
pub struct LineBuffer {
    buffer: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a read and return every line it completed.
    /// The trailing partial line is kept for the next call.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.buffer[start..].iter().position(|&b| b == b'\n') {
            let end = start + offset;
            let mut line = &self.buffer[start..end];
            if line.last() == Some(&b'\r') {
                line = &line[..line.len() - 1];
            }
            if !line.is_empty() {
                lines.push(String::from_utf8_lossy(line).into_owned());
            }
            start = end + 1;
        }
        self.buffer.drain(..start);

        if self.buffer.len() > MAX_PARTIAL_LINE {
            warn!(
                "Discarding {} bytes without a line terminator",
                self.buffer.len()
            );
            self.buffer.clear();
        }

        lines
    }

    /// Bytes held back waiting for a terminator
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

/// One parsed protocol line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub origin: Option<String>,
    pub command: String,
    pub params: Vec<String>,
}

impl Message {
    /// Parse a single line without its terminator. Returns None for lines
    /// with no command token.
    pub fn parse(line: &str) -> Option<Message> {
        let mut rest = line.trim_end_matches(['\r', '\n']);

        // IRCv3 tags are not used
        if rest.starts_with('@') {
            let (_, after) = rest.split_once(' ')?;
            rest = after.trim_start_matches(' ');
        }

        let mut origin = None;
        if let Some(stripped) = rest.strip_prefix(':') {
            let (prefix, after) = stripped.split_once(' ')?;
            if !prefix.is_empty() {
                origin = Some(prefix.to_string());
            }
            rest = after.trim_start_matches(' ');
        }

        let (head, trailing) = match rest.find(" :") {
            Some(idx) => (&rest[..idx], Some(&rest[idx + 2..])),
            None => (rest, None),
        };

        let mut tokens = head.split(' ').filter(|t| !t.is_empty());
        let command = tokens.next()?.to_string();
        if command.starts_with(':') {
            return None;
        }

        let mut params: Vec<String> = tokens.map(str::to_string).collect();
        if let Some(trailing) = trailing {
            params.push(trailing.to_string());
        }

        Some(Message {
            origin,
            command,
            params,
        })
    }

    /// Nickname part of the origin (`nick!user@host`)
    pub fn nick(&self) -> Option<&str> {
        self.origin
            .as_deref()
            .map(|o| o.split(['!', '@']).next().unwrap_or(o))
            .filter(|n| !n.is_empty())
    }

    /// Last parameter, which carries the chat text for PRIVMSG
    pub fn trailing(&self) -> Option<&str> {
        self.params.last().map(String::as_str)
    }
}

/// Inbound handler. Each receives the parsed message and the context the
/// runtime dispatches into.
pub type Handler<C> = fn(&mut C, &Message);

/// Statically known handlers for each command token
pub trait Dispatch: Sized + 'static {
    fn handlers_for(command: &str) -> &'static [Handler<Self>];
}

/// Frames raw reads into messages and dispatches them
#[derive(Debug, Default)]
pub struct LineProtocolEngine {
    lines: LineBuffer,
}

impl LineProtocolEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one read; every complete, parseable line is dispatched to all of
    /// its handlers in order. Returns the number of messages dispatched.
    pub fn process<C: Dispatch>(&mut self, bytes: &[u8], ctx: &mut C) -> usize {
        let mut dispatched = 0;
        for line in self.lines.feed(bytes) {
            debug!("< {}", line);
            let Some(message) = Message::parse(&line) else {
                continue;
            };
            let handlers = C::handlers_for(&message.command);
            if handlers.is_empty() {
                continue;
            }
            for handler in handlers {
                handler(ctx, &message);
            }
            dispatched += 1;
        }
        dispatched
    }

    /// Drop any partial line, used when the connection is reset
    pub fn reset(&mut self) {
        self.lines.clear();
    }
}

/// Authentication pair: credential first, then nickname
pub fn login_lines(nickname: &str, credential: &str) -> String {
    format!(
        "PASS {}{}NICK {}{}",
        sanitize(credential),
        CRLF,
        sanitize(nickname),
        CRLF
    )
}

pub fn join_line(channel: &str) -> String {
    format!("JOIN {}{}", sanitize(channel), CRLF)
}

pub fn privmsg_line(channel: &str, text: &str) -> String {
    format!("PRIVMSG {} :{}{}", sanitize(channel), sanitize(text), CRLF)
}

pub fn pong_line(token: &str) -> String {
    format!("PONG :{}{}", sanitize(token), CRLF)
}

/// Payloads must not smuggle a second line onto the wire
fn sanitize(text: &str) -> String {
    text.replace(['\r', '\n'], " ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feed_carries_partial_lines() {
        let mut buffer = LineBuffer::new();
        assert!(buffer.feed(b":a!a@a PRIVMSG #c :hel").is_empty());
        assert_eq!(buffer.pending(), 22);

        let lines = buffer.feed(b"lo\r\nPING :tmi\r\n:b PRIV");
        assert_eq!(lines, vec![":a!a@a PRIVMSG #c :hello", "PING :tmi"]);

        let lines = buffer.feed(b"MSG #c :x\n");
        assert_eq!(lines, vec![":b PRIVMSG #c :x"]);
        assert_eq!(buffer.pending(), 0);
    }

    #[test]
    fn test_feed_one_byte_at_a_time() {
        let mut buffer = LineBuffer::new();
        let mut lines = Vec::new();
        for byte in b"PING :a\r\nPING :b\r\n" {
            lines.extend(buffer.feed(&[*byte]));
        }
        assert_eq!(lines, vec!["PING :a", "PING :b"]);
    }

    #[test]
    fn test_feed_discards_oversized_partial() {
        let mut buffer = LineBuffer::new();
        assert!(buffer.feed(&vec![b'x'; MAX_PARTIAL_LINE + 1]).is_empty());
        assert_eq!(buffer.pending(), 0);
        assert_eq!(buffer.feed(b"PING :a\r\n"), vec!["PING :a"]);
    }

    #[test]
    fn test_parse_privmsg() {
        let msg = Message::parse(":alice!alice@alice.tmi.twitch.tv PRIVMSG #arena :!bet Bob 500")
            .unwrap();
        assert_eq!(msg.command, "PRIVMSG");
        assert_eq!(msg.nick(), Some("alice"));
        assert_eq!(msg.params, vec!["#arena", "!bet Bob 500"]);
        assert_eq!(msg.trailing(), Some("!bet Bob 500"));
    }

    #[test]
    fn test_parse_with_tags_and_without_origin() {
        let msg = Message::parse("@badge-info=;color=#FF0000 :bob!bob@x PRIVMSG #arena :hi there")
            .unwrap();
        assert_eq!(msg.nick(), Some("bob"));
        assert_eq!(msg.trailing(), Some("hi there"));

        let ping = Message::parse("PING :tmi.twitch.tv").unwrap();
        assert_eq!(ping.origin, None);
        assert_eq!(ping.command, "PING");
        assert_eq!(ping.params, vec!["tmi.twitch.tv"]);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(Message::parse(""), None);
        assert_eq!(Message::parse(":onlyorigin"), None);
        assert_eq!(Message::parse("   "), None);
    }

    #[test]
    fn test_outbound_lines() {
        assert_eq!(
            login_lines("wagerbot", "oauth:secret"),
            "PASS oauth:secret\r\nNICK wagerbot\r\n"
        );
        assert_eq!(join_line("#arena"), "JOIN #arena\r\n");
        assert_eq!(
            privmsg_line("#arena", "evil\r\nQUIT"),
            "PRIVMSG #arena :evil  QUIT\r\n"
        );
        assert_eq!(pong_line("tmi"), "PONG :tmi\r\n");
    }

    #[derive(Default)]
    struct Recorder {
        seen: Vec<String>,
        extra: usize,
    }

    fn record(ctx: &mut Recorder, msg: &Message) {
        ctx.seen.push(msg.trailing().unwrap_or_default().to_string());
    }

    fn count(ctx: &mut Recorder, _msg: &Message) {
        ctx.extra += 1;
    }

    const RECORDER_PRIVMSG: &[Handler<Recorder>] = &[record, count];

    impl Dispatch for Recorder {
        fn handlers_for(command: &str) -> &'static [Handler<Self>] {
            match command {
                "PRIVMSG" => RECORDER_PRIVMSG,
                _ => &[],
            }
        }
    }

    #[test]
    fn test_process_dispatches_every_handler_and_drops_unknown() {
        let mut engine = LineProtocolEngine::new();
        let mut ctx = Recorder::default();

        let n = engine.process(b":a PRIVMSG #c :one\r\n:tmi 001 bot :Welcome\r\n:a PRIVMSG #c :tw", &mut ctx);
        assert_eq!(n, 1);
        assert_eq!(ctx.seen, vec!["one"]);
        assert_eq!(ctx.extra, 1);

        engine.process(b"o\r\n", &mut ctx);
        assert_eq!(ctx.seen, vec!["one", "two"]);
        assert_eq!(ctx.extra, 2);
    }
}
