//! # Wire protocol
//!
//! Frames are UTF-8 text terminated by a single `\n`. A frame is
//! `COMMAND [ARG1 [ARG2]]` with space separators; `ARG2` may itself contain
//! spaces and extends to the end of the line. Command tokens are
//! case-insensitive; keys, values and patterns are not.
use bytes::Bytes;

/// Reply sent when `GET` misses.
pub const ERR_KEY_NOT_FOUND: &str = "ERROR Key not found";
/// Reply to an unparseable SETGET frame.
pub const ERR_INVALID_COMMAND: &str = "ERROR Invalid command";
/// Reply to an unparseable PUBSUB frame.
pub const ERR_INVALID_PUBSUB: &str = "ERROR Invalid PUBSUB command";
/// Reply when the first frame of a connection is not a role declaration.
pub const ERR_UNKNOWN_ROLE: &str = "ERROR Unknown role";

/// Connection role, fixed by the first frame for the connection's lifetime.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Role {
    /// Request/reply keystore access
    SetGet,
    /// Broadcast channel
    PubSub,
}

impl Role {
    /// Parses the mandatory `ROLE ...` first frame of a connection.
    pub fn parse(line: &str) -> Option<Role> {
        match line.trim().to_ascii_uppercase().as_str() {
            "ROLE SETGET" => Some(Role::SetGet),
            "ROLE PUBSUB" => Some(Role::PubSub),
            _ => None,
        }
    }

    /// Token used in the `ROLE ...` declaration.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::SetGet => "SETGET",
            Role::PubSub => "PUBSUB",
        }
    }
}

/// A parsed request frame: three-token split at most.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Request {
    /// Command token, uppercased
    pub command: String,
    /// First argument
    pub key: Option<String>,
    /// Second argument, running to the end of the line
    pub value: Option<String>,
}

impl Request {
    /// Splits a line into command, key and trailing value.
    ///
    /// Returns `None` for blank lines, which are ignored without a reply.
    pub fn parse(line: &str) -> Option<Request> {
        if line.trim().is_empty() {
            return None;
        }
        let mut parts = line.splitn(3, ' ');
        let command = parts.next()?.to_ascii_uppercase();
        let key = parts.next().map(|part| part.to_owned());
        let value = parts.next().map(|part| part.to_owned());
        Some(Request { command, key, value })
    }

    /// The key argument, rejecting the empty string.
    pub fn key_arg(&self) -> Option<&str> {
        self.key.as_deref().filter(|key| !key.is_empty())
    }
}

/// A reply frame.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Reply {
    /// `OK`
    Ok,
    /// `PONG`
    Pong,
    /// The raw stored value on one line
    Value(String),
    /// Live key count
    Count(usize),
    /// Space-joined key list; an empty list renders as an empty line
    Keys(Vec<String>),
    /// `ERROR ...`
    Error(&'static str),
    /// A pre-rendered broadcast frame (`PUB key value\n`)
    Broadcast(Bytes),
    /// No frame is sent (`SUB`/`UNSUB` are accepted silently)
    None,
}

impl Reply {
    /// Renders the reply as wire bytes, `None` when no frame is sent.
    pub fn render(&self) -> Option<Bytes> {
        let text = match self {
            Reply::Ok => "OK",
            Reply::Pong => "PONG",
            Reply::Value(value) => value.as_str(),
            Reply::Count(count) => return Some(Bytes::from(format!("{}\n", count))),
            Reply::Keys(keys) => return Some(Bytes::from(format!("{}\n", keys.join(" ")))),
            Reply::Error(message) => message,
            Reply::Broadcast(frame) => return Some(frame.clone()),
            Reply::None => return None,
        };
        Some(Bytes::from(format!("{}\n", text)))
    }
}

/// Renders the broadcast frame delivered to matching subscribers.
pub fn pub_frame(key: &str, value: &str) -> Bytes {
    Bytes::from(format!("PUB {} {}\n", key, value))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn three_token_split() {
        let request = Request::parse("SET joysticks/0/buttons [\"A\",\"B\"]").expect("frame");
        assert_eq!("SET", request.command);
        assert_eq!(Some("joysticks/0/buttons".to_owned()), request.key);
        assert_eq!(Some("[\"A\",\"B\"]".to_owned()), request.value);
    }

    #[test]
    fn value_extends_to_end_of_line() {
        let request = Request::parse("PUB streams/tts hello there world").expect("frame");
        assert_eq!(Some("hello there world".to_owned()), request.value);
    }

    #[test]
    fn commands_are_case_insensitive() {
        let request = Request::parse("set k v").expect("frame");
        assert_eq!("SET", request.command);
        assert_eq!(Some("k".to_owned()), request.key);
    }

    #[test]
    fn trailing_space_is_an_empty_value() {
        let request = Request::parse("SET k ").expect("frame");
        assert_eq!(Some("".to_owned()), request.value);
    }

    #[test]
    fn blank_lines_are_ignored() {
        assert_eq!(None, Request::parse(""));
        assert_eq!(None, Request::parse("   "));
    }

    #[test]
    fn empty_key_is_rejected() {
        let request = Request::parse("GET ").expect("frame");
        assert_eq!(None, request.key_arg());
    }

    #[test]
    fn role_parsing() {
        assert_eq!(Some(Role::SetGet), Role::parse("ROLE SETGET"));
        assert_eq!(Some(Role::PubSub), Role::parse("role pubsub"));
        assert_eq!(Some(Role::SetGet), Role::parse(" ROLE SETGET "));
        assert_eq!(None, Role::parse("GET k"));
        assert_eq!(None, Role::parse(""));
    }

    #[test]
    fn render_keys() {
        assert_eq!(
            Some(Bytes::from("a b\n".to_owned())),
            Reply::Keys(vec!["a".to_owned(), "b".to_owned()]).render()
        );
        // no matches is still a frame: an empty line
        assert_eq!(Some(Bytes::from("\n".to_owned())), Reply::Keys(vec![]).render());
    }

    #[test]
    fn render_value_and_errors() {
        assert_eq!(Some(Bytes::from("hi\n".to_owned())), Reply::Value("hi".to_owned()).render());
        assert_eq!(Some(Bytes::from("\n".to_owned())), Reply::Value(String::new()).render());
        assert_eq!(
            Some(Bytes::from("ERROR Key not found\n".to_owned())),
            Reply::Error(ERR_KEY_NOT_FOUND).render()
        );
        assert_eq!(None, Reply::None.render());
    }

    #[test]
    fn broadcast_frame() {
        assert_eq!(Bytes::from("PUB a/b {\"v\":1}\n".to_owned()), pub_frame("a/b", "{\"v\":1}"));
    }
}
