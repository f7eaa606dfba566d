use std::cell::OnceCell;
use std::collections::HashMap;

use crate::error::Error;
use crate::tags::{escape_tag_value, unescape_tag_value, TagValue};

/// `nick!user@host`, parsed lazily from a message's raw prefix.
///
/// If the prefix has no `!` the whole prefix is the nickname; if it has a
/// `!` but no `@` the remainder after `!` is the user with an empty host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hostmask {
    pub raw: String,
    pub nick: String,
    pub user: String,
    pub host: String,
}

impl Hostmask {
    pub fn parse(raw: &str) -> Hostmask {
        let (nick, rest) = match raw.find('!') {
            Some(idx) => (&raw[..idx], &raw[idx + 1..]),
            None => (raw, ""),
        };
        let (user, host) = match rest.find('@') {
            Some(idx) => (&rest[..idx], &rest[idx + 1..]),
            None => (rest, ""),
        };
        Hostmask {
            raw: raw.to_string(),
            nick: nick.to_string(),
            user: user.to_string(),
            host: host.to_string(),
        }
    }
}

/// A parsed IRC line: tags, source prefix, command, parameters, trailing.
///
/// Immutable after construction. `command` is never empty; `params` never
/// contains the trailing parameter.
#[derive(Debug, Clone)]
pub struct Message {
    pub raw: String,
    pub tags: HashMap<String, TagValue>,
    pub prefix: Option<String>,
    pub command: String,
    pub params: Vec<String>,
    pub trailing: Option<String>,
    hostmask: OnceCell<Option<Hostmask>>,
}

impl PartialEq for Message {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
            && self.tags == other.tags
            && self.prefix == other.prefix
            && self.command == other.command
            && self.params == other.params
            && self.trailing == other.trailing
    }
}

impl Eq for Message {}

impl Message {
    /// The hostmask of the message's source, parsed on first access and
    /// cached. `None` if the message had no prefix.
    pub fn hostmask(&self) -> Option<&Hostmask> {
        self.hostmask
            .get_or_init(|| self.prefix.as_deref().map(Hostmask::parse))
            .as_ref()
    }

    /// Convenience accessor for the nickname portion of the hostmask, or the
    /// raw prefix if the message came from a server (no `!`/`@`).
    pub fn prefix_nick(&self) -> Option<&str> {
        self.hostmask().map(|h| h.nick.as_str())
    }

    /// The first parameter, if any.
    pub fn param(&self, idx: usize) -> Option<&str> {
        self.params.get(idx).map(String::as_str)
    }

    /// Is `command` a 3-digit numeric reply?
    pub fn is_numeric(&self) -> bool {
        self.command.len() == 3 && self.command.bytes().all(|b| b.is_ascii_digit())
    }

    /// Re-serialise this message to wire form, without the `\r\n` terminator.
    pub fn emit(&self) -> String {
        let mut out = String::new();
        if !self.tags.is_empty() {
            out.push('@');
            for (i, (key, value)) in self.tags.iter().enumerate() {
                if i > 0 {
                    out.push(';');
                }
                out.push_str(key);
                if let TagValue::Value(v) = value {
                    out.push('=');
                    escape_tag_value(&mut out, v);
                }
            }
            out.push(' ');
        }
        if let Some(prefix) = &self.prefix {
            out.push(':');
            out.push_str(prefix);
            out.push(' ');
        }
        out.push_str(&self.command);
        for param in &self.params {
            out.push(' ');
            out.push_str(param);
        }
        if let Some(trailing) = &self.trailing {
            out.push_str(" :");
            out.push_str(trailing);
        }
        out
    }
}

/// Parse one IRC line (without terminating CR/LF) into a [`Message`].
pub fn parse(line: &str) -> Result<Message, Error> {
    let raw = line.to_string();
    let mut rest = line;

    let mut tags = HashMap::new();
    if let Some(stripped) = rest.strip_prefix('@') {
        let (tag_block, after) = split_first_space(stripped);
        tags = parse_tags(tag_block);
        rest = after;
    }

    let mut prefix = None;
    if let Some(stripped) = rest.strip_prefix(':') {
        let (pfx, after) = split_first_space(stripped);
        prefix = Some(pfx.to_string());
        rest = after;
    }

    let (cmd_tok, after) = split_first_space(rest);
    if cmd_tok.is_empty() {
        return Err(Error::MalformedLine(raw));
    }
    let command = if cmd_tok.chars().all(|c| c.is_ascii_alphabetic()) {
        cmd_tok.to_ascii_uppercase()
    } else {
        cmd_tok.to_string()
    };
    rest = after;

    let (params, trailing) = parse_params_trailing(rest);

    Ok(Message {
        raw,
        tags,
        prefix,
        command,
        params,
        trailing,
        hostmask: OnceCell::new(),
    })
}

fn parse_tags(block: &str) -> HashMap<String, TagValue> {
    let mut tags = HashMap::new();
    if block.is_empty() {
        return tags;
    }
    for item in block.split(';') {
        if item.is_empty() {
            continue;
        }
        match item.split_once('=') {
            Some((key, value)) => {
                tags.insert(key.to_string(), TagValue::Value(unescape_tag_value(value)));
            }
            None => {
                tags.insert(item.to_string(), TagValue::True);
            }
        }
    }
    tags
}

fn parse_params_trailing(mut rest: &str) -> (Vec<String>, Option<String>) {
    let mut params = Vec::new();
    loop {
        if rest.is_empty() {
            return (params, None);
        }
        if let Some(trailing) = rest.strip_prefix(':') {
            return (params, Some(trailing.to_string()));
        }
        match rest.find(' ') {
            None => {
                params.push(rest.to_string());
                return (params, None);
            }
            Some(idx) => {
                params.push(rest[..idx].to_string());
                rest = &rest[idx + 1..];
            }
        }
    }
}

fn split_first_space(s: &str) -> (&str, &str) {
    match s.find(' ') {
        Some(idx) => (&s[..idx], &s[idx + 1..]),
        None => (s, ""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_tagged_privmsg() {
        let msg = parse(
            "@time=2023-01-01T00:00:00.000Z;account=alice :nick!u@h PRIVMSG #chan :hello",
        )
        .unwrap();
        assert_eq!(
            msg.tags.get("time"),
            Some(&TagValue::Value("2023-01-01T00:00:00.000Z".to_string()))
        );
        assert_eq!(msg.tags.get("account"), Some(&TagValue::Value("alice".to_string())));
        assert_eq!(msg.prefix_nick(), Some("nick"));
        assert_eq!(msg.command, "PRIVMSG");
        assert_eq!(msg.params, vec!["#chan".to_string()]);
        assert_eq!(msg.trailing.as_deref(), Some("hello"));
    }

    #[test]
    fn parse_no_prefix_no_trailing() {
        let msg = parse("PING abc").unwrap();
        assert!(msg.prefix.is_none());
        assert_eq!(msg.command, "PING");
        assert_eq!(msg.params, vec!["abc".to_string()]);
        assert_eq!(msg.trailing, None);
    }

    #[test]
    fn parse_numeric_command_not_uppercased_weirdly() {
        let msg = parse(":irc.example.net 001 bot :Welcome").unwrap();
        assert_eq!(msg.command, "001");
        assert!(msg.is_numeric());
        assert_eq!(msg.param(0), Some("bot"));
    }

    #[test]
    fn lowercase_verb_is_uppercased() {
        let msg = parse("ping abc").unwrap();
        assert_eq!(msg.command, "PING");
    }

    #[test]
    fn empty_line_is_malformed() {
        assert!(parse("").is_err());
        assert!(parse("   ").is_err());
    }

    #[test]
    fn hostmask_no_delims_is_all_nick() {
        let hm = Hostmask::parse("irc.example.net");
        assert_eq!(hm.nick, "irc.example.net");
        assert_eq!(hm.user, "");
        assert_eq!(hm.host, "");
    }

    #[test]
    fn hostmask_missing_at() {
        let hm = Hostmask::parse("nick!user");
        assert_eq!(hm.nick, "nick");
        assert_eq!(hm.user, "user");
        assert_eq!(hm.host, "");
    }

    #[test]
    fn roundtrip_through_emit() {
        let line = "@time=2023-01-01T00:00:00.000Z :nick!u@h PRIVMSG #chan :hello there";
        let msg = parse(line).unwrap();
        let reparsed = parse(&msg.emit()).unwrap();
        assert_eq!(msg, reparsed);
    }
}
