//! IRC command line builders.
//!
//! Lines produced here never carry the `\r\n` terminator: the connection
//! facade owns framing (see the transport contract in the crate docs).

pub fn pass(password: &str) -> String {
    format!("PASS {password}")
}

pub fn nick(nick: &str) -> String {
    format!("NICK {nick}")
}

pub fn user(username: &str, host: &str, realname: &str) -> String {
    format!("USER {username} {username} {host} :{realname}")
}

pub fn pong(token: &str) -> String {
    format!("PONG :{token}")
}

pub fn join(chan: &str) -> String {
    format!("JOIN {chan}")
}

pub fn part(chan: &str) -> String {
    format!("PART {chan}")
}

pub fn privmsg(target: &str, msg: &str) -> String {
    format!("PRIVMSG {target} :{msg}")
}

pub fn notice(target: &str, msg: &str) -> String {
    format!("NOTICE {target} :{msg}")
}

pub fn action(target: &str, msg: &str) -> String {
    format!("PRIVMSG {target} :\x01ACTION {msg}\x01")
}

pub fn quit(reason: Option<&str>) -> String {
    match reason {
        None => "QUIT".to_string(),
        Some(reason) => format!("QUIT :{reason}"),
    }
}

pub fn whois(nick: &str) -> String {
    format!("WHOIS {nick}")
}

pub fn ison(names: &[&str]) -> String {
    format!("ISON {}", names.join(" "))
}

pub fn version(target: Option<&str>) -> String {
    match target {
        None => "VERSION".to_string(),
        Some(target) => format!("VERSION {target}"),
    }
}

pub fn topic_query(chan: &str) -> String {
    format!("TOPIC {chan}")
}

pub fn topic_set(chan: &str, topic: &str) -> String {
    format!("TOPIC {chan} :{topic}")
}

pub fn names(chan: &str) -> String {
    format!("NAMES {chan}")
}

pub fn mode(target: &str, change: &str, params: &[&str]) -> String {
    if params.is_empty() {
        format!("MODE {target} {change}")
    } else {
        format!("MODE {target} {change} {}", params.join(" "))
    }
}

pub fn wallops(msg: &str) -> String {
    format!("WALLOPS :{msg}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builders_omit_terminator() {
        assert_eq!(privmsg("#chan", "hi"), "PRIVMSG #chan :hi");
        assert_eq!(quit(None), "QUIT");
        assert_eq!(quit(Some("bye")), "QUIT :bye");
        assert_eq!(action("#chan", "waves"), "PRIVMSG #chan :\u{1}ACTION waves\u{1}");
        assert_eq!(ison(&["a", "b"]), "ISON a b");
    }
}
