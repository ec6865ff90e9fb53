// Parsing of one line of terminal input.

/// What a line typed at the prompt asks for. Chat references are either a
/// number from the last `/chats` listing or a raw chat id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command<'a> {
    Send(&'a str),
    New,
    Chats,
    Open(&'a str),
    Rename(&'a str, &'a str),
    Pin(&'a str),
    Delete(&'a str),
    Help,
    Quit,
    Usage(&'static str),
    Unknown(&'a str),
}

pub const HELP: &str = "\
/new                 start a new chat
/chats               list your chats (pinned first)
/open <chat>         continue a chat
/rename <chat> <t>   rename a chat
/pin <chat>          pin or unpin a chat
/delete <chat>       delete a chat
/quit                leave
Anything else is sent as a message.";

pub fn parse(line: &str) -> Command<'_> {
    let line = line.trim();
    let Some(rest) = line.strip_prefix('/') else {
        return Command::Send(line);
    };

    let (name, args) = match rest.split_once(char::is_whitespace) {
        Some((name, args)) => (name, args.trim()),
        None => (rest, ""),
    };

    match name {
        "new" => Command::New,
        "chats" | "ls" => Command::Chats,
        "open" => one_arg(args, Command::Open, "/open <chat>"),
        "pin" => one_arg(args, Command::Pin, "/pin <chat>"),
        "delete" | "rm" => one_arg(args, Command::Delete, "/delete <chat>"),
        "rename" => match args.split_once(char::is_whitespace) {
            Some((chat, title)) if !title.trim().is_empty() => Command::Rename(chat, title.trim()),
            _ => Command::Usage("/rename <chat> <title>"),
        },
        "help" | "?" => Command::Help,
        "quit" | "exit" | "q" => Command::Quit,
        _ => Command::Unknown(name),
    }
}

fn one_arg<'a>(args: &'a str, make: fn(&'a str) -> Command<'a>, usage: &'static str) -> Command<'a> {
    if args.is_empty() {
        Command::Usage(usage)
    } else {
        make(args)
    }
}
