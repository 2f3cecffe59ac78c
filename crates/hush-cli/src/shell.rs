use std::collections::HashMap;

use anyhow::Result;
use chrono::Local;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, warn};

use hush_core::{CoreError, DigestEntry, InboxEntry, Session, Store};
use hush_types::{Message, UserId};

#[derive(Debug, PartialEq, Eq)]
pub enum Command {
    Open(String),
    Close,
    Read,
    List,
    Inbox,
    Recent,
    Search(String),
    Rename(String),
    History,
    Help,
    Quit,
    Send(String),
    Unknown(String),
}

impl Command {
    pub fn parse(line: &str) -> Option<Self> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return None;
        }
        let Some(rest) = trimmed.strip_prefix('/') else {
            return Some(Command::Send(line.to_string()));
        };

        let (name, arg) = match rest.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, arg.trim().to_string()),
            None => (rest, String::new()),
        };
        Some(match name {
            "open" => Command::Open(arg),
            "close" => Command::Close,
            "read" => Command::Read,
            "list" => Command::List,
            "inbox" => Command::Inbox,
            "recent" => Command::Recent,
            "search" => Command::Search(arg),
            "rename" => Command::Rename(arg),
            "history" => Command::History,
            "help" => Command::Help,
            "quit" | "exit" => Command::Quit,
            other => Command::Unknown(other.to_string()),
        })
    }
}

const HELP: &str = "\
/open <user>     open the conversation with <user> (your own name opens notes)
/close           close the open conversation
/read            mark the open conversation as read
/list            all conversations with unread counts
/inbox           conversations with unread messages
/recent          messages received since your last session
/search <text>   find users
/rename <name>   rename the open conversation (creator only)
/history         reprint the open conversation
/quit            log out
anything else is sent to the open conversation";

enum Input {
    Line(Option<String>),
    Live(Option<Message>),
}

enum Flow {
    Continue,
    Quit,
}

/// Interactive loop over stdin and the open conversation's live channel.
pub struct Shell {
    session: Session,
    names: HashMap<UserId, String>,
}

impl Shell {
    pub fn new(session: Session) -> Self {
        let mut names = HashMap::new();
        names.insert(session.viewer().id, session.viewer().username.clone());
        Self { session, names }
    }

    pub async fn run(mut self) -> Result<()> {
        println!("Logged in as {}. /help for commands.", self.session.viewer().username);
        print_digest(&self.session.recent_activity().await);
        print_entries(&self.session.inbox().await);

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            let input = tokio::select! {
                line = lines.next_line() => Input::Line(line?),
                message = self.session.next_live() => Input::Live(message),
            };

            match input {
                Input::Line(None) => break,
                Input::Line(Some(line)) => {
                    let Some(command) = Command::parse(&line) else {
                        continue;
                    };
                    match self.handle(command).await {
                        Ok(Flow::Continue) => {}
                        Ok(Flow::Quit) => break,
                        Err(e) => println!("! {}", e),
                    }
                }
                Input::Live(Some(message)) => {
                    self.learn_names(&[message.sender_id]).await;
                    let line = self.render(&message);
                    println!("{}", line);
                }
                Input::Live(None) => {
                    warn!("Live channel closed");
                    self.session.close();
                }
            }
        }

        let mark = self.session.logout();
        println!("Bye. Last connection recorded at {}", mark.with_timezone(&Local).format("%H:%M:%S"));
        Ok(())
    }

    async fn handle(&mut self, command: Command) -> Result<Flow, CoreError> {
        match command {
            Command::Open(username) => {
                let resolved = self.session.open_with(&username).await?;
                if resolved.created {
                    println!("Started a new conversation.");
                }
                self.print_history().await;
            }
            Command::Close => self.session.close(),
            Command::Read => match self.session.scrolled_to_bottom() {
                Some(id) => println!("Read up to {}.", id),
                None => println!("Nothing to mark."),
            },
            Command::List => print_entries(&self.session.overview().await),
            Command::Inbox => print_entries(&self.session.inbox().await),
            Command::Recent => print_digest(&self.session.recent_activity().await),
            Command::Search(query) => {
                let users = self.session.search(&query).await;
                if users.is_empty() {
                    println!("No match.");
                }
                for user in users {
                    println!("  {}", user.username);
                    self.names.insert(user.id, user.username);
                }
            }
            Command::Rename(name) => {
                self.session.rename(&name).await?;
                println!("Renamed.");
            }
            Command::History => self.print_history().await,
            Command::Help => println!("{}", HELP),
            Command::Quit => return Ok(Flow::Quit),
            Command::Send(content) => {
                if self.session.send(&content).await?.is_none() {
                    println!("Empty message not sent.");
                }
            }
            Command::Unknown(name) => println!("Unknown command /{}. Try /help.", name),
        }
        Ok(Flow::Continue)
    }

    async fn print_history(&mut self) {
        let Some(view) = self.session.view() else {
            println!("No conversation open.");
            return;
        };
        let label = view.conversation().label().to_string();
        let messages = view.messages().to_vec();

        let senders: Vec<UserId> = messages.iter().map(|m| m.sender_id).collect();
        self.learn_names(&senders).await;

        println!("== {} ==", label);
        for message in &messages {
            println!("{}", self.render(message));
        }
    }

    async fn learn_names(&mut self, ids: &[UserId]) {
        let mut missing: Vec<UserId> = ids
            .iter()
            .filter(|id| !self.names.contains_key(id))
            .copied()
            .collect();
        missing.sort();
        missing.dedup();
        if missing.is_empty() {
            return;
        }
        match self.session.store().users_by_ids(&missing).await {
            Ok(users) => {
                for user in users {
                    self.names.insert(user.id, user.username);
                }
            }
            Err(e) => error!("Failed to look up usernames: {}", e),
        }
    }

    fn render(&self, message: &Message) -> String {
        let sender = self
            .names
            .get(&message.sender_id)
            .cloned()
            .unwrap_or_else(|| message.sender_id.to_string());
        let marker = if self.session.is_unread(message) { "*" } else { " " };
        format!(
            "{} {} {}: {}",
            marker,
            message.timestamp.with_timezone(&Local).format("%H:%M"),
            sender,
            message.content
        )
    }
}

pub fn print_entries(entries: &[InboxEntry]) {
    if entries.is_empty() {
        println!("No conversations to show.");
        return;
    }
    for entry in entries {
        let preview = entry
            .last_message
            .as_ref()
            .map(|m| m.content.chars().take(40).collect::<String>())
            .unwrap_or_default();
        if entry.unread > 0 {
            println!("  {} ({} unread)  {}", entry.label, entry.unread, preview);
        } else {
            println!("  {}  {}", entry.label, preview);
        }
    }
}

pub fn print_digest(entries: &[DigestEntry]) {
    if entries.is_empty() {
        return;
    }
    println!("Since your last visit:");
    for entry in entries {
        println!(
            "  [{}] {} {}",
            entry.label,
            entry.message.timestamp.with_timezone(&Local).format("%d/%m %H:%M"),
            entry.message.content
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_sent_verbatim() {
        assert_eq!(
            Command::parse("  hello there "),
            Some(Command::Send("  hello there ".into()))
        );
        assert_eq!(Command::parse("   "), None);
    }

    #[test]
    fn commands_take_the_rest_of_the_line() {
        assert_eq!(Command::parse("/open bob"), Some(Command::Open("bob".into())));
        assert_eq!(
            Command::parse("/rename  Weekend plans "),
            Some(Command::Rename("Weekend plans".into()))
        );
        assert_eq!(Command::parse("/search"), Some(Command::Search(String::new())));
        assert_eq!(Command::parse("/exit"), Some(Command::Quit));
        assert_eq!(Command::parse("/nope"), Some(Command::Unknown("nope".into())));
    }
}
