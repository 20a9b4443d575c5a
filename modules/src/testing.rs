//! Test helpers shared by the module tests

use jayk_core::{ClientHandle, Context, Message, ModuleSummary, User};
use std::collections::BTreeSet;
use tokio::sync::mpsc::UnboundedReceiver;

pub fn rooms(list: &[&str]) -> BTreeSet<String> {
    list.iter().map(|r| r.to_string()).collect()
}

/// Everything queued for the server so far, formatted
pub fn drain(outbound: &mut UnboundedReceiver<Message>) -> Vec<String> {
    std::iter::from_fn(|| outbound.try_recv().ok())
        .map(|m| m.to_string())
        .collect()
}

pub fn alice() -> User {
    User::new("alice", "alice", "example.org")
}

/// A room message from `sender`, with the command token taken from `text`
pub fn context<'a>(
    client: &'a ClientHandle,
    instance: &'a str,
    sender: &'a User,
    text: &'a str,
    command: bool,
) -> Context<'a> {
    const NO_MODULES: &[ModuleSummary] = &[];
    Context {
        client,
        instance,
        command: if command { text.split_whitespace().next() } else { None },
        room: "#x",
        reply_to: "#x",
        sender,
        text,
        modules: NO_MODULES,
    }
}
