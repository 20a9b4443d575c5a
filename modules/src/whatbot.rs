//! What Module
//!
//! When someone says just "what", repeats the previous message louder.

use jayk_core::{Context, Module, ModuleParams, Result};
use std::collections::{BTreeSet, HashMap};

/// Whether `text` is "what" once punctuation and whitespace are dropped
fn is_what(text: &str) -> bool {
    let filtered: String = text
        .chars()
        .filter(|c| !c.is_ascii_punctuation() && !c.is_whitespace())
        .collect();
    filtered.eq_ignore_ascii_case("what")
}

#[derive(Default)]
pub struct WhatModule {
    rooms: BTreeSet<String>,
    /// Last message seen per room
    last: HashMap<String, String>,
}

impl WhatModule {
    pub fn new(rooms: BTreeSet<String>) -> Self {
        Self {
            rooms,
            last: HashMap::new(),
        }
    }

    pub fn create(params: &ModuleParams) -> Result<Box<dyn Module>> {
        Ok(Box::new(Self::new(params.rooms.clone())))
    }
}

impl Module for WhatModule {
    fn name(&self) -> &str {
        "Whatbot"
    }

    fn about(&self) -> &str {
        "Say \"what\" and the last message is repeated, louder."
    }

    fn rooms(&self) -> &BTreeSet<String> {
        &self.rooms
    }

    fn set_rooms(&mut self, rooms: BTreeSet<String>) {
        self.last.retain(|room, _| rooms.contains(room));
        self.rooms = rooms;
    }

    fn handles_all_messages(&self) -> bool {
        true
    }

    fn on_message(&mut self, ctx: &Context<'_>) -> Result<()> {
        let previous = self.last.get(ctx.room).filter(|_| is_what(ctx.text));
        match previous {
            Some(previous) => ctx.reply(&previous.to_uppercase()),
            None => {
                self.last.insert(ctx.room.to_string(), ctx.text.to_string());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{alice, context, drain, rooms};
    use jayk_core::ClientHandle;

    #[test]
    fn test_is_what() {
        assert!(is_what("what"));
        assert!(is_what("WHAT?!"));
        assert!(is_what(" w h a t "));
        assert!(!is_what("what now"));
        assert!(!is_what("whatever"));
    }

    #[test]
    fn test_repeats_previous_message() {
        let (client, mut outbound, _timers) = ClientHandle::detached();
        let mut module = WhatModule::new(rooms(&["#x"]));
        let sender = alice();

        module.on_message(&context(&client, "what", &sender, "what", false)).unwrap();
        assert!(drain(&mut outbound).is_empty());

        module.on_message(&context(&client, "what", &sender, "the cake is a lie", false)).unwrap();
        module.on_message(&context(&client, "what", &sender, "what?", false)).unwrap();
        module.on_message(&context(&client, "what", &sender, "WHAT", false)).unwrap();
        assert_eq!(
            drain(&mut outbound),
            vec![
                "PRIVMSG #x :alice: THE CAKE IS A LIE",
                "PRIVMSG #x :alice: THE CAKE IS A LIE",
            ]
        );
    }
}
