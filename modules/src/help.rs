//! Help Module
//!
//! Lists every other loaded module, its description and its commands,
//! privately to whoever asked.

use jayk_core::{CommandSet, Context, Module, ModuleParams, Result};
use std::collections::BTreeSet;

/// Width of a section header line
const HELP_WIDTH: usize = 40;

/// Module answering `!help`
pub struct HelpModule {
    rooms: BTreeSet<String>,
    commands: CommandSet<HelpModule>,
}

impl HelpModule {
    pub fn new(rooms: BTreeSet<String>) -> Self {
        Self {
            rooms,
            commands: CommandSet::new().register("!help", HelpModule::help),
        }
    }

    pub fn create(params: &ModuleParams) -> Result<Box<dyn Module>> {
        Ok(Box::new(Self::new(params.rooms.clone())))
    }

    fn help(&mut self, ctx: &Context<'_>) -> Result<()> {
        for line in help_lines(ctx) {
            if !line.is_empty() {
                ctx.client.send_message(&ctx.sender.nick, &line);
            }
        }
        Ok(())
    }
}

/// Header, about line and command list for each module but the caller
fn help_lines(ctx: &Context<'_>) -> Vec<String> {
    let mut lines = Vec::new();
    for module in ctx.modules.iter().filter(|m| m.instance != ctx.instance) {
        let mut header = format!("- {} ", module.name);
        let used = header.chars().count();
        if used < HELP_WIDTH {
            header.push_str(&"-".repeat(HELP_WIDTH - used));
        }
        lines.push(header);
        lines.push(module.about.clone());
        lines.push(format!("Available commands: {}", module.commands.join(", ")));
    }
    lines
}

impl Module for HelpModule {
    fn name(&self) -> &str {
        "Help"
    }

    fn author(&self) -> &str {
        "intercal"
    }

    fn about(&self) -> &str {
        "Lists the loaded modules and their commands."
    }

    fn rooms(&self) -> &BTreeSet<String> {
        &self.rooms
    }

    fn set_rooms(&mut self, rooms: BTreeSet<String>) {
        self.rooms = rooms;
    }

    fn commands(&self) -> Vec<&str> {
        self.commands.tokens()
    }

    fn on_command(&mut self, ctx: &Context<'_>) -> Result<()> {
        CommandSet::invoke(self, ctx, |m| &m.commands)
    }
}
