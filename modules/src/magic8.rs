//! Magic 8 Ball Module

use crate::cooldown::Cooldowns;
use jayk_core::{CommandSet, Context, Module, ModuleParams, Result};
use rand::seq::SliceRandom;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::time::Duration;

const FORTUNES: &[&str] = &[
    "Reply hazy, try again",
    "Excellent Luck",
    "Good Luck",
    "Average Luck",
    "Bad Luck",
    "Good news will come to you by mail",
    "´_ゝ`",
    "ﾀ━━━━━━(ﾟ∀ﾟ)━━━━━━ !!!!",
    "You will meet a dark handsome stranger",
    "Better not tell you now",
    "Outlook good",
    "Very Bad Luck",
    "Godly Luck",
];

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Magic8Config {
    /// Seconds a user must wait between fortunes
    pub timeout: u64,
}

impl Default for Magic8Config {
    fn default() -> Self {
        Self { timeout: 300 }
    }
}

pub struct Magic8Module {
    rooms: BTreeSet<String>,
    commands: CommandSet<Magic8Module>,
    cooldowns: Cooldowns,
}

impl Magic8Module {
    pub fn new(rooms: BTreeSet<String>, config: Magic8Config) -> Self {
        Self {
            rooms,
            commands: CommandSet::new().register_all(&["!8ball", "!fortune"], Magic8Module::fortune),
            cooldowns: Cooldowns::new(Duration::from_secs(config.timeout)),
        }
    }

    pub fn create(params: &ModuleParams) -> Result<Box<dyn Module>> {
        Ok(Box::new(Self::new(params.rooms.clone(), params.parse()?)))
    }

    fn fortune(&mut self, ctx: &Context<'_>) -> Result<()> {
        let user = &ctx.sender.username;
        if self.cooldowns.is_limited(user) {
            return Ok(());
        }
        let fortune = FORTUNES.choose(&mut rand::thread_rng()).copied().unwrap_or_default();
        ctx.reply(&format!("Your fortune: {}", fortune));
        self.cooldowns.start(user);
        Ok(())
    }
}

impl Module for Magic8Module {
    fn name(&self) -> &str {
        "Magic 8 ball"
    }

    fn author(&self) -> &str {
        "intercal"
    }

    fn about(&self) -> &str {
        "Gives you a random fortune."
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

    fn on_update_params(&mut self, params: &ModuleParams) -> Result<()> {
        let config: Magic8Config = params.parse()?;
        let timeout = Duration::from_secs(config.timeout);
        if timeout != self.cooldowns.timeout() {
            tracing::debug!("Magic 8 ball timeout now {}s", config.timeout);
            self.cooldowns.set_timeout(timeout);
        }
        Ok(())
    }
}
