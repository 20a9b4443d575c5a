//! Dice Rolling Module
//!
//! `!rtd XdY` rolls X dice with Y sides each.

use crate::cooldown::Cooldowns;
use jayk_core::{CommandSet, Context, Module, ModuleParams, Result};
use lazy_static::lazy_static;
use rand::Rng;
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::time::Duration;

lazy_static! {
    static ref DICE_RE: Regex = Regex::new(r"^([1-9][0-9]*)[dD]([1-9][0-9]*)").unwrap();
}

/// Dice module parameters
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RtdConfig {
    /// Largest die allowed
    pub max_sides: u64,
    /// Most dice per roll
    pub max_dice: u64,
    /// Seconds a user must wait between rolls
    pub timeout: u64,
}

impl Default for RtdConfig {
    fn default() -> Self {
        Self {
            max_sides: 1_000_000,
            max_dice: 20,
            timeout: 5,
        }
    }
}

pub struct RtdModule {
    rooms: BTreeSet<String>,
    commands: CommandSet<RtdModule>,
    config: RtdConfig,
    cooldowns: Cooldowns,
}

impl RtdModule {
    pub fn new(rooms: BTreeSet<String>, config: RtdConfig) -> Self {
        Self {
            rooms,
            commands: CommandSet::new().register("!rtd", RtdModule::rtd),
            cooldowns: Cooldowns::new(Duration::from_secs(config.timeout)),
            config,
        }
    }

    pub fn create(params: &ModuleParams) -> Result<Box<dyn Module>> {
        Ok(Box::new(Self::new(params.rooms.clone(), params.parse()?)))
    }

    fn rtd(&mut self, ctx: &Context<'_>) -> Result<()> {
        let user = &ctx.sender.username;
        if self.cooldowns.is_limited(user) {
            return Ok(());
        }
        let words = ctx.arg_words();
        let [dice] = words.as_slice() else {
            return Ok(());
        };
        let Some((count, sides)) = self.parse_roll(dice) else {
            return Ok(());
        };

        let mut rng = rand::thread_rng();
        let rolls: Vec<u64> = (0..count).map(|_| rng.gen_range(1..=sides)).collect();
        let total: u64 = rolls.iter().sum();
        let sum = rolls.iter().map(u64::to_string).collect::<Vec<_>>().join(" + ");

        ctx.reply(&format!("({}d{}) {} = {}", count, sides, sum, total));
        self.cooldowns.start(user);
        Ok(())
    }

    /// Dice count and sides, if within limits
    fn parse_roll(&self, dice: &str) -> Option<(u64, u64)> {
        let caps = DICE_RE.captures(dice)?;
        let count: u64 = caps[1].parse().ok()?;
        let sides: u64 = caps[2].parse().ok()?;
        if count > self.config.max_dice || sides > self.config.max_sides {
            return None;
        }
        Some((count, sides))
    }
}

impl Module for RtdModule {
    fn name(&self) -> &str {
        "RTD"
    }

    fn author(&self) -> &str {
        "intercal"
    }

    fn about(&self) -> &str {
        "Use !rtd XdY to roll Y sided dice X times"
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
        let config: RtdConfig = params.parse()?;
        self.cooldowns.set_timeout(Duration::from_secs(config.timeout));
        self.config = config;
        Ok(())
    }
}
