//! Hashing Module
//!
//! Replies with the hex digest of the text following the command.

use jayk_core::{CommandSet, Context, Module, ModuleParams, Result};
use sha2::{Digest, Sha224, Sha256, Sha384, Sha512};
use std::collections::BTreeSet;

/// Supported algorithms, by the name used in `!hash`
pub const ALGORITHMS: &[&str] = &["sha224", "sha256", "sha384", "sha512"];

/// Hex digest of `text` with `algorithm`, if it is supported
pub fn make_hash(algorithm: &str, text: &str) -> Option<String> {
    let digest = match algorithm.to_ascii_lowercase().as_str() {
        "sha224" => format!("{:x}", Sha224::digest(text.as_bytes())),
        "sha256" => format!("{:x}", Sha256::digest(text.as_bytes())),
        "sha384" => format!("{:x}", Sha384::digest(text.as_bytes())),
        "sha512" => format!("{:x}", Sha512::digest(text.as_bytes())),
        _ => return None,
    };
    Some(digest)
}

pub struct HashModule {
    rooms: BTreeSet<String>,
    commands: CommandSet<HashModule>,
}

impl HashModule {
    pub fn new(rooms: BTreeSet<String>) -> Self {
        Self {
            rooms,
            commands: CommandSet::new()
                .register_all(&["!sha224", "!sha256", "!sha384", "!sha512"], HashModule::digest)
                .register("!hash", HashModule::hash)
                .register("!hashes", HashModule::hashes),
        }
    }

    pub fn create(params: &ModuleParams) -> Result<Box<dyn Module>> {
        Ok(Box::new(Self::new(params.rooms.clone())))
    }

    /// `!sha256 text`
    fn digest(&mut self, ctx: &Context<'_>) -> Result<()> {
        let algorithm = ctx.command.unwrap_or_default().trim_start_matches('!');
        if let Some(digest) = make_hash(algorithm, ctx.args()) {
            ctx.reply(&digest);
        }
        Ok(())
    }

    /// `!hash algorithm text`
    fn hash(&mut self, ctx: &Context<'_>) -> Result<()> {
        let args = ctx.args();
        if args.is_empty() {
            return Ok(());
        }
        let (algorithm, text) = match args.split_once(char::is_whitespace) {
            Some((algorithm, text)) => (algorithm, text.trim_start()),
            None => (args, ""),
        };
        match make_hash(algorithm, text) {
            Some(digest) => ctx.reply(&digest),
            None => ctx.reply("hash algorithm not available"),
        }
        Ok(())
    }

    fn hashes(&mut self, ctx: &Context<'_>) -> Result<()> {
        ctx.say(&format!("Available hash algorithms: {}", ALGORITHMS.join(" ")));
        Ok(())
    }
}

impl Module for HashModule {
    fn name(&self) -> &str {
        "HashBot"
    }

    fn author(&self) -> &str {
        "intercal"
    }

    fn about(&self) -> &str {
        "!hash algo message ... | !sha256 message ... | !hashes"
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
