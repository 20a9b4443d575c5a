//! Word Game Module
//!
//! Every round a batch of random words is drawn from a word list. Whoever
//! says one of them first scores a point. When the round ends the scores
//! are posted, merged into a leaderboard file and a new round starts.

use jayk_core::{ClientHandle, CommandSet, Context, Error, Module, ModuleParams, Result, TimerHandle, Who};
use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::Instant;

/// Timer token for the end of a round
const ROUND_END: &str = "round_end";
/// How long to wait before retrying a round end while we are not in the room
const ABSENT_RETRY: Duration = Duration::from_secs(1);
/// Entries shown by `!leaderboard`
const LEADERBOARD_SIZE: usize = 5;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct WordConfig {
    /// JSON file holding the all-time scores
    #[serde(alias = "leaderboard_database")]
    pub leaderboard: PathBuf,
    /// Word list, one word per line
    pub wordlist: PathBuf,
    pub words_per_hour: usize,
    pub hours_per_round: u64,
    /// Nicks that cannot score
    pub ignore: Vec<String>,
    /// Seconds between `!leaderboard` answers
    pub leaderboard_timeout: u64,
}

impl Default for WordConfig {
    fn default() -> Self {
        Self {
            leaderboard: PathBuf::from("wordbot.json"),
            wordlist: PathBuf::from("words.txt"),
            words_per_hour: 50,
            hours_per_round: 6,
            ignore: Vec::new(),
            leaderboard_timeout: 300,
        }
    }
}

impl WordConfig {
    fn round_length(&self) -> Duration {
        Duration::from_secs(self.hours_per_round * 3600)
    }

    fn is_ignored(&self, nick: &str) -> bool {
        self.ignore.iter().any(|ignored| ignored.eq_ignore_ascii_case(nick))
    }
}

/// All-time scores as stored on disk
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Leaderboard {
    pub updated: Option<DateTime<Utc>>,
    /// Score per lower-cased nick
    pub scores: BTreeMap<String, u64>,
}

impl Leaderboard {
    /// Read the leaderboard; a missing file is an empty leaderboard
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Write the leaderboard, replacing the old file in one step
    pub fn save(&self, path: &Path) -> Result<()> {
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(self)?)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn merge(&mut self, round: &HashMap<String, u64>) {
        for (user, points) in round {
            *self.scores.entry(user.clone()).or_insert(0) += points;
        }
        self.updated = Some(Utc::now());
    }

    /// Highest scores first; ties by name
    pub fn top(&self, count: usize) -> Vec<(&str, u64)> {
        let mut entries: Vec<(&str, u64)> = self.scores.iter().map(|(u, s)| (u.as_str(), *s)).collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
        entries.truncate(count);
        entries
    }
}

/// Draw up to `count` distinct words from the list at `path`
fn draw_words(path: &Path, count: usize) -> Result<HashSet<String>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::module("wordbot", format!("cannot read word list {}: {}", path.display(), e)))?;
    let mut words: Vec<String> = content
        .lines()
        .map(|line| line.trim().to_lowercase())
        .filter(|line| !line.is_empty())
        .collect();
    words.sort();
    words.dedup();

    Ok(words
        .choose_multiple(&mut rand::thread_rng(), count)
        .cloned()
        .collect())
}

/// Final standings: (place, name, points), tied scores sharing a place
fn standings(scores: &HashMap<String, u64>) -> Vec<(usize, String, u64)> {
    let mut sorted: Vec<(&String, &u64)> = scores.iter().filter(|(_, points)| **points > 0).collect();
    sorted.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));

    let mut place = 0;
    let mut previous = None;
    sorted
        .into_iter()
        .map(|(name, points)| {
            if previous != Some(*points) {
                place += 1;
                previous = Some(*points);
            }
            (place, name.clone(), *points)
        })
        .collect()
}

pub struct WordModule {
    instance: String,
    rooms: BTreeSet<String>,
    commands: CommandSet<WordModule>,
    config: WordConfig,
    /// Room the current round runs in
    room: Option<String>,
    present: bool,
    words: HashSet<String>,
    scores: HashMap<String, u64>,
    /// Display spelling of each lower-cased nick
    names: HashMap<String, String>,
    round_end: Option<TimerHandle>,
    leaderboard_after: Option<Instant>,
}

impl WordModule {
    pub fn new(instance: impl Into<String>, rooms: BTreeSet<String>, config: WordConfig) -> Self {
        Self {
            instance: instance.into(),
            rooms,
            commands: CommandSet::new().register("!leaderboard", WordModule::leaderboard),
            config,
            room: None,
            present: false,
            words: HashSet::new(),
            scores: HashMap::new(),
            names: HashMap::new(),
            round_end: None,
            leaderboard_after: None,
        }
    }

    pub fn create(params: &ModuleParams) -> Result<Box<dyn Module>> {
        Ok(Box::new(Self::new(&params.name, params.rooms.clone(), params.parse()?)))
    }

    fn display_name<'a>(&'a self, user: &'a str) -> &'a str {
        self.names.get(user).map(String::as_str).unwrap_or(user)
    }

    fn round_running(&self) -> bool {
        self.round_end.as_ref().map(TimerHandle::is_pending).unwrap_or(false)
    }

    fn cancel_round_end(&mut self) {
        if let Some(timer) = self.round_end.take() {
            timer.cancel();
        }
    }

    fn new_round(&mut self, client: &ClientHandle) {
        self.cancel_round_end();
        self.scores.clear();

        let count = self.config.words_per_hour * self.config.hours_per_round as usize;
        self.words = match draw_words(&self.config.wordlist, count) {
            Ok(words) => words,
            Err(e) => {
                tracing::error!("{}", e);
                HashSet::new()
            }
        };

        let length = self.config.round_length();
        tracing::debug!("Wordbot round of {} words ends in {}s", self.words.len(), length.as_secs());
        self.round_end = Some(client.schedule(&self.instance, length, ROUND_END));
    }

    fn end_round(&mut self, client: &ClientHandle) {
        self.cancel_round_end();
        let Some(room) = self.room.clone() else {
            return;
        };

        if !self.present {
            tracing::info!("Wordbot was not present when the round ended; deferring score report");
            self.round_end = Some(client.schedule(&self.instance, ABSENT_RETRY, ROUND_END));
            return;
        }

        client.send_message(&room, "Game over. Here were the scores:");
        for (place, user, points) in standings(&self.scores) {
            client.send_message(&room, &format!("{}. {}. {}", place, self.display_name(&user), points));
        }
        self.update_leaderboard();
        self.new_round(client);
    }

    fn update_leaderboard(&self) {
        if self.scores.is_empty() {
            return;
        }
        let result = Leaderboard::load(&self.config.leaderboard).and_then(|mut board| {
            board.merge(&self.scores);
            board.save(&self.config.leaderboard)
        });
        if let Err(e) = result {
            tracing::error!("Cannot update leaderboard {}: {}", self.config.leaderboard.display(), e);
        }
    }

    fn leaderboard(&mut self, ctx: &Context<'_>) -> Result<()> {
        if self.leaderboard_after.map(|after| after > Instant::now()).unwrap_or(false) {
            return Ok(());
        }
        let board = Leaderboard::load(&self.config.leaderboard)?;
        for (i, (user, score)) in board.top(LEADERBOARD_SIZE).into_iter().enumerate() {
            ctx.say(&format!("{}. {}. {}", i + 1, self.display_name(user), score));
        }
        self.leaderboard_after = Some(Instant::now() + Duration::from_secs(self.config.leaderboard_timeout));
        Ok(())
    }
}

impl Module for WordModule {
    fn name(&self) -> &str {
        "Wordbot"
    }

    fn author(&self) -> &str {
        "intercal"
    }

    fn about(&self) -> &str {
        "Every few hours, a group of random words is chosen. If you say one of these words, you get one point!"
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

    fn handles_all_messages(&self) -> bool {
        true
    }

    fn on_message(&mut self, ctx: &Context<'_>) -> Result<()> {
        if self.config.is_ignored(&ctx.sender.nick) || self.room.as_deref() != Some(ctx.room) {
            return Ok(());
        }

        let said: HashSet<String> = ctx
            .text
            .split_whitespace()
            .map(|word| word.trim_matches(|c: char| c.is_ascii_punctuation()).to_lowercase())
            .filter(|word| !word.is_empty())
            .collect();
        let mut matches: Vec<String> = said.intersection(&self.words).cloned().collect();
        if matches.is_empty() {
            return Ok(());
        }
        matches.sort();

        let nick = &ctx.sender.nick;
        let key = nick.to_lowercase();
        if key != *nick {
            self.names.entry(key.clone()).or_insert_with(|| nick.clone());
        }
        *self.scores.entry(key).or_insert(0) += matches.len() as u64;

        for word in &matches {
            ctx.reply(&format!("Congrats! '{}' is good for 1 point.", word));
            self.words.remove(word);
        }
        if self.words.is_empty() {
            self.end_round(ctx.client);
        }
        Ok(())
    }

    fn on_room_joined(&mut self, client: &ClientHandle, room: &str, who: &Who) -> Result<()> {
        if !who.is_me() {
            return Ok(());
        }
        match self.room.as_deref() {
            Some(current) if current != room => return Ok(()),
            _ => {}
        }
        self.room = Some(room.to_string());
        self.present = true;
        if self.round_running() {
            tracing::debug!("Wordbot rejoined {} during a round", room);
        } else {
            self.new_round(client);
        }
        Ok(())
    }

    fn on_room_left(&mut self, _client: &ClientHandle, room: &str, who: &Who) -> Result<()> {
        if who.is_me() && self.room.as_deref() == Some(room) {
            self.present = false;
        }
        Ok(())
    }

    fn on_timer(&mut self, client: &ClientHandle, token: &str) -> Result<()> {
        if token == ROUND_END {
            self.end_round(client);
        }
        Ok(())
    }

    fn on_update_params(&mut self, params: &ModuleParams) -> Result<()> {
        self.config = params.parse()?;
        Ok(())
    }

    fn on_unload(&mut self) {
        self.cancel_round_end();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{alice, context, drain, rooms};
    use jayk_core::User;
    use tempfile::TempDir;

    fn setup(dir: &TempDir) -> WordModule {
        let wordlist = dir.path().join("words.txt");
        std::fs::write(&wordlist, "apple\nBanana\n\ncherry\napple\n").unwrap();
        let config = WordConfig {
            leaderboard: dir.path().join("leaderboard.json"),
            wordlist,
            words_per_hour: 3,
            hours_per_round: 1,
            ignore: vec!["Bob".to_string()],
            leaderboard_timeout: 300,
        };
        WordModule::new("wordbot", rooms(&["#x"]), config)
    }

    #[test]
    fn test_standings_share_places() {
        let scores = HashMap::from([
            ("alice".to_string(), 3),
            ("bob".to_string(), 3),
            ("carol".to_string(), 1),
            ("dave".to_string(), 0),
        ]);
        assert_eq!(
            standings(&scores),
            vec![
                (1, "alice".to_string(), 3),
                (1, "bob".to_string(), 3),
                (2, "carol".to_string(), 1),
            ]
        );
    }

    #[test]
    fn test_draw_words_dedups_and_limits() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("words.txt");
        std::fs::write(&path, "one\ntwo\nTWO\nthree\n").unwrap();

        assert_eq!(draw_words(&path, 10).unwrap().len(), 3);
        assert_eq!(draw_words(&path, 2).unwrap().len(), 2);
        assert!(draw_words(&dir.path().join("missing"), 2).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_round_scores_and_leaderboard() {
        let dir = TempDir::new().unwrap();
        let (client, mut outbound, _timers) = ClientHandle::detached();
        let mut module = setup(&dir);

        module.on_room_joined(&client, "#x", &Who::Me).unwrap();
        assert!(module.round_running());
        assert_eq!(module.words.len(), 3);

        let bob = User::new("bob", "bob", "example.org");
        module.on_message(&context(&client, "wordbot", &bob, "apple!", false)).unwrap();
        assert!(drain(&mut outbound).is_empty());

        let sender = alice();
        module.on_message(&context(&client, "wordbot", &sender, "I like Apple, and cherry.", false)).unwrap();
        assert_eq!(
            drain(&mut outbound),
            vec![
                "PRIVMSG #x :alice: Congrats! 'apple' is good for 1 point.",
                "PRIVMSG #x :alice: Congrats! 'cherry' is good for 1 point.",
            ]
        );

        module.on_timer(&client, ROUND_END).unwrap();
        assert_eq!(
            drain(&mut outbound),
            vec!["PRIVMSG #x :Game over. Here were the scores:", "PRIVMSG #x :1. alice. 2"]
        );
        assert!(module.round_running());
        assert!(module.scores.is_empty());

        let board = Leaderboard::load(&dir.path().join("leaderboard.json")).unwrap();
        assert_eq!(board.scores.get("alice"), Some(&2));
        assert!(board.updated.is_some());

        module.on_command(&context(&client, "wordbot", &sender, "!leaderboard", true)).unwrap();
        assert_eq!(drain(&mut outbound), vec!["PRIVMSG #x :1. alice. 2"]);
        module.on_command(&context(&client, "wordbot", &sender, "!leaderboard", true)).unwrap();
        assert!(drain(&mut outbound).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_word_ends_round() {
        let dir = TempDir::new().unwrap();
        let (client, mut outbound, _timers) = ClientHandle::detached();
        let mut module = setup(&dir);
        module.on_room_joined(&client, "#x", &Who::Me).unwrap();

        let sender = alice();
        module.on_message(&context(&client, "wordbot", &sender, "apple banana cherry", false)).unwrap();
        let lines = drain(&mut outbound);
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[4], "PRIVMSG #x :1. alice. 3");
        assert_eq!(module.words.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_absent_round_end_is_deferred() {
        let dir = TempDir::new().unwrap();
        let (client, mut outbound, mut timers) = ClientHandle::detached();
        let mut module = setup(&dir);
        module.on_room_joined(&client, "#x", &Who::Me).unwrap();
        module.on_room_left(&client, "#x", &Who::Me).unwrap();

        module.on_timer(&client, ROUND_END).unwrap();
        assert!(drain(&mut outbound).is_empty());
        assert!(module.round_running());

        // Rejoining mid-round does not start a new one
        let words = module.words.clone();
        module.on_room_joined(&client, "#x", &Who::Me).unwrap();
        assert_eq!(module.words, words);

        let fired = tokio::time::timeout(Duration::from_secs(2), timers.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fired.module(), Some("wordbot"));
        module.on_timer(&client, ROUND_END).unwrap();
        assert_eq!(drain(&mut outbound), vec!["PRIVMSG #x :Game over. Here were the scores:"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unload_cancels_round() {
        let dir = TempDir::new().unwrap();
        let (client, _outbound, _timers) = ClientHandle::detached();
        let mut module = setup(&dir);
        module.on_room_joined(&client, "#x", &Who::Me).unwrap();

        module.on_unload();
        assert!(!module.round_running());
        assert_eq!(client.scheduler().pending(), 0);
    }
}
