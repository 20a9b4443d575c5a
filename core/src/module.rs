//! Module system for pluggable bot behaviour
//!
//! A module owns the set of rooms it is active in and a table of command
//! tokens (the first word of a message, e.g. `!help`) mapped to handlers.
//! The registry routes every inbound message to each module active in the
//! message's room: a command match invokes that command's handler and
//! nothing else, otherwise the module's catch-all handler runs if it has one.

use crate::{ClientHandle, Error, Result, User};
use serde::de::DeserializeOwned;
use std::any::Any;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

/// Who a room membership event is about
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Who {
    /// The bot itself
    Me,
    /// Someone else, by nickname
    Nick(String),
}

impl Who {
    pub fn is_me(&self) -> bool {
        matches!(self, Who::Me)
    }
}

/// Configuration a module is built and updated with
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleParams {
    /// Instance name (the configuration key)
    pub name: String,
    /// Rooms this module is active in
    pub rooms: BTreeSet<String>,
    /// Free-form named parameters (a JSON object)
    pub params: serde_json::Value,
}

impl ModuleParams {
    pub fn new(name: impl Into<String>, rooms: BTreeSet<String>, params: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            rooms,
            params,
        }
    }

    /// Deserialize the named parameters into a typed structure
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T> {
        let value = if self.params.is_null() {
            serde_json::Value::Object(serde_json::Map::new())
        } else {
            self.params.clone()
        };
        serde_json::from_value(value).map_err(|e| Error::module(&self.name, format!("invalid params: {}", e)))
    }

    /// Whether any named parameters were given
    pub fn has_params(&self) -> bool {
        match &self.params {
            serde_json::Value::Object(map) => !map.is_empty(),
            serde_json::Value::Null => false,
            _ => true,
        }
    }
}

/// Read-only description of a loaded module, handed to message handlers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleSummary {
    /// Instance name (the configuration key)
    pub instance: String,
    /// Display name
    pub name: String,
    pub author: String,
    pub about: String,
    /// Command tokens, in registration order
    pub commands: Vec<String>,
    pub rooms: BTreeSet<String>,
}

/// Everything a handler needs to know about one inbound message
pub struct Context<'a> {
    /// Handle for sending messages and scheduling timers
    pub client: &'a ClientHandle,
    /// Instance name of the module being invoked
    pub instance: &'a str,
    /// Matched command token, if this is a command invocation
    pub command: Option<&'a str>,
    /// Room (or our own nick, for a private message) the message was sent to
    pub room: &'a str,
    /// Where replies should go: the room, or the sender for private messages
    pub reply_to: &'a str,
    pub sender: &'a User,
    /// Full message text
    pub text: &'a str,
    /// Every loaded module, in registration order
    pub modules: &'a [ModuleSummary],
}

impl<'a> Context<'a> {
    /// Message text after the command token
    pub fn args(&self) -> &'a str {
        let text = self.text.trim_start();
        match text.find(char::is_whitespace) {
            Some(idx) => text[idx..].trim(),
            None => "",
        }
    }

    /// Whitespace-separated words after the command token
    pub fn arg_words(&self) -> Vec<&'a str> {
        self.args().split_whitespace().collect()
    }

    /// Whether this message was sent to us privately
    pub fn is_private(&self) -> bool {
        self.room != self.reply_to
    }

    /// Send text to the reply target
    pub fn say(&self, text: &str) {
        self.client.send_message(self.reply_to, text);
    }

    /// Send text to the reply target, addressed to the sender
    pub fn reply(&self, text: &str) {
        self.client
            .send_message(self.reply_to, &format!("{}: {}", self.sender.nick, text));
    }
}

/// A command handler
pub type CommandHandler<M> = fn(&mut M, &Context<'_>) -> Result<()>;

/// Command token -> handler table, built in a module's constructor
pub struct CommandSet<M> {
    handlers: Vec<(String, CommandHandler<M>)>,
}

impl<M> CommandSet<M> {
    pub fn new() -> Self {
        Self { handlers: Vec::new() }
    }

    /// Register a handler for one token, replacing any earlier one
    pub fn register(mut self, token: impl Into<String>, handler: CommandHandler<M>) -> Self {
        let token = token.into();
        self.handlers.retain(|(t, _)| *t != token);
        self.handlers.push((token, handler));
        self
    }

    /// Register one handler for several tokens
    pub fn register_all(mut self, tokens: &[&str], handler: CommandHandler<M>) -> Self {
        for token in tokens {
            self = self.register(*token, handler);
        }
        self
    }

    /// Registered tokens, in registration order
    pub fn tokens(&self) -> Vec<&str> {
        self.handlers.iter().map(|(t, _)| t.as_str()).collect()
    }

    pub fn contains(&self, token: &str) -> bool {
        self.handler(token).is_some()
    }

    pub fn handler(&self, token: &str) -> Option<CommandHandler<M>> {
        self.handlers
            .iter()
            .find(|(t, _)| t == token)
            .map(|(_, handler)| *handler)
    }

    /// Run the handler registered for the context's command, if any
    pub fn invoke(module: &mut M, ctx: &Context<'_>, commands: impl Fn(&M) -> &CommandSet<M>) -> Result<()> {
        let handler = ctx.command.and_then(|token| commands(&*module).handler(token));
        match handler {
            Some(handler) => handler(module, ctx),
            None => Ok(()),
        }
    }
}

impl<M> Default for CommandSet<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> fmt::Debug for CommandSet<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.tokens()).finish()
    }
}

/// Module trait that all bot modules implement
///
/// Handlers run on the session's own task and must return promptly; work
/// that may block (network fetches and the like) belongs on a spawned task
/// that talks back through a cloned [`ClientHandle`].
pub trait Module: Send {
    /// Display name
    fn name(&self) -> &str;

    fn author(&self) -> &str {
        "anonymous"
    }

    fn about(&self) -> &str {
        "A nondescript module."
    }

    /// Rooms this module is active in
    fn rooms(&self) -> &BTreeSet<String>;

    fn set_rooms(&mut self, rooms: BTreeSet<String>);

    /// Command tokens this module answers to
    fn commands(&self) -> Vec<&str> {
        Vec::new()
    }

    /// Called when the first word of a message is one of `commands()`
    fn on_command(&mut self, _ctx: &Context<'_>) -> Result<()> {
        Ok(())
    }

    /// Whether `on_message` should see messages that matched no command
    fn handles_all_messages(&self) -> bool {
        false
    }

    /// Catch-all handler
    fn on_message(&mut self, _ctx: &Context<'_>) -> Result<()> {
        Ok(())
    }

    fn on_room_joined(&mut self, _client: &ClientHandle, _room: &str, _who: &Who) -> Result<()> {
        Ok(())
    }

    fn on_room_left(&mut self, _client: &ClientHandle, _room: &str, _who: &Who) -> Result<()> {
        Ok(())
    }

    /// A timer scheduled by this module fired
    fn on_timer(&mut self, _client: &ClientHandle, _token: &str) -> Result<()> {
        Ok(())
    }

    /// Apply new named parameters without rebuilding the module
    fn on_update_params(&mut self, params: &ModuleParams) -> Result<()> {
        if params.has_params() {
            tracing::warn!(
                "Module {} ignores its parameters; changes take effect on reload",
                params.name
            );
        }
        Ok(())
    }

    /// Apply a new configuration in place
    fn update_config(&mut self, params: &ModuleParams) -> Result<()> {
        self.set_rooms(params.rooms.clone());
        self.on_update_params(params)
    }

    /// Called once before the module is dropped
    fn on_unload(&mut self) {}
}

/// Which handler of a module a message was routed to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Command(String),
    CatchAll,
}

/// Loaded module instances, keyed by instance name, in registration order
#[derive(Default)]
pub struct ModuleRegistry {
    modules: HashMap<String, Box<dyn Module>>,
    order: Vec<String>,
    summaries: Vec<ModuleSummary>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a module instance under `instance`
    pub fn register(&mut self, instance: impl Into<String>, module: Box<dyn Module>) -> Result<()> {
        let instance = instance.into();
        if self.modules.contains_key(&instance) {
            return Err(Error::module(&instance, "already loaded"));
        }
        tracing::info!("Loaded module {} ({})", instance, module.name());
        self.order.push(instance.clone());
        self.modules.insert(instance, module);
        self.refresh_summaries();
        Ok(())
    }

    /// Call `on_unload` and drop a module; returns false if it was not loaded
    pub fn unload(&mut self, instance: &str) -> bool {
        let Some(mut module) = self.modules.remove(instance) else {
            return false;
        };
        self.order.retain(|name| name != instance);
        guarded(instance, "on_unload", || {
            module.on_unload();
            Ok(())
        });
        self.refresh_summaries();
        tracing::info!("Unloaded module {}", instance);
        true
    }

    /// Re-apply configuration to a loaded module in place
    pub fn update(&mut self, instance: &str, params: &ModuleParams) -> Result<()> {
        let module = self
            .modules
            .get_mut(instance)
            .ok_or_else(|| Error::module(instance, "not loaded"))?;
        run_guarded(|| module.update_config(params)).map_err(|reason| Error::module(instance, reason))?;
        self.refresh_summaries();
        Ok(())
    }

    pub fn contains(&self, instance: &str) -> bool {
        self.modules.contains_key(instance)
    }

    pub fn get(&self, instance: &str) -> Option<&dyn Module> {
        self.modules.get(instance).map(|m| m.as_ref())
    }

    /// Instance names in registration order
    pub fn names(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn summaries(&self) -> &[ModuleSummary] {
        &self.summaries
    }

    /// Unload every module
    pub fn clear(&mut self) {
        for instance in self.order.clone() {
            self.unload(&instance);
        }
    }

    /// Route a message to every module active in `room`
    ///
    /// Returns, in invocation order, which handler of which module ran.
    pub fn dispatch_message(
        &mut self,
        client: &ClientHandle,
        room: &str,
        reply_to: &str,
        sender: &User,
        text: &str,
    ) -> Vec<(String, Route)> {
        let token = text.split_whitespace().next();
        let mut routes = Vec::new();

        let Self {
            modules,
            order,
            summaries,
        } = self;
        let summaries: &[ModuleSummary] = summaries;
        for instance in order.iter() {
            let Some(module) = modules.get_mut(instance) else {
                continue;
            };
            if !module.rooms().contains(room) {
                continue;
            }

            let command = token.filter(|t| module.commands().contains(t));
            let route = match command {
                Some(token) => Route::Command(token.to_string()),
                None if module.handles_all_messages() => Route::CatchAll,
                None => continue,
            };

            let ctx = Context {
                client,
                instance,
                command,
                room,
                reply_to,
                sender,
                text,
                modules: summaries,
            };
            match route {
                Route::Command(_) => guarded(instance, "on_command", || module.on_command(&ctx)),
                Route::CatchAll => guarded(instance, "on_message", || module.on_message(&ctx)),
            };
            routes.push((instance.clone(), route));
        }
        routes
    }

    /// Tell every module active in `room` that someone joined it
    pub fn dispatch_joined(&mut self, client: &ClientHandle, room: &str, who: &Who) {
        self.for_each_in_room(room, |instance, module| {
            guarded(instance, "on_room_joined", || module.on_room_joined(client, room, who));
        });
    }

    /// Tell every module active in `room` that someone left it
    pub fn dispatch_left(&mut self, client: &ClientHandle, room: &str, who: &Who) {
        self.for_each_in_room(room, |instance, module| {
            guarded(instance, "on_room_left", || module.on_room_left(client, room, who));
        });
    }

    /// Deliver a fired timer to its module
    pub fn dispatch_timer(&mut self, client: &ClientHandle, instance: &str, token: &str) -> bool {
        match self.modules.get_mut(instance) {
            Some(module) => {
                guarded(instance, "on_timer", || module.on_timer(client, token));
                true
            }
            None => false,
        }
    }

    fn for_each_in_room<F>(&mut self, room: &str, mut f: F)
    where
        F: FnMut(&str, &mut dyn Module),
    {
        for instance in &self.order {
            if let Some(module) = self.modules.get_mut(instance) {
                if module.rooms().contains(room) {
                    f(instance.as_str(), module.as_mut());
                }
            }
        }
    }

    fn refresh_summaries(&mut self) {
        self.summaries = self
            .order
            .iter()
            .filter_map(|instance| {
                self.modules.get(instance).map(|module| ModuleSummary {
                    instance: instance.clone(),
                    name: module.name().to_string(),
                    author: module.author().to_string(),
                    about: module.about().to_string(),
                    commands: module.commands().iter().map(|c| c.to_string()).collect(),
                    rooms: module.rooms().clone(),
                })
            })
            .collect();
    }
}

impl fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleRegistry").field("modules", &self.order).finish()
    }
}

/// Builds a module instance from its configuration
pub type ModuleFactory = fn(&ModuleParams) -> Result<Box<dyn Module>>;

/// Startup-time table of module identifiers to factories
#[derive(Clone, Default)]
pub struct ModuleCatalog {
    factories: BTreeMap<String, ModuleFactory>,
}

impl ModuleCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a factory under `id`
    pub fn with(mut self, id: impl Into<String>, factory: ModuleFactory) -> Self {
        self.register(id, factory);
        self
    }

    pub fn register(&mut self, id: impl Into<String>, factory: ModuleFactory) {
        self.factories.insert(id.into(), factory);
    }

    pub fn get(&self, id: &str) -> Option<ModuleFactory> {
        self.factories.get(id).copied()
    }

    /// Known identifiers, sorted
    pub fn ids(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    /// Build a module through the factory registered under `id`
    pub fn create(&self, id: &str, params: &ModuleParams) -> Result<Box<dyn Module>> {
        let factory = self
            .get(id)
            .ok_or_else(|| Error::module(&params.name, format!("unknown module '{}'", id)))?;
        build(factory, params)
    }
}

impl fmt::Debug for ModuleCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.factories.keys()).finish()
    }
}

/// Run a factory, turning a panic into a module error
pub(crate) fn build(factory: ModuleFactory, params: &ModuleParams) -> Result<Box<dyn Module>> {
    match panic::catch_unwind(AssertUnwindSafe(|| factory(params))) {
        Ok(result) => result,
        Err(payload) => Err(Error::module(&params.name, panic_message(payload.as_ref()))),
    }
}

fn run_guarded<F>(f: F) -> std::result::Result<(), String>
where
    F: FnOnce() -> Result<()>,
{
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(payload) => Err(format!("panicked: {}", panic_message(payload.as_ref()))),
    }
}

/// Run a handler, logging (and swallowing) any error or panic
fn guarded<F>(instance: &str, handler: &str, f: F) -> bool
where
    F: FnOnce() -> Result<()>,
{
    match run_guarded(f) {
        Ok(()) => true,
        Err(reason) => {
            tracing::error!("Module {} failed in {}: {}", instance, handler, reason);
            false
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
