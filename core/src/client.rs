//! Connection state machine
//!
//! `Client` interprets protocol-level traffic for one server: registration
//! and nickname negotiation, keep-alive, and room membership. Everything a
//! user says is routed to the module registry. Outbound messages go through
//! a [`ClientHandle`], which queues them for the session's writer in the
//! order they were sent.

use crate::{
    Action, Command, ConnectInfo, Error, Message, ModuleCatalog, ModuleRegistry, Reconciler, Response,
    Result, Scheduler, ServerConfig, TimerHandle, TimerTarget, User, Who,
};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc;

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Not connected; initial state and the state after the link drops
    Disconnected,
    /// Transport being established
    Connecting,
    /// Transport up, sending password and user registration
    Authenticating,
    /// Waiting for the server to accept one of our nicknames
    NegotiatingNick,
    /// Registered with the server
    Ready,
    /// Registered and in at least one room
    Active,
    /// Connection attempt abandoned
    Failed,
}

impl ClientState {
    /// Whether the server accepts commands from us
    pub fn is_ready(&self) -> bool {
        matches!(self, ClientState::Ready | ClientState::Active)
    }
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Ordered nickname candidates with a cursor that only moves forward
#[derive(Debug, Clone)]
pub struct NickRotation {
    candidates: Vec<String>,
    cursor: usize,
}

impl NickRotation {
    pub fn new(candidates: Vec<String>) -> Self {
        Self { candidates, cursor: 0 }
    }

    /// The candidate currently being tried
    pub fn current(&self) -> Option<&str> {
        self.candidates.get(self.cursor).map(String::as_str)
    }

    /// Move to the next candidate; `None` once the list is exhausted
    pub fn advance(&mut self) -> Option<&str> {
        if self.cursor < self.candidates.len() {
            self.cursor += 1;
        }
        self.current()
    }

    pub fn is_exhausted(&self) -> bool {
        self.cursor >= self.candidates.len()
    }
}

/// Cloneable handle used by modules and the reconciler to talk to the server
#[derive(Debug, Clone)]
pub struct ClientHandle {
    outbound: mpsc::UnboundedSender<Message>,
    scheduler: Scheduler,
}

impl ClientHandle {
    pub fn new(outbound: mpsc::UnboundedSender<Message>, scheduler: Scheduler) -> Self {
        Self { outbound, scheduler }
    }

    /// A handle not attached to any connection, plus the receiving ends of
    /// its outbound queue and timer channel
    pub fn detached() -> (
        Self,
        mpsc::UnboundedReceiver<Message>,
        mpsc::UnboundedReceiver<TimerTarget>,
    ) {
        let (outbound, messages) = mpsc::unbounded_channel();
        let (scheduler, timers) = Scheduler::new();
        (Self::new(outbound, scheduler), messages, timers)
    }

    /// Queue a message for the server
    pub fn send(&self, message: Message) {
        if self.outbound.send(message).is_err() {
            tracing::warn!("Dropping outbound message: connection is closed");
        }
    }

    /// Send text to a room or user, one message per line
    pub fn send_message(&self, target: &str, text: &str) {
        for line in text.split(['\r', '\n']).filter(|line| !line.is_empty()) {
            self.send(Message::privmsg(target, line));
        }
    }

    /// Send one JOIN covering all of `rooms`
    pub fn join<I, S>(&self, rooms: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.send(Message::join(rooms));
    }

    /// Send one PART covering all of `rooms`
    pub fn part<I, S>(&self, rooms: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.send(Message::leave(rooms));
    }

    /// Deliver `token` to `module`'s `on_timer` after `delay`
    pub fn schedule(&self, module: &str, delay: Duration, token: &str) -> TimerHandle {
        self.scheduler.schedule(
            delay,
            TimerTarget::Module {
                module: module.to_string(),
                token: token.to_string(),
            },
        )
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Whether the session behind this handle has gone away
    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }
}

/// Protocol state machine for one server connection
pub struct Client {
    info: ConnectInfo,
    state: ClientState,
    nicks: NickRotation,
    nick: Option<String>,
    handle: ClientHandle,
    registry: ModuleRegistry,
    reconciler: Reconciler,
    rejoin_delay: Option<Duration>,
    rejoin_timers: HashMap<String, TimerHandle>,
}

impl Client {
    /// Create a client for `server`, building modules from `catalog`
    pub fn new(server: &ServerConfig, catalog: ModuleCatalog, handle: ClientHandle) -> Result<Self> {
        let info = server.connect_info()?;
        Ok(Self {
            nicks: NickRotation::new(info.nicks.clone()),
            info,
            state: ClientState::Disconnected,
            nick: None,
            handle,
            registry: ModuleRegistry::new(),
            reconciler: Reconciler::new(catalog, server.modules.clone()),
            rejoin_delay: server.rejoin_delay(),
            rejoin_timers: HashMap::new(),
        })
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    /// Nickname the server knows us by, once registered
    pub fn nick(&self) -> Option<&str> {
        self.nick.as_deref()
    }

    pub fn connect_info(&self) -> &ConnectInfo {
        &self.info
    }

    pub fn handle(&self) -> &ClientHandle {
        &self.handle
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    fn set_state(&mut self, state: ClientState) {
        if self.state != state {
            tracing::info!("{}: {} -> {}", self.info.host, self.state, state);
            self.state = state;
        }
    }

    /// Transport is being established
    pub fn on_connecting(&mut self) {
        self.set_state(ClientState::Connecting);
    }

    /// Transport is up: authenticate, register and offer the first nickname
    pub fn on_connect(&mut self) {
        self.set_state(ClientState::Authenticating);
        self.nicks = NickRotation::new(self.info.nicks.clone());
        self.nick = None;

        if let Some(password) = &self.info.password {
            self.handle.send(Message::authenticate(password));
        }
        self.handle.send(Message::register(&self.info.user, &self.info.realname));

        self.set_state(ClientState::NegotiatingNick);
        if let Some(nick) = self.nicks.current() {
            self.handle.send(Message::set_nickname(nick));
        }
    }

    /// The transport failed; before registration completes this is terminal
    pub fn on_transport_error(&mut self, error: &Error) {
        tracing::error!("{}: transport error: {}", self.info.host, error);
        self.cancel_timers();
        if !self.state.is_ready() {
            self.set_state(ClientState::Failed);
        }
    }

    /// The link dropped; pending timers are cancelled and room state forgotten
    pub fn on_disconnect(&mut self) {
        self.cancel_timers();
        self.reconciler.reset_rooms();
        self.nick = None;
        if self.state != ClientState::Failed {
            self.set_state(ClientState::Disconnected);
        }
    }

    /// Say goodbye and unload every module
    pub fn shutdown(&mut self, reason: &str) {
        if self.state.is_ready() {
            self.handle.send(Message::quit(reason));
        }
        self.cancel_timers();
        self.registry.clear();
    }

    fn cancel_timers(&mut self) {
        self.handle.scheduler().cancel_all();
        self.rejoin_timers.clear();
    }

    /// Parse and handle one inbound line; malformed lines are logged and dropped
    pub fn handle_line(&mut self, line: &str) -> Result<()> {
        match Message::parse(line) {
            Ok(message) => self.handle_message(&message),
            Err(e) => {
                tracing::warn!("{}: {}", self.info.host, e);
                Ok(())
            }
        }
    }

    /// Handle one inbound message
    ///
    /// Only fatal conditions are returned as errors.
    pub fn handle_message(&mut self, message: &Message) -> Result<()> {
        match message.command() {
            Command::Response(response) if response.is_registration_complete() => {
                self.on_registered(*response, message);
            }
            Command::Response(response) if response.is_nick_error() => {
                self.on_nick_error(*response)?;
            }
            Command::Response(response) if response.is_join_error() => {
                if let Some(room) = message.param(1) {
                    tracing::warn!("{}: cannot join {}: {}", self.info.host, room, response.name());
                    self.reconciler.join_failed(room);
                }
            }
            Command::Ping => self.on_ping(message),
            Command::Join => self.on_join(message),
            Command::Part => self.on_part(message),
            Command::Kick => self.on_kick(message),
            Command::Nick => self.on_nick(message),
            Command::Privmsg => self.on_privmsg(message),
            Command::Error => {
                tracing::warn!("{}: server error: {}", self.info.host, message.param(0).unwrap_or(""));
            }
            _ => {}
        }
        Ok(())
    }

    /// Apply a new server configuration and reconcile toward it
    pub fn update_config(&mut self, server: &ServerConfig) -> Vec<Action> {
        match server.connect_info() {
            Ok(info) if info != self.info => {
                tracing::warn!(
                    "{}: connection settings changed; they apply to the next connection",
                    self.info.host
                );
                self.info = info;
            }
            Ok(_) => {}
            Err(e) => tracing::error!("{}: ignoring invalid connection settings: {}", self.info.host, e),
        }
        self.rejoin_delay = server.rejoin_delay();
        self.reconciler.set_config(server.modules.clone());
        self.match_desired_state()
    }

    /// Act on a fired timer
    pub fn handle_timer(&mut self, target: TimerTarget) {
        match target {
            TimerTarget::Rejoin(room) => {
                self.rejoin_timers.remove(&room);
                if self.reconciler.release(&room) {
                    self.match_desired_rooms();
                }
            }
            TimerTarget::Module { module, token } => {
                if !self.registry.dispatch_timer(&self.handle, &module, &token) {
                    tracing::debug!("Timer {} for unloaded module {} dropped", token, module);
                }
            }
        }
    }

    /// Full reconciliation pass: modules, then rooms
    pub fn match_desired_state(&mut self) -> Vec<Action> {
        self.reconciler
            .match_desired_state(&mut self.registry, &self.handle, self.state.is_ready())
    }

    /// Room-only reconciliation pass
    pub fn match_desired_rooms(&mut self) -> Vec<Action> {
        self.reconciler.match_desired_rooms(&self.handle, self.state.is_ready())
    }

    fn is_me(&self, nick: &str) -> bool {
        self.nick
            .as_deref()
            .map(|me| me.eq_ignore_ascii_case(nick))
            .unwrap_or(false)
    }

    fn who(&self, nick: &str) -> Who {
        if self.is_me(nick) {
            Who::Me
        } else {
            Who::Nick(nick.to_string())
        }
    }

    fn on_registered(&mut self, response: Response, message: &Message) {
        if !matches!(self.state, ClientState::Authenticating | ClientState::NegotiatingNick) {
            return;
        }

        let nick = match (response, message.param(0)) {
            (Response::RplWelcome, Some(nick)) if !nick.is_empty() => nick.to_string(),
            _ => self.nicks.current().unwrap_or_default().to_string(),
        };
        tracing::info!("{}: registered as {}", self.info.host, nick);
        self.nick = Some(nick);
        self.set_state(ClientState::Ready);
        self.match_desired_state();
    }

    fn on_nick_error(&mut self, response: Response) -> Result<()> {
        if self.state != ClientState::NegotiatingNick {
            tracing::warn!("{}: unexpected {}", self.info.host, response.name());
            return Ok(());
        }

        let rejected = self.nicks.current().unwrap_or_default().to_string();
        let next = self.nicks.advance().map(str::to_string);
        match next {
            Some(next) => {
                tracing::info!(
                    "{}: nickname {} rejected ({}), trying {}",
                    self.info.host,
                    rejected,
                    response.name(),
                    next
                );
                self.handle.send(Message::set_nickname(&next));
                Ok(())
            }
            None => {
                tracing::error!("{}: nickname {} rejected and no candidates left", self.info.host, rejected);
                self.set_state(ClientState::Failed);
                Err(Error::NoMoreNicks {
                    server: self.info.host.clone(),
                    port: self.info.port,
                })
            }
        }
    }

    fn on_ping(&mut self, message: &Message) {
        match message.param(0) {
            Some(token) => self.handle.send(Message::pong(token)),
            None => tracing::warn!("{}: PING without a token", self.info.host),
        }
    }

    fn on_join(&mut self, message: &Message) {
        let (Some(user), Some(room)) = (message.sender(), message.param(0)) else {
            return;
        };
        let who = self.who(&user.nick);
        if who.is_me() {
            self.reconciler.room_joined(room);
            if self.state == ClientState::Ready {
                self.set_state(ClientState::Active);
            }
        }

        self.registry.dispatch_joined(&self.handle, room, &who);
        if who.is_me() {
            self.match_desired_rooms();
        }
    }

    fn on_part(&mut self, message: &Message) {
        let (Some(user), Some(room)) = (message.sender(), message.param(0)) else {
            return;
        };
        let who = self.who(&user.nick);
        if who.is_me() {
            self.reconciler.room_left(room);
        }

        self.registry.dispatch_left(&self.handle, room, &who);
        if who.is_me() {
            self.match_desired_rooms();
        }
    }

    fn on_kick(&mut self, message: &Message) {
        let (Some(room), Some(target)) = (message.param(0), message.param(1)) else {
            return;
        };
        let who = self.who(target);
        if who.is_me() {
            tracing::warn!("{}: kicked from {}", self.info.host, room);
            self.reconciler.room_left(room);
            if let Some(delay) = self.rejoin_delay {
                self.reconciler.hold(room);
                let timer = self
                    .handle
                    .scheduler()
                    .schedule(delay, TimerTarget::Rejoin(room.to_string()));
                if let Some(previous) = self.rejoin_timers.insert(room.to_string(), timer) {
                    previous.cancel();
                }
            }
        }

        self.registry.dispatch_left(&self.handle, room, &who);
        if who.is_me() {
            self.match_desired_rooms();
        }
    }

    fn on_nick(&mut self, message: &Message) {
        let (Some(user), Some(new_nick)) = (message.sender(), message.param(0)) else {
            return;
        };
        if self.is_me(&user.nick) {
            tracing::info!("{}: nickname changed to {}", self.info.host, new_nick);
            self.nick = Some(new_nick.to_string());
        }
    }

    fn on_privmsg(&mut self, message: &Message) {
        let Some(sender) = message.sender() else {
            return;
        };
        if self.is_me(&sender.nick) {
            return;
        }
        let (Some(target), Some(text)) = (message.param(0), message.param(1)) else {
            return;
        };

        let reply_to = if self.is_me(target) {
            sender.nick.clone()
        } else {
            target.to_string()
        };
        self.dispatch(target, &reply_to, &sender, text);
    }

    fn dispatch(&mut self, room: &str, reply_to: &str, sender: &User, text: &str) {
        let routes = self
            .registry
            .dispatch_message(&self.handle, room, reply_to, sender, text);
        if !routes.is_empty() {
            tracing::debug!("{} -> {:?}", room, routes);
        }
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("server", &self.info.host)
            .field("state", &self.state)
            .field("nick", &self.nick)
            .field("modules", &self.registry)
            .finish()
    }
}
