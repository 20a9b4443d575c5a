//! Desired-state reconciliation
//!
//! The desired state (enabled modules and the union of their rooms) comes
//! from configuration; the actual state is what is loaded in the registry
//! and which rooms the server has confirmed we are in. Each pass computes
//! the set differences between the two and applies the minimal actions to
//! close the gap. A pass over unchanged inputs does nothing.

use crate::module::build;
use crate::{ClientHandle, ModuleCatalog, ModuleConfig, ModuleRegistry};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

/// A pair of module-name set and room set
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct State {
    pub modules: BTreeSet<String>,
    pub rooms: BTreeSet<String>,
}

/// State derived from configuration
pub type DesiredState = State;
/// State observed on a live connection
pub type ActualState = State;

impl State {
    /// Enabled modules and the union of their rooms
    ///
    /// Entries that are not channel names (a module listing the bot's own
    /// nick to receive private messages) are never joined.
    pub fn from_config(modules: &BTreeMap<String, ModuleConfig>) -> Self {
        let enabled = modules.iter().filter(|(_, config)| config.enabled);
        let mut state = State::default();
        for (name, config) in enabled {
            state.modules.insert(name.clone());
            state
                .rooms
                .extend(config.rooms.iter().filter(|room| is_channel(room)).cloned());
        }
        state
    }
}

/// Whether `room` names a channel rather than a user
pub fn is_channel(room: &str) -> bool {
    room.starts_with(['#', '&', '+', '!'])
}

/// One corrective action taken by a reconciliation pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Unload(String),
    Load(String),
    Update(String),
    Leave(BTreeSet<String>),
    Join(BTreeSet<String>),
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rooms = |rooms: &BTreeSet<String>| rooms.iter().cloned().collect::<Vec<_>>().join(",");
        match self {
            Action::Unload(name) => write!(f, "unload {}", name),
            Action::Load(name) => write!(f, "load {}", name),
            Action::Update(name) => write!(f, "update {}", name),
            Action::Leave(set) => write!(f, "leave {}", rooms(set)),
            Action::Join(set) => write!(f, "join {}", rooms(set)),
        }
    }
}

/// Drives the actual state of one connection toward its configuration
pub struct Reconciler {
    catalog: ModuleCatalog,
    /// Every configured module, enabled or not
    configs: BTreeMap<String, ModuleConfig>,
    /// Configuration each loaded module was last loaded or updated with
    applied: HashMap<String, ModuleConfig>,
    /// Configuration whose load or update failed; not retried until it changes
    failed: HashMap<String, ModuleConfig>,
    /// Rooms the server confirmed we are in
    rooms: BTreeSet<String>,
    /// JOIN sent, not yet confirmed
    joining: BTreeSet<String>,
    /// PART sent, not yet confirmed
    leaving: BTreeSet<String>,
    /// Rooms kept out of room reconciliation until a rejoin timer fires
    held: BTreeSet<String>,
}

impl Reconciler {
    pub fn new(catalog: ModuleCatalog, configs: BTreeMap<String, ModuleConfig>) -> Self {
        Self {
            catalog,
            configs,
            applied: HashMap::new(),
            failed: HashMap::new(),
            rooms: BTreeSet::new(),
            joining: BTreeSet::new(),
            leaving: BTreeSet::new(),
            held: BTreeSet::new(),
        }
    }

    /// Replace the module configuration; takes effect on the next pass
    pub fn set_config(&mut self, configs: BTreeMap<String, ModuleConfig>) {
        self.configs = configs;
    }

    pub fn config(&self) -> &BTreeMap<String, ModuleConfig> {
        &self.configs
    }

    pub fn desired(&self) -> DesiredState {
        State::from_config(&self.configs)
    }

    pub fn actual(&self, registry: &ModuleRegistry) -> ActualState {
        State {
            modules: registry.names().iter().cloned().collect(),
            rooms: self.rooms.clone(),
        }
    }

    /// Rooms the server confirmed we are in
    pub fn rooms(&self) -> &BTreeSet<String> {
        &self.rooms
    }

    /// Reconcile modules, then rooms (rooms only once `ready`)
    pub fn match_desired_state(
        &mut self,
        registry: &mut ModuleRegistry,
        client: &ClientHandle,
        ready: bool,
    ) -> Vec<Action> {
        let mut actions = self.match_desired_modules(registry, client);
        actions.extend(self.match_desired_rooms(client, ready));
        actions
    }

    /// Unload, then load, then update modules
    pub fn match_desired_modules(&mut self, registry: &mut ModuleRegistry, client: &ClientHandle) -> Vec<Action> {
        let desired = self.desired().modules;
        let actual = self.actual(registry).modules;
        let mut actions = Vec::new();

        // Leaving the desired set forgets a failure, so re-enabling retries
        self.failed.retain(|name, _| desired.contains(name));

        for name in actual.difference(&desired) {
            self.unload(registry, client, name);
            actions.push(Action::Unload(name.clone()));
        }

        for name in desired.difference(&actual) {
            if self.load(registry, name) {
                actions.push(Action::Load(name.clone()));
            }
        }

        for name in desired.intersection(&actual) {
            let Some(config) = self.configs.get(name) else {
                continue;
            };
            let Some(applied) = self.applied.get(name) else {
                continue;
            };
            if applied == config || self.failed.get(name) == Some(config) {
                continue;
            }

            if applied.factory_id(name) != config.factory_id(name) {
                tracing::info!("Module {} changed implementation, reloading", name);
                self.unload(registry, client, name);
                actions.push(Action::Unload(name.clone()));
                if self.load(registry, name) {
                    actions.push(Action::Load(name.clone()));
                }
                continue;
            }

            let config = config.clone();
            match registry.update(name, &config.to_params(name)) {
                Ok(()) => {
                    tracing::info!("Updated module {}", name);
                    self.failed.remove(name);
                    self.applied.insert(name.clone(), config);
                    actions.push(Action::Update(name.clone()));
                }
                Err(e) => {
                    tracing::error!("Failed to update module {}: {}", name, e);
                    let previous = applied.to_params(name);
                    if let Err(e) = registry.update(name, &previous) {
                        tracing::error!("Cannot restore module {} to its previous configuration: {}", name, e);
                    }
                    self.failed.insert(name.clone(), config);
                }
            }
        }

        actions
    }

    /// Send one batched PART and one batched JOIN to close the room gap
    ///
    /// Does nothing until the connection is ready. Rooms with a request
    /// still in flight, or held back after a kick, are left alone.
    pub fn match_desired_rooms(&mut self, client: &ClientHandle, ready: bool) -> Vec<Action> {
        if !ready {
            tracing::debug!("Not ready, deferring room reconciliation");
            return Vec::new();
        }

        let desired = self.desired().rooms;
        let to_leave: BTreeSet<String> = self
            .rooms
            .difference(&desired)
            .filter(|room| !self.leaving.contains(*room))
            .cloned()
            .collect();
        let to_join: BTreeSet<String> = desired
            .difference(&self.rooms)
            .filter(|room| !self.joining.contains(*room) && !self.held.contains(*room))
            .cloned()
            .collect();

        let mut actions = Vec::new();
        if !to_leave.is_empty() {
            tracing::info!("Leaving {}", join_rooms(&to_leave));
            client.part(&to_leave);
            self.leaving.extend(to_leave.iter().cloned());
            actions.push(Action::Leave(to_leave));
        }
        if !to_join.is_empty() {
            tracing::info!("Joining {}", join_rooms(&to_join));
            client.join(&to_join);
            self.joining.extend(to_join.iter().cloned());
            actions.push(Action::Join(to_join));
        }
        actions
    }

    /// The server confirmed we joined `room`
    pub fn room_joined(&mut self, room: &str) {
        self.joining.remove(room);
        self.rooms.insert(room.to_string());
    }

    /// The server confirmed we left (or were removed from) `room`
    pub fn room_left(&mut self, room: &str) {
        self.leaving.remove(room);
        self.rooms.remove(room);
    }

    /// The server refused our JOIN for `room`
    pub fn join_failed(&mut self, room: &str) {
        self.joining.remove(room);
    }

    /// Keep `room` out of room reconciliation until released
    pub fn hold(&mut self, room: &str) {
        self.held.insert(room.to_string());
    }

    /// Stop holding `room`; returns false if it was not held
    pub fn release(&mut self, room: &str) -> bool {
        self.held.remove(room)
    }

    /// Forget all room state, e.g. after a disconnect
    pub fn reset_rooms(&mut self) {
        self.rooms.clear();
        self.joining.clear();
        self.leaving.clear();
        self.held.clear();
    }

    fn unload(&mut self, registry: &mut ModuleRegistry, client: &ClientHandle, name: &str) {
        let cancelled = client.scheduler().cancel_owned_by(name);
        if cancelled > 0 {
            tracing::debug!("Cancelled {} timers of module {}", cancelled, name);
        }
        registry.unload(name);
        self.applied.remove(name);
    }

    fn load(&mut self, registry: &mut ModuleRegistry, name: &str) -> bool {
        let Some(config) = self.configs.get(name).cloned() else {
            return false;
        };
        if self.failed.get(name) == Some(&config) {
            tracing::debug!("Skipping module {}: its last load failed", name);
            return false;
        }

        let id = config.factory_id(name).to_string();
        let Some(factory) = self.catalog.get(&id) else {
            tracing::error!("Cannot load module {}: unknown module '{}'", name, id);
            self.failed.insert(name.to_string(), config);
            return false;
        };

        let result = build(factory, &config.to_params(name)).and_then(|module| registry.register(name, module));
        match result {
            Ok(()) => {
                self.failed.remove(name);
                self.applied.insert(name.to_string(), config);
                true
            }
            Err(e) => {
                tracing::error!("Cannot load module {}: {}", name, e);
                self.failed.insert(name.to_string(), config);
                false
            }
        }
    }
}

impl fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reconciler")
            .field("configs", &self.configs.keys())
            .field("rooms", &self.rooms)
            .field("joining", &self.joining)
            .field("leaving", &self.leaving)
            .field("held", &self.held)
            .finish()
    }
}

fn join_rooms(rooms: &BTreeSet<String>) -> String {
    rooms.iter().cloned().collect::<Vec<_>>().join(",")
}
