//! Reconciliation tests against a live registry

use jayk_core::*;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

/// Lifecycle events, tagged with the instance name so tests can run in parallel
static EVENTS: Mutex<Vec<String>> = Mutex::new(Vec::new());

fn record(event: String) {
    EVENTS.lock().unwrap().push(event);
}

fn events_for(instance: &str) -> Vec<String> {
    let prefix = format!("{}:", instance);
    EVENTS
        .lock()
        .unwrap()
        .iter()
        .filter_map(|e| e.strip_prefix(&prefix).map(str::to_string))
        .collect()
}

struct Counter {
    instance: String,
    rooms: BTreeSet<String>,
    step: u64,
    count: u64,
}

impl Module for Counter {
    fn name(&self) -> &str {
        "Counter"
    }

    fn rooms(&self) -> &BTreeSet<String> {
        &self.rooms
    }

    fn set_rooms(&mut self, rooms: BTreeSet<String>) {
        self.rooms = rooms;
    }

    fn handles_all_messages(&self) -> bool {
        true
    }

    fn on_message(&mut self, ctx: &Context<'_>) -> Result<()> {
        self.count += self.step;
        ctx.say(&self.count.to_string());
        Ok(())
    }

    fn on_update_params(&mut self, params: &ModuleParams) -> Result<()> {
        let step = params.params["step"].as_u64().unwrap_or(1);
        if step == 0 {
            return Err(Error::module(&self.instance, "step must be positive"));
        }
        self.step = step;
        record(format!("{}:update {}", self.instance, self.step));
        Ok(())
    }

    fn on_unload(&mut self) {
        record(format!("{}:unload", self.instance));
    }
}

fn counter(params: &ModuleParams) -> Result<Box<dyn Module>> {
    record(format!("{}:build", params.name));
    Ok(Box::new(Counter {
        instance: params.name.clone(),
        rooms: params.rooms.clone(),
        step: params.params["step"].as_u64().unwrap_or(1),
        count: 0,
    }))
}

/// Refuses to build an instance the first time it is asked to
fn flaky(params: &ModuleParams) -> Result<Box<dyn Module>> {
    if !events_for(&params.name).iter().any(|e| e == "refused") {
        record(format!("{}:refused", params.name));
        return Err(Error::module(&params.name, "not yet"));
    }
    counter(params)
}

fn catalog() -> ModuleCatalog {
    ModuleCatalog::new().with("counter", counter).with("flaky", flaky)
}

fn module(rooms: &[&str], step: u64) -> ModuleConfig {
    let mut config = ModuleConfig {
        rooms: rooms.iter().map(|r| r.to_string()).collect(),
        path: Some("counter".to_string()),
        ..ModuleConfig::default()
    };
    config.params.insert("step".to_string(), serde_json::json!(step));
    config
}

fn set(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Reconcile, then confirm every JOIN/PART the pass sent
fn settle(reconciler: &mut Reconciler, registry: &mut ModuleRegistry, client: &ClientHandle) -> Vec<Action> {
    let actions = reconciler.match_desired_state(registry, client, true);
    for action in &actions {
        match action {
            Action::Join(rooms) => rooms.iter().for_each(|room| reconciler.room_joined(room)),
            Action::Leave(rooms) => rooms.iter().for_each(|room| reconciler.room_left(room)),
            _ => {}
        }
    }
    actions
}

#[test]
fn test_reconcile_is_idempotent() {
    let (client, _outbound, _timers) = ClientHandle::detached();
    let mut registry = ModuleRegistry::new();
    let configs = BTreeMap::from([
        ("idem_a".to_string(), module(&["#x"], 1)),
        ("idem_b".to_string(), module(&["#x"], 1)),
    ]);
    let mut reconciler = Reconciler::new(catalog(), configs);

    let first = settle(&mut reconciler, &mut registry, &client);
    assert_eq!(first.len(), 3);
    assert_eq!(reconciler.actual(&registry), reconciler.desired());

    let second = settle(&mut reconciler, &mut registry, &client);
    assert!(second.is_empty());
}

#[test]
fn test_added_room_joins_only_the_new_room() {
    let (client, mut outbound, _timers) = ClientHandle::detached();
    let mut registry = ModuleRegistry::new();
    let mut configs = BTreeMap::from([
        ("grow_a".to_string(), module(&["#x"], 1)),
        ("grow_b".to_string(), module(&["#x"], 1)),
    ]);
    let mut reconciler = Reconciler::new(catalog(), configs.clone());
    settle(&mut reconciler, &mut registry, &client);
    while outbound.try_recv().is_ok() {}

    configs.get_mut("grow_b").unwrap().rooms.push("#y".to_string());
    reconciler.set_config(configs);
    let actions = settle(&mut reconciler, &mut registry, &client);

    let joins: Vec<&Action> = actions.iter().filter(|a| matches!(a, Action::Join(_))).collect();
    assert_eq!(joins, vec![&Action::Join(set(&["#y"]))]);
    assert!(!actions.iter().any(|a| matches!(a, Action::Leave(_))));
    assert!(!actions.iter().any(|a| matches!(a, Action::Load(_) | Action::Unload(_))));
    assert_eq!(outbound.try_recv().unwrap().to_string(), "JOIN #y");
}

#[test]
fn test_update_keeps_instance_state() {
    let (client, mut outbound, _timers) = ClientHandle::detached();
    let mut registry = ModuleRegistry::new();
    let mut configs = BTreeMap::from([("keep".to_string(), module(&["#x"], 1))]);
    let mut reconciler = Reconciler::new(catalog(), configs.clone());
    settle(&mut reconciler, &mut registry, &client);

    let alice = User::new("alice", "alice", "host");
    registry.dispatch_message(&client, "#x", "#x", &alice, "hello");
    registry.dispatch_message(&client, "#x", "#x", &alice, "hello");

    configs.get_mut("keep").unwrap().params.insert("step".to_string(), serde_json::json!(10));
    reconciler.set_config(configs);
    let actions = settle(&mut reconciler, &mut registry, &client);
    assert_eq!(actions, vec![Action::Update("keep".to_string())]);

    while outbound.try_recv().is_ok() {}
    registry.dispatch_message(&client, "#x", "#x", &alice, "hello");
    assert_eq!(outbound.try_recv().unwrap().to_string(), "PRIVMSG #x :12");

    assert_eq!(events_for("keep"), vec!["build", "update 10"]);
}

#[test]
fn test_disabled_module_is_unloaded_and_room_left() {
    let (client, mut outbound, _timers) = ClientHandle::detached();
    let mut registry = ModuleRegistry::new();
    let mut configs = BTreeMap::from([
        ("off_a".to_string(), module(&["#x"], 1)),
        ("off_b".to_string(), module(&["#y"], 1)),
    ]);
    let mut reconciler = Reconciler::new(catalog(), configs.clone());
    settle(&mut reconciler, &mut registry, &client);
    while outbound.try_recv().is_ok() {}

    configs.get_mut("off_b").unwrap().enabled = false;
    reconciler.set_config(configs);
    let actions = settle(&mut reconciler, &mut registry, &client);

    assert_eq!(
        actions,
        vec![Action::Unload("off_b".to_string()), Action::Leave(set(&["#y"]))]
    );
    assert_eq!(outbound.try_recv().unwrap().to_string(), "PART #y");
    assert_eq!(events_for("off_b"), vec!["build", "unload"]);
    assert!(!registry.contains("off_b"));
}

#[test]
fn test_changed_path_rebuilds_module() {
    let (client, _outbound, _timers) = ClientHandle::detached();
    let mut registry = ModuleRegistry::new();
    let catalog = catalog().with("other_counter", counter);
    let mut configs = BTreeMap::from([("swap".to_string(), module(&["#x"], 1))]);
    let mut reconciler = Reconciler::new(catalog, configs.clone());
    settle(&mut reconciler, &mut registry, &client);

    configs.get_mut("swap").unwrap().path = Some("other_counter".to_string());
    reconciler.set_config(configs);
    settle(&mut reconciler, &mut registry, &client);

    assert_eq!(events_for("swap"), vec!["build", "unload", "build"]);
    assert!(registry.contains("swap"));
}

#[test]
fn test_unknown_module_is_not_retried() {
    let (client, _outbound, _timers) = ClientHandle::detached();
    let mut registry = ModuleRegistry::new();
    let mut config = module(&["#x"], 1);
    config.path = Some("missing".to_string());
    let configs = BTreeMap::from([("ghost".to_string(), config)]);
    let mut reconciler = Reconciler::new(catalog(), configs);

    let first = reconciler.match_desired_modules(&mut registry, &client);
    assert!(first.is_empty());
    assert!(registry.is_empty());

    let second = reconciler.match_desired_modules(&mut registry, &client);
    assert!(second.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_unload_cancels_module_timers() {
    let (client, _outbound, _timers) = ClientHandle::detached();
    let mut registry = ModuleRegistry::new();
    let mut configs = BTreeMap::from([("timed".to_string(), module(&["#x"], 1))]);
    let mut reconciler = Reconciler::new(catalog(), configs.clone());
    settle(&mut reconciler, &mut registry, &client);

    let timer = client.schedule("timed", std::time::Duration::from_secs(60), "tick");
    assert!(timer.is_pending());

    configs.clear();
    reconciler.set_config(configs);
    settle(&mut reconciler, &mut registry, &client);

    assert!(!timer.is_pending());
    assert_eq!(client.scheduler().pending(), 0);
}

#[test]
fn test_failed_load_retried_after_disable_and_enable() {
    let (client, _outbound, _timers) = ClientHandle::detached();
    let mut registry = ModuleRegistry::new();
    let mut config = module(&["#x"], 1);
    config.path = Some("flaky".to_string());
    let mut configs = BTreeMap::from([("again".to_string(), config)]);
    let mut reconciler = Reconciler::new(catalog(), configs.clone());

    assert!(reconciler.match_desired_modules(&mut registry, &client).is_empty());
    assert!(reconciler.match_desired_modules(&mut registry, &client).is_empty());

    configs.get_mut("again").unwrap().enabled = false;
    reconciler.set_config(configs.clone());
    assert!(reconciler.match_desired_modules(&mut registry, &client).is_empty());

    configs.get_mut("again").unwrap().enabled = true;
    reconciler.set_config(configs);
    assert_eq!(
        reconciler.match_desired_modules(&mut registry, &client),
        vec![Action::Load("again".to_string())]
    );
    assert!(registry.contains("again"));
    assert_eq!(events_for("again"), vec!["refused", "build"]);
}

#[test]
fn test_failed_update_keeps_previous_config() {
    let (client, _outbound, _timers) = ClientHandle::detached();
    let mut registry = ModuleRegistry::new();
    let mut configs = BTreeMap::from([("strict".to_string(), module(&["#x"], 1))]);
    let mut reconciler = Reconciler::new(catalog(), configs.clone());
    settle(&mut reconciler, &mut registry, &client);

    configs.insert("strict".to_string(), module(&["#x", "#y"], 0));
    reconciler.set_config(configs.clone());
    let actions = reconciler.match_desired_modules(&mut registry, &client);
    assert!(actions.is_empty());
    assert_eq!(registry.get("strict").unwrap().rooms(), &set(&["#x"]));

    // Not retried while the rejected configuration stands
    assert!(reconciler.match_desired_modules(&mut registry, &client).is_empty());
    assert_eq!(events_for("strict"), vec!["build", "update 1"]);

    configs.insert("strict".to_string(), module(&["#x", "#y"], 2));
    reconciler.set_config(configs);
    assert_eq!(
        reconciler.match_desired_modules(&mut registry, &client),
        vec![Action::Update("strict".to_string())]
    );
    assert_eq!(registry.get("strict").unwrap().rooms(), &set(&["#x", "#y"]));
    assert_eq!(events_for("strict"), vec!["build", "update 1", "update 2"]);
}
