//! Jayk Built-in Modules
//!
//! This crate provides the modules that ship with the bot, and a catalog
//! mapping their identifiers to factories.

pub mod convert;
pub mod cooldown;
pub mod hashbot;
pub mod help;
pub mod linkbot;
pub mod magic8;
pub mod rtd;
pub mod whatbot;
pub mod wordbot;

#[cfg(test)]
mod testing;

pub use convert::ConvertModule;
pub use cooldown::Cooldowns;
pub use hashbot::HashModule;
pub use help::HelpModule;
pub use linkbot::LinkModule;
pub use magic8::Magic8Module;
pub use rtd::RtdModule;
pub use whatbot::WhatModule;
pub use wordbot::WordModule;

use jayk_core::ModuleCatalog;

/// Catalog of every built-in module, keyed by the identifier a
/// configuration's `path` (or module name) selects
pub fn builtin_catalog() -> ModuleCatalog {
    ModuleCatalog::new()
        .with("convert", ConvertModule::create)
        .with("hashbot", HashModule::create)
        .with("help", HelpModule::create)
        .with("linkbot", LinkModule::create)
        .with("magic8", Magic8Module::create)
        .with("rtd", RtdModule::create)
        .with("whatbot", WhatModule::create)
        .with("wordbot", WordModule::create)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jayk_core::ModuleParams;
    use serde_json::json;

    #[test]
    fn test_builtin_catalog_ids() {
        assert_eq!(
            builtin_catalog().ids(),
            vec!["convert", "hashbot", "help", "linkbot", "magic8", "rtd", "whatbot", "wordbot"]
        );
    }

    #[tokio::test]
    async fn test_builtin_modules_build_with_defaults() {
        let catalog = builtin_catalog();
        for id in catalog.ids() {
            let params = ModuleParams::new(id, testing::rooms(&["#x"]), serde_json::Value::Null);
            let module = catalog.create(id, &params).unwrap();
            assert!(module.rooms().contains("#x"), "{} lost its rooms", id);
        }
    }

    #[tokio::test]
    async fn test_sample_config_builds() {
        let config = jayk_core::BotConfig::from_toml(include_str!("../../demos/bots.toml")).unwrap();
        config.validate().unwrap();

        let catalog = builtin_catalog();
        let server = &config.servers[0];
        for (name, module) in &server.modules {
            let built = catalog.create(module.factory_id(name), &module.to_params(name));
            assert!(built.is_ok(), "{} failed to build", name);
        }
        assert_eq!(server.modules["dice"].factory_id("dice"), "rtd");
    }

    #[test]
    fn test_bad_params_rejected() {
        let params = ModuleParams::new("rtd", testing::rooms(&["#x"]), json!({"max_dice": "lots"}));
        assert!(builtin_catalog().create("rtd", &params).is_err());
    }
}
