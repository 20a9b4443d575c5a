//! Unit Conversion Module
//!
//! `!convert X UNIT to UNIT` converts between units of the same kind. With
//! `interject` set, quantities mentioned in passing are converted to their
//! usual counterpart (feet to meters, Celsius to Fahrenheit and so on).

use jayk_core::{CommandSet, Context, Module, ModuleParams, Result};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::fmt;

lazy_static! {
    static ref CONVERT_RE: Regex =
        Regex::new(r"^(?P<x>[+-]?[0-9]+(\.[0-9]+)?) ?(?P<from>[a-zA-Z/_]+) to (?P<to>[a-zA-Z/_]+)").unwrap();
    static ref PASSIVE_RE: Regex = Regex::new(r"(?P<x>[+-]?[0-9]+(\.[0-9]+)?) ?(?P<unit>[a-zA-Z/_]+)").unwrap();
}

const USAGE: &str = "Syntax is `!convert X UNIT_A to UNIT_B`";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dimension {
    Distance,
    Area,
    Mass,
    Temperature,
    Speed,
    Volume,
    Time,
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Dimension::Distance => "distance",
            Dimension::Area => "area",
            Dimension::Mass => "mass",
            Dimension::Temperature => "temperature",
            Dimension::Speed => "speed",
            Dimension::Volume => "volume",
            Dimension::Time => "time",
        };
        write!(f, "{}", name)
    }
}

/// A unit, as a linear map onto its dimension's base unit
#[derive(Debug, PartialEq)]
pub struct Unit {
    pub name: &'static str,
    pub dimension: Dimension,
    aliases: &'static [&'static str],
    scale: f64,
    offset: f64,
}

impl Unit {
    const fn new(
        name: &'static str,
        dimension: Dimension,
        aliases: &'static [&'static str],
        scale: f64,
    ) -> Self {
        Self {
            name,
            dimension,
            aliases,
            scale,
            offset: 0.0,
        }
    }

    const fn offset(mut self, offset: f64) -> Self {
        self.offset = offset;
        self
    }

    fn to_base(&self, value: f64) -> f64 {
        value * self.scale + self.offset
    }

    fn from_base(&self, value: f64) -> f64 {
        (value - self.offset) / self.scale
    }
}

use Dimension::*;

static UNITS: &[Unit] = &[
    // Distance, in meters
    Unit::new("mm", Distance, &["mm", "millimeter", "millimetre"], 0.001),
    Unit::new("cm", Distance, &["cm", "centimeter", "centimetre"], 0.01),
    Unit::new("m", Distance, &["m", "meter", "metre"], 1.0),
    Unit::new("km", Distance, &["km", "kilometer", "kilometre"], 1000.0),
    Unit::new("inch", Distance, &["inch", "inches", "in"], 0.0254),
    Unit::new("ft", Distance, &["ft", "foot", "feet"], 0.3048),
    Unit::new("yd", Distance, &["yd", "yard"], 0.9144),
    Unit::new("mi", Distance, &["mi", "mile"], 1609.344),
    Unit::new("nmi", Distance, &["nmi", "nautical_mile"], 1852.0),
    // Area, in square meters; `sq_` names are resolved through the distance units
    Unit::new("sq_mm", Area, &[], 1e-6),
    Unit::new("sq_cm", Area, &[], 1e-4),
    Unit::new("sq_m", Area, &[], 1.0),
    Unit::new("sq_km", Area, &[], 1e6),
    Unit::new("sq_inch", Area, &[], 0.000_645_16),
    Unit::new("sq_ft", Area, &[], 0.092_903_04),
    Unit::new("sq_yd", Area, &[], 0.836_127_36),
    Unit::new("sq_mi", Area, &[], 2_589_988.110_336),
    Unit::new("acre", Area, &["acre"], 4046.856_422_4),
    Unit::new("ha", Area, &["ha", "hectare"], 10_000.0),
    // Mass, in grams
    Unit::new("mg", Mass, &["mg", "milligram"], 0.001),
    Unit::new("g", Mass, &["g", "gram", "gramme"], 1.0),
    Unit::new("kg", Mass, &["kg", "kilogram", "kilo"], 1000.0),
    Unit::new("oz", Mass, &["oz", "ounce"], 28.349_523_125),
    Unit::new("lb", Mass, &["lb", "lbs", "pound"], 453.592_37),
    Unit::new("st", Mass, &["st", "stone"], 6350.293_18),
    Unit::new("t", Mass, &["t", "tonne", "metric_ton"], 1e6),
    // Temperature, in kelvin
    Unit::new("c", Temperature, &["c", "celsius", "centigrade", "degc"], 1.0).offset(273.15),
    Unit::new("f", Temperature, &["f", "fahrenheit", "degf"], 5.0 / 9.0).offset(459.67 * 5.0 / 9.0),
    Unit::new("k", Temperature, &["k", "kelvin"], 1.0),
    // Speed, in meters per second
    Unit::new("m/s", Speed, &["m/s", "mps"], 1.0),
    Unit::new("km/h", Speed, &["km/h", "km/hr", "km/hour", "kph", "kmh"], 1.0 / 3.6),
    Unit::new("mph", Speed, &["mph", "mi/h", "mi/hr", "mi/hour"], 0.447_04),
    Unit::new("kt", Speed, &["kt", "knot", "kn"], 1852.0 / 3600.0),
    Unit::new("ft/s", Speed, &["ft/s", "fps"], 0.3048),
    // Volume, in liters
    Unit::new("ml", Volume, &["ml", "milliliter", "millilitre"], 0.001),
    Unit::new("l", Volume, &["l", "liter", "litre"], 1.0),
    Unit::new("cu_m", Volume, &["cu_m", "cubic_meter", "cubic_metre"], 1000.0),
    Unit::new("gal", Volume, &["gal", "gallon", "us_gal"], 3.785_411_784),
    Unit::new("qt", Volume, &["qt", "quart"], 0.946_352_946),
    Unit::new("pt", Volume, &["pt", "pint"], 0.473_176_473),
    Unit::new("cup", Volume, &["cup"], 0.236_588_236_5),
    Unit::new("fl_oz", Volume, &["fl_oz", "floz", "fluid_ounce"], 0.029_573_529_562_5),
    Unit::new("tbsp", Volume, &["tbsp", "tablespoon"], 0.014_786_764_781_25),
    Unit::new("tsp", Volume, &["tsp", "teaspoon"], 0.004_928_921_593_75),
    // Time, in seconds
    Unit::new("ms", Time, &["ms", "millisecond"], 0.001),
    Unit::new("s", Time, &["s", "sec", "second"], 1.0),
    Unit::new("min", Time, &["min", "minute"], 60.0),
    Unit::new("hr", Time, &["h", "hr", "hour"], 3600.0),
    Unit::new("day", Time, &["d", "day"], 86_400.0),
    Unit::new("week", Time, &["wk", "week"], 604_800.0),
    Unit::new("year", Time, &["yr", "year"], 31_557_600.0),
];

/// Usual counterpart of a unit when converting in passing
const PASSIVE_CONVERSIONS: &[(&str, &str)] = &[
    ("ft", "m"),
    ("m", "ft"),
    ("inch", "cm"),
    ("cm", "inch"),
    ("mm", "inch"),
    ("yd", "m"),
    ("mi", "km"),
    ("km", "mi"),
    ("mph", "km/h"),
    ("km/h", "mph"),
    ("c", "f"),
    ("f", "c"),
    ("kg", "lb"),
    ("lb", "kg"),
    ("oz", "g"),
    ("g", "oz"),
    ("mg", "oz"),
];

/// Too common as a plain word to be read as a unit in passing
const PASSIVE_SKIP: &[&str] = &["in"];

fn by_name(name: &str) -> Option<&'static Unit> {
    UNITS.iter().find(|unit| unit.name == name)
}

fn by_alias(alias: &str) -> Option<&'static Unit> {
    UNITS.iter().find(|unit| unit.aliases.iter().any(|a| *a == alias))
}

/// Resolve a unit as written by a user
pub fn lookup(raw: &str) -> Option<&'static Unit> {
    let name = raw.to_ascii_lowercase();

    let square = name
        .strip_prefix("sq_")
        .or_else(|| name.strip_prefix("sq").filter(|rest| !rest.is_empty()));
    if let Some(side) = square {
        let side = lookup(side).filter(|unit| unit.dimension == Distance)?;
        return by_name(&format!("sq_{}", side.name));
    }

    by_alias(&name).or_else(|| {
        name.strip_suffix('s')
            .filter(|stem| !stem.is_empty())
            .and_then(by_alias)
    })
}

/// Why a conversion could not be done
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConvertError {
    UnknownUnit(String),
    Incompatible(&'static str, &'static str),
}

impl fmt::Display for ConvertError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConvertError::UnknownUnit(unit) => write!(f, "Unknown unit '{}'", unit),
            ConvertError::Incompatible(from, to) => write!(
                f,
                "Cannot convert {} to {}. Are you sure your units are compatible?",
                from, to
            ),
        }
    }
}

/// Convert `value` between two units given by name
pub fn convert(value: f64, from: &str, to: &str) -> std::result::Result<(f64, &'static Unit, &'static Unit), ConvertError> {
    let from = lookup(from).ok_or_else(|| ConvertError::UnknownUnit(from.to_string()))?;
    let to = lookup(to).ok_or_else(|| ConvertError::UnknownUnit(to.to_string()))?;
    if from.dimension != to.dimension {
        return Err(ConvertError::Incompatible(from.name, to.name));
    }
    Ok((to.from_base(from.to_base(value)), from, to))
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConvertConfig {
    /// Convert quantities mentioned in ordinary messages
    pub interject: bool,
}

pub struct ConvertModule {
    rooms: BTreeSet<String>,
    commands: CommandSet<ConvertModule>,
    config: ConvertConfig,
}

impl ConvertModule {
    pub fn new(rooms: BTreeSet<String>, config: ConvertConfig) -> Self {
        Self {
            rooms,
            commands: CommandSet::new().register("!convert", ConvertModule::convert),
            config,
        }
    }

    pub fn create(params: &ModuleParams) -> Result<Box<dyn Module>> {
        Ok(Box::new(Self::new(params.rooms.clone(), params.parse()?)))
    }

    fn convert(&mut self, ctx: &Context<'_>) -> Result<()> {
        let query = ctx.arg_words().join(" ");
        let Some(caps) = CONVERT_RE.captures(&query) else {
            ctx.reply(USAGE);
            return Ok(());
        };
        let Ok(value) = caps["x"].parse::<f64>() else {
            ctx.reply(USAGE);
            return Ok(());
        };

        match convert(value, &caps["from"], &caps["to"]) {
            Ok((result, from, to)) => ctx.say(&format!("{:.2} {} = {:.2} {}", value, from.name, result, to.name)),
            Err(e) => ctx.reply(&e.to_string()),
        }
        Ok(())
    }

    /// Conversion of the first recognised quantity in `text`, if any
    fn interjection(text: &str) -> Option<String> {
        let caps = PASSIVE_RE.captures(text)?;
        let unit_name = caps["unit"].to_ascii_lowercase();
        if PASSIVE_SKIP.iter().any(|skip| *skip == unit_name) {
            return None;
        }
        let value: f64 = caps["x"].parse().ok()?;
        let unit = lookup(&unit_name)?;
        let (_, target) = PASSIVE_CONVERSIONS.iter().find(|(from, _)| *from == unit.name)?;

        match convert(value, unit.name, target) {
            Ok((result, from, to)) => Some(format!("{:.2} {} = {:.2} {}", value, from.name, result, to.name)),
            Err(e) => {
                tracing::error!("Could not convert {} {} to {}: {}", value, unit.name, target, e);
                None
            }
        }
    }
}

impl Module for ConvertModule {
    fn name(&self) -> &str {
        "Convert"
    }

    fn author(&self) -> &str {
        "intercal"
    }

    fn about(&self) -> &str {
        "Use `!convert X UNIT_A to UNIT_B` to convert X number of UNIT_A to UNIT_B."
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
        self.config.interject
    }

    fn on_message(&mut self, ctx: &Context<'_>) -> Result<()> {
        if let Some(line) = Self::interjection(ctx.text) {
            ctx.say(&line);
        }
        Ok(())
    }

    fn on_update_params(&mut self, params: &ModuleParams) -> Result<()> {
        self.config = params.parse()?;
        tracing::debug!("Convert interjection {}", if self.config.interject { "on" } else { "off" });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{alice, context, drain, rooms};
    use jayk_core::ClientHandle;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn test_lookup_aliases() {
        assert_eq!(lookup("Feet").map(|u| u.name), Some("ft"));
        assert_eq!(lookup("inches").map(|u| u.name), Some("inch"));
        assert_eq!(lookup("miles").map(|u| u.name), Some("mi"));
        assert_eq!(lookup("km/h").map(|u| u.name), Some("km/h"));
        assert_eq!(lookup("lbs").map(|u| u.name), Some("lb"));
        assert_eq!(lookup("sqft").map(|u| u.name), Some("sq_ft"));
        assert_eq!(lookup("sq_miles").map(|u| u.name), Some("sq_mi"));
        assert_eq!(lookup("sqkg"), None);
        assert_eq!(lookup("furlongs"), None);
    }

    #[test]
    fn test_conversions() {
        let (value, _, _) = convert(212.0, "f", "c").unwrap();
        assert!(approx(value, 100.0));
        let (value, _, _) = convert(-40.0, "celsius", "fahrenheit").unwrap();
        assert!(approx(value, -40.0));
        let (value, _, _) = convert(1.0, "mi", "km").unwrap();
        assert!(approx(value, 1.609344));
        let (value, _, _) = convert(1.0, "sq_ft", "sq_inch").unwrap();
        assert!(approx(value, 144.0));
        let (value, _, _) = convert(2.0, "hours", "minutes").unwrap();
        assert!(approx(value, 120.0));

        assert_eq!(
            convert(1.0, "ft", "kg").unwrap_err(),
            ConvertError::Incompatible("ft", "kg")
        );
        assert_eq!(
            convert(1.0, "ft", "smoots").unwrap_err(),
            ConvertError::UnknownUnit("smoots".to_string())
        );
    }

    #[test]
    fn test_convert_command() {
        let (client, mut outbound, _timers) = ClientHandle::detached();
        let mut module = ConvertModule::new(rooms(&["#x"]), ConvertConfig::default());
        let sender = alice();

        for text in ["!convert 5 ft to m", "!convert 100km/h to mph", "!convert lots", "!convert 3 ft to kg"] {
            module.on_command(&context(&client, "convert", &sender, text, true)).unwrap();
        }

        assert_eq!(
            drain(&mut outbound),
            vec![
                "PRIVMSG #x :5.00 ft = 1.52 m".to_string(),
                "PRIVMSG #x :100.00 km/h = 62.14 mph".to_string(),
                format!("PRIVMSG #x :alice: {}", USAGE),
                "PRIVMSG #x :alice: Cannot convert ft to kg. Are you sure your units are compatible?".to_string(),
            ]
        );
    }

    #[test]
    fn test_interjection() {
        assert_eq!(
            ConvertModule::interjection("it is 30 C outside").as_deref(),
            Some("30.00 c = 86.00 f")
        );
        assert_eq!(
            ConvertModule::interjection("I ran 10km today").as_deref(),
            Some("10.00 km = 6.21 mi")
        );
        assert_eq!(ConvertModule::interjection("I have 5 in my pocket"), None);
        assert_eq!(ConvertModule::interjection("wait 5 minutes"), None);
        assert_eq!(ConvertModule::interjection("no numbers here"), None);
    }

    #[test]
    fn test_interject_is_opt_in() {
        let mut module = ConvertModule::new(rooms(&["#x"]), ConvertConfig::default());
        assert!(!module.handles_all_messages());

        let params = ModuleParams::new("convert", rooms(&["#x"]), serde_json::json!({"interject": true}));
        module.update_config(&params).unwrap();
        assert!(module.handles_all_messages());
    }
}
