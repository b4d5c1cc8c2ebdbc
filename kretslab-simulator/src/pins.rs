//! Pin references and their resolution through the connection graph.
//!
//! Scripts name pins the Arduino way: a bare number is a digital pin (`13`
//! maps to port `d13`, falling back to a port literally named `13`), and a
//! string such as `"A0"` names a port by id, case-insensitively.

use std::fmt;

use kretslab_core::devices::DeviceRegistry;
use kretslab_core::graph::{ConnectionGraph, Endpoint};
use kretslab_script::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PinRef {
    Digital(u32),
    Named { port: String, label: String },
}

impl PinRef {
    /// `None` for values that cannot name a pin (negative, fractional, empty).
    pub fn from_value(value: &Value) -> Option<PinRef> {
        match value {
            Value::Number(n) if n.is_finite() && *n >= 0.0 && n.fract() == 0.0 => {
                u32::try_from(*n as u64).ok().map(PinRef::Digital)
            }
            Value::Str(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    return None;
                }
                if let Ok(n) = trimmed.parse::<u32>() {
                    return Some(PinRef::Digital(n));
                }
                Some(PinRef::Named {
                    port: trimmed.to_ascii_lowercase(),
                    label: trimmed.to_string(),
                })
            }
            _ => None,
        }
    }

    /// Port ids to try on a board, most specific first.
    pub fn port_candidates(&self) -> Vec<String> {
        match self {
            PinRef::Digital(n) => vec![format!("d{}", n), n.to_string()],
            PinRef::Named { port, .. } => vec![port.clone()],
        }
    }
}

impl fmt::Display for PinRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PinRef::Digital(n) => write!(f, "{}", n),
            PinRef::Named { label, .. } => f.write_str(label),
        }
    }
}

/// Label used in console messages, also for values that are not pins.
pub fn pin_label(value: Option<&Value>) -> String {
    match value.and_then(PinRef::from_value) {
        Some(pin) => pin.to_string(),
        None => value.map(Value::to_string).unwrap_or_else(|| "null".into()),
    }
}

/// Endpoints wired to `pin` on any of `boards`, in board order then
/// connection order, without duplicates. Empty when nothing resolves.
pub fn resolve(
    registry: &DeviceRegistry,
    graph: &ConnectionGraph,
    boards: &[String],
    pin: &PinRef,
) -> Vec<Endpoint> {
    let candidates = pin.port_candidates();
    let mut found: Vec<Endpoint> = Vec::new();

    for board in boards {
        let Some(instance) = registry.get(board) else {
            continue;
        };
        let Some(port) = candidates
            .iter()
            .find(|c| instance.template().port(c).is_some())
        else {
            continue;
        };
        for endpoint in graph.neighbors(board, port) {
            if !found.contains(&endpoint) {
                found.push(endpoint);
            }
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use kretslab_core::devices::DeviceCatalog;
    use kretslab_core::graph::FanInPolicy;

    fn bench() -> (DeviceRegistry, ConnectionGraph) {
        let catalog = DeviceCatalog::builtin().unwrap();
        let mut registry = DeviceRegistry::new();
        registry.add(catalog.get("arduino-uno").unwrap(), "uno-1").unwrap();
        registry.add(catalog.get("led").unwrap(), "led-1").unwrap();
        registry.add(catalog.get("temp-sensor").unwrap(), "temp-1").unwrap();
        let mut graph = ConnectionGraph::new(FanInPolicy::Reject);
        graph
            .connect(&registry, Endpoint::new("uno-1", "d13"), Endpoint::new("led-1", "anode"))
            .unwrap();
        graph
            .connect(&registry, Endpoint::new("uno-1", "a0"), Endpoint::new("temp-1", "data"))
            .unwrap();
        (registry, graph)
    }

    #[test]
    fn numbers_and_names_parse() {
        assert_eq!(PinRef::from_value(&Value::Number(13.0)), Some(PinRef::Digital(13)));
        assert_eq!(PinRef::from_value(&Value::Str("7".into())), Some(PinRef::Digital(7)));
        assert_eq!(
            PinRef::from_value(&Value::Str("A0".into())),
            Some(PinRef::Named {
                port: "a0".into(),
                label: "A0".into()
            })
        );
        assert_eq!(PinRef::from_value(&Value::Number(-1.0)), None);
        assert_eq!(PinRef::from_value(&Value::Number(1.5)), None);
        assert_eq!(PinRef::from_value(&Value::Null), None);
    }

    #[test]
    fn resolves_through_the_board() {
        let (registry, graph) = bench();
        let boards = vec!["uno-1".to_string()];

        let led = resolve(&registry, &graph, &boards, &PinRef::Digital(13));
        assert_eq!(led, vec![Endpoint::new("led-1", "anode")]);

        let analog = PinRef::from_value(&Value::Str("A0".into())).unwrap();
        let temp = resolve(&registry, &graph, &boards, &analog);
        assert_eq!(temp, vec![Endpoint::new("temp-1", "data")]);
    }

    #[test]
    fn unconnected_and_unknown_pins_resolve_to_nothing() {
        let (registry, graph) = bench();
        let boards = vec!["uno-1".to_string(), "ghost".to_string()];
        assert!(resolve(&registry, &graph, &boards, &PinRef::Digital(12)).is_empty());
        assert!(resolve(&registry, &graph, &boards, &PinRef::Digital(99)).is_empty());
    }

    #[test]
    fn labels() {
        assert_eq!(pin_label(Some(&Value::Number(13.0))), "13");
        assert_eq!(pin_label(Some(&Value::Str("A0".into()))), "A0");
        assert_eq!(pin_label(None), "null");
    }
}
