//! ## kretslab-core::graph
//! **Port-to-port topology between device instances**
//!
//! Connections are undirected and reference instances by id only. The graph
//! validates every link against the registry and a fixed compatibility table,
//! tolerates cycles, and answers `neighbors` queries for pin resolution.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::devices::{DataEncoding, DeviceRegistry, PortDef, SignalKind};
use crate::error::GraphError;

/// One side of a connection.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Endpoint {
    pub instance: String,
    pub port: String,
}

impl Endpoint {
    pub fn new(instance: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
            port: port.into(),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.instance, self.port)
    }
}

impl FromStr for Endpoint {
    type Err = String;

    /// Parses `instance.port`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('.') {
            Some((instance, port)) if !instance.is_empty() && !port.is_empty() => {
                Ok(Endpoint::new(instance, port))
            }
            _ => Err(format!("expected `instance.port`, got {:?}", s)),
        }
    }
}

/// Opaque connection reference.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A validated link between two ports.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub id: ConnectionId,
    pub a: Endpoint,
    pub b: Endpoint,
}

impl Connection {
    fn touches(&self, endpoint: &Endpoint) -> bool {
        &self.a == endpoint || &self.b == endpoint
    }

    fn links(&self, x: &Endpoint, y: &Endpoint) -> bool {
        (&self.a == x && &self.b == y) || (&self.a == y && &self.b == x)
    }

    /// The endpoint opposite `endpoint`, if this connection touches it.
    fn other(&self, endpoint: &Endpoint) -> Option<&Endpoint> {
        if &self.a == endpoint {
            Some(&self.b)
        } else if &self.b == endpoint {
            Some(&self.a)
        } else {
            None
        }
    }
}

/// How many connections an `input`-kind port may carry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FanInPolicy {
    /// A second connection into a connected input port is rejected.
    #[default]
    Reject,
    /// Inputs may be driven by several ports.
    Allow,
}

impl FromStr for FanInPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "reject" => Ok(FanInPolicy::Reject),
            "allow" => Ok(FanInPolicy::Allow),
            other => Err(format!("unknown fan-in policy: {}", other)),
        }
    }
}

/// Fixed compatibility table.
///
/// Rails never connect to rails. A rail may feed any signal pin. Signal pins
/// connect when their encodings match or either side is encoding-agnostic.
pub fn ports_compatible(a: &PortDef, b: &PortDef) -> bool {
    match (a.kind.is_rail(), b.kind.is_rail()) {
        (true, true) => false,
        (true, false) | (false, true) => true,
        (false, false) => encodings_compatible(a.encoding, b.encoding),
    }
}

fn encodings_compatible(a: Option<DataEncoding>, b: Option<DataEncoding>) -> bool {
    match (a, b) {
        (Some(x), Some(y)) => x == y,
        _ => true,
    }
}

/// Connection topology.
#[derive(Debug, Default)]
pub struct ConnectionGraph {
    connections: BTreeMap<ConnectionId, Connection>,
    next_id: u64,
    fan_in: FanInPolicy,
}

impl ConnectionGraph {
    pub fn new(fan_in: FanInPolicy) -> Self {
        Self {
            connections: BTreeMap::new(),
            next_id: 1,
            fan_in,
        }
    }

    pub fn fan_in_policy(&self) -> FanInPolicy {
        self.fan_in
    }

    /// Validates and records a link between `a` and `b`.
    pub fn connect(
        &mut self,
        registry: &DeviceRegistry,
        a: Endpoint,
        b: Endpoint,
    ) -> Result<ConnectionId, GraphError> {
        if a == b {
            return Err(GraphError::SelfLoop {
                instance: a.instance,
                port: a.port,
            });
        }

        let port_a = resolve_port(registry, &a)?;
        let port_b = resolve_port(registry, &b)?;

        if !ports_compatible(port_a, port_b) {
            return Err(GraphError::IncompatiblePorts {
                a: a.to_string(),
                a_kind: port_a.kind,
                b: b.to_string(),
                b_kind: port_b.kind,
            });
        }

        if self.connections.values().any(|c| c.links(&a, &b)) {
            return Err(GraphError::DuplicateConnection {
                a: a.to_string(),
                b: b.to_string(),
            });
        }

        if self.fan_in == FanInPolicy::Reject {
            for (endpoint, port) in [(&a, port_a), (&b, port_b)] {
                if port.kind == SignalKind::Input && self.degree(endpoint) > 0 {
                    return Err(GraphError::PortOccupied {
                        instance: endpoint.instance.clone(),
                        port: endpoint.port.clone(),
                    });
                }
            }
        }

        let id = ConnectionId(self.next_id.max(1));
        self.next_id = id.0 + 1;
        debug!(%id, %a, %b, "ports connected");
        self.connections.insert(id, Connection { id, a, b });
        Ok(id)
    }

    pub fn disconnect(&mut self, id: ConnectionId) -> Result<Connection, GraphError> {
        let connection = self
            .connections
            .remove(&id)
            .ok_or(GraphError::ConnectionNotFound(id.0))?;
        debug!(%id, "ports disconnected");
        Ok(connection)
    }

    /// Drops every connection touching `instance`. Returns the removed ids.
    pub fn remove_instance(&mut self, instance: &str) -> Vec<ConnectionId> {
        let doomed: Vec<ConnectionId> = self
            .connections
            .values()
            .filter(|c| c.a.instance == instance || c.b.instance == instance)
            .map(|c| c.id)
            .collect();
        for id in &doomed {
            self.connections.remove(id);
        }
        doomed
    }

    /// Endpoints directly linked to `instance.port`, in creation order.
    pub fn neighbors(&self, instance: &str, port: &str) -> Vec<Endpoint> {
        let origin = Endpoint::new(instance, port);
        self.connections
            .values()
            .filter_map(|c| c.other(&origin).cloned())
            .collect()
    }

    /// Number of connections carried by `endpoint`.
    pub fn degree(&self, endpoint: &Endpoint) -> usize {
        self.connections.values().filter(|c| c.touches(endpoint)).count()
    }

    pub fn get(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Connection> {
        self.connections.values()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

fn resolve_port<'r>(
    registry: &'r DeviceRegistry,
    endpoint: &Endpoint,
) -> Result<&'r PortDef, GraphError> {
    registry
        .get(&endpoint.instance)
        .and_then(|instance| instance.template().port(&endpoint.port))
        .ok_or_else(|| GraphError::NotFound {
            instance: endpoint.instance.clone(),
            port: endpoint.port.clone(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::{DeviceClass, DeviceTemplate, PortDef};
    use proptest::prelude::*;
    use std::sync::Arc;

    fn board() -> Arc<DeviceTemplate> {
        Arc::new(DeviceTemplate::new(
            "board",
            DeviceClass::Controller,
            vec![
                PortDef::new("vcc", SignalKind::Power, None),
                PortDef::new("gnd", SignalKind::Ground, None),
                PortDef::new("d13", SignalKind::Output, Some(DataEncoding::Digital)),
                PortDef::new("a0", SignalKind::Input, Some(DataEncoding::Analog)),
                PortDef::new("tx", SignalKind::Output, Some(DataEncoding::Uart)),
            ],
        ))
    }

    fn led() -> Arc<DeviceTemplate> {
        Arc::new(DeviceTemplate::new(
            "led",
            DeviceClass::Actuator,
            vec![
                PortDef::new("anode", SignalKind::Input, None),
                PortDef::new("cathode", SignalKind::Ground, None),
            ],
        ))
    }

    fn setup() -> (DeviceRegistry, ConnectionGraph) {
        let mut registry = DeviceRegistry::new();
        registry.add(board(), "uno-1").unwrap();
        registry.add(board(), "uno-2").unwrap();
        registry.add(led(), "led-1").unwrap();
        registry.add(led(), "led-2").unwrap();
        (registry, ConnectionGraph::new(FanInPolicy::Reject))
    }

    fn ep(s: &str) -> Endpoint {
        s.parse().unwrap()
    }

    #[test]
    fn connects_output_to_agnostic_input() {
        let (registry, mut graph) = setup();
        let id = graph.connect(&registry, ep("uno-1.d13"), ep("led-1.anode")).unwrap();
        assert_eq!(graph.neighbors("uno-1", "d13"), vec![ep("led-1.anode")]);
        assert_eq!(graph.neighbors("led-1", "anode"), vec![ep("uno-1.d13")]);
        assert_eq!(graph.get(id).unwrap().a, ep("uno-1.d13"));
    }

    #[test]
    fn missing_endpoint_is_not_found() {
        let (registry, mut graph) = setup();
        assert_eq!(
            graph.connect(&registry, ep("uno-1.d99"), ep("led-1.anode")),
            Err(GraphError::NotFound {
                instance: "uno-1".into(),
                port: "d99".into()
            })
        );
        assert!(matches!(
            graph.connect(&registry, ep("ghost.anode"), ep("uno-1.d13")),
            Err(GraphError::NotFound { .. })
        ));
    }

    #[test]
    fn rails_do_not_connect_to_rails() {
        let (registry, mut graph) = setup();
        assert!(matches!(
            graph.connect(&registry, ep("uno-1.vcc"), ep("uno-2.vcc")),
            Err(GraphError::IncompatiblePorts { .. })
        ));
        assert!(matches!(
            graph.connect(&registry, ep("uno-1.gnd"), ep("led-1.cathode")),
            Err(GraphError::IncompatiblePorts { .. })
        ));
        assert!(matches!(
            graph.connect(&registry, ep("uno-1.vcc"), ep("uno-2.gnd")),
            Err(GraphError::IncompatiblePorts { .. })
        ));
    }

    #[test]
    fn mismatched_encodings_are_incompatible() {
        let (registry, mut graph) = setup();
        assert!(matches!(
            graph.connect(&registry, ep("uno-1.tx"), ep("uno-2.a0")),
            Err(GraphError::IncompatiblePorts { .. })
        ));
    }

    #[test]
    fn duplicate_in_either_direction() {
        let (registry, mut graph) = setup();
        graph.connect(&registry, ep("uno-1.d13"), ep("led-1.anode")).unwrap();
        assert!(matches!(
            graph.connect(&registry, ep("led-1.anode"), ep("uno-1.d13")),
            Err(GraphError::DuplicateConnection { .. })
        ));
    }

    #[test]
    fn input_fan_in_follows_policy() {
        let (registry, mut graph) = setup();
        graph.connect(&registry, ep("uno-1.d13"), ep("led-1.anode")).unwrap();
        assert_eq!(
            graph.connect(&registry, ep("uno-2.d13"), ep("led-1.anode")),
            Err(GraphError::PortOccupied {
                instance: "led-1".into(),
                port: "anode".into()
            })
        );

        let mut permissive = ConnectionGraph::new(FanInPolicy::Allow);
        permissive.connect(&registry, ep("uno-1.d13"), ep("led-1.anode")).unwrap();
        permissive.connect(&registry, ep("uno-2.d13"), ep("led-1.anode")).unwrap();
        assert_eq!(permissive.degree(&ep("led-1.anode")), 2);
    }

    #[test]
    fn outputs_fan_out() {
        let (registry, mut graph) = setup();
        graph.connect(&registry, ep("uno-1.d13"), ep("led-1.anode")).unwrap();
        graph.connect(&registry, ep("uno-1.d13"), ep("led-2.anode")).unwrap();
        assert_eq!(
            graph.neighbors("uno-1", "d13"),
            vec![ep("led-1.anode"), ep("led-2.anode")]
        );
    }

    #[test]
    fn disconnect_and_cascade() {
        let (registry, mut graph) = setup();
        let first = graph.connect(&registry, ep("uno-1.d13"), ep("led-1.anode")).unwrap();
        graph.connect(&registry, ep("uno-1.d13"), ep("led-2.anode")).unwrap();

        graph.disconnect(first).unwrap();
        assert_eq!(
            graph.disconnect(first),
            Err(GraphError::ConnectionNotFound(first.get()))
        );

        let removed = graph.remove_instance("uno-1");
        assert_eq!(removed.len(), 1);
        assert!(graph.is_empty());
    }

    #[test]
    fn cycles_are_tolerated() {
        let (registry, _) = setup();
        let mut graph = ConnectionGraph::new(FanInPolicy::Allow);
        graph.connect(&registry, ep("uno-2.d13"), ep("uno-1.d13")).unwrap();
        graph.connect(&registry, ep("uno-1.d13"), ep("led-1.anode")).unwrap();
        graph.connect(&registry, ep("led-1.anode"), ep("uno-2.d13")).unwrap();
        assert_eq!(graph.len(), 3);
        assert_eq!(graph.neighbors("led-1", "anode").len(), 2);
        assert!(matches!(
            graph.connect(&registry, ep("uno-2.tx"), ep("uno-1.d13")),
            Err(GraphError::IncompatiblePorts { .. })
        ));
    }

    #[test]
    fn endpoint_parsing() {
        assert_eq!(ep("led-1.anode"), Endpoint::new("led-1", "anode"));
        assert!("led-1".parse::<Endpoint>().is_err());
        assert!(".anode".parse::<Endpoint>().is_err());
    }

    fn any_kind() -> impl Strategy<Value = SignalKind> {
        prop_oneof![
            Just(SignalKind::Power),
            Just(SignalKind::Ground),
            Just(SignalKind::Input),
            Just(SignalKind::Output),
            Just(SignalKind::Data),
        ]
    }

    fn any_class() -> impl Strategy<Value = DeviceClass> {
        prop_oneof![
            Just(DeviceClass::Sensor),
            Just(DeviceClass::Actuator),
            Just(DeviceClass::Controller),
            Just(DeviceClass::Display),
            Just(DeviceClass::Communication),
        ]
    }

    proptest! {
        #[test]
        fn power_to_power_is_always_incompatible(class_a in any_class(), class_b in any_class()) {
            let mut registry = DeviceRegistry::new();
            let a = DeviceTemplate::new("a", class_a, vec![PortDef::new("vcc", SignalKind::Power, None)]);
            let b = DeviceTemplate::new("b", class_b, vec![PortDef::new("vcc", SignalKind::Power, None)]);
            registry.add(Arc::new(a), "a-1").unwrap();
            registry.add(Arc::new(b), "b-1").unwrap();
            let mut graph = ConnectionGraph::new(FanInPolicy::Allow);
            let result = graph.connect(&registry, ep("a-1.vcc"), ep("b-1.vcc"));
            prop_assert!(
                matches!(result, Err(GraphError::IncompatiblePorts { .. })),
                "expected IncompatiblePorts, got {:?}",
                result
            );
        }

        #[test]
        fn self_loop_is_always_rejected(
            kind in any_kind(),
            class in any_class(),
            instance in "[a-z][a-z0-9-]{0,8}",
            port in "[a-z0-9]{1,6}",
            registered in any::<bool>(),
        ) {
            let mut registry = DeviceRegistry::new();
            if registered {
                let template = DeviceTemplate::new("t", class, vec![PortDef::new(port.clone(), kind, None)]);
                registry.add(Arc::new(template), instance.clone()).unwrap();
            }
            let mut graph = ConnectionGraph::new(FanInPolicy::Reject);
            let result = graph.connect(
                &registry,
                Endpoint::new(instance.clone(), port.clone()),
                Endpoint::new(instance, port),
            );
            prop_assert!(
                matches!(result, Err(GraphError::SelfLoop { .. })),
                "expected SelfLoop, got {:?}",
                result
            );
        }
    }
}
