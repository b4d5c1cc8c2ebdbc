//! # Virtual Hardware API
//!
//! [`HardwareBus`] is the [`Host`] a running script talks to. It borrows the
//! session's devices, wiring, console, clock and noise source for the length
//! of one routine invocation.
//!
//! Pin operations resolve through the active boards' ports to the devices
//! wired there. A pin that resolves to nothing is not an error: writes only
//! log, reads return a default (LOW, or a random analog value).
//!
//! Every call that touches a pin or a device logs one console line. The
//! timing and random utilities (`millis`, `random`, `Math.random`) do not.

use tracing::{debug, trace};

use kretslab_core::console::{ConsoleKind, ConsoleSink};
use kretslab_core::devices::{DeviceClass, DeviceInstance, DeviceRegistry};
use kretslab_core::graph::ConnectionGraph;
use kretslab_core::time::VirtualClock;
use kretslab_core::value::{format_number, PropertyValue};
use kretslab_script::{CallTarget, Host, HostError, Value};
use kretslab_telemetry::MetricsRecorder;

use crate::emulation::Emulation;
use crate::pins::{self, PinRef};

pub const HIGH: f64 = 1.0;
pub const LOW: f64 = 0.0;
pub const WL_CONNECTED: f64 = 3.0;
pub const WL_DISCONNECTED: f64 = 6.0;
const ANALOG_MAX: i64 = 1023;

/// Host functions the bus answers, as `namespace.name` or bare names.
pub const HARDWARE_FUNCTIONS: &[&str] = &[
    "pinMode",
    "digitalWrite",
    "digitalRead",
    "analogRead",
    "analogWrite",
    "delay",
    "millis",
    "random",
    "Math.random",
    "sensor.read",
    "console.log",
    "console.warn",
    "console.error",
    "Serial.begin",
    "Serial.print",
    "Serial.println",
    "WiFi.begin",
    "WiFi.connect",
    "WiFi.status",
    "WiFi.RSSI",
    "WiFi.signalStrength",
    "WiFi.localIP",
    "WiFi.reconnect",
    "WiFi.disconnect",
    "display.setCursor",
    "display.print",
    "display.clear",
    "display.backlight",
];

/// Named constants visible to scripts.
pub fn constant(name: &str) -> Option<Value> {
    let value = match name {
        "HIGH" | "OUTPUT" => Value::Number(1.0),
        "LOW" | "INPUT" => Value::Number(0.0),
        "INPUT_PULLUP" => Value::Number(2.0),
        "LED_BUILTIN" => Value::Number(13.0),
        "WL_CONNECTED" => Value::Number(WL_CONNECTED),
        "WL_DISCONNECTED" => Value::Number(WL_DISCONNECTED),
        "A0" | "A1" | "A2" | "A3" | "A4" | "A5" | "A6" | "A7" => Value::Str(name.to_string()),
        _ => return None,
    };
    Some(value)
}

pub struct HardwareBus<'a> {
    pub registry: &'a mut DeviceRegistry,
    pub graph: &'a ConnectionGraph,
    pub console: &'a mut ConsoleSink,
    pub emulation: &'a mut Emulation,
    pub clock: &'a VirtualClock,
    /// Controller instances whose ports scripts address, in lookup order.
    pub boards: &'a [String],
    pub metrics: Option<&'a MetricsRecorder>,
}

type HostResult = Result<Value, HostError>;

fn number_arg(args: &[Value], index: usize) -> f64 {
    args.get(index).map(Value::to_number).unwrap_or(f64::NAN)
}

fn is_high(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Str(s)) => s.eq_ignore_ascii_case("high") || s == "1",
        Some(v) => v.to_number() != 0.0 && !v.to_number().is_nan(),
        None => false,
    }
}

fn joined(args: &[Value]) -> String {
    args.iter()
        .map(Value::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}

fn round_tenth(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

/// `[low, high]` from a sensor's `range` property, unbounded when absent.
fn range_of(instance: &DeviceInstance) -> (f64, f64) {
    let bounds = instance
        .get("range")
        .and_then(PropertyValue::as_list)
        .map(|items| items.iter().filter_map(PropertyValue::as_f64).collect::<Vec<_>>())
        .unwrap_or_default();
    match bounds.as_slice() {
        [low, high, ..] => (*low, *high),
        _ => (f64::NEG_INFINITY, f64::INFINITY),
    }
}

impl<'a> HardwareBus<'a> {
    fn log(&mut self, kind: ConsoleKind, message: String) {
        trace!(%message, "console");
        self.console.push(kind, message);
    }

    /// Sensor instance wired to `pin` on an active board.
    fn sensor_on_pin(&self, pin: &PinRef) -> Option<String> {
        pins::resolve(self.registry, self.graph, self.boards, pin)
            .into_iter()
            .find(|e| {
                self.registry
                    .get(&e.instance)
                    .is_some_and(|d| d.class() == DeviceClass::Sensor)
            })
            .map(|e| e.instance)
    }

    fn wired_to_board(&self, instance: &str) -> bool {
        self.graph.iter().any(|c| {
            (c.a.instance == instance && self.boards.contains(&c.b.instance))
                || (c.b.instance == instance && self.boards.contains(&c.a.instance))
        })
    }

    /// First instance matching `filter`, preferring ones wired to a board.
    fn module(&self, filter: impl Fn(&DeviceInstance) -> bool) -> Option<String> {
        let candidates: Vec<&DeviceInstance> = self.registry.iter().filter(|d| filter(*d)).collect();
        candidates
            .iter()
            .find(|d| self.wired_to_board(d.id()))
            .or_else(|| candidates.first())
            .map(|d| d.id().to_string())
    }

    /// A communication module, or else a board with an on-chip radio.
    fn wifi_module(&self) -> Option<String> {
        self.module(|d| d.class() == DeviceClass::Communication)
            .or_else(|| {
                self.boards
                    .iter()
                    .find(|id| {
                        self.registry
                            .get(id)
                            .is_some_and(|d| d.get("connected").is_some())
                    })
                    .cloned()
            })
    }

    fn display_module(&self) -> Option<String> {
        self.module(|d| d.class() == DeviceClass::Display)
    }

    /// Current analog reading of a sensor, noise included, in `0..=1023`.
    fn sample_analog(&mut self, id: &str) -> i64 {
        let Some(instance) = self.registry.get(id) else {
            return 0;
        };
        if let Some(current) = instance.get("currentValue").and_then(PropertyValue::as_f64) {
            let (low, _) = range_of(instance);
            let low = if low.is_finite() { low } else { 0.0 };
            let base = ((current - low) * 10.0).floor().clamp(0.0, ANALOG_MAX as f64) as i64;
            return base
                .saturating_add(self.emulation.analog_noise())
                .clamp(0, ANALOG_MAX);
        }
        if instance.get("motionDetected").is_some() {
            return if self.sample_digital(id) { ANALOG_MAX } else { 0 };
        }
        self.emulation.int_between(0, ANALOG_MAX + 1)
    }

    fn sample_digital(&mut self, id: &str) -> bool {
        let Some(instance) = self.registry.get(id) else {
            return false;
        };
        if instance.get("motionDetected").is_some() {
            let detected = self.emulation.motion();
            if let Some(sensor) = self.registry.get_mut(id) {
                sensor.set("motionDetected", detected);
            }
            return detected;
        }
        if let Some(pressed) = instance.get("pressed").and_then(PropertyValue::as_bool) {
            return pressed;
        }
        if instance.get("currentValue").is_some() {
            return self.sample_analog(id) >= 512;
        }
        false
    }

    fn pin_mode(&mut self, args: &[Value]) -> HostResult {
        let label = pins::pin_label(args.first());
        let mode = match args.get(1).map(Value::to_number) {
            Some(m) if m == 1.0 => "OUTPUT",
            Some(m) if m == 2.0 => "INPUT_PULLUP",
            _ => "INPUT",
        };
        self.log(ConsoleKind::Log, format!("Set pin {} mode to {}", label, mode));
        Ok(Value::Null)
    }

    fn digital_write(&mut self, args: &[Value]) -> HostResult {
        let label = pins::pin_label(args.first());
        let high = is_high(args.get(1));
        self.log(
            ConsoleKind::Log,
            format!("Set pin {} to {}", label, if high { "HIGH" } else { "LOW" }),
        );
        if let Some(pin) = args.first().and_then(PinRef::from_value) {
            let brightness = if high { 100.0 } else { 0.0 };
            self.drive_actuators(&pin, high, brightness);
        }
        Ok(Value::Null)
    }

    fn analog_write(&mut self, args: &[Value]) -> HostResult {
        let label = pins::pin_label(args.first());
        let raw = number_arg(args, 1);
        let duty = if raw.is_nan() { 0.0 } else { raw.clamp(0.0, 255.0).trunc() };
        self.log(
            ConsoleKind::Log,
            format!("Analog write {} to pin {}", format_number(duty), label),
        );
        if let Some(pin) = args.first().and_then(PinRef::from_value) {
            let brightness = (duty / 255.0 * 100.0).round();
            self.drive_actuators(&pin, duty > 0.0, brightness);
        }
        Ok(Value::Null)
    }

    fn drive_actuators(&mut self, pin: &PinRef, on: bool, brightness: f64) {
        for endpoint in pins::resolve(self.registry, self.graph, self.boards, pin) {
            let Some(device) = self.registry.get_mut(&endpoint.instance) else {
                continue;
            };
            if device.class() != DeviceClass::Actuator {
                continue;
            }
            device.set("state", if on { "on" } else { "off" });
            device.set("brightness", brightness);
            debug!(device = %endpoint.instance, on, brightness, "actuator driven");
        }
    }

    fn digital_read(&mut self, args: &[Value]) -> HostResult {
        let label = pins::pin_label(args.first());
        self.log(ConsoleKind::Log, format!("Read from pin {}", label));
        let sensor = args
            .first()
            .and_then(PinRef::from_value)
            .and_then(|pin| self.sensor_on_pin(&pin));
        let high = match sensor {
            Some(id) => self.sample_digital(&id),
            None => false,
        };
        Ok(Value::Number(if high { HIGH } else { LOW }))
    }

    fn analog_read(&mut self, args: &[Value]) -> HostResult {
        let label = pins::pin_label(args.first());
        self.log(ConsoleKind::Log, format!("Analog read from {}", label));
        let sensor = args
            .first()
            .and_then(PinRef::from_value)
            .and_then(|pin| self.sensor_on_pin(&pin));
        let reading = match sensor {
            Some(id) => self.sample_analog(&id),
            None => self.emulation.int_between(0, ANALOG_MAX + 1),
        };
        Ok(Value::Number(reading as f64))
    }

    fn delay(&mut self, args: &[Value]) -> HostResult {
        let ms = number_arg(args, 0);
        let ms = if ms.is_finite() && ms > 0.0 { ms.trunc() as u64 } else { 0 };
        self.log(ConsoleKind::Log, format!("Delay {}ms", ms));
        self.clock.advance(ms);
        Ok(Value::Null)
    }

    fn random(&mut self, args: &[Value]) -> HostResult {
        let (min, max) = match args {
            [max] => (0.0, max.to_number()),
            [min, max, ..] => (min.to_number(), max.to_number()),
            [] => {
                return Err(HostError::InvalidArgument {
                    function: "random".into(),
                    message: "expected 1 or 2 arguments".into(),
                })
            }
        };
        if min.is_nan() || max.is_nan() {
            return Ok(Value::Number(f64::NAN));
        }
        let value = self.emulation.int_between(min.trunc() as i64, max.trunc() as i64);
        Ok(Value::Number(value as f64))
    }

    fn sensor_read(&mut self, args: &[Value]) -> HostResult {
        let quantity = args.first().map(Value::to_string).unwrap_or_default();
        let sensor = self.module(|d| {
            d.class() == DeviceClass::Sensor && d.template().senses.as_deref() == Some(quantity.as_str())
        });
        let Some(id) = sensor else {
            self.log(
                ConsoleKind::Warn,
                format!("Sensor read {}: no sensor available", quantity),
            );
            return Ok(Value::Number(0.0));
        };

        let current = self
            .registry
            .get(&id)
            .and_then(|d| d.get("currentValue"))
            .and_then(PropertyValue::as_f64);
        let value = match current {
            Some(current) => {
                let drift = self.emulation.temperature_step();
                let (low, high) = self.registry.get(&id).map(range_of).unwrap_or((
                    f64::NEG_INFINITY,
                    f64::INFINITY,
                ));
                let next = (current + drift).clamp(low, high);
                if let Some(sensor) = self.registry.get_mut(&id) {
                    sensor.set("currentValue", next);
                }
                Value::Number(round_tenth(next))
            }
            None => Value::Bool(self.sample_digital(&id)),
        };
        self.log(
            ConsoleKind::Log,
            format!("Sensor read {}: {}", quantity, value),
        );
        Ok(value)
    }

    fn console_call(&mut self, kind: ConsoleKind, args: &[Value]) -> HostResult {
        self.log(kind, joined(args));
        Ok(Value::Null)
    }

    fn serial(&mut self, name: &str, args: &[Value]) -> HostResult {
        let message = match name {
            "begin" => format!("Serial started at {} baud", pins::pin_label(args.first())),
            _ => joined(args),
        };
        self.log(ConsoleKind::Log, message);
        Ok(Value::Null)
    }

    fn wifi(&mut self, name: &str, args: &[Value]) -> HostResult {
        let module = self.wifi_module();
        let connected = module
            .as_deref()
            .and_then(|id| self.registry.get(id))
            .and_then(|d| d.get("connected"))
            .and_then(PropertyValue::as_bool)
            .unwrap_or(false);

        match name {
            "begin" | "connect" => {
                let ssid = args.first().map(Value::to_string).unwrap_or_default();
                self.log(ConsoleKind::Log, format!("Connecting to WiFi: {}", ssid));
                let Some(id) = module else {
                    return Ok(Value::Number(WL_DISCONNECTED));
                };
                let signal = self.emulation.int_between(70, 100) as f64;
                if let Some(wifi) = self.registry.get_mut(&id) {
                    wifi.set("ssid", ssid);
                    wifi.set("connected", true);
                    wifi.set("signal", signal);
                }
                Ok(Value::Number(WL_CONNECTED))
            }
            "status" => {
                let status = if connected { "connected" } else { "disconnected" };
                self.log(ConsoleKind::Log, format!("WiFi status: {}", status));
                Ok(Value::Number(if connected {
                    WL_CONNECTED
                } else {
                    WL_DISCONNECTED
                }))
            }
            "RSSI" | "signalStrength" => {
                let signal = module
                    .as_deref()
                    .and_then(|id| self.registry.get(id))
                    .and_then(|d| d.get("signal"))
                    .and_then(PropertyValue::as_f64)
                    .unwrap_or(0.0);
                self.log(
                    ConsoleKind::Log,
                    format!("WiFi signal strength: {}", format_number(signal)),
                );
                Ok(Value::Number(signal))
            }
            "localIP" => {
                let ip = module
                    .as_deref()
                    .and_then(|id| self.registry.get(id))
                    .filter(|_| connected)
                    .and_then(|d| d.get("ip"))
                    .and_then(PropertyValue::as_str)
                    .unwrap_or("0.0.0.0")
                    .to_string();
                self.log(ConsoleKind::Log, format!("WiFi local IP: {}", ip));
                Ok(Value::Str(ip))
            }
            "reconnect" => {
                self.log(ConsoleKind::Log, "Reconnecting to WiFi...".to_string());
                if let Some(wifi) = module.and_then(|id| self.registry.get_mut(&id)) {
                    wifi.set("connected", true);
                }
                Ok(Value::Null)
            }
            _ => {
                self.log(ConsoleKind::Log, "Disconnecting from WiFi".to_string());
                if let Some(wifi) = module.and_then(|id| self.registry.get_mut(&id)) {
                    wifi.set("connected", false);
                }
                Ok(Value::Null)
            }
        }
    }

    fn display(&mut self, name: &str, args: &[Value]) -> HostResult {
        let module = self.display_module();
        let message = match name {
            "setCursor" => {
                let (col, row) = (number_arg(args, 0), number_arg(args, 1));
                let col = if col.is_finite() { col.max(0.0) } else { 0.0 };
                let row = if row.is_finite() { row.max(0.0) } else { 0.0 };
                if let Some(lcd) = module.as_deref().and_then(|id| self.registry.get_mut(id)) {
                    let (rows, columns) = lcd_size(lcd);
                    lcd.set("cursorCol", col.min(columns - 1.0).trunc());
                    lcd.set("cursorRow", row.min(rows - 1.0).trunc());
                }
                format!(
                    "Display cursor set to ({}, {})",
                    format_number(col.trunc()),
                    format_number(row.trunc())
                )
            }
            "print" => {
                let text = joined(args);
                if let Some(lcd) = module.as_deref().and_then(|id| self.registry.get_mut(id)) {
                    lcd_print(lcd, &text);
                }
                format!("Display print: {}", text)
            }
            "clear" => {
                if let Some(lcd) = module.as_deref().and_then(|id| self.registry.get_mut(id)) {
                    let (rows, _) = lcd_size(lcd);
                    let blank = vec![PropertyValue::Text(String::new()); rows as usize];
                    lcd.set("content", PropertyValue::List(blank));
                    lcd.set("cursorCol", 0.0);
                    lcd.set("cursorRow", 0.0);
                }
                "Display cleared".to_string()
            }
            _ => {
                let on = args.first().map(Value::truthy).unwrap_or(true);
                if let Some(lcd) = module.as_deref().and_then(|id| self.registry.get_mut(id)) {
                    lcd.set("backlight", on);
                }
                format!("Display backlight {}", if on { "on" } else { "off" })
            }
        };
        self.log(ConsoleKind::Log, message);
        Ok(Value::Null)
    }
}

/// Largest character display the bus will drive.
const LCD_MAX_ROWS: f64 = 8.0;
const LCD_MAX_COLUMNS: f64 = 80.0;

fn lcd_size(lcd: &DeviceInstance) -> (f64, f64) {
    let dim = |key: &str, default: f64, max: f64| {
        lcd.get(key)
            .and_then(PropertyValue::as_f64)
            .filter(|n| *n >= 1.0)
            .map_or(default, |n| n.min(max).trunc())
    };
    (dim("rows", 2.0, LCD_MAX_ROWS), dim("columns", 16.0, LCD_MAX_COLUMNS))
}

/// Writes `text` at the cursor, clipped to the row width, and advances the
/// cursor.
fn lcd_print(lcd: &mut DeviceInstance, text: &str) {
    let (rows, columns) = lcd_size(lcd);
    let (rows, columns) = (rows as usize, columns as usize);
    let cursor = |key: &str| {
        lcd.get(key)
            .and_then(PropertyValue::as_f64)
            .map(|n| n as usize)
            .unwrap_or(0)
    };
    let (col, row) = (cursor("cursorCol").min(columns), cursor("cursorRow").min(rows - 1));

    let mut content: Vec<String> = lcd
        .get("content")
        .and_then(PropertyValue::as_list)
        .map(|lines| lines.iter().map(|l| l.to_string()).collect())
        .unwrap_or_default();
    content.resize(rows, String::new());

    let mut line: Vec<char> = content[row].chars().collect();
    if line.len() < col {
        line.resize(col, ' ');
    }
    let mut written = 0;
    for (offset, ch) in text.chars().enumerate() {
        let at = col + offset;
        if at >= columns {
            break;
        }
        if at < line.len() {
            line[at] = ch;
        } else {
            line.push(ch);
        }
        written += 1;
    }
    content[row] = line.into_iter().collect();

    lcd.set(
        "content",
        PropertyValue::List(content.into_iter().map(PropertyValue::Text).collect()),
    );
    lcd.set("cursorCol", (col + written) as f64);
    lcd.set("cursorRow", row as f64);
}

impl Host for HardwareBus<'_> {
    fn call(&mut self, target: CallTarget<'_>, args: &[Value]) -> Result<Value, HostError> {
        let result = match (target.namespace, target.name) {
            (None, "pinMode") => self.pin_mode(args),
            (None, "digitalWrite") => self.digital_write(args),
            (None, "digitalRead") => self.digital_read(args),
            (None, "analogRead") => self.analog_read(args),
            (None, "analogWrite") => self.analog_write(args),
            (None, "delay") => self.delay(args),
            (None, "millis") => Ok(Value::Number(self.clock.now_ms() as f64)),
            (None, "random") => self.random(args),
            (Some("Math"), "random") => Ok(Value::Number(self.emulation.unit())),
            (Some("sensor"), "read") => self.sensor_read(args),
            (Some("console"), "log") => self.console_call(ConsoleKind::Log, args),
            (Some("console"), "warn") => self.console_call(ConsoleKind::Warn, args),
            (Some("console"), "error") => self.console_call(ConsoleKind::Error, args),
            (Some("Serial"), name @ ("begin" | "print" | "println")) => self.serial(name, args),
            (
                Some("WiFi"),
                name @ ("begin" | "connect" | "status" | "RSSI" | "signalStrength" | "localIP"
                | "reconnect" | "disconnect"),
            ) => self.wifi(name, args),
            (Some("display"), name @ ("setCursor" | "print" | "clear" | "backlight")) => {
                self.display(name, args)
            }
            _ => return Err(HostError::UnknownFunction(target.to_string())),
        };

        if let Some(metrics) = self.metrics {
            metrics.record_hardware_call(&target.to_string());
        }
        result
    }

    fn global(&self, name: &str) -> Option<Value> {
        constant(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kretslab_core::devices::DeviceCatalog;
    use kretslab_core::graph::{Endpoint, FanInPolicy};

    use crate::emulation::EmulationParams;

    struct Rig {
        registry: DeviceRegistry,
        graph: ConnectionGraph,
        console: ConsoleSink,
        emulation: Emulation,
        clock: VirtualClock,
        boards: Vec<String>,
    }

    impl Rig {
        fn new(devices: &[(&str, &str)], wires: &[(&str, &str)]) -> Self {
            let catalog = DeviceCatalog::builtin().unwrap();
            let mut registry = DeviceRegistry::new();
            for (template, id) in devices {
                registry.add(catalog.get(template).unwrap(), *id).unwrap();
            }
            let mut graph = ConnectionGraph::new(FanInPolicy::Reject);
            for (a, b) in wires {
                graph
                    .connect(&registry, a.parse().unwrap(), b.parse().unwrap())
                    .unwrap();
            }
            let boards = registry
                .iter()
                .filter(|d| d.class() == DeviceClass::Controller)
                .map(|d| d.id().to_string())
                .collect();
            Self {
                registry,
                graph,
                console: ConsoleSink::with_capacity(100),
                emulation: Emulation::new(42, EmulationParams::default()),
                clock: VirtualClock::new(0),
                boards,
            }
        }

        fn call(&mut self, namespace: Option<&str>, name: &str, args: &[Value]) -> HostResult {
            let mut bus = HardwareBus {
                registry: &mut self.registry,
                graph: &self.graph,
                console: &mut self.console,
                emulation: &mut self.emulation,
                clock: &self.clock,
                boards: &self.boards,
                metrics: None,
            };
            bus.call(CallTarget { namespace, name }, args)
        }

        fn messages(&self) -> Vec<String> {
            self.console.entries().map(|e| e.message.clone()).collect()
        }

        fn state(&self, id: &str, key: &str) -> PropertyValue {
            self.registry.get(id).unwrap().get(key).unwrap().clone()
        }
    }

    fn blink_rig() -> Rig {
        Rig::new(
            &[("arduino-uno", "uno-1"), ("led", "led-1"), ("temp-sensor", "temp-1")],
            &[("uno-1.d13", "led-1.anode"), ("uno-1.a0", "temp-1.data")],
        )
    }

    #[test]
    fn digital_write_drives_the_led() {
        let mut rig = blink_rig();
        rig.call(None, "digitalWrite", &[13.0.into(), HIGH.into()]).unwrap();
        assert_eq!(rig.state("led-1", "state"), PropertyValue::from("on"));
        assert_eq!(rig.state("led-1", "brightness"), PropertyValue::from(100.0));

        rig.call(None, "digitalWrite", &[13.0.into(), LOW.into()]).unwrap();
        assert_eq!(rig.state("led-1", "state"), PropertyValue::from("off"));
        assert_eq!(rig.messages(), vec!["Set pin 13 to HIGH", "Set pin 13 to LOW"]);
    }

    #[test]
    fn unconnected_write_only_logs() {
        let mut rig = blink_rig();
        rig.call(None, "digitalWrite", &[12.0.into(), HIGH.into()]).unwrap();
        assert_eq!(rig.state("led-1", "state"), PropertyValue::from("off"));
        assert_eq!(rig.messages(), vec!["Set pin 12 to HIGH"]);
    }

    #[test]
    fn analog_read_of_temperature_sensor() {
        let mut rig = blink_rig();
        let reading = rig
            .call(None, "analogRead", &["A0".into()])
            .unwrap()
            .to_number();
        // (22 - -40) * 10 = 620, plus at most 2 of noise.
        assert!((618.0..=622.0).contains(&reading), "{}", reading);
        assert_eq!(rig.messages(), vec!["Analog read from A0"]);
    }

    #[test]
    fn unconnected_analog_read_is_in_range() {
        let mut rig = blink_rig();
        for _ in 0..50 {
            let reading = rig.call(None, "analogRead", &["A3".into()]).unwrap().to_number();
            assert!((0.0..=1023.0).contains(&reading));
        }
    }

    #[test]
    fn delay_advances_the_clock() {
        let mut rig = blink_rig();
        rig.call(None, "delay", &[250.0.into()]).unwrap();
        assert_eq!(rig.clock.now_ms(), 250);
        let now = rig.call(None, "millis", &[]).unwrap();
        assert_eq!(now, Value::Number(250.0));
        assert_eq!(rig.messages(), vec!["Delay 250ms"]);
    }

    #[test]
    fn wifi_lifecycle() {
        let mut rig = Rig::new(&[("esp32", "esp-1"), ("wifi-module", "wifi-1")], &[]);
        let status = rig.call(Some("WiFi"), "status", &[]).unwrap();
        assert_eq!(status, Value::Number(WL_DISCONNECTED));
        assert_eq!(
            rig.call(Some("WiFi"), "localIP", &[]).unwrap(),
            Value::Str("0.0.0.0".into())
        );

        rig.call(Some("WiFi"), "begin", &["lab".into(), "secret".into()]).unwrap();
        assert_eq!(rig.call(Some("WiFi"), "status", &[]).unwrap(), Value::Number(WL_CONNECTED));
        let rssi = rig.call(Some("WiFi"), "RSSI", &[]).unwrap().to_number();
        assert!((70.0..=99.0).contains(&rssi));
        assert_eq!(
            rig.call(Some("WiFi"), "localIP", &[]).unwrap(),
            Value::Str("192.168.1.100".into())
        );
        assert_eq!(rig.state("wifi-1", "ssid"), PropertyValue::from("lab"));

        rig.call(Some("WiFi"), "disconnect", &[]).unwrap();
        assert_eq!(rig.state("wifi-1", "connected"), PropertyValue::from(false));
        assert_eq!(
            rig.messages(),
            vec![
                "WiFi status: disconnected",
                "WiFi local IP: 0.0.0.0",
                "Connecting to WiFi: lab",
                "WiFi status: connected",
                format!("WiFi signal strength: {}", format_number(rssi)).as_str(),
                "WiFi local IP: 192.168.1.100",
                "Disconnecting from WiFi",
            ]
        );
    }

    #[test]
    fn board_radio_without_module() {
        let mut rig = Rig::new(&[("esp32", "esp-1")], &[]);
        rig.call(Some("WiFi"), "begin", &["lab".into()]).unwrap();
        assert_eq!(rig.call(Some("WiFi"), "status", &[]).unwrap(), Value::Number(WL_CONNECTED));
        assert_eq!(
            rig.call(Some("WiFi"), "localIP", &[]).unwrap(),
            Value::Str("192.168.1.101".into())
        );
        assert_eq!(rig.state("esp-1", "connected"), PropertyValue::from(true));
    }

    #[test]
    fn sensor_read_drifts_within_bounds() {
        let mut rig = blink_rig();
        let mut last = 22.0;
        for _ in 0..20 {
            let value = rig
                .call(Some("sensor"), "read", &["temperature".into()])
                .unwrap()
                .to_number();
            assert!((value - last).abs() <= 0.61, "{} -> {}", last, value);
            assert_eq!(value, round_tenth(value));
            last = value;
        }
    }

    #[test]
    fn sensor_read_without_sensor_warns() {
        let mut rig = blink_rig();
        let value = rig.call(Some("sensor"), "read", &["humidity".into()]).unwrap();
        assert_eq!(value, Value::Number(0.0));
        assert_eq!(rig.console.last().unwrap().kind, ConsoleKind::Warn);
    }

    #[test]
    fn display_prints_at_cursor() {
        let mut rig = Rig::new(&[("esp32", "esp-1"), ("lcd-display", "lcd-1")], &[]);
        rig.call(Some("display"), "clear", &[]).unwrap();
        rig.call(Some("display"), "setCursor", &[2.0.into(), 1.0.into()]).unwrap();
        rig.call(Some("display"), "print", &["Hi".into()]).unwrap();
        rig.call(Some("display"), "print", &["!".into()]).unwrap();
        assert_eq!(
            rig.state("lcd-1", "content"),
            PropertyValue::List(vec!["".into(), "  Hi!".into()])
        );
    }

    #[test]
    fn display_print_clips_to_width() {
        let mut rig = Rig::new(&[("esp32", "esp-1"), ("lcd-display", "lcd-1")], &[]);
        rig.call(Some("display"), "clear", &[]).unwrap();
        rig.call(Some("display"), "setCursor", &[14.0.into(), 0.0.into()]).unwrap();
        rig.call(Some("display"), "print", &["abcdef".into()]).unwrap();
        let content = rig.state("lcd-1", "content");
        let first = content.as_list().unwrap()[0].to_string();
        assert_eq!(first.chars().count(), 16);
        assert!(first.ends_with("ab"));
    }

    #[test]
    fn console_joins_arguments() {
        let mut rig = blink_rig();
        rig.call(Some("console"), "warn", &["temp".into(), 21.5.into()]).unwrap();
        let last = rig.console.last().unwrap();
        assert_eq!(last.kind, ConsoleKind::Warn);
        assert_eq!(last.message, "temp 21.5");
    }

    #[test]
    fn unknown_function_is_reported() {
        let mut rig = blink_rig();
        let err = rig.call(Some("WiFi"), "scan", &[]).unwrap_err();
        assert_eq!(err, HostError::UnknownFunction("WiFi.scan".into()));
        assert!(rig.console.is_empty());
    }

    #[test]
    fn random_needs_arguments() {
        let mut rig = blink_rig();
        assert!(matches!(
            rig.call(None, "random", &[]),
            Err(HostError::InvalidArgument { .. })
        ));
        let value = rig.call(None, "random", &[5.0.into(), 10.0.into()]).unwrap().to_number();
        assert!((5.0..10.0).contains(&value));
    }

    #[test]
    fn constants() {
        assert_eq!(constant("HIGH"), Some(Value::Number(1.0)));
        assert_eq!(constant("A0"), Some(Value::Str("A0".into())));
        assert_eq!(constant("A8"), None);
    }

    #[test]
    fn endpoints_parse_for_rig() {
        let endpoint: Endpoint = "uno-1.d13".parse().unwrap();
        assert_eq!(endpoint, Endpoint::new("uno-1", "d13"));
    }

    impl Rig {
        fn set(&mut self, id: &str, key: &str, value: impl Into<PropertyValue>) {
            self.registry.get_mut(id).unwrap().set(key, value);
        }

        fn motion_probability(&mut self, p: f64) {
            self.emulation = Emulation::new(
                42,
                EmulationParams {
                    motion_probability: p,
                    ..EmulationParams::default()
                },
            );
        }
    }

    #[test]
    fn digital_read_samples_motion_and_records_it() {
        let mut rig = Rig::new(
            &[("arduino-uno", "uno-1"), ("motion-sensor", "pir-1")],
            &[("uno-1.d7", "pir-1.data")],
        );
        rig.motion_probability(1.0);
        let high = rig.call(None, "digitalRead", &[7.0.into()]).unwrap();
        assert_eq!(high, Value::Number(HIGH));
        assert_eq!(rig.state("pir-1", "motionDetected"), PropertyValue::from(true));

        rig.motion_probability(0.0);
        let low = rig.call(None, "digitalRead", &[7.0.into()]).unwrap();
        assert_eq!(low, Value::Number(LOW));
        assert_eq!(rig.state("pir-1", "motionDetected"), PropertyValue::from(false));
        assert_eq!(rig.messages(), vec!["Read from pin 7", "Read from pin 7"]);
    }

    #[test]
    fn digital_read_of_unresolved_pin_is_low() {
        let mut rig = blink_rig();
        assert_eq!(rig.call(None, "digitalRead", &[12.0.into()]).unwrap(), Value::Number(LOW));
        // Wired, but to an actuator.
        assert_eq!(rig.call(None, "digitalRead", &[13.0.into()]).unwrap(), Value::Number(LOW));
    }

    #[test]
    fn numeric_sensor_reads_high_from_the_midpoint() {
        let mut rig = blink_rig();
        // (22 - -40) * 10 = 620
        assert_eq!(rig.call(None, "digitalRead", &["A0".into()]).unwrap(), Value::Number(HIGH));
        // (0 - -40) * 10 = 400
        rig.set("temp-1", "currentValue", 0.0);
        assert_eq!(rig.call(None, "digitalRead", &["A0".into()]).unwrap(), Value::Number(LOW));
        // (11.5 - -40) * 10 = 515, at most 2 of noise.
        rig.set("temp-1", "currentValue", 11.5);
        assert_eq!(rig.call(None, "digitalRead", &["A0".into()]).unwrap(), Value::Number(HIGH));
    }

    #[test]
    fn analog_write_scales_brightness() {
        let mut rig = blink_rig();
        rig.call(None, "analogWrite", &[13.0.into(), 128.0.into()]).unwrap();
        assert_eq!(rig.state("led-1", "brightness"), PropertyValue::from(50.0));
        assert_eq!(rig.state("led-1", "state"), PropertyValue::from("on"));

        rig.call(None, "analogWrite", &[13.0.into(), 300.0.into()]).unwrap();
        assert_eq!(rig.state("led-1", "brightness"), PropertyValue::from(100.0));

        rig.call(None, "analogWrite", &[13.0.into(), 0.0.into()]).unwrap();
        assert_eq!(rig.state("led-1", "brightness"), PropertyValue::from(0.0));
        assert_eq!(rig.state("led-1", "state"), PropertyValue::from("off"));
        assert_eq!(
            rig.messages(),
            vec![
                "Analog write 128 to pin 13",
                "Analog write 255 to pin 13",
                "Analog write 0 to pin 13",
            ]
        );
    }

    #[test]
    fn extreme_sensor_values_saturate() {
        let mut rig = blink_rig();
        rig.set("temp-1", "currentValue", 1e300);
        let high = rig.call(None, "analogRead", &["A0".into()]).unwrap().to_number();
        assert!((1021.0..=1023.0).contains(&high), "{}", high);

        rig.set("temp-1", "currentValue", -1e300);
        let low = rig.call(None, "analogRead", &["A0".into()]).unwrap().to_number();
        assert!((0.0..=2.0).contains(&low), "{}", low);
    }

    #[test]
    fn oversized_display_is_bounded() {
        let mut rig = Rig::new(&[("esp32", "esp-1"), ("lcd-display", "lcd-1")], &[]);
        rig.set("lcd-1", "rows", 1e12);
        rig.set("lcd-1", "columns", f64::INFINITY);
        rig.call(Some("display"), "clear", &[]).unwrap();
        rig.call(Some("display"), "setCursor", &[1e9.into(), 1e9.into()]).unwrap();
        rig.call(Some("display"), "print", &["x".repeat(200).into()]).unwrap();

        let content = rig.state("lcd-1", "content");
        let lines = content.as_list().unwrap();
        assert_eq!(lines.len(), LCD_MAX_ROWS as usize);
        assert!(lines
            .iter()
            .all(|l| l.to_string().chars().count() <= LCD_MAX_COLUMNS as usize));
    }
}
