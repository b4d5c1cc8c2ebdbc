use kretslab_core::console::ConsoleKind;
use kretslab_core::devices::DeviceCatalog;
use kretslab_core::graph::Endpoint;
use kretslab_core::value::PropertyValue;
use kretslab_simulator::{
    BoardLayout, RunOptions, RunPhase, SessionSettings, SessionStatus, SimulationSession,
    StopReason,
};

const BLINK: &str = r#"
// Blink
void setup() {
  pinMode(13, OUTPUT);
}

void loop() {
  digitalWrite(13, HIGH);
  console.log("LED ON");
  delay(1000);
  digitalWrite(13, LOW);
  console.log("LED OFF");
  delay(1000);
}
"#;

fn empty_session() -> SimulationSession {
    SimulationSession::new(DeviceCatalog::builtin().unwrap(), SessionSettings::default())
}

fn blink_session() -> SimulationSession {
    let mut session = empty_session();
    session.add_device("led", "led-1").unwrap();
    session.add_device("arduino-uno", "uno-1").unwrap();
    session
        .connect(Endpoint::new("uno-1", "d13"), Endpoint::new("led-1", "anode"))
        .unwrap();
    session
}

fn messages(session: &SimulationSession) -> Vec<String> {
    session
        .console()
        .entries()
        .map(|e| e.message.clone())
        .collect()
}

#[test]
fn blink_alternates_and_ends_off() {
    let mut session = blink_session();
    let outcome = session
        .run(BLINK, RunOptions::default().with_max_iterations(2))
        .unwrap();

    assert_eq!(outcome.status, SessionStatus::Stopped);
    assert_eq!(outcome.reason, StopReason::Completed);
    assert_eq!(outcome.iterations, 2);
    assert_eq!(outcome.virtual_time_ms, 4000);

    let led_lines: Vec<String> = messages(&session)
        .into_iter()
        .filter(|m| m.starts_with("LED"))
        .collect();
    assert_eq!(led_lines, vec!["LED ON", "LED OFF", "LED ON", "LED OFF"]);

    let snapshot = session.snapshot();
    let led = snapshot.iter().find(|e| e.instance_id == "led-1").unwrap();
    assert_eq!(led.template_id, "led");
    assert_eq!(led.state["state"], PropertyValue::from("off"));
    assert_eq!(led.state["brightness"], PropertyValue::from(0.0));

    assert_eq!(
        session.history(),
        &[
            SessionStatus::Idle,
            SessionStatus::Compiling,
            SessionStatus::Running,
            SessionStatus::Stopped
        ]
    );
}

#[test]
fn blink_logs_hardware_calls() {
    let mut session = blink_session();
    session
        .run(BLINK, RunOptions::default().with_max_iterations(1))
        .unwrap();
    assert_eq!(
        messages(&session),
        vec![
            "Set pin 13 mode to OUTPUT",
            "Set pin 13 to HIGH",
            "LED ON",
            "Delay 1000ms",
            "Set pin 13 to LOW",
            "LED OFF",
            "Delay 1000ms",
        ]
    );
}

#[test]
fn stop_twice_is_a_no_op() {
    let mut session = blink_session();
    session.start(BLINK, RunOptions::default()).unwrap();
    session.step();
    session.stop();
    assert_eq!(session.status(), SessionStatus::Stopped);

    let entries = session.console().len();
    let history = session.history().len();
    session.stop();
    assert_eq!(session.status(), SessionStatus::Stopped);
    assert_eq!(session.console().len(), entries);
    assert_eq!(session.history().len(), history);
    assert_eq!(session.outcome().unwrap().reason, StopReason::Cancelled);
}

#[test]
fn fault_on_second_iteration() {
    let mut session = blink_session();
    let script = r#"
let n = 0;
void loop() {
  n++;
  if (n == 2) {
    throw "sensor bus jammed";
  }
}
"#;
    let outcome = session
        .run(script, RunOptions::default().with_max_iterations(10))
        .unwrap();

    assert_eq!(outcome.status, SessionStatus::Stopped);
    assert_eq!(outcome.reason, StopReason::Faulted);
    assert_eq!(outcome.iterations, 2);
    let fault = outcome.fault.unwrap();
    assert_eq!(fault.phase, RunPhase::Loop);
    assert_eq!(fault.iteration, 2);
    assert_eq!(fault.line, 6);

    let errors: Vec<_> = session
        .console()
        .entries()
        .filter(|e| e.kind == ConsoleKind::Error)
        .collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].message, "Runtime Error: sensor bus jammed");

    let history = session.history();
    assert_eq!(
        &history[history.len() - 2..],
        &[SessionStatus::Faulted, SessionStatus::Stopped]
    );
    assert_eq!(session.iteration(), 2);
}

#[test]
fn unconnected_analog_read_stays_in_range() {
    let mut session = blink_session();
    let script = r#"
void loop() {
  let v = analogRead(A3);
  if (v < 0 || v > 1023) {
    throw "out of range: " + v;
  }
  Serial.println(v);
}
"#;
    let outcome = session
        .run(script, RunOptions::default().with_max_iterations(200))
        .unwrap();
    assert_eq!(outcome.reason, StopReason::Completed);

    let readings: Vec<f64> = messages(&session)
        .iter()
        .filter(|m| !m.starts_with("Analog read"))
        .map(|m| m.parse().unwrap())
        .collect();
    assert_eq!(readings.len(), 200);
    assert!(readings.iter().all(|v| (0.0..=1023.0).contains(v)));
}

fn sensor_bench() -> SimulationSession {
    let mut session = empty_session();
    BoardLayout::default_workbench().apply(&mut session).unwrap();
    session.add_device("motion-sensor", "pir-1").unwrap();
    session
        .connect(Endpoint::new("uno-1", "d7"), Endpoint::new("pir-1", "data"))
        .unwrap();
    session
}

const SENSOR_SCRIPT: &str = r#"
#include <Arduino.h>
int threshold = 600;

void loop() {
  float t = sensor.read("temperature");
  int raw = analogRead(A0);
  int moving = digitalRead(7);
  if (raw > threshold || moving == HIGH) {
    digitalWrite(13, HIGH);
  } else {
    analogWrite(13, random(0, 255));
  }
  console.log("t=" + t + " raw=" + raw + " motion=" + moving);
  delay(500);
}
"#;

#[test]
fn same_seed_same_digest_and_console() {
    let mut first = sensor_bench();
    let mut second = sensor_bench();
    let options = RunOptions::default().with_max_iterations(25);

    first.run(SENSOR_SCRIPT, options.clone()).unwrap();
    second.run(SENSOR_SCRIPT, options).unwrap();

    assert_eq!(first.state_digest(), second.state_digest());
    assert_eq!(messages(&first), messages(&second));
}

#[test]
fn rerun_reseeds_the_generator() {
    let mut session = blink_session();
    let script = "void loop() { Serial.println(random(1000)); }";
    let options = RunOptions::default().with_max_iterations(10);

    session.run(script, options.clone()).unwrap();
    let first: Vec<String> = messages(&session);

    let mark = session.console().next_sequence();
    session.run(script, options).unwrap();
    let second: Vec<String> = session
        .console()
        .since(mark)
        .map(|e| e.message.clone())
        .collect();
    assert_eq!(first, second);
}

#[test]
fn compile_failure_returns_to_idle_without_side_effects() {
    let mut session = blink_session();
    let before = session.state_digest();
    let outcome = session
        .run("void loop() {\n  digitalWrite(13, HIGH);\n", RunOptions::default())
        .unwrap();

    assert_eq!(outcome.status, SessionStatus::Idle);
    assert_eq!(outcome.reason, StopReason::CompileFailed);
    assert!(!outcome.diagnostics.is_empty());
    assert_eq!(session.status(), SessionStatus::Idle);
    assert!(session.console().is_empty());
    assert_eq!(session.state_digest(), before);
    assert_eq!(
        session.history(),
        &[
            SessionStatus::Idle,
            SessionStatus::Compiling,
            SessionStatus::Idle
        ]
    );
}

#[test]
fn time_budget_stops_the_run() {
    let mut session = blink_session();
    let options = RunOptions {
        timeout_budget_ms: Some(5000),
        ..RunOptions::default().with_max_iterations(100)
    };
    let outcome = session.run(BLINK, options).unwrap();
    assert_eq!(outcome.reason, StopReason::TimeBudgetExhausted);
    assert_eq!(outcome.iterations, 3);
    let last = session.console().last().unwrap();
    assert_eq!(last.kind, ConsoleKind::Warn);
}

#[test]
fn runaway_loop_hits_the_step_budget() {
    let mut session = blink_session();
    let options = RunOptions {
        step_budget: 1000,
        ..RunOptions::default()
    };
    let outcome = session
        .run("void loop() {\n  while (true) {}\n}", options)
        .unwrap();
    assert_eq!(outcome.reason, StopReason::Faulted);
    assert_eq!(outcome.iterations, 1);
    assert!(outcome
        .fault
        .unwrap()
        .message
        .starts_with("Step budget exhausted"));
}

#[test]
fn scripts_cannot_reach_outside_the_hardware_api() {
    let mut session = blink_session();
    let outcome = session
        .run("let fs = require(\"fs\");", RunOptions::default())
        .unwrap();
    let fault = outcome.fault.unwrap();
    assert_eq!(fault.phase, RunPhase::TopLevel);
    assert_eq!(fault.message, "require is not a function");
}

#[test]
fn stop_handle_from_another_thread() {
    let mut session = blink_session();
    session.start(BLINK, RunOptions::default()).unwrap();
    session.step();

    let handle = session.stop_handle();
    std::thread::spawn(move || handle.stop()).join().unwrap();

    assert_eq!(session.step(), SessionStatus::Stopped);
    let outcome = session.outcome().unwrap();
    assert_eq!(outcome.reason, StopReason::Cancelled);
    assert_eq!(outcome.iterations, 1);
}

#[test]
fn board_selection_limits_pin_resolution() {
    let mut session = blink_session();
    session.add_device("esp32", "esp-1").unwrap();
    session.add_device("led", "led-2").unwrap();
    session
        .connect(Endpoint::new("esp-1", "d2"), Endpoint::new("led-2", "anode"))
        .unwrap();

    session
        .run(
            "void loop() { digitalWrite(2, HIGH); digitalWrite(13, HIGH); }",
            RunOptions::default().with_max_iterations(1).with_board("esp-1"),
        )
        .unwrap();

    assert_eq!(
        session.device("led-2").unwrap().get("state"),
        Some(&PropertyValue::from("on"))
    );
    assert_eq!(
        session.device("led-1").unwrap().get("state"),
        Some(&PropertyValue::from("off"))
    );
}

#[test]
fn out_of_range_sensor_state_does_not_fault() {
    let mut session = empty_session();
    BoardLayout::default_workbench().apply(&mut session).unwrap();
    session
        .set_device_state("temp-1", "currentValue", PropertyValue::from(1e300))
        .unwrap();
    let outcome = session
        .run(
            "void loop() { Serial.println(analogRead(A0)); }",
            RunOptions::default().with_max_iterations(3),
        )
        .unwrap();
    assert_eq!(outcome.reason, StopReason::Completed);
    assert!(outcome.fault.is_none());
}

#[test]
fn deep_recursion_faults_instead_of_aborting() {
    let outcome = std::thread::Builder::new()
        .stack_size(2 * 1024 * 1024)
        .spawn(|| {
            let mut session = blink_session();
            let options = RunOptions {
                max_call_depth: 512,
                ..RunOptions::default().with_max_iterations(1)
            };
            session
                .run(
                    "function f(n) { return 1 + f(n - 1); }\nvoid loop() { f(1000); }",
                    options,
                )
                .unwrap()
        })
        .unwrap()
        .join()
        .unwrap();
    assert_eq!(outcome.reason, StopReason::Faulted);
    assert!(outcome.fault.unwrap().message.starts_with("Maximum call depth exceeded"));
}
