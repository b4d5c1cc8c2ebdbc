#[macro_use]
extern crate criterion;

use criterion::{black_box, Criterion};
use kretslab_core::devices::DeviceCatalog;
use kretslab_simulator::{BoardLayout, RunOptions, SessionSettings, SimulationSession};

const SCRIPT: &str = r#"
void loop() {
  int raw = analogRead(A0);
  analogWrite(13, map(raw, 0, 1023, 0, 255));
  delay(10);
}
"#;

/// Loop iterations per second on the default workbench.
fn benchmark_run_throughput(c: &mut Criterion) {
    let catalog = DeviceCatalog::builtin().expect("builtin catalog");
    let options = RunOptions {
        timeout_budget_ms: None,
        ..RunOptions::default().with_max_iterations(1_000)
    };

    c.bench_function("run_1000_iterations", |b| {
        b.iter(|| {
            let mut session = SimulationSession::new(catalog.clone(), SessionSettings::default());
            BoardLayout::default_workbench()
                .apply(&mut session)
                .expect("workbench");
            black_box(session.run(SCRIPT, options.clone()).expect("run"));
        })
    });
}

criterion_group!(benches, benchmark_run_throughput);
criterion_main!(benches);
