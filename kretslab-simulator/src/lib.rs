/*!
# Kretslab Simulator

Runs device control scripts against a virtual workbench of sensors,
actuators, boards, displays and radio modules.

## Key Components:
- **Session:** owns the workbench and drives the run state machine.
- **Hardware Bus:** the whitelisted API scripts call (`digitalWrite`, `WiFi.begin`, ...).
- **Emulation:** seeded sensor noise, reseeded at every run start so a seed
  replays a run exactly.
- **Board Layouts:** YAML descriptions of devices and their wiring.
*/

pub mod board;
pub mod emulation;
pub mod error;
pub mod hardware;
pub mod pins;
pub mod session;

pub use board::BoardLayout;
pub use emulation::{Emulation, EmulationParams};
pub use error::{BoardError, SessionError};
pub use hardware::HardwareBus;
pub use session::{
    RunOptions, RunOutcome, RunPhase, RuntimeFault, SessionSettings, SessionStatus,
    SimulationSession, SnapshotEntry, StopHandle, StopReason,
};
