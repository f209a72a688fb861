//! Fleet health on a small pixel grid.
//!
//! ```text
//! Monitor
//!   ├── CheckLoop × N      probe -> StatusBoard -> pixel
//!   ├── IndicatorLoop × M  on/off pixel blink
//!   └── ReportLoop         StatusBoard -> "{up}/{total} UP {down}/{total} DOWN"
//! ```
//!
//! Loops share nothing but the [`StatusBoard`] and the injected [`Screen`].

pub mod api;
pub mod board;
pub mod config;
pub mod display;
pub mod engine;
pub mod error;
pub mod models;
pub mod probe;

pub use board::{Report, StatusBoard};
pub use config::{MonitorConfig, Plan, Settings};
pub use display::{FrameBuffer, Screen, TerminalScreen};
pub use engine::{CheckLoop, IndicatorLoop, Monitor, ReportLoop};
pub use error::{ConfigError, DisplayError, LoopError, StartupError};
pub use probe::{CommandProber, HttpCheck, NativeProber, Probe, Prober};
