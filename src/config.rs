use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{ConfigError, DisplayError, StartupError};
use crate::models::{CheckMethod, Color, Coordinate};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MonitorConfig {
    #[serde(default)]
    pub settings: Settings,
    pub records: Vec<Record>,
    /// Source line of each record, for CSV input.
    #[serde(skip)]
    lines: Vec<usize>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Settings {
    #[serde(default = "default_pre_probe_delay_ms")]
    pub pre_probe_delay_ms: u64,
    #[serde(default = "default_scroll_speed")]
    pub scroll_speed: f32,
    #[serde(default = "default_grid_size")]
    pub grid_width: u8,
    #[serde(default = "default_grid_size")]
    pub grid_height: u8,
    #[serde(default)]
    pub backend: Backend,
    pub api_port: Option<u16>,
}

/// Slowest accepted scroll, in seconds per column.
pub const MAX_SCROLL_SPEED: f32 = 10.0;

fn default_pre_probe_delay_ms() -> u64 { 1000 }
fn default_scroll_speed() -> f32 { 0.05 }
fn default_grid_size() -> u8 { 8 }

impl Default for Settings {
    fn default() -> Self {
        Self {
            pre_probe_delay_ms: default_pre_probe_delay_ms(),
            scroll_speed: default_scroll_speed(),
            grid_width: default_grid_size(),
            grid_height: default_grid_size(),
            backend: Backend::default(),
            api_port: None,
        }
    }
}

impl Settings {
    pub fn pre_probe_delay(&self) -> Duration {
        Duration::from_millis(self.pre_probe_delay_ms)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Shell out to the system `ping` and `curl`.
    #[default]
    Command,
    /// In-process ICMP and HTTP.
    Native,
}

/// One configuration row. Intervals and durations are whole seconds.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Record {
    Report {
        x: i64,
        y: i64,
        interval: u64,
    },
    Ping {
        x: i64,
        y: i64,
        target: String,
        interval: u64,
    },
    Curl {
        x: i64,
        y: i64,
        target: String,
        interval: u64,
    },
    Color {
        x: i64,
        y: i64,
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        on: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        off: Option<u64>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct CheckSpec {
    pub at: Coordinate,
    pub method: CheckMethod,
    pub target: String,
    pub interval: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorSpec {
    pub at: Coordinate,
    pub on_color: Color,
    pub off_color: Color,
    pub on: Duration,
    pub off: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StaticPixel {
    pub at: Coordinate,
    pub color: Color,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReportSpec {
    pub at: Coordinate,
    pub interval: Duration,
}

/// Validated configuration, ready for the supervisor.
#[derive(Debug, Clone)]
pub struct Plan {
    pub checks: Vec<CheckSpec>,
    pub indicators: Vec<IndicatorSpec>,
    pub pixels: Vec<StaticPixel>,
    pub report: ReportSpec,
}

impl MonitorConfig {
    /// Reads `path`, as JSON when the extension is `.json` and as CSV rows otherwise.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            Self::from_json(&content)
        } else {
            Self::from_csv(&content)
        }
    }

    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(content)?)
    }

    /// Parses `x,y,kind,...` rows. Blank lines and `#` comments are skipped.
    pub fn from_csv(content: &str) -> Result<Self, ConfigError> {
        let mut records = Vec::new();
        let mut lines = Vec::new();

        for (idx, raw) in content.lines().enumerate() {
            let line = idx + 1;
            let raw = raw.trim();
            if raw.is_empty() || raw.starts_with('#') {
                continue;
            }
            let fields: Vec<&str> = raw.split(',').map(str::trim).collect();
            records.push(parse_row(line, &fields)?);
            lines.push(line);
        }

        Ok(Self {
            settings: Settings::default(),
            records,
            lines,
        })
    }

    fn position(&self, idx: usize) -> usize {
        self.lines.get(idx).copied().unwrap_or(idx + 1)
    }

    /// Validates every record against the settings. Any error rejects the whole config.
    pub fn plan(&self) -> Result<Plan, ConfigError> {
        let speed = self.settings.scroll_speed;
        if !(0.0..=MAX_SCROLL_SPEED).contains(&speed) {
            return Err(ConfigError::ScrollSpeed { value: speed, max: MAX_SCROLL_SPEED });
        }

        let grid = (self.settings.grid_width, self.settings.grid_height);
        let mut checks = Vec::new();
        let mut indicators = Vec::new();
        let mut pixels = Vec::new();
        let mut report: Option<(usize, ReportSpec)> = None;

        for (idx, record) in self.records.iter().enumerate() {
            let pos = self.position(idx);
            match record {
                Record::Report { x, y, interval } => {
                    if let Some((first, _)) = report {
                        return Err(ConfigError::DuplicateReport { record: pos, first });
                    }
                    let spec = ReportSpec {
                        at: coordinate(pos, *x, *y, grid)?,
                        interval: seconds(pos, "interval", *interval)?,
                    };
                    report = Some((pos, spec));
                }
                Record::Ping { x, y, target, interval }
                | Record::Curl { x, y, target, interval } => {
                    let method = match record {
                        Record::Ping { .. } => CheckMethod::Ping,
                        _ => CheckMethod::Curl,
                    };
                    if target.is_empty() {
                        return Err(ConfigError::Malformed {
                            line: pos,
                            message: format!("{} record has an empty target", method),
                        });
                    }
                    checks.push(CheckSpec {
                        at: coordinate(pos, *x, *y, grid)?,
                        method,
                        target: target.clone(),
                        interval: seconds(pos, "interval", *interval)?,
                    });
                }
                Record::Color { x, y, name, on, off } => {
                    let at = coordinate(pos, *x, *y, grid)?;
                    let color = Color::from_name(name).ok_or_else(|| ConfigError::UnknownColor {
                        record: pos,
                        name: name.clone(),
                    })?;
                    match (on, off) {
                        (Some(on), Some(off)) => indicators.push(IndicatorSpec {
                            at,
                            on_color: color,
                            off_color: Color::OFF,
                            on: seconds(pos, "on", *on)?,
                            off: seconds(pos, "off", *off)?,
                        }),
                        (None, None) => pixels.push(StaticPixel { at, color }),
                        _ => {
                            return Err(ConfigError::Malformed {
                                line: pos,
                                message: "color record needs both on and off durations or neither"
                                    .into(),
                            })
                        }
                    }
                }
            }
        }

        let (_, report) = report.ok_or(ConfigError::MissingReport)?;
        Ok(Plan {
            checks,
            indicators,
            pixels,
            report,
        })
    }

    /// Validates the records, then builds the screen. The screen is never
    /// created for a rejected configuration.
    pub fn prepare<S>(
        &self,
        build_screen: impl FnOnce(&Settings) -> Result<S, DisplayError>,
    ) -> Result<(Plan, S), StartupError> {
        let plan = self.plan()?;
        let screen = build_screen(&self.settings)?;
        Ok((plan, screen))
    }
}

fn parse_row(line: usize, fields: &[&str]) -> Result<Record, ConfigError> {
    let malformed = |message: String| ConfigError::Malformed { line, message };
    let int = |field: &str, name: &str| -> Result<i64, ConfigError> {
        field
            .parse::<i64>()
            .map_err(|_| malformed(format!("{} is not an integer: {:?}", name, field)))
    };
    let secs = |field: &str, name: &str| -> Result<u64, ConfigError> {
        field
            .parse::<u64>()
            .map_err(|_| {
                malformed(format!("{} is not a whole number of seconds: {:?}", name, field))
            })
    };

    if fields.len() < 3 {
        return Err(malformed(format!("expected at least 3 fields, found {}", fields.len())));
    }
    let x = int(fields[0], "x")?;
    let y = int(fields[1], "y")?;
    let kind = fields[2];

    let arity = |expected: &[usize]| -> Result<(), ConfigError> {
        if expected.contains(&fields.len()) {
            Ok(())
        } else {
            Err(malformed(format!(
                "{} record expects {:?} fields, found {}",
                kind,
                expected,
                fields.len()
            )))
        }
    };

    match kind {
        "report" => {
            arity(&[4])?;
            Ok(Record::Report { x, y, interval: secs(fields[3], "interval")? })
        }
        "ping" | "curl" => {
            arity(&[5])?;
            let target = fields[3].to_string();
            let interval = secs(fields[4], "interval")?;
            Ok(if kind == "ping" {
                Record::Ping { x, y, target, interval }
            } else {
                Record::Curl { x, y, target, interval }
            })
        }
        "color" => {
            arity(&[4, 6])?;
            let (on, off) = if fields.len() == 6 {
                (Some(secs(fields[4], "on")?), Some(secs(fields[5], "off")?))
            } else {
                (None, None)
            };
            Ok(Record::Color { x, y, name: fields[3].to_string(), on, off })
        }
        other => Err(ConfigError::UnknownMethod {
            record: line,
            method: other.to_string(),
        }),
    }
}

fn coordinate(
    record: usize,
    x: i64,
    y: i64,
    (width, height): (u8, u8),
) -> Result<Coordinate, ConfigError> {
    let in_range = |v: i64, max: u8| v >= 1 && v <= i64::from(max);
    if !in_range(x, width) || !in_range(y, height) {
        return Err(ConfigError::OutOfGrid { record, x, y, width, height });
    }
    // Both values fit in u8 once inside the grid.
    Ok(Coordinate::new(x as u8, y as u8))
}

fn seconds(record: usize, field: &'static str, value: u64) -> Result<Duration, ConfigError> {
    if value == 0 {
        return Err(ConfigError::ZeroDuration { record, field });
    }
    Ok(Duration::from_secs(value))
}
