use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Coordinate {
    pub x: u8,
    pub y: u8,
}

impl Coordinate {
    pub const fn new(x: u8, y: u8) -> Self {
        Self { x, y }
    }

    /// Zero-based (column, row) of this cell on the display surface.
    pub fn cell(&self) -> Option<(usize, usize)> {
        let col = usize::from(self.x.checked_sub(1)?);
        let row = usize::from(self.y.checked_sub(1)?);
        Some((col, row))
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Color(pub u8, pub u8, pub u8);

impl Color {
    pub const SUCCESS: Color = Color(0, 255, 0);
    pub const FAILURE: Color = Color(255, 0, 0);
    pub const PENDING: Color = Color(255, 255, 0);
    pub const OFF: Color = Color(0, 0, 0);

    /// Resolves a configured color name or `#rrggbb` literal.
    pub fn from_name(name: &str) -> Option<Color> {
        let name = name.trim().to_ascii_lowercase();
        let color = match name.as_str() {
            "red" => Color::FAILURE,
            "green" => Color::SUCCESS,
            "yellow" => Color::PENDING,
            "blue" => Color(0, 0, 255),
            "white" => Color(255, 255, 255),
            "orange" => Color(255, 165, 0),
            "purple" => Color(128, 0, 128),
            "off" | "black" => Color::OFF,
            hex => return Self::from_hex(hex),
        };
        Some(color)
    }

    fn from_hex(s: &str) -> Option<Color> {
        let digits = s.strip_prefix('#')?;
        if digits.len() != 6 || !digits.is_ascii() {
            return None;
        }
        let channel = |i: usize| u8::from_str_radix(&digits[i..i + 2], 16).ok();
        Some(Color(channel(0)?, channel(2)?, channel(4)?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckMethod {
    /// ICMP echo reachability.
    Ping,
    /// HTTP GET that must answer 200.
    Curl,
}

impl CheckMethod {
    pub fn parse(s: &str) -> Option<CheckMethod> {
        match s {
            "ping" => Some(CheckMethod::Ping),
            "curl" => Some(CheckMethod::Curl),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CheckMethod::Ping => "ping",
            CheckMethod::Curl => "curl",
        }
    }
}

impl fmt::Display for CheckMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Up,
    Down,
}

impl Status {
    pub fn color(&self) -> Color {
        match self {
            Status::Up => Color::SUCCESS,
            Status::Down => Color::FAILURE,
        }
    }
}

impl From<bool> for Status {
    fn from(up: bool) -> Self {
        if up { Status::Up } else { Status::Down }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    pub status: Status,
    pub method: CheckMethod,
    pub target: String,
    pub timestamp: DateTime<Utc>,
    pub latency_ms: Option<f64>,
    pub detail: Option<String>,
}

impl CheckResult {
    pub fn is_up(&self) -> bool {
        self.status == Status::Up
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_colors_are_case_insensitive() {
        assert_eq!(Color::from_name("Green"), Some(Color::SUCCESS));
        assert_eq!(Color::from_name(" RED "), Some(Color::FAILURE));
        assert_eq!(Color::from_name("yellow"), Some(Color::PENDING));
    }

    #[test]
    fn hex_colors() {
        assert_eq!(Color::from_name("#0a10FF"), Some(Color(10, 16, 255)));
        assert_eq!(Color::from_name("#0a10F"), None);
        assert_eq!(Color::from_name("#zz0000"), None);
        assert_eq!(Color::from_name("magenta"), None);
    }

    #[test]
    fn coordinate_cell_is_zero_based() {
        assert_eq!(Coordinate::new(1, 1).cell(), Some((0, 0)));
        assert_eq!(Coordinate::new(8, 3).cell(), Some((7, 2)));
        assert_eq!(Coordinate::new(0, 3).cell(), None);
    }

    #[test]
    fn method_parse_is_closed() {
        assert_eq!(CheckMethod::parse("ping"), Some(CheckMethod::Ping));
        assert_eq!(CheckMethod::parse("curl"), Some(CheckMethod::Curl));
        assert_eq!(CheckMethod::parse("foo"), None);
        assert_eq!(CheckMethod::parse("PING"), None);
    }
}
