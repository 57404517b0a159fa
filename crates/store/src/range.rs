use std::{fmt, str::FromStr};

/// An inclusive `[a, b]` range of tunnel ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRange {
    start: u16,
    end: u16,
}

impl PortRange {
    /// Builds a range, rejecting `start == 0`, `end == 0`, or `start > end`.
    pub fn new(start: u16, end: u16) -> Result<Self, PortRangeParseError> {
        if start == 0 || end == 0 {
            return Err(PortRangeParseError(
                "port range bounds must be in (0, 65535)".to_string(),
            ));
        }

        if start > end {
            return Err(PortRangeParseError(format!(
                "range start {start} is greater than end {end}"
            )));
        }

        Ok(Self { start, end })
    }

    pub fn start(&self) -> u16 {
        self.start
    }

    pub fn end(&self) -> u16 {
        self.end
    }

    pub fn contains(&self, port: u16) -> bool {
        port >= self.start && port <= self.end
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.start, self.end)
    }
}

#[derive(Debug)]
pub struct PortRangeParseError(String);

impl std::error::Error for PortRangeParseError {}

impl fmt::Display for PortRangeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<std::num::ParseIntError> for PortRangeParseError {
    fn from(error: std::num::ParseIntError) -> Self {
        PortRangeParseError(error.to_string())
    }
}

/// Parses `"A:B"` into a [`PortRange`], e.g. `"22000:22100"`.
impl FromStr for PortRange {
    type Err = PortRangeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (start, end) = s
            .split_once(':')
            .ok_or_else(|| PortRangeParseError(format!("expected \"A:B\", got {s:?}")))?;

        Self::new(start.parse()?, end.parse()?)
    }
}
