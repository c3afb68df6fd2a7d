use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// The only request the master ever sends.
pub const POLL_COMMAND: &str = "POLL";

pub const CPU_MARKER: &str = "CPU:";
pub const NVME_MARKER: &str = "|NVME:";

/// One accepted temperature reading from a sensor unit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub cpu_temp: f32,
    pub nvme_temp: f32,
}

/// A reading together with the local time it was accepted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimestampedReading {
    pub cpu_temp: f32,
    pub nvme_temp: f32,
    pub when: DateTime<Local>,
}

impl Reading {
    pub fn with_timestamp(self, when: DateTime<Local>) -> TimestampedReading {
        TimestampedReading {
            cpu_temp: self.cpu_temp,
            nvme_temp: self.nvme_temp,
            when,
        }
    }
}

/// Parse a response body of the form `CPU:<float>|NVME:<float>`.
///
/// Both markers must be present; leading/trailing whitespace around the body
/// is tolerated (serial lines sometimes carry a stray space). Returns `None`
/// for anything else, leaving the caller to treat the line as an unknown
/// command.
pub fn parse_reading(body: &str) -> Option<Reading> {
    let body = body.trim();
    let cpu_pos = body.find(CPU_MARKER)?;
    let nvme_pos = body.find(NVME_MARKER)?;
    if nvme_pos < cpu_pos + CPU_MARKER.len() {
        return None;
    }

    let cpu_str = &body[cpu_pos + CPU_MARKER.len()..nvme_pos];
    let nvme_str = &body[nvme_pos + NVME_MARKER.len()..];

    let cpu_temp = cpu_str.trim().parse::<f32>().ok()?;
    let nvme_temp = nvme_str.trim().parse::<f32>().ok()?;

    Some(Reading {
        cpu_temp,
        nvme_temp,
    })
}

/// Format a response line, terminator included. Floats carry exactly two
/// fraction digits so the wire format stays fixed-width friendly.
pub fn format_reading(cpu_temp: f32, nvme_temp: f32) -> String {
    format!("CPU:{cpu_temp:.2}|NVME:{nvme_temp:.2}\n")
}

/// Strip surrounding whitespace and line endings from a received command body.
pub fn clean_command(body: &str) -> &str {
    body.trim_matches(|c: char| c == '\n' || c == '\r' || c == ' ' || c == '\t')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_reading() {
        let reading = parse_reading("CPU:45.12|NVME:38.00").unwrap();
        assert_eq!(reading.cpu_temp, 45.12);
        assert_eq!(reading.nvme_temp, 38.00);
    }

    #[test]
    fn parses_reading_with_surrounding_whitespace() {
        let reading = parse_reading("  CPU:45.0|NVME:38.5 ").unwrap();
        assert_eq!(reading.cpu_temp, 45.0);
        assert_eq!(reading.nvme_temp, 38.5);
    }

    #[test]
    fn rejects_missing_markers() {
        assert!(parse_reading("CPU:45.12").is_none());
        assert!(parse_reading("NVME:38.00").is_none());
        assert!(parse_reading("POLL").is_none());
        assert!(parse_reading("").is_none());
    }

    #[test]
    fn rejects_garbled_floats() {
        assert!(parse_reading("CPU:forty|NVME:38.00").is_none());
        assert!(parse_reading("CPU:45.12|NVME:").is_none());
    }

    #[test]
    fn formats_two_fraction_digits() {
        assert_eq!(format_reading(45.0, 38.0), "CPU:45.00|NVME:38.00\n");
        assert_eq!(format_reading(45.125, 38.5), "CPU:45.12|NVME:38.50\n");
    }

    #[test]
    fn round_trip() {
        let line = format_reading(45.12, 38.0);
        let reading = parse_reading(line.trim_end()).unwrap();
        assert_eq!(reading.cpu_temp, 45.12);
        assert_eq!(reading.nvme_temp, 38.0);
    }

    #[test]
    fn clean_strips_line_endings_and_whitespace() {
        assert_eq!(clean_command("POLL\r\n"), "POLL");
        assert_eq!(clean_command("  POLL \t"), "POLL");
        assert_eq!(clean_command("\r\n"), "");
    }
}
