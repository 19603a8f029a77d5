// Output formatting utilities for the ripple CLI

use crate::error::AnalysisError;
use std::io::IsTerminal;

// Colors for terminal output (when supported)
pub const RED: &str = "\x1b[0;31m";
pub const GREEN: &str = "\x1b[0;32m";
pub const YELLOW: &str = "\x1b[1;33m";
pub const CYAN: &str = "\x1b[0;36m";
pub const BOLD: &str = "\x1b[1m";
pub const NC: &str = "\x1b[0m"; // No Color

/// Check if stdout is a terminal (for color output)
#[inline]
pub fn is_terminal() -> bool {
    std::io::stdout().is_terminal()
}

/// Print info message
pub fn info(msg: &str) {
    let color = if is_terminal() { GREEN } else { "" };
    let reset = if is_terminal() { NC } else { "" };
    println!("{}[INFO]{} {}", color, reset, msg);
}

/// Print warning message
pub fn warn(msg: &str) {
    let color = if is_terminal() { YELLOW } else { "" };
    let reset = if is_terminal() { NC } else { "" };
    eprintln!("{}[WARN]{} {}", color, reset, msg);
}

/// Print error message
pub fn error(msg: &str) {
    let color = if is_terminal() { RED } else { "" };
    let reset = if is_terminal() { NC } else { "" };
    eprintln!("{}[ERROR]{} {}", color, reset, msg);
}

/// Print section header
pub fn header(msg: &str) {
    let bold = if is_terminal() { BOLD } else { "" };
    let reset = if is_terminal() { NC } else { "" };
    println!("{}===>{} {}", bold, reset, msg);
    println!();
}

/// Exit codes
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_ERROR: i32 = 1;
pub const EXIT_USAGE: i32 = 2;
pub const EXIT_FILE_NOT_FOUND: i32 = 4;
pub const EXIT_VALIDATION: i32 = 5;

/// Exit with usage error
pub fn exit_usage(msg: &str) -> ! {
    error(msg);
    std::process::exit(EXIT_USAGE);
}

/// JSON output wrapper for programmatic consumption
#[derive(Debug, Clone, serde::Serialize)]
pub struct JsonResponse<T> {
    pub schema_version: String,
    pub execution_id: String,
    pub tool: String,
    pub timestamp: String,
    pub data: T,
}

impl<T: serde::Serialize> JsonResponse<T> {
    pub fn new(data: T) -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};

        let timestamp = chrono::Utc::now().to_rfc3339();
        let exec_id = format!(
            "{:x}-{}",
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
            std::process::id()
        );

        JsonResponse {
            schema_version: "1.0.0".to_string(),
            execution_id: exec_id,
            tool: "ripple".to_string(),
            timestamp,
            data,
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn to_pretty_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}

/// Error response format for JSON mode: kind, phase and offending node
#[derive(Debug, Clone, serde::Serialize)]
pub struct JsonError {
    pub error: String,
    pub message: String,
    pub phase: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node: Option<usize>,
}

impl JsonError {
    pub fn from_analysis(err: &AnalysisError) -> Self {
        let kind = match err {
            AnalysisError::Input { .. } => "InputError",
            AnalysisError::Domain { .. } => "DomainError",
            AnalysisError::CyclicGraph { .. } => "CyclicGraphError",
            AnalysisError::DiamondRecursion { .. } => "DiamondRecursionError",
            AnalysisError::Numerical { .. } => "NumericalError",
            AnalysisError::Cancelled { .. } => "Cancelled",
        };
        JsonError {
            error: kind.to_string(),
            message: err.to_string(),
            phase: err.phase().to_string(),
            node: err.node(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_response() {
        let data = vec!["item1", "item2"];
        let response = JsonResponse::new(data);
        let json = response.to_json();
        assert!(json.contains("\"tool\":\"ripple\""));
        assert!(json.contains("\"data\":[\"item1\",\"item2\"]"));
    }

    #[test]
    fn test_json_error_carries_phase_and_node() {
        let err = AnalysisError::Numerical { node: 7, op: "belief update" };
        let json_err = JsonError::from_analysis(&err);
        assert_eq!(json_err.error, "NumericalError");
        assert_eq!(json_err.phase, "belief");
        assert_eq!(json_err.node, Some(7));
    }

    #[test]
    fn test_every_phase_is_a_documented_one() {
        let errors = [
            AnalysisError::Input { message: "missing file".to_string() },
            AnalysisError::Domain { message: "bad interval".to_string() },
            AnalysisError::CyclicGraph { unassigned: 2 },
            AnalysisError::DiamondRecursion { join_node: 4, depth: 300 },
            AnalysisError::Numerical { node: 4, op: "belief update" },
            AnalysisError::Cancelled { partial: Default::default() },
        ];
        for err in &errors {
            let phase = err.phase();
            assert!(
                ["preprocessing", "identification", "hierarchy", "belief"].contains(&phase),
                "{err}: unexpected phase {phase:?}"
            );
        }
        assert_eq!(errors[0].phase(), "preprocessing");
        assert_eq!(errors[1].phase(), "preprocessing");
    }
}
