//! Define the `Location`, `ParseError`, and `ParseResult` types.

#![macro_use]

use std::fmt;

/// The location of a fixture line or `ParseError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Location {
    /// Line number. Fixture lines start from 1; 0 means "no particular line".
    pub line_number: usize,
}

impl Location {
    /// Location of the given 1-based line.
    pub fn line(line_number: usize) -> Self {
        Self { line_number }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.line_number)
    }
}

/// A parse error is returned when the parse failed.
///
/// The same type carries parse warnings, which never abort a run but are
/// collected on the parsed `TestFile`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    /// Location of the error.
    pub location: Location,
    /// Error message.
    pub message: String,
    /// Whether it's a warning or a plain error.
    pub is_warning: bool,
}

impl ParseError {
    /// Build a warning at `location`.
    pub fn warning(location: Location, message: impl Into<String>) -> Self {
        Self {
            location,
            message: message.into(),
            is_warning: true,
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.location.line_number == 0 {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", self.location.line_number, self.message)
        }
    }
}

impl std::error::Error for ParseError {}

/// Result of a parser operation. The `ParseError` variant includes a location.
pub type ParseResult<T> = Result<T, ParseError>;

// Create an `Err` variant of `ParseResult<X>` from a location and `format!` args.
macro_rules! err {
    ( $loc:expr, $msg:expr ) => {
        Err($crate::error::ParseError {
            location: $loc,
            message: $msg.to_string(),
            is_warning: false,
        })
    };

    ( $loc:expr, $fmt:expr, $( $arg:expr ),+ ) => {
        Err($crate::error::ParseError {
            location: $loc,
            message: format!( $fmt, $( $arg ),+ ),
            is_warning: false,
        })
    };
}

// Create a warning `ParseError` from a location and `format!` args.
macro_rules! warning {
    ( $loc:expr, $fmt:expr, $( $arg:expr ),+ ) => {
        $crate::error::ParseError {
            location: $loc,
            message: format!($fmt, $( $arg ),+ ),
            is_warning: true,
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_line_number() {
        let e: ParseResult<()> = err!(Location::line(7), "bad byte '{}'", "0xzz");
        assert_eq!(e.unwrap_err().to_string(), "7: bad byte '0xzz'");
    }

    #[test]
    fn display_without_line() {
        let e = ParseError {
            location: Location::default(),
            message: "empty fixture".to_string(),
            is_warning: false,
        };
        assert_eq!(e.to_string(), "empty fixture");
    }

    #[test]
    fn warning_macro_sets_flag() {
        let w = warning!(Location::line(3), "unknown key '{}'", "Foo");
        assert!(w.is_warning);
        assert_eq!(w.location.line_number, 3);
    }
}
