//! Batteries for writing snapshot tests with [`expect_test`].

pub mod debug;
pub mod json;

use expect_test::Expect;

/// Approximate number of characters that can fit on a single screen
const COMMON_SCREEN_CHARS_WIDTH: usize = 60;

#[derive(Clone, Copy)]
enum Style {
    Terse,
    Verbose,
}

trait SnapshotFormat<T> {
    fn make_snapshot_imp(style: Style, actual: &T) -> String;

    /// Uses the terse style unless its widest line doesn't fit into
    /// a single screen.
    fn make_snapshot(actual: &T) -> String {
        let terse = Self::make_snapshot_imp(Style::Terse, actual);

        let width = terse.lines().map(str::len).max().unwrap_or(0);

        if width >= COMMON_SCREEN_CHARS_WIDTH {
            return Self::make_snapshot_imp(Style::Verbose, actual);
        }

        terse
    }

    #[track_caller]
    fn assert_eq(actual: &T, expected: &Expect) {
        expected.assert_eq(&Self::make_snapshot(actual));
    }

    #[track_caller]
    fn assert_result_eq<E: std::error::Error>(actual: &Result<T, E>, expected: &Expect) {
        let snapshot = match actual {
            Ok(actual) => Self::make_snapshot(actual),
            Err(err) => format!("Err: {}", display_chain(err)),
        };
        expected.assert_eq(&snapshot);
    }
}

fn display_chain(err: &dyn std::error::Error) -> String {
    let mut chain = err.to_string();
    let mut source = err.source();
    while let Some(err) = source {
        chain += &format!("\nCaused by: {err}");
        source = err.source();
    }
    chain
}
