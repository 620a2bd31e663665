use super::{SnapshotFormat, Style};
use expect_test::Expect;
use serde::Serialize;

struct Imp;

impl<T: Serialize> SnapshotFormat<T> for Imp {
    fn make_snapshot_imp(style: Style, actual: &T) -> String {
        let result = match style {
            Style::Terse => serde_json::to_string(actual),
            Style::Verbose => serde_json::to_string_pretty(actual),
        };
        result.unwrap_or_else(|err| panic!("Couldn't serialize the snapshot: {err}"))
    }
}

/// Asserts that the JSON representation of `actual` is equal to the
/// given expected snapshot. Uses [`make_snapshot`] to make the
/// snapshot fit into a common width of a single screen.
#[track_caller]
pub fn assert_eq<T: Serialize>(actual: T, expected: &Expect) {
    Imp::assert_eq(&actual, expected)
}

/// Same as [`self::assert_eq`], but specialized for [`Result`].
/// If the result is an [`Err`], then the snapshot will be prefixed
/// with `Err:` and contain the chain of error sources.
#[track_caller]
pub fn assert_result_eq<T, E>(actual: &Result<T, E>, expected: &Expect)
where
    T: Serialize,
    E: std::error::Error,
{
    Imp::assert_result_eq(actual, expected)
}

/// Formats `actual` as JSON. If the result doesn't fit into a single screen,
/// it's pretty-printed.
pub fn make_snapshot<T: Serialize>(actual: T) -> String {
    Imp::make_snapshot(&actual)
}
