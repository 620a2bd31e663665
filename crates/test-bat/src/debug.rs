use super::{SnapshotFormat, Style};
use expect_test::Expect;
use std::fmt;

struct Imp;

impl<T: fmt::Debug> SnapshotFormat<T> for Imp {
    fn make_snapshot_imp(style: Style, actual: &T) -> String {
        match style {
            Style::Terse => format!("{actual:?}"),
            Style::Verbose => format!("{actual:#?}"),
        }
    }
}

/// Asserts that the [`fmt::Debug`] representation of `actual` is equal to the
/// given expected snapshot. Uses [`make_snapshot`] to make the
/// snapshot fit into a common width of a single screen.
#[track_caller]
pub fn assert_eq<T: fmt::Debug>(actual: T, expected: &Expect) {
    Imp::assert_eq(&actual, expected)
}

/// Same as [`assert_eq`], but specialized for [`Result`].
/// If the result is an [`Err`], then the snapshot will be prefixed
/// with `Err:` and contain the chain of error sources.
#[track_caller]
pub fn assert_result_eq<T, E>(actual: &Result<T, E>, expected: &Expect)
where
    T: fmt::Debug,
    E: std::error::Error,
{
    Imp::assert_result_eq(actual, expected)
}

/// Formats `actual` with its [`fmt::Debug`] implementation. If the result
/// doesn't fit into a single screen, it's pretty-formatted with `#`.
pub fn make_snapshot<T: fmt::Debug>(actual: T) -> String {
    Imp::make_snapshot(&actual)
}
