//! Phone number lists and the registration status of the numbers.

mod export;

use crate::prelude::*;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr, PickFirst};
use teloxide::types::UserId;

pub(crate) use export::*;

#[derive(Debug, thiserror::Error)]
pub(crate) enum PhonesError {
    #[error("The file is not a valid CSV document")]
    InvalidCsv { source: csv::Error },

    #[error("The CSV file doesn't contain any phone numbers")]
    NoPhoneNumbers,
}

/// Registration status of a single phone number in Telegram.
#[serde_as]
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PhoneStatus {
    pub phone_number: String,

    #[serde(default)]
    pub is_registered: bool,

    /// Some scraper versions return the ID as a string
    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<u64>,
}

impl PhoneStatus {
    /// ID of the Telegram user that owns the number, if it's registered
    pub fn registered_user(&self) -> Option<UserId> {
        self.user_id.filter(|_| self.is_registered).map(UserId)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckSummary {
    pub total: usize,
    pub registered: usize,
    pub not_registered: usize,
}

impl CheckSummary {
    pub fn new(results: &[PhoneStatus]) -> Self {
        let registered = results.iter().filter(|status| status.is_registered).count();
        Self {
            total: results.len(),
            registered,
            not_registered: results.len() - registered,
        }
    }
}

/// Reads phone numbers from the first column of a CSV document.
///
/// Cells without any digits are skipped, so a header row doesn't end up
/// in the list.
pub(crate) fn parse_phone_csv(input: &[u8]) -> Result<Vec<String>, PhonesError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(input);

    let mut phones = vec![];

    for record in reader.records() {
        let record = record.map_err(|source| PhonesError::InvalidCsv { source })?;

        let Some(cell) = record.get(0) else {
            continue;
        };

        if !cell.chars().any(|char| char.is_ascii_digit()) {
            if !cell.is_empty() {
                debug!(cell, "Skipping a cell that doesn't look like a phone number");
            }
            continue;
        }

        phones.push(cell.to_owned());
    }

    if phones.is_empty() {
        return Err(PhonesError::NoPhoneNumbers);
    }

    info!(count = phones.len(), "Read phone numbers from CSV");

    Ok(phones)
}

/// IDs of the registered users in the order of the results, without duplicates.
pub(crate) fn registered_user_ids(results: &[PhoneStatus]) -> Vec<UserId> {
    results
        .iter()
        .filter_map(PhoneStatus::registered_user)
        .unique()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use expect_test::expect;

    fn status(phone: &str, user_id: Option<u64>) -> PhoneStatus {
        PhoneStatus {
            phone_number: phone.to_owned(),
            is_registered: user_id.is_some(),
            user_id,
        }
    }

    #[test]
    fn parses_the_first_column() {
        let csv = "Phone Number,Name\n+1234567890, Alice\n\n  +7 999 000 11 22 ,Bob,extra\n\"+4915112345678\"\n,empty\n";

        let phones = parse_phone_csv(csv.as_bytes()).unwrap();

        expect![[r#"["+1234567890", "+7 999 000 11 22", "+4915112345678"]"#]]
            .assert_eq(&format!("{phones:?}"));
    }

    #[test]
    fn rejects_files_without_numbers() {
        assert_matches!(
            parse_phone_csv(b"Phone Number\n\n"),
            Err(PhonesError::NoPhoneNumbers)
        );
        assert_matches!(parse_phone_csv(b""), Err(PhonesError::NoPhoneNumbers));
    }

    #[test]
    fn decodes_scraper_items() {
        let items: Vec<PhoneStatus> = serde_json::from_str(
            r#"[
                { "phoneNumber": "+1", "isRegistered": true, "userId": 42, "username": "bob" },
                { "phoneNumber": "+2", "isRegistered": true, "userId": "43" },
                { "phoneNumber": "+3", "isRegistered": false },
                { "phoneNumber": "+4", "isRegistered": false, "userId": null }
            ]"#,
        )
        .unwrap();

        assert_eq!(
            items,
            [
                status("+1", Some(42)),
                status("+2", Some(43)),
                status("+3", None),
                status("+4", None),
            ]
        );
    }

    #[test]
    fn summary_and_registered_ids() {
        let results = [
            status("+1", Some(1)),
            status("+2", None),
            status("+3", Some(3)),
            status("+4", Some(1)),
            PhoneStatus {
                phone_number: "+5".to_owned(),
                is_registered: true,
                user_id: None,
            },
        ];

        assert_eq!(
            CheckSummary::new(&results),
            CheckSummary {
                total: 5,
                registered: 4,
                not_registered: 1,
            }
        );

        assert_eq!(registered_user_ids(&results), [UserId(1), UserId(3)]);
    }
}
