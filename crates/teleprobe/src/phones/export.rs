use super::PhoneStatus;
use crate::prelude::*;
use crate::util::encoding;
use crate::Result;

const RESULTS_CSV_HEADER: [&str; 3] = [
    "Phone Number",
    "Registered on Telegram",
    "Telegram User ID",
];

/// Serializes the check results into a CSV document. The user ID column is
/// empty for the numbers that aren't registered.
pub(crate) fn results_to_csv(results: &[PhoneStatus]) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(vec![]);

    writer
        .write_record(RESULTS_CSV_HEADER)
        .fatal_ctx(|| "Failed to write the CSV header")?;

    for status in results {
        let user_id = status
            .registered_user()
            .map(|id| id.to_string())
            .unwrap_or_default();

        let is_registered = if status.is_registered { "True" } else { "False" };

        writer
            .write_record([status.phone_number.as_str(), is_registered, user_id.as_str()])
            .fatal_ctx(|| "Failed to write a CSV record")?;
    }

    writer
        .into_inner()
        .map_err(|err| err.into_error())
        .fatal_ctx(|| "Failed to flush the CSV writer")
}

/// Pretty JSON array of the results that have a registered Telegram user.
pub(crate) fn registered_to_json(results: &[PhoneStatus]) -> Vec<u8> {
    let registered: Vec<_> = results
        .iter()
        .filter(|status| status.registered_user().is_some())
        .collect();

    encoding::to_json_string_pretty(&registered).into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use expect_test::expect;

    fn results() -> Vec<PhoneStatus> {
        vec![
            PhoneStatus {
                phone_number: "+1234567890".to_owned(),
                is_registered: true,
                user_id: Some(42),
            },
            PhoneStatus {
                phone_number: "+1987654321".to_owned(),
                is_registered: false,
                user_id: None,
            },
        ]
    }

    #[test]
    fn csv_export() {
        let csv = results_to_csv(&results()).unwrap();

        expect![[r#"
            Phone Number,Registered on Telegram,Telegram User ID
            +1234567890,True,42
            +1987654321,False,
        "#]]
        .assert_eq(std::str::from_utf8(&csv).unwrap());
    }

    #[test]
    fn json_export() {
        let json = registered_to_json(&results());

        expect![[r#"
            [
              {
                "phoneNumber": "+1234567890",
                "isRegistered": true,
                "userId": 42
              }
            ]"#]]
        .assert_eq(std::str::from_utf8(&json).unwrap());
    }
}
