//! Client of the Apify actor that tells whether phone numbers are
//! registered in Telegram.

use crate::phones::PhoneStatus;
use crate::prelude::*;
use crate::{http, Result};
use serde::Serialize;
use std::future::Future;

/// The actor accepts at most this many numbers in a single run
const BATCH_SIZE: usize = 10;

const ACTOR_RUN_URL: &str = "https://api.apify.com/v2/acts/wilcode~telegram-phone-number-checker/run-sync-get-dataset-items";

#[derive(Debug, thiserror::Error)]
pub(crate) enum ApifyError {
    #[error("Apify API token is not configured, set it with /set_apify_token")]
    MissingToken,

    #[error("All {batches} batches of phone numbers failed to be checked")]
    AllBatchesFailed { batches: usize, source: crate::Error },
}

impl ApifyError {
    pub(crate) fn is_user_error(&self) -> bool {
        match self {
            Self::MissingToken => true,
            Self::AllBatchesFailed { .. } => false,
        }
    }
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct ActorInput<'a> {
    phone_numbers: &'a [String],
    proxy_configuration: ProxyConfiguration,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct ProxyConfiguration {
    use_apify_proxy: bool,
    apify_proxy_groups: Vec<&'static str>,
}

impl<'a> ActorInput<'a> {
    fn new(phone_numbers: &'a [String]) -> Self {
        Self {
            phone_numbers,
            proxy_configuration: ProxyConfiguration {
                use_apify_proxy: true,
                apify_proxy_groups: vec!["SHADER"],
            },
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct CheckReport {
    pub(crate) results: Vec<PhoneStatus>,
    pub(crate) failed_batches: usize,
}

pub(crate) struct Client {
    http: http::Client,
    token: String,
}

impl Client {
    /// Fails if the token is empty, that is when the admin hasn't set it yet.
    pub(crate) fn new(http: http::Client, token: &str) -> Result<Self> {
        if token.is_empty() {
            return Err(ApifyError::MissingToken.into());
        }
        Ok(Self {
            http,
            token: token.to_owned(),
        })
    }

    /// Checks the numbers in batches. A batch that fails is logged and
    /// counted, and the rest of the batches are still checked.
    #[instrument(skip_all, fields(phones = phones.len()))]
    pub(crate) async fn check_phones(&self, phones: &[String]) -> Result<CheckReport> {
        check_in_batches(phones, |batch| self.check_batch(batch)).await
    }

    async fn check_batch(&self, batch: &[String]) -> Result<Vec<PhoneStatus>> {
        self.http
            .post(ACTOR_RUN_URL)
            .bearer_auth(&self.token)
            .send_and_read_json(ActorInput::new(batch))
            .await
    }
}

async fn check_in_batches<'p, F, Fut>(
    phones: &'p [String],
    mut check_batch: F,
) -> Result<CheckReport>
where
    F: FnMut(&'p [String]) -> Fut,
    Fut: Future<Output = Result<Vec<PhoneStatus>>> + Send,
{
    let mut report = CheckReport::default();
    let mut last_err = None;
    let batches = phones.chunks(BATCH_SIZE);
    let total_batches = batches.len();

    for (i, batch) in batches.enumerate() {
        debug!(batch = i, ?batch, "Checking a batch of phone numbers");

        match check_batch(batch).with_duration_log("Checking a batch").await {
            Ok(results) => {
                metrics::counter!("apify_phone_numbers_checked_total", "status" => "ok")
                    .increment(batch.len() as u64);
                report.results.extend(results);
            }
            Err(err) => {
                metrics::counter!("apify_phone_numbers_checked_total", "status" => "err")
                    .increment(batch.len() as u64);
                error!(
                    batch = i,
                    ?batch,
                    err = tracing_err(&err),
                    "Failed to check a batch of phone numbers"
                );
                report.failed_batches += 1;
                last_err = Some(err);
            }
        }
    }

    if let Some(source) = last_err.filter(|_| report.failed_batches == total_batches) {
        return Err(ApifyError::AllBatchesFailed {
            batches: total_batches,
            source,
        }
        .into());
    }

    info!(
        results = report.results.len(),
        failed_batches = report.failed_batches,
        "Finished checking phone numbers"
    );

    Ok(report)
}
