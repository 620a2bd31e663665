mod apify;
mod blocklist;
mod config;
mod error;
mod http;
mod jobs;
mod observability;
mod phones;
mod settings;
mod storage;
mod tg;
mod util;

pub mod membership;

pub use crate::error::*;
pub use config::*;
pub use observability::*;

use std::sync::Arc;

#[allow(unused_imports)]
mod prelude {
    pub(crate) use crate::error::prelude::*;
    pub(crate) use crate::http::prelude::*;
    pub(crate) use crate::observability::logging::prelude::*;
    pub(crate) use crate::util::prelude::*;
}

/// Run the telegram bot processing loop.
///
/// Adding users to the channel requires an MTProto user session, which is
/// opened with the given `session` connector. The bot refuses to add users
/// if it's `None`.
pub async fn run(
    mut config: Config,
    session: Option<Arc<dyn membership::SessionConnector>>,
) -> Result {
    let admin_ids = std::mem::take(&mut config.tg.admin_ids);

    let settings = settings::ConfigStore::load(config.storage.settings_path, admin_ids);
    let blocklist = blocklist::Blocklist::load(config.storage.blocklist_path);
    let jobs = jobs::JobResults::load(config.storage.jobs_path);

    let opts = tg::RunBotOptions {
        tg_cfg: config.tg,
        settings: Arc::new(settings),
        blocklist: Arc::new(blocklist),
        jobs,
        session,
    };

    tg::run_bot(opts).await
}
