use crate::{storage, tg};
use serde::de::DeserializeOwned;

/// Deployment-time configuration. It is read from the environment once at
/// startup and never changes while the process runs. The settings that the
/// admins change at runtime live in [`crate::settings::ConfigStore`].
pub struct Config {
    pub(crate) tg: tg::Config,
    pub(crate) storage: storage::Config,
}

impl Config {
    pub fn load_or_panic() -> Config {
        Self {
            tg: from_env_or_panic("TG_"),
            storage: from_env_or_panic("STORAGE_"),
        }
    }
}

pub(crate) fn from_env_or_panic<T: DeserializeOwned>(prefix: &str) -> T {
    envy::prefixed(prefix).from_env().unwrap_or_else(|err| {
        panic!(
            "BUG: Couldn't load config from environment for {}: {:#?}",
            std::any::type_name::<T>(),
            err
        );
    })
}
