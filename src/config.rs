use std::{
    env::{self, VarError},
    path::PathBuf,
    time::Duration,
};

use anyhow::{Context, bail};
use rearch::{CData, CapsuleHandle, Container};
use sea_orm::DbConn;
use tracing::{info, instrument, warn};

use crate::link_repo::ensure_store;

pub const DEFAULT_DATABASE_PATH: &str = "data/url.sqlite.db";
pub const DEFAULT_ADDR: &str = "127.0.0.1:0";

/// Everything the service needs from its environment, read once at startup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppConfig {
    /// Backing store file; created on first run together with its directories.
    pub database_path: PathBuf,
    pub addr: String,
    /// `None` lets the reachability probe wait for as long as the upstream
    /// takes, which is the default.
    pub probe_timeout: Option<Duration>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from(DEFAULT_DATABASE_PATH),
            addr: DEFAULT_ADDR.to_owned(),
            probe_timeout: None,
        }
    }
}

impl AppConfig {
    /// Reads `DATABASE_PATH`, `ADDR`, and `PROBE_TIMEOUT_SECS`.
    ///
    /// # Errors
    /// Will return [`Err`] if a variable is set but is not valid unicode, or
    /// if `PROBE_TIMEOUT_SECS` is not a whole number of seconds.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| env::var(name))
    }

    fn from_lookup(lookup: impl Fn(&str) -> Result<String, VarError>) -> anyhow::Result<Self> {
        let defaults = Self::default();

        let database_path = read_var(&lookup, "DATABASE_PATH")?.map_or_else(
            || {
                warn!(
                    path = DEFAULT_DATABASE_PATH,
                    "DATABASE_PATH environment variable not set; defaulting to {DEFAULT_DATABASE_PATH}"
                );
                defaults.database_path
            },
            PathBuf::from,
        );

        let addr = read_var(&lookup, "ADDR")?.unwrap_or_else(|| {
            warn!(
                addr = DEFAULT_ADDR,
                "ADDR environment variable not set; defaulting to {DEFAULT_ADDR}"
            );
            defaults.addr
        });

        let probe_timeout = read_var(&lookup, "PROBE_TIMEOUT_SECS")?
            .map(|secs| {
                secs.parse::<u64>()
                    .map(Duration::from_secs)
                    .with_context(|| format!("PROBE_TIMEOUT_SECS is not a number: {secs}"))
            })
            .transpose()?;
        if probe_timeout.is_some() {
            info!(
                ?probe_timeout,
                "Reachability probe will be bounded by PROBE_TIMEOUT_SECS"
            );
        }

        Ok(Self {
            database_path,
            addr,
            probe_timeout,
        })
    }
}

fn read_var(
    lookup: impl Fn(&str) -> Result<String, VarError>,
    name: &str,
) -> anyhow::Result<Option<String>> {
    match lookup(name) {
        Ok(value) => {
            info!(name, value, "Environment variable set");
            Ok(Some(value))
        }
        Err(VarError::NotPresent) => Ok(None),
        Err(VarError::NotUnicode(actual)) => {
            bail!("{name} environment variable is invalid unicode: {}", actual.display())
        }
    }
}

/// Builds the container every request handler reads its dependencies from.
///
/// # Errors
/// Will return [`Err`] if the store cannot be created or opened.
#[instrument]
pub async fn init_container(config: AppConfig) -> anyhow::Result<Container> {
    info!("Initializing container");
    let container = Container::new();

    let db = ensure_store(&config.database_path)
        .await
        .with_context(|| format!("Failed to open store {}", config.database_path.display()))?;

    let (set_config, set_db_conn) =
        container.read((app_config_init_action, db_conn_init_action));
    set_config(config);
    set_db_conn(db);

    info!("Container initialized");
    Ok(container)
}

fn app_config_manager(
    CapsuleHandle { register, .. }: CapsuleHandle,
) -> (Option<AppConfig>, impl use<> + CData + Fn(Option<AppConfig>)) {
    register.register(rearch_effects::state::<rearch_effects::Cloned<_>>(None))
}

pub fn app_config_init_action(
    CapsuleHandle { mut get, .. }: CapsuleHandle,
) -> impl use<> + CData + Fn(AppConfig) {
    let set_config = get.as_ref(app_config_manager).1.clone();
    move |config| set_config(Some(config))
}

/// # Panics
/// Panics when the [`AppConfig`] was not set via [`app_config_init_action`].
pub fn app_config_capsule(CapsuleHandle { mut get, .. }: CapsuleHandle) -> AppConfig {
    let config = get.as_ref(app_config_manager).0.clone();
    config.expect("AppConfig should've been set via app_config_init_action!")
}

fn db_conn_manager(
    CapsuleHandle { register, .. }: CapsuleHandle,
) -> (Option<DbConn>, impl use<> + CData + Fn(Option<DbConn>)) {
    register.register(rearch_effects::state::<rearch_effects::Cloned<_>>(None))
}

pub fn db_conn_init_action(
    CapsuleHandle { mut get, .. }: CapsuleHandle,
) -> impl use<> + CData + Fn(DbConn) {
    let set_db_conn = get.as_ref(db_conn_manager).1.clone();
    move |db| set_db_conn(Some(db))
}

/// # Panics
/// Panics when the [`DbConn`] was not set via [`db_conn_init_action`].
pub fn db_conn_capsule(CapsuleHandle { mut get, .. }: CapsuleHandle) -> DbConn {
    let db_conn = get.as_ref(db_conn_manager).0.clone();
    db_conn.expect("DbConn should've been set via db_conn_init_action!")
}
