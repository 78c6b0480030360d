use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context as _;
use camino::{Utf8Path, Utf8PathBuf};

/// Vendor rate tiers: the client sleeps the corresponding delay after each
/// request belonging to the tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateTier {
    Light,
    Medium,
    Heavy,
}

/// Wire representation of the configuration file.
///
/// Every field carries a serde default so that a partial YAML file is
/// accepted; validation and normalization happen in [`Conf::from_conf_file`].
pub mod dto {
    use camino::Utf8PathBuf;
    use serde::{Deserialize, Serialize};
    use std::time::Duration;

    use super::RateTier;

    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    pub struct ConfFile {
        #[serde(default)]
        pub server: ServerConf,
        #[serde(default)]
        pub client: ClientConf,
        #[serde(default)]
        pub storage: StorageConf,
        #[serde(default)]
        pub syncable: SyncableConf,
        #[serde(default)]
        pub commander: CommanderConf,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct ServerConf {
        /// Address for the HTTP surface to listen on.
        #[serde(default = "default_listen")]
        pub listen: String,
        /// Shared secret: salts end-user access keys and authenticates
        /// peer-to-peer coordination requests.
        #[serde(default)]
        pub access_key_salt: String,
        #[serde(default)]
        pub dbg: bool,
        #[serde(default = "default_true")]
        pub sync_job: bool,
        #[serde(default = "default_true")]
        pub download_job: bool,
        #[serde(default)]
        pub log_file: Option<Utf8PathBuf>,
    }

    impl Default for ServerConf {
        fn default() -> Self {
            ServerConf {
                listen: default_listen(),
                access_key_salt: String::new(),
                dbg: false,
                sync_job: true,
                download_job: true,
                log_file: None,
            }
        }
    }

    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    pub struct ClientConf {
        #[serde(default)]
        pub account_id: String,
        #[serde(default)]
        pub id: String,
        #[serde(default)]
        pub secret: String,
        /// Use the hard-delete action once a meeting is fully downloaded.
        #[serde(default)]
        pub delete_downloaded: bool,
        /// Use the soft-delete (trash) action once a meeting is fully downloaded.
        #[serde(default)]
        pub trash_downloaded: bool,
        /// Also remove cloud-side copies of meetings the selector filtered out.
        #[serde(default)]
        pub delete_skipped: bool,
        /// Cloud capacity, in bytes, past which `cloudcap` deletes old meetings.
        #[serde(default)]
        pub cloud_capacity_hard_limit: u64,
        #[serde(default)]
        pub rate_limiting_delay: RateLimitingDelay,
    }

    /// Post-request delays in milliseconds, one per vendor rate tier.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct RateLimitingDelay {
        #[serde(default = "default_light_delay")]
        pub light: u64,
        #[serde(default = "default_medium_delay")]
        pub medium: u64,
        #[serde(default = "default_heavy_delay")]
        pub heavy: u64,
    }

    impl RateLimitingDelay {
        pub fn delay(&self, tier: RateTier) -> Duration {
            let millis = match tier {
                RateTier::Light => self.light,
                RateTier::Medium => self.medium,
                RateTier::Heavy => self.heavy,
            };
            Duration::from_millis(millis)
        }
    }

    impl Default for RateLimitingDelay {
        fn default() -> Self {
            RateLimitingDelay {
                light: default_light_delay(),
                medium: default_medium_delay(),
                heavy: default_heavy_delay(),
            }
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub enum StorageKind {
        Sqlite,
    }

    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    pub struct StorageConf {
        #[serde(rename = "type", default)]
        pub kind: Option<StorageKind>,
        /// Path to the database file.
        #[serde(default)]
        pub path: Utf8PathBuf,
        /// Root of the local artifact repository.
        #[serde(default)]
        pub repository: Utf8PathBuf,
        /// Free bytes to preserve on the repository volume.
        #[serde(default)]
        pub keep_free_space: u64,
    }

    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    pub struct SyncableConf {
        #[serde(default)]
        pub important: Vec<String>,
        #[serde(default)]
        pub alternative: Vec<String>,
        #[serde(default)]
        pub optional: Vec<String>,
        /// Minimum meeting duration, in minutes, worth syncing.
        #[serde(default)]
        pub min_duration: i64,
    }

    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    pub struct CommanderConf {
        /// Base URLs of the peer instances queried before cloud deletion.
        #[serde(default)]
        pub instances: Vec<String>,
    }

    fn default_listen() -> String {
        "0.0.0.0:8080".to_owned()
    }

    fn default_true() -> bool {
        true
    }

    fn default_light_delay() -> u64 {
        1000
    }

    fn default_medium_delay() -> u64 {
        500
    }

    fn default_heavy_delay() -> u64 {
        5000
    }
}

#[derive(Debug, Clone)]
pub struct StorageConf {
    pub kind: dto::StorageKind,
    pub path: Utf8PathBuf,
    pub repository: Utf8PathBuf,
    pub keep_free_space: u64,
}

#[derive(Debug, Clone)]
pub struct Conf {
    pub listen: SocketAddr,
    pub access_key_salt: String,
    pub dbg: bool,
    pub sync_job: bool,
    pub download_job: bool,
    pub log_file: Option<Utf8PathBuf>,
    pub client: dto::ClientConf,
    pub storage: StorageConf,
    pub syncable: dto::SyncableConf,
    pub instances: Vec<String>,
}

impl Conf {
    pub fn from_conf_file(conf_file: &dto::ConfFile) -> anyhow::Result<Self> {
        let listen = conf_file
            .server
            .listen
            .parse::<SocketAddr>()
            .with_context(|| format!("invalid listen address: {}", conf_file.server.listen))?;

        let kind = conf_file.storage.kind.context("storage is not configured")?;

        anyhow::ensure!(
            !conf_file.storage.path.as_str().is_empty(),
            "storage.path is required",
        );
        anyhow::ensure!(
            !conf_file.storage.repository.as_str().is_empty(),
            "storage.repository is required",
        );

        if !conf_file.commander.instances.is_empty() {
            anyhow::ensure!(
                !conf_file.server.access_key_salt.is_empty(),
                "server.access_key_salt is required when peer instances are configured",
            );
        }

        Ok(Conf {
            listen,
            access_key_salt: conf_file.server.access_key_salt.clone(),
            dbg: conf_file.server.dbg,
            sync_job: conf_file.server.sync_job,
            download_job: conf_file.server.download_job,
            log_file: conf_file.server.log_file.clone(),
            client: conf_file.client.clone(),
            storage: StorageConf {
                kind,
                path: conf_file.storage.path.clone(),
                repository: conf_file.storage.repository.clone(),
                keep_free_space: conf_file.storage.keep_free_space,
            },
            syncable: conf_file.syncable.clone(),
            instances: conf_file.commander.instances.clone(),
        })
    }

    pub fn load_from_file(path: &Utf8Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path).with_context(|| format!("can’t read config {path}"))?;

        let conf_file: dto::ConfFile =
            serde_yaml::from_str(&text).with_context(|| format!("failed to parse config {path}"))?;

        Conf::from_conf_file(&conf_file)
    }

    pub fn rate_delay(&self, tier: RateTier) -> Duration {
        self.client.rate_limiting_delay.delay(tier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
server:
  listen: 127.0.0.1:8081
  access_key_salt: pepper
client:
  account_id: acc
  id: cid
  secret: shhh
  trash_downloaded: true
  rate_limiting_delay:
    light: 100
    medium: 200
    heavy: 300
storage:
  type: sqlite
  path: /var/lib/recvault/recvault.db
  repository: /srv/recordings
  keep_free_space: 1073741824
syncable:
  important:
    - shared_screen_with_speaker_view
  optional:
    - chat_file
  min_duration: 10
commander:
  instances:
    - http://peer-a:8080
"#;

    #[test]
    fn parses_a_complete_config() {
        let conf_file: dto::ConfFile = serde_yaml::from_str(SAMPLE).expect("valid YAML");
        let conf = Conf::from_conf_file(&conf_file).expect("valid config");

        assert_eq!(conf.listen, "127.0.0.1:8081".parse().expect("socket addr"));
        assert_eq!(conf.storage.kind, dto::StorageKind::Sqlite);
        assert_eq!(conf.storage.keep_free_space, 1_073_741_824);
        assert_eq!(conf.rate_delay(RateTier::Medium), Duration::from_millis(200));
        assert!(conf.client.trash_downloaded);
        assert!(!conf.client.delete_downloaded);
        assert_eq!(conf.syncable.min_duration, 10);
        assert_eq!(conf.instances, vec!["http://peer-a:8080".to_owned()]);
        assert!(conf.sync_job);
    }

    #[test]
    fn storage_type_is_required() {
        let conf_file: dto::ConfFile = serde_yaml::from_str("server:\n  listen: 0.0.0.0:8080\n").expect("valid YAML");
        let err = Conf::from_conf_file(&conf_file).expect_err("must be rejected");
        assert!(format!("{err:#}").contains("storage is not configured"));
    }

    #[test]
    fn peer_instances_require_a_salt() {
        let yaml = r#"
storage:
  type: sqlite
  path: db.sqlite
  repository: repo
commander:
  instances: [http://peer-a:8080]
"#;
        let conf_file: dto::ConfFile = serde_yaml::from_str(yaml).expect("valid YAML");
        let err = Conf::from_conf_file(&conf_file).expect_err("must be rejected");
        assert!(format!("{err:#}").contains("access_key_salt"));
    }
}
