use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::info;

use crate::compactor;
use crate::config::Config;
use crate::engine::{Engine, EngineOptions};
use crate::limits::*;

/// Resolves a tenant (institution) name to its engine. Each tenant gets its
/// own Engine, WAL file and compactor task.
pub struct TenantManager {
    engines: DashMap<String, Arc<Engine>>,
    data_dir: PathBuf,
    compact_threshold: u64,
    options: EngineOptions,
}

/// Reduce a tenant name to characters that are safe in a file name.
fn file_stem(tenant: &str) -> io::Result<String> {
    if tenant.len() > MAX_TENANT_NAME_LEN {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "tenant name too long"));
    }
    let stem: String = tenant
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
        .collect();
    if stem.is_empty() {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "empty tenant name"));
    }
    Ok(stem)
}

impl TenantManager {
    pub fn new(data_dir: PathBuf, compact_threshold: u64, options: EngineOptions) -> Self {
        Self {
            engines: DashMap::new(),
            data_dir,
            compact_threshold,
            options,
        }
    }

    /// Create the data directory if needed and build a manager from `config`.
    pub fn from_config(config: &Config) -> io::Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;
        Ok(Self::new(
            config.data_dir.clone(),
            config.compact_threshold,
            config.engine_options(),
        ))
    }

    /// Get or lazily create the engine for `tenant`, replaying its WAL.
    ///
    /// Tenants are keyed by their file stem, so names that sanitize to the
    /// same stem share one engine and never two writers on one WAL.
    pub fn get_or_create(&self, tenant: &str) -> io::Result<Arc<Engine>> {
        let stem = file_stem(tenant)?;
        if let Some(engine) = self.engines.get(&stem) {
            return Ok(engine.value().clone());
        }
        if self.engines.len() >= MAX_TENANTS {
            return Err(io::Error::other("too many tenants"));
        }

        // Replay outside the shard lock. A caller that loses the race drops its
        // engine before anything is appended through it.
        let wal_path = self.data_dir.join(format!("{stem}.wal"));
        let opened = Arc::new(Engine::with_options(wal_path, self.options)?);
        let engine = match self.engines.entry(stem) {
            Entry::Occupied(existing) => return Ok(existing.get().clone()),
            Entry::Vacant(slot) => slot.insert(opened).value().clone(),
        };

        let compactor_engine = engine.clone();
        let threshold = self.compact_threshold;
        tokio::spawn(async move {
            compactor::run_compactor(compactor_engine, threshold).await;
        });
        metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(self.engines.len() as f64);
        info!("loaded tenant {tenant}");
        Ok(engine)
    }

    pub fn get(&self, tenant: &str) -> Option<Arc<Engine>> {
        let stem = file_stem(tenant).ok()?;
        self.engines.get(&stem).map(|e| e.value().clone())
    }

    pub fn tenant_count(&self) -> usize {
        self.engines.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use chrono::{NaiveTime, Weekday};
    use chrono_tz::Tz;
    use std::fs;
    use ulid::Ulid;

    fn test_data_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("classtime_test_tenant").join(name);
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn manager(dir: PathBuf) -> TenantManager {
        TenantManager::new(dir, 1000, EngineOptions::default())
    }

    #[tokio::test]
    async fn tenant_isolation() {
        let dir = test_data_dir("isolation");
        let tm = manager(dir);

        let eng_a = tm.get_or_create("school_a").unwrap();
        let eng_b = tm.get_or_create("school_b").unwrap();

        let rid = Ulid::new();
        eng_a.register_instructor(rid, Some("Ada".into()), None).await.unwrap();
        eng_b.register_instructor(rid, Some("Ada".into()), None).await.unwrap();

        eng_a
            .add_window(AvailabilityWindow {
                id: Ulid::new(),
                instructor_id: rid,
                weekday: Weekday::Mon,
                start: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
                end: NaiveTime::from_hms_opt(12, 0, 0).unwrap(),
                active: true,
                valid_from: None,
                valid_until: None,
                category: None,
            })
            .await
            .unwrap();

        assert_eq!(eng_a.windows(rid).await.unwrap().len(), 1);
        assert!(eng_b.windows(rid).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn tenant_lazy_creation() {
        let dir = test_data_dir("lazy");
        let tm = manager(dir.clone());

        assert_eq!(fs::read_dir(&dir).unwrap().count(), 0);
        let _eng = tm.get_or_create("my_school").unwrap();
        assert!(dir.join("my_school.wal").exists());
        assert_eq!(tm.tenant_count(), 1);
    }

    #[tokio::test]
    async fn tenant_same_engine_returned() {
        let dir = test_data_dir("same_eng");
        let tm = manager(dir);

        let eng1 = tm.get_or_create("foo").unwrap();
        let eng2 = tm.get_or_create("foo").unwrap();
        assert!(Arc::ptr_eq(&eng1, &eng2));
        assert!(Arc::ptr_eq(&eng1, &tm.get("foo").unwrap()));
        assert!(tm.get("bar").is_none());
    }

    #[tokio::test]
    async fn tenant_name_sanitized() {
        let dir = test_data_dir("sanitize");
        let tm = manager(dir.clone());

        let _eng = tm.get_or_create("../evil").unwrap();
        assert!(dir.join("evil.wal").exists());

        assert!(tm.get_or_create("../..").is_err());
    }

    #[tokio::test]
    async fn names_with_one_file_stem_share_an_engine() {
        let dir = test_data_dir("shared_stem");
        let tm = manager(dir.clone());

        let dotted = tm.get_or_create("north.academy").unwrap();
        let plain = tm.get_or_create("northacademy").unwrap();
        assert!(Arc::ptr_eq(&dotted, &plain));
        assert!(Arc::ptr_eq(&dotted, &tm.get("north.academy").unwrap()));
        assert_eq!(tm.tenant_count(), 1);
        assert_eq!(fs::read_dir(&dir).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn tenant_name_too_long() {
        let dir = test_data_dir("name_too_long");
        let tm = manager(dir);

        let long_name = "x".repeat(MAX_TENANT_NAME_LEN + 1);
        let err = tm.get_or_create(&long_name).err().unwrap();
        assert!(err.to_string().contains("tenant name too long"));
    }

    #[tokio::test]
    async fn tenant_state_survives_reload() {
        let dir = test_data_dir("reload");
        let rid = Ulid::new();
        {
            let tm = manager(dir.clone());
            let eng = tm.get_or_create("durable").unwrap();
            eng.register_student(rid, Some("Grace".into())).await.unwrap();
        }

        let tm = manager(dir);
        let eng = tm.get_or_create("durable").unwrap();
        let info = eng.get_resource_info(rid).await.unwrap();
        assert_eq!(info.kind, ResourceKind::Student);
        assert_eq!(info.name.as_deref(), Some("Grace"));
    }

    #[tokio::test]
    async fn from_config_creates_data_dir() {
        let dir = std::env::temp_dir().join("classtime_test_tenant").join("from_config").join("nested");
        let _ = fs::remove_dir_all(&dir);
        let config = Config {
            data_dir: dir.clone(),
            timezone: Tz::America__New_York,
            ..Config::default()
        };
        let tm = TenantManager::from_config(&config).unwrap();
        let eng = tm.get_or_create("tz").unwrap();
        assert_eq!(eng.normalizer().zone(), Tz::America__New_York);
        assert!(dir.join("tz.wal").exists());
    }
}
