use crate::model::app_id::{ApplicationId, ReleaseStatus, HEAD};
use crate::model::cube::Cube;
use crate::model::cube_info::{CubeInfo, SearchOptions};
use crate::model::format;
use crate::store::traits::Persister;
use anyhow::{anyhow, Result};
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

/// One stored revision of a cube. The blob is the gzip-compressed wire JSON.
#[derive(Debug, Clone)]
struct Revision {
    id: i64,
    revision: i64,
    sha1: String,
    blob: Vec<u8>,
    active: bool,
    changed: bool,
    head_sha1: Option<String>,
    notes: Option<String>,
    test_data: Option<String>,
    created_by: String,
    created_at: String,
}

#[derive(Debug, Clone)]
struct CubeRecord {
    name: String,
    revisions: Vec<Revision>,
}

impl CubeRecord {
    fn latest(&self) -> &Revision {
        self.revisions.last().expect("records hold >= 1 revision")
    }

    fn latest_mut(&mut self) -> &mut Revision {
        self.revisions.last_mut().expect("records hold >= 1 revision")
    }
}

#[derive(Debug, Default)]
struct State {
    next_id: i64,
    /// app cache key → lowercase cube name → record.
    apps: HashMap<String, HashMap<String, CubeRecord>>,
    /// app cache key → coordinate (original case preserved).
    app_ids: HashMap<String, ApplicationId>,
}

impl State {
    fn records(&self, app_id: &ApplicationId) -> Option<&HashMap<String, CubeRecord>> {
        self.apps.get(&app_id.cache_key())
    }

    fn records_mut(&mut self, app_id: &ApplicationId) -> &mut HashMap<String, CubeRecord> {
        let key = app_id.cache_key();
        self.app_ids.entry(key.clone()).or_insert_with(|| app_id.clone());
        self.apps.entry(key).or_default()
    }
}

/// In-memory persistence driver. Carries the full port contract including
/// revision history and soft deletes; used by tests and embedders that do not
/// need a durable backend.
#[derive(Debug, Default)]
pub struct MemoryPersister {
    state: RwLock<State>,
    loads: std::sync::atomic::AtomicU64,
}

impl MemoryPersister {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `load_cube` round-trips served; the registry cache should
    /// keep this at one per (app, cube).
    pub fn load_count(&self) -> u64 {
        self.loads.load(std::sync::atomic::Ordering::Relaxed)
    }

    fn compress(cube: &Cube) -> Vec<u8> {
        use flate2::write::GzEncoder;
        use flate2::Compression;
        use std::io::Write;

        let json = format::to_json(cube, false).to_string();
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(json.as_bytes()).expect("gzip to memory");
        encoder.finish().expect("gzip to memory")
    }

    fn decompress(blob: &[u8]) -> Result<String> {
        use flate2::read::GzDecoder;
        use std::io::Read;

        let mut decoder = GzDecoder::new(blob);
        let mut out = String::new();
        decoder.read_to_string(&mut out)?;
        Ok(out)
    }

    fn decode(blob: &[u8], app_id: &ApplicationId) -> Result<Cube> {
        let json: serde_json::Value = serde_json::from_str(&Self::decompress(blob)?)?;
        Ok(format::from_json(&json, app_id.clone())?)
    }

    fn now() -> String {
        chrono::Utc::now().to_rfc3339()
    }

    fn info(record: &CubeRecord, rev: &Revision, app_id: &ApplicationId) -> CubeInfo {
        CubeInfo {
            id: rev.id,
            tenant: app_id.tenant.clone(),
            app: app_id.app.clone(),
            version: app_id.version.clone(),
            status: app_id.status,
            branch: app_id.branch.clone(),
            name: record.name.clone(),
            sha1: rev.sha1.clone(),
            head_sha1: rev.head_sha1.clone(),
            revision: rev.revision,
            changed: rev.changed,
            created_at: rev.created_at.clone(),
            created_by: rev.created_by.clone(),
            notes: rev.notes.clone(),
            cube_json: None,
            test_data: None,
        }
    }
}

/// `*`/`?` wildcard match over cube names, case-insensitive.
fn wildcard_match(pattern: &str, name: &str) -> bool {
    let mut regex = String::from("^");
    for c in pattern.to_lowercase().chars() {
        match c {
            '*' => regex.push_str(".*"),
            '?' => regex.push('.'),
            other => regex.push_str(&regex::escape(&other.to_string())),
        }
    }
    regex.push('$');
    regex::Regex::new(&regex)
        .map(|re| re.is_match(&name.to_lowercase()))
        .unwrap_or(false)
}

#[async_trait::async_trait]
impl Persister for MemoryPersister {
    async fn load_cube(&self, app_id: &ApplicationId, name: &str) -> Result<Option<Cube>> {
        self.loads
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let state = self.state.read().await;
        let record = state
            .records(app_id)
            .and_then(|r| r.get(&name.to_lowercase()));
        match record {
            Some(rec) if rec.latest().active => {
                Ok(Some(Self::decode(&rec.latest().blob, app_id)?))
            }
            _ => Ok(None),
        }
    }

    async fn load_cube_by_id(&self, id: i64) -> Result<Cube> {
        let state = self.state.read().await;
        for (key, records) in &state.apps {
            for rec in records.values() {
                for rev in &rec.revisions {
                    if rev.id == id {
                        let app_id = state.app_ids.get(key).expect("app id tracked");
                        return Self::decode(&rev.blob, app_id);
                    }
                }
            }
        }
        Err(anyhow!("cube record {} does not exist", id))
    }

    async fn update_cube(&self, app_id: &ApplicationId, cube: &Cube, user_id: &str) -> Result<()> {
        let sha1 = cube.sha1();
        let blob = Self::compress(cube);
        let mut state = self.state.write().await;

        // A branch copy is "changed" once it diverges from its HEAD ancestor.
        let head_sha1 = if app_id.is_head() {
            None
        } else {
            state
                .records(&app_id.with_branch(HEAD))
                .and_then(|r| r.get(&cube.name().to_lowercase()))
                .map(|rec| rec.latest().sha1.clone())
        };
        let changed = head_sha1.as_deref().map(|h| h != sha1).unwrap_or(!app_id.is_head());

        state.next_id += 1;
        let id = state.next_id;
        let records = state.records_mut(app_id);
        let record = records
            .entry(cube.name().to_lowercase())
            .or_insert_with(|| CubeRecord {
                name: cube.name().to_string(),
                revisions: Vec::new(),
            });
        let revision = record.revisions.last().map(|r| r.revision + 1).unwrap_or(0);
        let carried_test_data = record.revisions.last().and_then(|r| r.test_data.clone());
        record.revisions.push(Revision {
            id,
            revision,
            sha1,
            blob,
            active: true,
            changed,
            head_sha1,
            notes: None,
            test_data: carried_test_data,
            created_by: user_id.to_string(),
            created_at: Self::now(),
        });
        Ok(())
    }

    async fn delete_cubes(
        &self,
        app_id: &ApplicationId,
        names: &[String],
        allow_hard_delete: bool,
        user_id: &str,
    ) -> Result<bool> {
        let mut state = self.state.write().await;
        state.next_id += 1;
        let mut next_id = state.next_id;
        let records = state.records_mut(app_id);
        let mut any = false;
        for name in names {
            let key = name.to_lowercase();
            if allow_hard_delete {
                any |= records.remove(&key).is_some();
                continue;
            }
            if let Some(rec) = records.get_mut(&key) {
                if rec.latest().active {
                    let mut tomb = rec.latest().clone();
                    tomb.id = next_id;
                    next_id += 1;
                    tomb.revision += 1;
                    tomb.active = false;
                    tomb.created_by = user_id.to_string();
                    tomb.created_at = Self::now();
                    rec.revisions.push(tomb);
                    any = true;
                }
            }
        }
        state.next_id = next_id;
        Ok(any)
    }

    async fn restore_cubes(
        &self,
        app_id: &ApplicationId,
        names: &[String],
        user_id: &str,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        state.next_id += 1;
        let mut next_id = state.next_id;
        let records = state.records_mut(app_id);
        for name in names {
            let key = name.to_lowercase();
            let rec = records
                .get_mut(&key)
                .ok_or_else(|| anyhow!("cube '{}' has never existed in {}", name, app_id))?;
            if rec.latest().active {
                return Err(anyhow!("cube '{}' is not deleted in {}", name, app_id));
            }
            let mut revived = rec.latest().clone();
            revived.id = next_id;
            next_id += 1;
            revived.revision += 1;
            revived.active = true;
            revived.created_by = user_id.to_string();
            revived.created_at = Self::now();
            rec.revisions.push(revived);
        }
        state.next_id = next_id;
        Ok(())
    }

    async fn rename_cube(
        &self,
        app_id: &ApplicationId,
        old_name: &str,
        new_name: &str,
        user_id: &str,
    ) -> Result<bool> {
        let mut state = self.state.write().await;
        state.next_id += 1;
        let id = state.next_id;
        let records = state.records_mut(app_id);
        let Some(rec) = records.remove(&old_name.to_lowercase()) else {
            return Ok(false);
        };
        if records.contains_key(&new_name.to_lowercase()) {
            records.insert(old_name.to_lowercase(), rec);
            return Err(anyhow!("cube '{}' already exists in {}", new_name, app_id));
        }
        let mut cube = Self::decode(&rec.latest().blob, app_id)?;
        cube.set_name(new_name);
        let mut renamed = rec.clone();
        renamed.name = new_name.to_string();
        renamed.revisions.push(Revision {
            id,
            revision: rec.latest().revision + 1,
            sha1: cube.sha1(),
            blob: Self::compress(&cube),
            active: true,
            changed: true,
            head_sha1: rec.latest().head_sha1.clone(),
            notes: rec.latest().notes.clone(),
            test_data: rec.latest().test_data.clone(),
            created_by: user_id.to_string(),
            created_at: Self::now(),
        });
        records.insert(new_name.to_lowercase(), renamed);
        Ok(true)
    }

    async fn duplicate_cube(
        &self,
        old_app_id: &ApplicationId,
        new_app_id: &ApplicationId,
        old_name: &str,
        new_name: &str,
        user_id: &str,
    ) -> Result<()> {
        let mut cube = self
            .load_cube(old_app_id, old_name)
            .await?
            .ok_or_else(|| anyhow!("cube '{}' does not exist in {}", old_name, old_app_id))?;
        cube.set_name(new_name);
        cube.app_id = new_app_id.clone();
        self.update_cube(new_app_id, &cube, user_id).await
    }

    async fn copy_branch(&self, src: &ApplicationId, dst: &ApplicationId) -> Result<usize> {
        let mut state = self.state.write().await;
        let source: Vec<CubeRecord> = state
            .records(src)
            .map(|r| r.values().cloned().collect())
            .unwrap_or_default();
        let mut next_id = state.next_id;
        let records = state.records_mut(dst);
        let mut copied = 0;
        for rec in source {
            let latest = rec.latest().clone();
            next_id += 1;
            let copy = Revision {
                id: next_id,
                revision: 0,
                head_sha1: Some(latest.sha1.clone()),
                changed: false,
                created_at: Self::now(),
                ..latest
            };
            records.insert(
                rec.name.to_lowercase(),
                CubeRecord {
                    name: rec.name.clone(),
                    revisions: vec![copy],
                },
            );
            copied += 1;
        }
        state.next_id = next_id;
        Ok(copied)
    }

    async fn copy_branch_with_history(
        &self,
        src: &ApplicationId,
        dst: &ApplicationId,
    ) -> Result<usize> {
        let mut state = self.state.write().await;
        let source: Vec<CubeRecord> = state
            .records(src)
            .map(|r| r.values().cloned().collect())
            .unwrap_or_default();
        let mut next_id = state.next_id;
        let records = state.records_mut(dst);
        let mut copied = 0;
        for rec in source {
            let mut copy = rec.clone();
            for rev in &mut copy.revisions {
                next_id += 1;
                rev.id = next_id;
            }
            records.insert(rec.name.to_lowercase(), copy);
            copied += 1;
        }
        state.next_id = next_id;
        Ok(copied)
    }

    async fn move_branch(&self, app_id: &ApplicationId, new_version: &str) -> Result<usize> {
        let mut state = self.state.write().await;
        let key = app_id.cache_key();
        let Some(records) = state.apps.remove(&key) else {
            state.app_ids.remove(&key);
            return Ok(0);
        };
        state.app_ids.remove(&key);
        let moved = records.len();
        let new_app = app_id.with_version(new_version);
        let new_key = new_app.cache_key();
        state.app_ids.insert(new_key.clone(), new_app);
        state.apps.insert(new_key, records);
        Ok(moved)
    }

    async fn release_cubes(&self, app_id: &ApplicationId, _new_version: &str) -> Result<usize> {
        let mut state = self.state.write().await;
        let snapshot = app_id.with_status(ReleaseStatus::Snapshot).with_branch(HEAD);
        let key = snapshot.cache_key();
        let Some(records) = state.apps.remove(&key) else {
            state.app_ids.remove(&key);
            return Ok(0);
        };
        state.app_ids.remove(&key);
        let released = records.len();
        let release_app = snapshot.with_status(ReleaseStatus::Release);
        let release_key = release_app.cache_key();
        state.app_ids.insert(release_key.clone(), release_app);
        state.apps.insert(release_key, records);
        Ok(released)
    }

    async fn delete_branch(&self, app_id: &ApplicationId) -> Result<bool> {
        let mut state = self.state.write().await;
        let key = app_id.cache_key();
        state.app_ids.remove(&key);
        Ok(state.apps.remove(&key).is_some())
    }

    async fn get_revisions(
        &self,
        app_id: &ApplicationId,
        name: &str,
        ignore_version: bool,
    ) -> Result<Vec<CubeInfo>> {
        let state = self.state.read().await;
        let mut out = Vec::new();
        for (key, records) in &state.apps {
            let id = state.app_ids.get(key).expect("app id tracked");
            let same_slot = if ignore_version {
                id.same_app(app_id) && id.branch.eq_ignore_ascii_case(&app_id.branch)
            } else {
                key == &app_id.cache_key()
            };
            if !same_slot {
                continue;
            }
            if let Some(rec) = records.get(&name.to_lowercase()) {
                for rev in rec.revisions.iter().rev() {
                    out.push(Self::info(rec, rev, id));
                }
            }
        }
        Ok(out)
    }

    async fn get_app_names(&self, tenant: &str) -> Result<Vec<String>> {
        let state = self.state.read().await;
        let mut names: Vec<String> = state
            .app_ids
            .values()
            .filter(|id| id.tenant.eq_ignore_ascii_case(tenant))
            .map(|id| id.app.clone())
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }

    async fn get_versions(
        &self,
        tenant: &str,
        app: &str,
    ) -> Result<HashMap<ReleaseStatus, Vec<String>>> {
        let state = self.state.read().await;
        let mut out: HashMap<ReleaseStatus, Vec<String>> = HashMap::new();
        for id in state.app_ids.values() {
            if id.tenant.eq_ignore_ascii_case(tenant) && id.app.eq_ignore_ascii_case(app) {
                let versions = out.entry(id.status).or_default();
                if !versions.contains(&id.version) {
                    versions.push(id.version.clone());
                }
            }
        }
        for versions in out.values_mut() {
            versions.sort();
        }
        Ok(out)
    }

    async fn get_branches(&self, app_id: &ApplicationId) -> Result<HashSet<String>> {
        let state = self.state.read().await;
        Ok(state
            .app_ids
            .values()
            .filter(|id| {
                id.same_app(app_id) && id.version == app_id.version && id.status == app_id.status
            })
            .map(|id| id.branch.clone())
            .collect())
    }

    async fn search(
        &self,
        app_id: &ApplicationId,
        name_pattern: Option<&str>,
        content_pattern: Option<&str>,
        options: &SearchOptions,
    ) -> Result<Vec<CubeInfo>> {
        let state = self.state.read().await;
        let mut out = Vec::new();
        let Some(records) = state.records(app_id) else {
            return Ok(out);
        };
        let id = state.app_ids.get(&app_id.cache_key()).expect("app id tracked");
        for rec in records.values() {
            if let Some(pattern) = name_pattern {
                let matched = if options.exact_match_name {
                    rec.name.eq_ignore_ascii_case(pattern)
                } else {
                    wildcard_match(pattern, &rec.name)
                };
                if !matched {
                    continue;
                }
            }
            let latest = rec.latest();
            if options.active_records_only && !latest.active {
                continue;
            }
            if options.deleted_records_only && latest.active {
                continue;
            }
            if options.changed_records_only && !latest.changed {
                continue;
            }
            let json = if content_pattern.is_some() || options.include_cube_data {
                Some(Self::decompress(&latest.blob)?)
            } else {
                None
            };
            if let Some(content) = content_pattern {
                let hit = json
                    .as_deref()
                    .map(|j| j.to_lowercase().contains(&content.to_lowercase()))
                    .unwrap_or(false);
                if !hit {
                    continue;
                }
            }
            let mut info = Self::info(rec, latest, id);
            if options.include_cube_data {
                info.cube_json = json;
            }
            if options.include_test_data {
                info.test_data = latest.test_data.clone();
            }
            if !options.include_notes {
                info.notes = None;
            }
            out.push(info);
        }
        out.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        Ok(out)
    }

    async fn update_test_data(
        &self,
        app_id: &ApplicationId,
        cube_name: &str,
        test_data: &str,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        let records = state.records_mut(app_id);
        let rec = records
            .get_mut(&cube_name.to_lowercase())
            .ok_or_else(|| anyhow!("cube '{}' does not exist in {}", cube_name, app_id))?;
        rec.latest_mut().test_data = Some(test_data.to_string());
        Ok(())
    }

    async fn get_test_data(
        &self,
        app_id: &ApplicationId,
        cube_name: &str,
    ) -> Result<Option<String>> {
        let state = self.state.read().await;
        Ok(state
            .records(app_id)
            .and_then(|r| r.get(&cube_name.to_lowercase()))
            .and_then(|rec| rec.latest().test_data.clone()))
    }

    async fn update_notes(
        &self,
        app_id: &ApplicationId,
        cube_name: &str,
        notes: &str,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        let records = state.records_mut(app_id);
        let rec = records
            .get_mut(&cube_name.to_lowercase())
            .ok_or_else(|| anyhow!("cube '{}' does not exist in {}", cube_name, app_id))?;
        rec.latest_mut().notes = Some(notes.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::value::{AxisType, AxisValueType, ColumnOrder, ColumnValue, Scalar};

    fn app(branch: &str) -> ApplicationId {
        ApplicationId::new("acme", "alpha", "1.0.0", ReleaseStatus::Snapshot, branch).unwrap()
    }

    fn simple_cube(name: &str, app_id: &ApplicationId, cell: i64) -> Cube {
        let mut cube = Cube::new(name, app_id.clone()).unwrap();
        cube.add_axis(
            "n",
            AxisType::Discrete,
            AxisValueType::Long,
            ColumnOrder::Sorted,
            false,
        )
        .unwrap();
        let id = cube
            .add_column("n", Some(ColumnValue::Scalar(Scalar::Long(1))))
            .unwrap();
        cube.set_cell_by_ids(&[id], crate::model::cube::CellValue::Json(serde_json::json!(cell)))
            .unwrap();
        cube
    }

    #[tokio::test]
    async fn update_load_round_trip_preserves_sha1() {
        let store = MemoryPersister::new();
        let head = app(HEAD);
        let cube = simple_cube("rates", &head, 1);
        store.update_cube(&head, &cube, "jane").await.unwrap();
        let loaded = store.load_cube(&head, "RATES").await.unwrap().unwrap();
        assert_eq!(loaded.sha1(), cube.sha1());
    }

    #[tokio::test]
    async fn revisions_accumulate_and_soft_delete_hides() {
        let store = MemoryPersister::new();
        let head = app(HEAD);
        store.update_cube(&head, &simple_cube("r", &head, 1), "jane").await.unwrap();
        store.update_cube(&head, &simple_cube("r", &head, 2), "jane").await.unwrap();

        let revs = store.get_revisions(&head, "r", false).await.unwrap();
        assert_eq!(revs.len(), 2);
        assert_eq!(revs[0].revision, 1);

        store
            .delete_cubes(&head, &["r".to_string()], false, "jane")
            .await
            .unwrap();
        assert!(store.load_cube(&head, "r").await.unwrap().is_none());

        store.restore_cubes(&head, &["r".to_string()], "jane").await.unwrap();
        assert!(store.load_cube(&head, "r").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn search_flags_filter_records() {
        let store = MemoryPersister::new();
        let head = app(HEAD);
        store.update_cube(&head, &simple_cube("alpha.rates", &head, 1), "jane").await.unwrap();
        store.update_cube(&head, &simple_cube("beta.rates", &head, 2), "jane").await.unwrap();
        store
            .delete_cubes(&head, &["beta.rates".to_string()], false, "jane")
            .await
            .unwrap();

        let active = store
            .search(&head, Some("*rates*"), None, &SearchOptions::active_only())
            .await
            .unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].name, "alpha.rates");

        let deleted = store
            .search(
                &head,
                None,
                None,
                &SearchOptions {
                    deleted_records_only: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(deleted.len(), 1);
        assert_eq!(deleted[0].name, "beta.rates");

        let exact = store
            .search(
                &head,
                Some("alpha.rates"),
                None,
                &SearchOptions {
                    exact_match_name: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(exact.len(), 1);
    }

    #[tokio::test]
    async fn copy_branch_resets_revisions_and_tracks_head_sha1() {
        let store = MemoryPersister::new();
        let head = app(HEAD);
        store.update_cube(&head, &simple_cube("r", &head, 1), "jane").await.unwrap();
        store.update_cube(&head, &simple_cube("r", &head, 2), "jane").await.unwrap();

        let branch = app("jane.doe");
        let copied = store.copy_branch(&head, &branch).await.unwrap();
        assert_eq!(copied, 1);
        let revs = store.get_revisions(&branch, "r", false).await.unwrap();
        assert_eq!(revs.len(), 1);
        assert_eq!(revs[0].revision, 0);
        assert!(!revs[0].changed);
        assert_eq!(revs[0].head_sha1.as_ref().unwrap(), &revs[0].sha1);

        // Diverge the branch copy; it becomes changed.
        store.update_cube(&branch, &simple_cube("r", &branch, 9), "jane").await.unwrap();
        let changed = store
            .search(
                &branch,
                None,
                None,
                &SearchOptions {
                    changed_records_only: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(changed.len(), 1);
    }

    #[tokio::test]
    async fn move_and_release_shift_application_slots() {
        let store = MemoryPersister::new();
        let head = app(HEAD);
        store.update_cube(&head, &simple_cube("r", &head, 1), "jane").await.unwrap();

        let moved = store.move_branch(&head, "2.0.0").await.unwrap();
        assert_eq!(moved, 1);
        assert!(store.load_cube(&head, "r").await.unwrap().is_none());
        let at2 = head.with_version("2.0.0");
        assert!(store.load_cube(&at2, "r").await.unwrap().is_some());

        let released = store.release_cubes(&at2, "2.1.0").await.unwrap();
        assert_eq!(released, 1);
        let rel = at2.with_status(ReleaseStatus::Release);
        assert!(store.load_cube(&rel, "r").await.unwrap().is_some());
        assert!(store.load_cube(&at2, "r").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rename_rejects_collisions() {
        let store = MemoryPersister::new();
        let head = app(HEAD);
        store.update_cube(&head, &simple_cube("a", &head, 1), "jane").await.unwrap();
        store.update_cube(&head, &simple_cube("b", &head, 2), "jane").await.unwrap();
        assert!(store.rename_cube(&head, "a", "b", "jane").await.is_err());
        assert!(store.rename_cube(&head, "a", "c", "jane").await.unwrap());
        assert!(store.load_cube(&head, "c").await.unwrap().is_some());
        assert!(store.load_cube(&head, "a").await.unwrap().is_none());
        assert!(!store.rename_cube(&head, "ghost", "x", "jane").await.unwrap());
    }

    #[test]
    fn wildcard_patterns() {
        assert!(wildcard_match("sys.*", "sys.permissions"));
        assert!(wildcard_match("*rates*", "Alpha.Rates.2024"));
        assert!(wildcard_match("rate?", "rates"));
        assert!(!wildcard_match("sys.*", "app.rates"));
    }
}
