use crate::error::{CubeError, Result};
use crate::logic::evaluate::{ExpressionEvaluator, LiteralEvaluator};
use crate::logic::permissions::{self, Action, PermissionCache};
use crate::logic::reference_axis;
use crate::model::app_id::{ApplicationId, SYS_CLASSPATH};
use crate::model::cube::Cube;
use crate::model::cube_info::{CubeInfo, SearchOptions};
use crate::model::user_context::UserContext;
use crate::store::traits::Persister;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Cache slot: a resolved cube, or a memoized "known absent" marker that
/// prevents thundering-herd lookups of missing cubes.
#[derive(Debug, Clone)]
enum CacheEntry {
    Present(Arc<Cube>),
    Missing,
}

/// Process-wide cube registry: per-application cube cache, load-through to
/// the persister, and the entry point every handler receives. One `Registry`
/// value is injected into request handlers; there are no ambient singletons,
/// and dropping the value tears every map down.
pub struct Registry {
    persister: Arc<dyn Persister>,
    evaluator: Arc<dyn ExpressionEvaluator>,
    cache: RwLock<HashMap<String, HashMap<String, CacheEntry>>>,
    pub(crate) perm_cache: PermissionCache,
}

impl Registry {
    pub fn new(persister: Arc<dyn Persister>, evaluator: Arc<dyn ExpressionEvaluator>) -> Self {
        Registry {
            persister,
            evaluator,
            cache: RwLock::new(HashMap::new()),
            perm_cache: PermissionCache::new(),
        }
    }

    pub fn with_default_evaluator(persister: Arc<dyn Persister>) -> Self {
        Self::new(persister, Arc::new(LiteralEvaluator))
    }

    pub fn persister(&self) -> &dyn Persister {
        self.persister.as_ref()
    }

    pub fn evaluator(&self) -> &dyn ExpressionEvaluator {
        self.evaluator.as_ref()
    }

    /// Resolve a cube through the cache, loading from the persister on miss.
    /// Reference axes are materialized before the cube becomes visible.
    /// Known-absent cubes are memoized; transient persister errors are not.
    pub async fn get_cube(&self, app_id: &ApplicationId, name: &str) -> Result<Option<Arc<Cube>>> {
        let mut visit = HashSet::new();
        self.get_cube_tracked(app_id, name, &mut visit).await
    }

    pub(crate) async fn get_cube_tracked(
        &self,
        app_id: &ApplicationId,
        name: &str,
        visit: &mut HashSet<String>,
    ) -> Result<Option<Arc<Cube>>> {
        app_id.validate()?;
        let app_key = app_id.cache_key();
        let cube_key = name.to_lowercase();
        {
            let cache = self.cache.read().await;
            if let Some(entry) = cache.get(&app_key).and_then(|m| m.get(&cube_key)) {
                return Ok(match entry {
                    CacheEntry::Present(cube) => Some(cube.clone()),
                    CacheEntry::Missing => None,
                });
            }
        }

        let loaded = self.persister.load_cube(app_id, name).await?;
        let entry = match loaded {
            Some(mut cube) => {
                reference_axis::resolve_references(self, &mut cube, visit).await?;
                CacheEntry::Present(Arc::new(cube))
            }
            None => CacheEntry::Missing,
        };

        // Put-if-absent: a racing request's load wins so both callers observe
        // one consistent instance.
        let mut cache = self.cache.write().await;
        let slot = cache
            .entry(app_key)
            .or_default()
            .entry(cube_key)
            .or_insert(entry);
        Ok(match slot {
            CacheEntry::Present(cube) => Some(cube.clone()),
            CacheEntry::Missing => None,
        })
    }

    /// Place a cube straight into the cache (bootstrap seeding, tests).
    pub async fn cache_cube(&self, cube: Cube) -> Arc<Cube> {
        let arc = Arc::new(cube);
        let mut cache = self.cache.write().await;
        cache
            .entry(arc.app_id.cache_key())
            .or_default()
            .insert(arc.name().to_lowercase(), CacheEntry::Present(arc.clone()));
        arc
    }

    /// Drop cached cubes for one application, or everything when `None`.
    ///
    /// Required ordering for reference axes: updating a cube that other apps
    /// reference does NOT invalidate their caches; callers must clear the
    /// referencing apps themselves afterwards.
    pub async fn clear_cache(&self, app_id: Option<&ApplicationId>) {
        let mut cache = self.cache.write().await;
        match app_id {
            Some(id) => {
                cache.remove(&id.cache_key());
            }
            None => {
                cache.clear();
                self.perm_cache.clear().await;
            }
        }
    }

    async fn invalidate(&self, app_id: &ApplicationId, cube_name: &str) {
        if cube_name.eq_ignore_ascii_case(SYS_CLASSPATH) {
            // The classpath steers resolution everywhere; drop the world.
            self.clear_cache(None).await;
            return;
        }
        let mut cache = self.cache.write().await;
        if let Some(map) = cache.get_mut(&app_id.cache_key()) {
            map.remove(&cube_name.to_lowercase());
        }
    }

    /// Broadcast hook: fires after the local cache mutation has committed.
    /// Deliberately a no-op; embedders can wire in a message bus.
    pub(crate) fn broadcast(&self, app_id: &ApplicationId, action: &str, subject: &str) {
        log::debug!("broadcast {}: {} '{}'", app_id, action, subject);
    }

    fn require_snapshot(app_id: &ApplicationId, op: &str) -> Result<()> {
        if app_id.is_release() {
            return Err(CubeError::illegal_argument(format!(
                "{}: RELEASE application {} cannot be mutated",
                op, app_id
            )));
        }
        Ok(())
    }

    async fn mutation_gate(
        &self,
        user: &UserContext,
        app_id: &ApplicationId,
        resource: &str,
        op: &str,
    ) -> Result<()> {
        app_id.validate()?;
        Self::require_snapshot(app_id, op)?;
        permissions::assert_not_lock_blocked(self, user, app_id).await?;
        permissions::assert_permissions(self, user, app_id, Some(resource), Action::Update).await
    }

    /// Persist a new revision of a cube and invalidate its cache entry.
    pub async fn update_cube(&self, user: &UserContext, cube: &Cube) -> Result<()> {
        let app_id = cube.app_id.clone();
        self.mutation_gate(user, &app_id, cube.name(), "update cube").await?;
        self.persister
            .update_cube(&app_id, cube, &user.user_id)
            .await?;
        self.invalidate(&app_id, cube.name()).await;
        self.broadcast(&app_id, "updated", cube.name());
        Ok(())
    }

    pub async fn delete_cubes(
        &self,
        user: &UserContext,
        app_id: &ApplicationId,
        names: &[String],
        allow_hard_delete: bool,
    ) -> Result<bool> {
        if names.is_empty() {
            return Err(CubeError::illegal_argument("no cube names to delete"));
        }
        for name in names {
            self.mutation_gate(user, app_id, name, "delete cubes").await?;
        }
        let deleted = self
            .persister
            .delete_cubes(app_id, names, allow_hard_delete, &user.user_id)
            .await?;
        for name in names {
            self.invalidate(app_id, name).await;
            self.broadcast(app_id, "deleted", name);
        }
        Ok(deleted)
    }

    pub async fn restore_cubes(
        &self,
        user: &UserContext,
        app_id: &ApplicationId,
        names: &[String],
    ) -> Result<()> {
        if names.is_empty() {
            return Err(CubeError::illegal_argument("no cube names to restore"));
        }
        for name in names {
            self.mutation_gate(user, app_id, name, "restore cubes").await?;
        }
        self.persister
            .restore_cubes(app_id, names, &user.user_id)
            .await?;
        for name in names {
            self.invalidate(app_id, name).await;
            self.broadcast(app_id, "restored", name);
        }
        Ok(())
    }

    pub async fn rename_cube(
        &self,
        user: &UserContext,
        app_id: &ApplicationId,
        old_name: &str,
        new_name: &str,
    ) -> Result<bool> {
        if old_name.eq_ignore_ascii_case(new_name) {
            return Err(CubeError::illegal_argument(format!(
                "rename cube: '{}' and '{}' are the same name",
                old_name, new_name
            )));
        }
        self.mutation_gate(user, app_id, old_name, "rename cube").await?;
        permissions::assert_permissions(self, user, app_id, Some(new_name), Action::Update)
            .await?;
        let renamed = self
            .persister
            .rename_cube(app_id, old_name, new_name, &user.user_id)
            .await?;
        self.invalidate(app_id, old_name).await;
        self.invalidate(app_id, new_name).await;
        self.broadcast(app_id, "renamed", new_name);
        Ok(renamed)
    }

    pub async fn duplicate_cube(
        &self,
        user: &UserContext,
        old_app_id: &ApplicationId,
        old_name: &str,
        new_app_id: &ApplicationId,
        new_name: &str,
    ) -> Result<()> {
        old_app_id.validate()?;
        permissions::assert_permissions(self, user, old_app_id, Some(old_name), Action::Read)
            .await?;
        permissions::detect_new_app_id(self, user, new_app_id).await?;
        self.mutation_gate(user, new_app_id, new_name, "duplicate cube").await?;
        self.persister
            .duplicate_cube(old_app_id, new_app_id, old_name, new_name, &user.user_id)
            .await?;
        self.invalidate(new_app_id, new_name).await;
        self.broadcast(new_app_id, "duplicated", new_name);
        Ok(())
    }

    /// Search persisted records, filtered down to what the caller may read.
    pub async fn search(
        &self,
        user: &UserContext,
        app_id: &ApplicationId,
        name_pattern: Option<&str>,
        content_pattern: Option<&str>,
        options: &SearchOptions,
    ) -> Result<Vec<CubeInfo>> {
        app_id.validate()?;
        let infos = self
            .persister
            .search(app_id, name_pattern, content_pattern, options)
            .await?;
        let mut visible = Vec::with_capacity(infos.len());
        for info in infos {
            if permissions::fast_check_permissions(
                self,
                user,
                app_id,
                Some(&info.name),
                Action::Read,
            )
            .await
            {
                visible.push(info);
            }
        }
        Ok(visible)
    }

    pub async fn get_revisions(
        &self,
        user: &UserContext,
        app_id: &ApplicationId,
        cube_name: &str,
        ignore_version: bool,
    ) -> Result<Vec<CubeInfo>> {
        app_id.validate()?;
        permissions::assert_permissions(self, user, app_id, Some(cube_name), Action::Read)
            .await?;
        Ok(self
            .persister
            .get_revisions(app_id, cube_name, ignore_version)
            .await?)
    }

    pub async fn update_test_data(
        &self,
        user: &UserContext,
        app_id: &ApplicationId,
        cube_name: &str,
        test_data: &str,
    ) -> Result<()> {
        self.mutation_gate(user, app_id, cube_name, "update test data").await?;
        Ok(self
            .persister
            .update_test_data(app_id, cube_name, test_data)
            .await?)
    }

    pub async fn get_test_data(
        &self,
        user: &UserContext,
        app_id: &ApplicationId,
        cube_name: &str,
    ) -> Result<Option<String>> {
        app_id.validate()?;
        permissions::assert_permissions(self, user, app_id, Some(cube_name), Action::Read)
            .await?;
        Ok(self.persister.get_test_data(app_id, cube_name).await?)
    }

    pub async fn update_notes(
        &self,
        user: &UserContext,
        app_id: &ApplicationId,
        cube_name: &str,
        notes: &str,
    ) -> Result<()> {
        self.mutation_gate(user, app_id, cube_name, "update notes").await?;
        Ok(self.persister.update_notes(app_id, cube_name, notes).await?)
    }
}
