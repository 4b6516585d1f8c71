use crate::model::app_id::{ApplicationId, ReleaseStatus};
use crate::model::cube::Cube;
use crate::model::cube_info::{CubeInfo, SearchOptions};
use anyhow::Result;
use std::collections::{HashMap, HashSet};

/// Port to the persistence driver. All blocking I/O lives behind this trait;
/// the registry performs exactly one round-trip per (app, cube) cache miss.
///
/// Batch operations inherit their atomicity from the implementation.
#[async_trait::async_trait]
pub trait Persister: Send + Sync {
    /// Latest active revision of a cube, or `None` when absent/deleted.
    async fn load_cube(&self, app_id: &ApplicationId, name: &str) -> Result<Option<Cube>>;

    /// A specific revision by record id; absence is an error.
    async fn load_cube_by_id(&self, id: i64) -> Result<Cube>;

    /// Persist a new revision of a cube.
    async fn update_cube(&self, app_id: &ApplicationId, cube: &Cube, user_id: &str) -> Result<()>;

    /// Soft-delete (or hard-delete when allowed) the named cubes.
    async fn delete_cubes(
        &self,
        app_id: &ApplicationId,
        names: &[String],
        allow_hard_delete: bool,
        user_id: &str,
    ) -> Result<bool>;

    /// Restore previously deleted cubes as new active revisions.
    async fn restore_cubes(
        &self,
        app_id: &ApplicationId,
        names: &[String],
        user_id: &str,
    ) -> Result<()>;

    async fn rename_cube(
        &self,
        app_id: &ApplicationId,
        old_name: &str,
        new_name: &str,
        user_id: &str,
    ) -> Result<bool>;

    async fn duplicate_cube(
        &self,
        old_app_id: &ApplicationId,
        new_app_id: &ApplicationId,
        old_name: &str,
        new_name: &str,
        user_id: &str,
    ) -> Result<()>;

    /// Copy the latest revisions of `src` into `dst`. Returns cubes copied.
    async fn copy_branch(&self, src: &ApplicationId, dst: &ApplicationId) -> Result<usize>;

    /// Copy `src` into `dst` with full revision history.
    async fn copy_branch_with_history(
        &self,
        src: &ApplicationId,
        dst: &ApplicationId,
    ) -> Result<usize>;

    /// Move every record of the branch to a new version. Returns records moved.
    async fn move_branch(&self, app_id: &ApplicationId, new_version: &str) -> Result<usize>;

    /// Flip the HEAD SNAPSHOT of this version to RELEASE. Returns cubes released.
    async fn release_cubes(&self, app_id: &ApplicationId, new_version: &str) -> Result<usize>;

    async fn delete_branch(&self, app_id: &ApplicationId) -> Result<bool>;

    /// Revision history of one cube, newest first.
    async fn get_revisions(
        &self,
        app_id: &ApplicationId,
        name: &str,
        ignore_version: bool,
    ) -> Result<Vec<CubeInfo>>;

    async fn get_app_names(&self, tenant: &str) -> Result<Vec<String>>;

    async fn get_versions(
        &self,
        tenant: &str,
        app: &str,
    ) -> Result<HashMap<ReleaseStatus, Vec<String>>>;

    async fn get_branches(&self, app_id: &ApplicationId) -> Result<HashSet<String>>;

    /// Search records by name pattern (`*`/`?` wildcards) and/or content
    /// substring, steered by [`SearchOptions`].
    async fn search(
        &self,
        app_id: &ApplicationId,
        name_pattern: Option<&str>,
        content_pattern: Option<&str>,
        options: &SearchOptions,
    ) -> Result<Vec<CubeInfo>>;

    async fn update_test_data(
        &self,
        app_id: &ApplicationId,
        cube_name: &str,
        test_data: &str,
    ) -> Result<()>;

    async fn get_test_data(&self, app_id: &ApplicationId, cube_name: &str)
        -> Result<Option<String>>;

    async fn update_notes(
        &self,
        app_id: &ApplicationId,
        cube_name: &str,
        notes: &str,
    ) -> Result<()>;
}
