use crate::error::{CubeError, Result};
use crate::logic::permissions::{self, Action};
use crate::model::app_id::{validate_version, ApplicationId, ReleaseStatus, BOOT_VERSION, HEAD};
use crate::model::cube_info::SearchOptions;
use crate::model::user_context::UserContext;
use crate::store::registry::Registry;

/// Branch and release lifecycle on top of the persister: copy, move,
/// release, delete. Every operation validates inputs first, walks the
/// permission and lock gates, and invalidates caches after the persister
/// commits.
pub struct BranchOperations;

impl BranchOperations {
    /// Copy the cubes of `src` into the branch `dst`. The target may not be
    /// a RELEASE coordinate or an existing non-empty branch. New apps get
    /// their permission cubes seeded, with `user` as ADMIN.
    pub async fn copy_branch(
        reg: &Registry,
        user: &UserContext,
        src: &ApplicationId,
        dst: &ApplicationId,
        with_history: bool,
    ) -> Result<usize> {
        src.validate()?;
        dst.validate()?;
        if dst.is_release() {
            return Err(CubeError::illegal_argument(format!(
                "copy branch: target {} is a RELEASE coordinate",
                dst
            )));
        }
        if src.cache_key() == dst.cache_key() {
            return Err(CubeError::illegal_argument(format!(
                "copy branch: source and target are both {}",
                dst
            )));
        }
        let existing = reg
            .persister()
            .search(dst, None, None, &SearchOptions::active_only())
            .await?;
        if !existing.is_empty() {
            return Err(CubeError::illegal_argument(format!(
                "copy branch: target {} already holds {} cubes",
                dst,
                existing.len()
            )));
        }
        permissions::detect_new_app_id(reg, user, dst).await?;
        permissions::assert_not_lock_blocked(reg, user, dst).await?;

        let copied = if with_history {
            reg.persister().copy_branch_with_history(src, dst).await?
        } else {
            reg.persister().copy_branch(src, dst).await?
        };
        reg.clear_cache(Some(dst)).await;
        reg.broadcast(dst, "branch copied", &src.branch);
        Ok(copied)
    }

    /// Move a branch to a new version. The caller must hold the app lock;
    /// the bootstrap version is rejected as source or target.
    pub async fn move_branch(
        reg: &Registry,
        user: &UserContext,
        app_id: &ApplicationId,
        new_version: &str,
    ) -> Result<usize> {
        app_id.validate()?;
        validate_version(new_version)?;
        if app_id.is_bootstrap_version() || new_version == BOOT_VERSION {
            return Err(CubeError::illegal_argument(
                "move branch: version 0.0.0 is reserved for system configuration",
            ));
        }
        if app_id.is_head() {
            return Err(CubeError::illegal_argument("move branch: cannot move HEAD"));
        }
        permissions::assert_locked_by_me(reg, user, app_id).await?;

        let moved = reg.persister().move_branch(app_id, new_version).await?;
        reg.clear_cache(Some(app_id)).await;
        reg.clear_cache(Some(&app_id.with_version(new_version))).await;
        reg.broadcast(app_id, "branch moved", new_version);
        Ok(moved)
    }

    /// SNAPSHOT → RELEASE transition: under the app lock, move every
    /// non-HEAD branch to `new_version`, flip the HEAD SNAPSHOT to RELEASE,
    /// and seed a fresh HEAD SNAPSHOT at `new_version` with the released
    /// content. Returns the number of cubes released.
    pub async fn release_version(
        reg: &Registry,
        user: &UserContext,
        app_id: &ApplicationId,
        new_version: &str,
    ) -> Result<usize> {
        app_id.validate()?;
        validate_version(new_version)?;
        if app_id.is_bootstrap_version() {
            return Err(CubeError::illegal_argument(
                "release: version 0.0.0 is reserved for system configuration",
            ));
        }
        if !app_id.is_snapshot() {
            return Err(CubeError::illegal_argument(format!(
                "release: {} is already a RELEASE",
                app_id
            )));
        }
        if new_version == app_id.version {
            return Err(CubeError::illegal_argument(format!(
                "release: new snapshot version must differ from '{}'",
                app_id.version
            )));
        }
        permissions::assert_permissions(reg, user, app_id, None, Action::Release).await?;
        permissions::lock_app(reg, user, app_id).await?;

        let result = Self::release_under_lock(reg, user, app_id, new_version).await;

        // A process crash in release_under_lock leaves the lock set, which
        // blocks further mutation until an administrator intervenes.
        let unlock = permissions::unlock_app(reg, user, app_id).await;
        let released = result?;
        unlock?;

        reg.broadcast(app_id, "released", new_version);
        Ok(released)
    }

    async fn release_under_lock(
        reg: &Registry,
        user: &UserContext,
        app_id: &ApplicationId,
        new_version: &str,
    ) -> Result<usize> {
        let head = app_id.with_branch(HEAD);
        log::info!(
            "{} releasing {} as RELEASE, next snapshot {}",
            user.user_id,
            app_id,
            new_version
        );

        let branches = reg.persister().get_branches(app_id).await?;
        for branch in branches {
            if branch.eq_ignore_ascii_case(HEAD) {
                continue;
            }
            let branch_app = app_id.with_branch(&branch);
            reg.persister().move_branch(&branch_app, new_version).await?;
            reg.clear_cache(Some(&branch_app)).await;
            reg.clear_cache(Some(&branch_app.with_version(new_version))).await;
        }

        let released = reg.persister().release_cubes(&head, new_version).await?;
        let release_app = head.with_status(ReleaseStatus::Release);
        reg.clear_cache(Some(&head)).await;
        reg.clear_cache(Some(&release_app)).await;

        let new_head = head.with_version(new_version);
        reg.persister().copy_branch(&release_app, &new_head).await?;
        reg.clear_cache(Some(&new_head)).await;
        Ok(released)
    }

    /// Delete a branch outright. HEAD and the bootstrap version are
    /// protected.
    pub async fn delete_branch(
        reg: &Registry,
        user: &UserContext,
        app_id: &ApplicationId,
    ) -> Result<bool> {
        app_id.validate()?;
        if app_id.is_head() {
            return Err(CubeError::illegal_argument("delete branch: cannot delete HEAD"));
        }
        if app_id.is_bootstrap_version() {
            return Err(CubeError::illegal_argument(
                "delete branch: version 0.0.0 is reserved for system configuration",
            ));
        }
        permissions::assert_not_lock_blocked(reg, user, app_id).await?;
        permissions::assert_permissions(reg, user, app_id, None, Action::Update).await?;

        let deleted = reg.persister().delete_branch(app_id).await?;
        reg.clear_cache(Some(app_id)).await;
        reg.broadcast(app_id, "branch deleted", &app_id.branch);
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::cube::{CellValue, Cube};
    use crate::model::value::{AxisType, AxisValueType, ColumnOrder, ColumnValue, Scalar};
    use crate::store::memory::MemoryPersister;
    use std::sync::Arc;

    fn head_app() -> ApplicationId {
        ApplicationId::new("acme", "alpha", "1.0.0", ReleaseStatus::Snapshot, HEAD).unwrap()
    }

    fn cube(name: &str, app_id: &ApplicationId) -> Cube {
        let mut cube = Cube::new(name, app_id.clone()).unwrap();
        cube.add_axis(
            "n",
            AxisType::Discrete,
            AxisValueType::Long,
            ColumnOrder::Sorted,
            false,
        )
        .unwrap();
        let id = cube.add_column("n", Some(ColumnValue::Scalar(Scalar::Long(1)))).unwrap();
        cube.set_cell_by_ids(&[id], CellValue::Json(serde_json::json!("v"))).unwrap();
        cube
    }

    fn registry() -> Registry {
        Registry::with_default_evaluator(Arc::new(MemoryPersister::new()))
    }

    #[tokio::test]
    async fn copy_branch_rejects_release_and_nonempty_targets() {
        let reg = registry();
        let jane = UserContext::new("jane");
        let head = head_app();
        reg.update_cube(&jane, &cube("rates", &head)).await.unwrap();

        let release_target = head.with_branch("b").with_status(ReleaseStatus::Release);
        assert!(matches!(
            BranchOperations::copy_branch(&reg, &jane, &head, &release_target, false)
                .await
                .unwrap_err(),
            CubeError::IllegalArgument(_)
        ));

        let branch = head.with_branch("jane.branch");
        let copied = BranchOperations::copy_branch(&reg, &jane, &head, &branch, false)
            .await
            .unwrap();
        assert_eq!(copied, 1);

        // Copying onto the now non-empty branch fails.
        assert!(matches!(
            BranchOperations::copy_branch(&reg, &jane, &head, &branch, false)
                .await
                .unwrap_err(),
            CubeError::IllegalArgument(_)
        ));
    }

    #[tokio::test]
    async fn move_branch_needs_the_lock_and_shuns_bootstrap() {
        let reg = registry();
        let jane = UserContext::new("jane");
        let head = head_app();
        reg.update_cube(&jane, &cube("rates", &head)).await.unwrap();
        let branch = head.with_branch("jane.branch");
        BranchOperations::copy_branch(&reg, &jane, &head, &branch, false)
            .await
            .unwrap();

        // Without the lock the move is refused.
        assert!(matches!(
            BranchOperations::move_branch(&reg, &jane, &branch, "1.1.0")
                .await
                .unwrap_err(),
            CubeError::Security(_)
        ));

        permissions::lock_app(&reg, &jane, &branch).await.unwrap();
        let moved = BranchOperations::move_branch(&reg, &jane, &branch, "1.1.0")
            .await
            .unwrap();
        assert_eq!(moved, 1);
        permissions::unlock_app(&reg, &jane, &branch).await.unwrap();

        assert!(reg
            .get_cube(&branch.with_version("1.1.0"), "rates")
            .await
            .unwrap()
            .is_some());
        assert!(reg.get_cube(&branch, "rates").await.unwrap().is_none());

        assert!(matches!(
            BranchOperations::move_branch(&reg, &jane, &branch.with_version("0.0.0"), "2.0.0")
                .await
                .unwrap_err(),
            CubeError::IllegalArgument(_)
        ));
    }

    #[tokio::test]
    async fn release_flow_matches_the_lifecycle_contract() {
        let reg = registry();
        let jane = UserContext::new("jane");
        let bob = UserContext::new("bob");
        let head = head_app();

        // Bootstrap mode: jane creates content, then the branch copy seeds
        // the permission cubes making jane the admin.
        reg.update_cube(&jane, &cube("rates", &head)).await.unwrap();
        let branch = head.with_branch("mybranch");
        BranchOperations::copy_branch(&reg, &jane, &head, &branch, false)
            .await
            .unwrap();

        // A non-admin cannot release.
        assert!(matches!(
            BranchOperations::release_version(&reg, &bob, &head, "1.1.0")
                .await
                .unwrap_err(),
            CubeError::Security(_)
        ));

        let released = BranchOperations::release_version(&reg, &jane, &head, "1.1.0")
            .await
            .unwrap();
        assert_eq!(released, 1);

        // The prior SNAPSHOT is now RELEASE.
        let release = head.with_status(ReleaseStatus::Release);
        assert!(reg.get_cube(&release, "rates").await.unwrap().is_some());
        assert!(reg.get_cube(&head, "rates").await.unwrap().is_none());

        // The new HEAD SNAPSHOT exists with the copied-through content.
        let new_head = head.with_version("1.1.0");
        assert!(reg.get_cube(&new_head, "rates").await.unwrap().is_some());

        // Non-HEAD branches moved to the new version.
        assert!(reg
            .get_cube(&branch.with_version("1.1.0"), "rates")
            .await
            .unwrap()
            .is_some());

        // The lock was released on the way out.
        permissions::assert_not_lock_blocked(&reg, &bob, &head).await.unwrap();

        // Releasing a RELEASE is rejected.
        assert!(matches!(
            BranchOperations::release_version(&reg, &jane, &release, "1.2.0")
                .await
                .unwrap_err(),
            CubeError::IllegalArgument(_)
        ));
    }

    #[tokio::test]
    async fn delete_branch_protects_head() {
        let reg = registry();
        let jane = UserContext::new("jane");
        let head = head_app();
        reg.update_cube(&jane, &cube("rates", &head)).await.unwrap();
        let branch = head.with_branch("jane.branch");
        BranchOperations::copy_branch(&reg, &jane, &head, &branch, false)
            .await
            .unwrap();

        assert!(matches!(
            BranchOperations::delete_branch(&reg, &jane, &head).await.unwrap_err(),
            CubeError::IllegalArgument(_)
        ));
        assert!(BranchOperations::delete_branch(&reg, &jane, &branch).await.unwrap());
        assert!(reg.get_cube(&branch, "rates").await.unwrap().is_none());
    }
}
