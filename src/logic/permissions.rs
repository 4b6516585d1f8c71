use crate::error::{CubeError, Result};
use crate::model::app_id::{
    ApplicationId, SYS_BRANCH_PERMISSIONS, SYS_LOCK, SYS_PERMISSIONS, SYS_USERGROUPS,
};
use crate::model::cube::{CellValue, Cube};
use crate::model::cube_info::SearchOptions;
use crate::model::user_context::UserContext;
use crate::model::value::{AxisType, AxisValueType, ColumnOrder, ColumnValue, Scalar};
use crate::store::registry::Registry;
use sha1::{Digest, Sha1};
use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

pub const ROLE_ADMIN: &str = "admin";
pub const ROLE_USER: &str = "user";

const AXIS_USER: &str = "user";
const AXIS_ROLE: &str = "role";
const AXIS_RESOURCE: &str = "resource";
const AXIS_ACTION: &str = "action";
const AXIS_SYSTEM: &str = "system";

const DECISION_TTL: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Read,
    Update,
    Release,
    Commit,
}

impl Action {
    pub fn is_mutating(&self) -> bool {
        !matches!(self, Action::Read)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Action::Read => "read",
            Action::Update => "update",
            Action::Release => "release",
            Action::Commit => "commit",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy)]
struct CachedDecision {
    at: Instant,
    allow: bool,
}

/// Short-lived permission decision cache; entries expire lazily on lookup
/// after thirty minutes.
#[derive(Debug, Default)]
pub struct PermissionCache {
    entries: RwLock<HashMap<String, CachedDecision>>,
}

impl PermissionCache {
    pub fn new() -> Self {
        Self::default()
    }

    async fn get(&self, key: &str) -> Option<bool> {
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(d) if d.at.elapsed() <= DECISION_TTL => return Some(d.allow),
                Some(_) => {}
                None => return None,
            }
        }
        self.entries.write().await.remove(key);
        None
    }

    async fn put(&self, key: String, allow: bool) {
        self.entries.write().await.insert(
            key,
            CachedDecision {
                at: Instant::now(),
                allow,
            },
        );
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }
}

fn decision_key(user: &str, app_id: &ApplicationId, resource: Option<&str>, action: Action) -> String {
    let mut h = Sha1::new();
    h.update(user.as_bytes());
    h.update(b"|");
    h.update(app_id.cache_key().as_bytes());
    h.update(b"|");
    h.update(resource.unwrap_or("").to_lowercase().as_bytes());
    h.update(b"|");
    h.update(action.to_string().as_bytes());
    hex::encode(h.finalize())
}

/// Check whether `user` may perform `action` on `resource` within `app_id`.
/// Decisions are cached for thirty minutes. Never throws on deny.
pub async fn check_permissions(
    reg: &Registry,
    user: &UserContext,
    app_id: &ApplicationId,
    resource: Option<&str>,
    action: Action,
) -> Result<bool> {
    let key = decision_key(&user.user_id, app_id, resource, action);
    if let Some(allow) = reg.perm_cache.get(&key).await {
        return Ok(allow);
    }
    let allow = compute_permissions(reg, user, app_id, resource, action).await?;
    reg.perm_cache.put(key, allow).await;
    Ok(allow)
}

/// Deny-filtering variant: swallows store errors as deny instead of
/// propagating them.
pub async fn fast_check_permissions(
    reg: &Registry,
    user: &UserContext,
    app_id: &ApplicationId,
    resource: Option<&str>,
    action: Action,
) -> bool {
    match check_permissions(reg, user, app_id, resource, action).await {
        Ok(allow) => allow,
        Err(e) => {
            log::warn!("permission check failed for {}: {}", app_id, e);
            false
        }
    }
}

/// Throwing variant used on mutation paths.
pub async fn assert_permissions(
    reg: &Registry,
    user: &UserContext,
    app_id: &ApplicationId,
    resource: Option<&str>,
    action: Action,
) -> Result<()> {
    if check_permissions(reg, user, app_id, resource, action).await? {
        Ok(())
    } else {
        Err(CubeError::security(format!(
            "user '{}' lacks {} permission on '{}' in {}",
            user.user_id,
            action,
            resource.unwrap_or("*"),
            app_id
        )))
    }
}

async fn compute_permissions(
    reg: &Registry,
    user: &UserContext,
    app_id: &ApplicationId,
    resource: Option<&str>,
    action: Action,
) -> Result<bool> {
    // Lock state must always be observable.
    if action == Action::Read && resource.is_some_and(|r| r.eq_ignore_ascii_case(SYS_LOCK)) {
        return Ok(true);
    }

    let boot = app_id.as_bootstrap();
    let perm_cube = reg.get_cube(&boot, SYS_PERMISSIONS).await?;
    let group_cube = reg.get_cube(&boot, SYS_USERGROUPS).await?;
    let (perm_cube, group_cube) = match (perm_cube, group_cube) {
        (Some(p), Some(g)) => (p, g),
        // Bootstrap mode: nothing seeded yet, everything is permitted.
        _ => return Ok(true),
    };

    let roles = roles_of(reg, &group_cube, &user.user_id)?;
    let admin = roles.iter().any(|r| r == ROLE_ADMIN);

    if action.is_mutating() && !admin {
        let overlay_app = boot.with_branch(&app_id.branch);
        if let Some(branch_cube) = reg.get_cube(&overlay_app, SYS_BRANCH_PERMISSIONS).await? {
            if !branch_allows(&branch_cube, resource, &user.user_id)? {
                return Ok(false);
            }
        }
    }

    for role in &roles {
        if role_allows(&perm_cube, resource, role, action)? {
            return Ok(true);
        }
    }
    Ok(false)
}

pub async fn is_admin(reg: &Registry, user: &UserContext, app_id: &ApplicationId) -> Result<bool> {
    let boot = app_id.as_bootstrap();
    match reg.get_cube(&boot, SYS_USERGROUPS).await? {
        // Bootstrap mode: everyone administers an unseeded app.
        None => Ok(true),
        Some(groups) => {
            Ok(roles_of(reg, &groups, &user.user_id)?.iter().any(|r| r == ROLE_ADMIN))
        }
    }
}

fn roles_of(reg: &Registry, groups: &Cube, user_id: &str) -> Result<Vec<String>> {
    let role_axis = groups.axis(AXIS_ROLE).ok_or_else(|| {
        CubeError::illegal_state(format!("{} cube has no '{}' axis", SYS_USERGROUPS, AXIS_ROLE))
    })?;
    let mut roles = Vec::new();
    for col in role_axis.columns() {
        let role = match &col.value {
            Some(ColumnValue::Scalar(Scalar::Str(s))) => s.clone(),
            _ => continue,
        };
        let mut coord = crate::logic::evaluate::Coordinate::new();
        coord.insert(AXIS_USER.into(), serde_json::json!(user_id));
        coord.insert(AXIS_ROLE.into(), serde_json::json!(role.clone()));
        let mut out = crate::logic::evaluate::Output::new();
        if let Some(v) = groups.get_cell(&coord, &mut out, reg.evaluator())? {
            if crate::logic::evaluate::is_truthy(&v) {
                roles.push(role.to_lowercase());
            }
        }
    }
    Ok(roles)
}

fn branch_allows(
    branch_cube: &Cube,
    resource: Option<&str>,
    user_id: &str,
) -> Result<bool> {
    let resource_axis = branch_cube.axis(AXIS_RESOURCE).ok_or_else(|| {
        CubeError::illegal_state(format!(
            "{} cube has no '{}' axis",
            SYS_BRANCH_PERMISSIONS, AXIS_RESOURCE
        ))
    })?;
    let user_axis = branch_cube.axis(AXIS_USER).ok_or_else(|| {
        CubeError::illegal_state(format!(
            "{} cube has no '{}' axis",
            SYS_BRANCH_PERMISSIONS, AXIS_USER
        ))
    })?;
    let user_col = match user_axis.find_column(&serde_json::json!(user_id))? {
        Some(c) => c,
        None => return Ok(false),
    };
    for col in matching_resource_columns(resource_axis.columns(), resource) {
        if let Some(CellValue::Json(v)) = branch_cube.cell_by_ids(&[col.id, user_col.id])? {
            if crate::logic::evaluate::is_truthy(v) {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

fn role_allows(
    perm_cube: &Cube,
    resource: Option<&str>,
    role: &str,
    action: Action,
) -> Result<bool> {
    let resource_axis = perm_cube.axis(AXIS_RESOURCE).ok_or_else(|| {
        CubeError::illegal_state(format!(
            "{} cube has no '{}' axis",
            SYS_PERMISSIONS, AXIS_RESOURCE
        ))
    })?;
    let role_col = perm_cube
        .axis(AXIS_ROLE)
        .and_then(|a| a.find_column(&serde_json::json!(role)).ok().flatten());
    let action_col = perm_cube
        .axis(AXIS_ACTION)
        .and_then(|a| a.find_column(&serde_json::json!(action.to_string())).ok().flatten());
    let (role_col, action_col) = match (role_col, action_col) {
        (Some(r), Some(a)) => (r, a),
        _ => return Ok(false),
    };
    for col in matching_resource_columns(resource_axis.columns(), resource) {
        if let Some(CellValue::Json(v)) =
            perm_cube.cell_by_ids(&[col.id, role_col.id, action_col.id])?
        {
            if crate::logic::evaluate::is_truthy(v) {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

/// Resource columns whose wildcard pattern matches `resource`; when no
/// pattern matches, the default column (if any) is the catch-all row.
fn matching_resource_columns<'a>(
    columns: Vec<&'a crate::model::column::Column>,
    resource: Option<&str>,
) -> Vec<&'a crate::model::column::Column> {
    let mut matched = Vec::new();
    let mut default = None;
    for col in columns {
        match &col.value {
            None => default = Some(col),
            Some(ColumnValue::Scalar(Scalar::Str(pattern))) => {
                if resource_matches(pattern, resource) {
                    matched.push(col);
                }
            }
            _ => {}
        }
    }
    if matched.is_empty() {
        if let Some(d) = default {
            matched.push(d);
        }
    }
    matched
}

/// Wildcard resource matching. Resource and pattern split on `/` into a cube
/// segment and an optional axis segment; a pattern without an axis segment
/// matches only resources without one.
pub fn resource_matches(pattern: &str, resource: Option<&str>) -> bool {
    let resource = match resource {
        // App-level operations carry no resource; any pattern row applies.
        None => return true,
        Some(r) => r,
    };
    let (pat_cube, pat_axis) = split_resource(pattern);
    let (res_cube, res_axis) = split_resource(resource);
    match (pat_axis, res_axis) {
        (None, Some(_)) | (Some(_), None) => return false,
        (Some(p), Some(r)) => {
            if !wildcard_regex(p).is_match(r) {
                return false;
            }
        }
        (None, None) => {}
    }
    wildcard_regex(pat_cube).is_match(res_cube)
}

fn split_resource(s: &str) -> (&str, Option<&str>) {
    match s.split_once('/') {
        Some((cube, axis)) => (cube, Some(axis)),
        None => (s, None),
    }
}

/// Compiled wildcard regexes, cached globally for the process lifetime.
fn wildcard_regex(pattern: &str) -> regex::Regex {
    static CACHE: OnceLock<std::sync::RwLock<HashMap<String, regex::Regex>>> = OnceLock::new();
    let cache = CACHE.get_or_init(|| std::sync::RwLock::new(HashMap::new()));
    if let Some(re) = cache.read().expect("regex cache lock").get(pattern) {
        return re.clone();
    }
    let mut source = String::from("(?i)^");
    for c in pattern.chars() {
        match c {
            '*' => source.push_str(".*"),
            '?' => source.push('.'),
            other => source.push_str(&regex::escape(&other.to_string())),
        }
    }
    source.push('$');
    let re = regex::Regex::new(&source).unwrap_or_else(|_| regex::Regex::new("^$").expect("empty"));
    cache
        .write()
        .expect("regex cache lock")
        .insert(pattern.to_string(), re.clone());
    re
}

/// Seed the app-level permission cubes when an application has no active
/// records yet. The seeding user becomes ADMIN and USER. Returns whether
/// seeding happened.
pub async fn detect_new_app_id(
    reg: &Registry,
    user: &UserContext,
    app_id: &ApplicationId,
) -> Result<bool> {
    let active = reg
        .persister()
        .search(app_id, None, None, &SearchOptions::active_only())
        .await?;
    if !active.is_empty() {
        return Ok(false);
    }
    let boot = app_id.as_bootstrap();
    if reg.persister().load_cube(&boot, SYS_PERMISSIONS).await?.is_some() {
        return Ok(false);
    }
    seed_app_permissions(reg, user, app_id).await?;
    Ok(true)
}

async fn seed_app_permissions(
    reg: &Registry,
    user: &UserContext,
    app_id: &ApplicationId,
) -> Result<()> {
    let boot = app_id.as_bootstrap();

    // sys.usergroups: (user, role) → boolean. The seeder is ADMIN and USER;
    // the default user row makes everyone a USER.
    let mut groups = Cube::new(SYS_USERGROUPS, boot.clone())?;
    groups.add_axis(AXIS_USER, AxisType::Discrete, AxisValueType::String, ColumnOrder::Display, true)?;
    groups.add_axis(AXIS_ROLE, AxisType::Discrete, AxisValueType::String, ColumnOrder::Display, false)?;
    let seeder = groups.add_column(AXIS_USER, Some(ColumnValue::Scalar(Scalar::Str(user.user_id.clone()))))?;
    let admin = groups.add_column(AXIS_ROLE, Some(ColumnValue::Scalar(Scalar::Str(ROLE_ADMIN.into()))))?;
    let user_role = groups.add_column(AXIS_ROLE, Some(ColumnValue::Scalar(Scalar::Str(ROLE_USER.into()))))?;
    let default_user = groups.axis(AXIS_USER).and_then(|a| a.default_column()).map(|c| c.id)
        .ok_or_else(|| CubeError::illegal_state("usergroups user axis lost its default column"))?;
    groups.set_cell_by_ids(&[seeder, admin], CellValue::Json(serde_json::json!(true)))?;
    groups.set_cell_by_ids(&[seeder, user_role], CellValue::Json(serde_json::json!(true)))?;
    groups.set_cell_by_ids(&[default_user, user_role], CellValue::Json(serde_json::json!(true)))?;

    // sys.permissions: (resource, role, action) → boolean. sys.* rows keep
    // system cubes admin-writable; the default row covers everything else.
    let mut perms = Cube::new(SYS_PERMISSIONS, boot.clone())?;
    perms.add_axis(AXIS_RESOURCE, AxisType::Discrete, AxisValueType::String, ColumnOrder::Display, true)?;
    perms.add_axis(AXIS_ROLE, AxisType::Discrete, AxisValueType::String, ColumnOrder::Display, false)?;
    perms.add_axis(AXIS_ACTION, AxisType::Discrete, AxisValueType::String, ColumnOrder::Display, false)?;
    let sys_row = perms.add_column(AXIS_RESOURCE, Some(ColumnValue::Scalar(Scalar::Str("sys.*".into()))))?;
    let any_row = perms.axis(AXIS_RESOURCE).and_then(|a| a.default_column()).map(|c| c.id)
        .ok_or_else(|| CubeError::illegal_state("permissions resource axis lost its default column"))?;
    let admin_col = perms.add_column(AXIS_ROLE, Some(ColumnValue::Scalar(Scalar::Str(ROLE_ADMIN.into()))))?;
    let user_col = perms.add_column(AXIS_ROLE, Some(ColumnValue::Scalar(Scalar::Str(ROLE_USER.into()))))?;
    let mut action_cols = HashMap::new();
    for action in [Action::Read, Action::Update, Action::Release, Action::Commit] {
        let id = perms.add_column(AXIS_ACTION, Some(ColumnValue::Scalar(Scalar::Str(action.to_string()))))?;
        action_cols.insert(action.to_string(), id);
    }
    for row in [sys_row, any_row] {
        for id in action_cols.values() {
            perms.set_cell_by_ids(&[row, admin_col, *id], CellValue::Json(serde_json::json!(true)))?;
        }
    }
    perms.set_cell_by_ids(
        &[sys_row, user_col, action_cols["read"]],
        CellValue::Json(serde_json::json!(true)),
    )?;
    for action in ["read", "update", "commit"] {
        perms.set_cell_by_ids(
            &[any_row, user_col, action_cols[action]],
            CellValue::Json(serde_json::json!(true)),
        )?;
    }

    // sys.branch.permissions overlay for this branch: only the seeder may
    // mutate until others are granted.
    let overlay_app = boot.with_branch(&app_id.branch);
    let mut overlay = Cube::new(SYS_BRANCH_PERMISSIONS, overlay_app.clone())?;
    overlay.add_axis(AXIS_RESOURCE, AxisType::Discrete, AxisValueType::String, ColumnOrder::Display, true)?;
    overlay.add_axis(AXIS_USER, AxisType::Discrete, AxisValueType::String, ColumnOrder::Display, false)?;
    let any_resource = overlay.axis(AXIS_RESOURCE).and_then(|a| a.default_column()).map(|c| c.id)
        .ok_or_else(|| CubeError::illegal_state("branch permissions resource axis lost its default column"))?;
    let seeder_col = overlay.add_column(AXIS_USER, Some(ColumnValue::Scalar(Scalar::Str(user.user_id.clone()))))?;
    overlay.set_cell_by_ids(&[any_resource, seeder_col], CellValue::Json(serde_json::json!(true)))?;

    // sys.lock: single-cell cube carrying the lock holder.
    let mut lock = Cube::new(SYS_LOCK, boot.clone())?;
    lock.add_axis(AXIS_SYSTEM, AxisType::Discrete, AxisValueType::String, ColumnOrder::Display, true)?;

    let persister = reg.persister();
    persister.update_cube(&boot, &groups, &user.user_id).await?;
    persister.update_cube(&boot, &perms, &user.user_id).await?;
    persister.update_cube(&overlay_app, &overlay, &user.user_id).await?;
    persister.update_cube(&boot, &lock, &user.user_id).await?;
    reg.clear_cache(Some(&boot)).await;
    reg.clear_cache(Some(&overlay_app)).await;
    reg.perm_cache.clear().await;
    log::info!("seeded permission cubes for {} (admin: {})", app_id, user.user_id);
    Ok(())
}

/// Current lock holder of the app, if any.
pub async fn lock_holder(reg: &Registry, app_id: &ApplicationId) -> Result<Option<String>> {
    let boot = app_id.as_bootstrap();
    let Some(lock) = reg.get_cube(&boot, SYS_LOCK).await? else {
        return Ok(None);
    };
    let mut out = crate::logic::evaluate::Output::new();
    let value = lock.get_cell(
        &crate::logic::evaluate::Coordinate::new(),
        &mut out,
        reg.evaluator(),
    )?;
    Ok(value.and_then(|v| v.as_str().map(|s| s.to_string())).filter(|s| !s.is_empty()))
}

/// Write the caller's id into `sys.lock` iff empty. Returns `false` when the
/// caller already holds it; raises `Security` when someone else does.
pub async fn lock_app(reg: &Registry, user: &UserContext, app_id: &ApplicationId) -> Result<bool> {
    match lock_holder(reg, app_id).await? {
        Some(holder) if holder == user.user_id => Ok(false),
        Some(holder) => Err(CubeError::security(format!(
            "application {} is locked by '{}'",
            app_id, holder
        ))),
        None => {
            write_lock_cell(reg, user, app_id, Some(&user.user_id)).await?;
            Ok(true)
        }
    }
}

/// Release the lock; refuses unless the caller is the holder.
pub async fn unlock_app(reg: &Registry, user: &UserContext, app_id: &ApplicationId) -> Result<()> {
    match lock_holder(reg, app_id).await? {
        None => Ok(()),
        Some(holder) if holder == user.user_id => {
            write_lock_cell(reg, user, app_id, None).await
        }
        Some(holder) => Err(CubeError::security(format!(
            "application {} is locked by '{}', not '{}'",
            app_id, holder, user.user_id
        ))),
    }
}

/// Passes when the lock is free or held by the caller.
pub async fn assert_not_lock_blocked(
    reg: &Registry,
    user: &UserContext,
    app_id: &ApplicationId,
) -> Result<()> {
    match lock_holder(reg, app_id).await? {
        None => Ok(()),
        Some(holder) if holder == user.user_id => Ok(()),
        Some(holder) => Err(CubeError::security(format!(
            "application {} is locked by '{}'",
            app_id, holder
        ))),
    }
}

/// Passes only when the caller holds the lock.
pub async fn assert_locked_by_me(
    reg: &Registry,
    user: &UserContext,
    app_id: &ApplicationId,
) -> Result<()> {
    match lock_holder(reg, app_id).await? {
        Some(holder) if holder == user.user_id => Ok(()),
        Some(holder) => Err(CubeError::security(format!(
            "application {} is locked by '{}', not '{}'",
            app_id, holder, user.user_id
        ))),
        None => Err(CubeError::security(format!(
            "application {} is not locked",
            app_id
        ))),
    }
}

async fn write_lock_cell(
    reg: &Registry,
    user: &UserContext,
    app_id: &ApplicationId,
    holder: Option<&str>,
) -> Result<()> {
    let boot = app_id.as_bootstrap();
    let mut lock = match reg.get_cube(&boot, SYS_LOCK).await? {
        Some(cube) => (*cube).clone(),
        None => {
            let mut cube = Cube::new(SYS_LOCK, boot.clone())?;
            cube.add_axis(
                AXIS_SYSTEM,
                AxisType::Discrete,
                AxisValueType::String,
                ColumnOrder::Display,
                true,
            )?;
            cube
        }
    };
    let coord = crate::logic::evaluate::Coordinate::new();
    match holder {
        Some(id) => lock.set_cell(&coord, CellValue::Json(serde_json::json!(id)))?,
        None => {
            lock.remove_cell(&coord)?;
        }
    }
    reg.persister().update_cube(&boot, &lock, &user.user_id).await?;
    reg.clear_cache(Some(&boot)).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::app_id::{ReleaseStatus, HEAD};
    use crate::store::memory::MemoryPersister;
    use std::sync::Arc;

    fn app() -> ApplicationId {
        ApplicationId::new("acme", "alpha", "1.0.0", ReleaseStatus::Snapshot, "jane.branch")
            .unwrap()
    }

    fn registry() -> Registry {
        Registry::with_default_evaluator(Arc::new(MemoryPersister::new()))
    }

    #[test]
    fn wildcard_resource_matching() {
        assert!(resource_matches("*", Some("any.cube")));
        assert!(resource_matches("sys.*", Some("sys.lock")));
        assert!(!resource_matches("sys.*", Some("app.rates")));
        assert!(resource_matches("RATES*", Some("rates.2024")));
        // A pattern without an axis segment matches only resources without one.
        assert!(!resource_matches("rates", Some("rates/age")));
        assert!(resource_matches("rates/*", Some("rates/age")));
        assert!(!resource_matches("rates/*", Some("rates")));
        // No resource at all: any row applies.
        assert!(resource_matches("whatever", None));
    }

    #[tokio::test]
    async fn bootstrap_mode_permits_everything() {
        let reg = registry();
        let user = UserContext::new("anyone");
        assert!(check_permissions(&reg, &user, &app(), Some("x"), Action::Update)
            .await
            .unwrap());
        assert!(is_admin(&reg, &user, &app()).await.unwrap());
    }

    #[tokio::test]
    async fn seeding_grants_admin_to_seeder_and_gates_others() {
        let reg = registry();
        let admin = UserContext::new("jane");
        let other = UserContext::new("bob");
        assert!(detect_new_app_id(&reg, &admin, &app()).await.unwrap());
        // Second detection is a no-op.
        assert!(!detect_new_app_id(&reg, &admin, &app()).await.unwrap());

        assert!(is_admin(&reg, &admin, &app()).await.unwrap());
        assert!(!is_admin(&reg, &other, &app()).await.unwrap());

        // The seeder can mutate; a plain user is blocked by the branch
        // overlay for mutating actions but can still read.
        assert!(check_permissions(&reg, &admin, &app(), Some("rates"), Action::Update)
            .await
            .unwrap());
        assert!(!check_permissions(&reg, &other, &app(), Some("rates"), Action::Update)
            .await
            .unwrap());
        assert!(check_permissions(&reg, &other, &app(), Some("rates"), Action::Read)
            .await
            .unwrap());
        // System cubes stay admin-writable.
        assert!(!check_permissions(&reg, &other, &app(), Some(SYS_PERMISSIONS), Action::Update)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn decisions_are_cached_for_the_ttl() {
        let reg = registry();
        let admin = UserContext::new("jane");
        let other = UserContext::new("bob");
        detect_new_app_id(&reg, &admin, &app()).await.unwrap();

        assert!(check_permissions(&reg, &other, &app(), Some("rates"), Action::Read)
            .await
            .unwrap());

        // Nuke the permission cubes entirely: within the TTL the cached
        // decision still answers without consulting them.
        let boot = app().as_bootstrap();
        reg.persister()
            .delete_cubes(
                &boot,
                &[SYS_PERMISSIONS.to_string(), SYS_USERGROUPS.to_string()],
                true,
                "jane",
            )
            .await
            .unwrap();
        reg.clear_cache(Some(&app().as_bootstrap())).await;
        assert!(check_permissions(&reg, &other, &app(), Some("rates"), Action::Read)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn read_on_sys_lock_is_always_allowed() {
        let reg = registry();
        let admin = UserContext::new("jane");
        let other = UserContext::new("bob");
        detect_new_app_id(&reg, &admin, &app()).await.unwrap();
        assert!(check_permissions(&reg, &other, &app(), Some(SYS_LOCK), Action::Read)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn app_lock_lifecycle() {
        let reg = registry();
        let jane = UserContext::new("jane");
        let bob = UserContext::new("bob");
        let id = app();

        assert!(assert_not_lock_blocked(&reg, &jane, &id).await.is_ok());
        assert!(lock_app(&reg, &jane, &id).await.unwrap());
        // Re-locking by the holder returns false, not an error.
        assert!(!lock_app(&reg, &jane, &id).await.unwrap());
        assert!(matches!(
            lock_app(&reg, &bob, &id).await.unwrap_err(),
            CubeError::Security(_)
        ));
        assert!(assert_not_lock_blocked(&reg, &jane, &id).await.is_ok());
        assert!(assert_not_lock_blocked(&reg, &bob, &id).await.is_err());
        assert!(assert_locked_by_me(&reg, &jane, &id).await.is_ok());
        assert!(assert_locked_by_me(&reg, &bob, &id).await.is_err());

        assert!(matches!(
            unlock_app(&reg, &bob, &id).await.unwrap_err(),
            CubeError::Security(_)
        ));
        unlock_app(&reg, &jane, &id).await.unwrap();
        assert!(assert_not_lock_blocked(&reg, &bob, &id).await.is_ok());
        assert!(assert_locked_by_me(&reg, &jane, &id).await.is_err());
    }
}
