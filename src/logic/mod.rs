pub mod branch_ops;
pub mod evaluate;
pub mod permissions;
pub mod reference_axis;

pub use branch_ops::*;
pub use evaluate::*;
pub use permissions::{
    assert_locked_by_me, assert_not_lock_blocked, assert_permissions, check_permissions,
    detect_new_app_id, fast_check_permissions, is_admin, lock_app, lock_holder, resource_matches,
    unlock_app, Action, PermissionCache,
};
pub use reference_axis::break_axis_reference;
