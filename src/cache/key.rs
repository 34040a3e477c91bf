//! Cache key helpers re-exported from `primitives` for call-site brevity
//! inside the `cache` module.

pub use crate::primitives::{
    basic_perm_key, fingerprint_key, inheritance_key, user_active_key, user_index_key,
    user_role_key,
};
