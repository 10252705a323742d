//! Integrity repair for loaded documents.
//!
//! Schema drift is absorbed here rather than by a stored version number.
//! Two passes run on every load:
//!
//! - [`normalize_shape`] works on the raw JSON value before typing, so a
//!   document missing whole collections (or holding `null` in their place)
//!   still decodes. Records that would not decode are dropped one by one.
//! - [`repair`] enforces the account invariant and rewrites known legacy
//!   values on the typed document.
//!
//! Both passes are idempotent: a second run reports no change.

use crate::document::{
    Category, Document, Offer, PixKey, Product, Settings, Stats, User, ADMIN_EMAIL,
    DEFAULT_ADMIN_PASSWORD,
};
use crate::types::Role;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::warn;

/// Top-level collections that must always be arrays.
const REQUIRED_COLLECTIONS: &[&str] = &["users", "categories", "products", "offers", "orders"];

/// Top-level sections that must be objects; anything else is dropped so the
/// compiled defaults apply.
const REQUIRED_SECTIONS: &[&str] = &["settings", "stats", "pixKey"];

/// Site name placeholder written by early releases.
pub const LEGACY_SITE_NAME_PLACEHOLDER: &str = "Minha Loja";

/// Administrator password shipped by early releases.
pub const LEGACY_ADMIN_PASSWORD: &str = "admin123";

/// Structural normalization of a raw document value.
pub fn normalize_shape(value: &mut Value) {
    if !value.is_object() {
        *value = Value::Object(Map::new());
    }
    let Some(root) = value.as_object_mut() else {
        return;
    };

    for key in REQUIRED_COLLECTIONS {
        match root.get(*key) {
            Some(Value::Array(_)) => {}
            _ => {
                root.insert((*key).to_string(), Value::Array(Vec::new()));
            }
        }
    }

    for key in REQUIRED_SECTIONS {
        if matches!(root.get(*key), Some(v) if !v.is_object()) {
            root.remove(*key);
        }
    }

    // One bad record must not cost the rest of the catalog.
    retain_decodable::<User>(root, "users");
    retain_decodable::<Category>(root, "categories");
    retain_decodable::<Product>(root, "products");
    retain_decodable::<Offer>(root, "offers");

    retain_decodable_fields::<Settings>(root, "settings");
    retain_decodable_fields::<Stats>(root, "stats");
    retain_decodable_fields::<PixKey>(root, "pixKey");
}

/// Drop entries of `root[key]` that do not decode as `T`.
fn retain_decodable<T: DeserializeOwned>(root: &mut Map<String, Value>, key: &str) {
    let Some(Value::Array(items)) = root.get_mut(key) else {
        return;
    };
    let before = items.len();
    items.retain(|item| T::deserialize(item).is_ok());
    let dropped = before - items.len();
    if dropped > 0 {
        warn!(collection = key, dropped, "dropped malformed entries");
    }
}

/// Drop fields of the `root[key]` object that do not decode as part of `T`,
/// so their defaults apply while the other fields survive.
fn retain_decodable_fields<T: DeserializeOwned>(root: &mut Map<String, Value>, key: &str) {
    let Some(Value::Object(section)) = root.get_mut(key) else {
        return;
    };
    if T::deserialize(&Value::Object(section.clone())).is_ok() {
        return;
    }
    let before = section.len();
    section.retain(|field, value| {
        let mut single = Map::new();
        single.insert(field.clone(), value.clone());
        T::deserialize(&Value::Object(single)).is_ok()
    });
    warn!(section = key, dropped = before - section.len(), "dropped malformed fields");
}

/// What a [`repair`] pass changed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RepairReport {
    /// Legacy site name placeholder was cleared.
    pub site_name_reset: bool,
    /// Duplicate reserved-admin accounts removed.
    pub duplicate_admins_removed: usize,
    /// The reserved admin account was missing and got injected.
    pub admin_injected: bool,
    /// The reserved admin still had the legacy password.
    pub admin_password_upgraded: bool,
    /// The reserved admin had lost its role.
    pub admin_role_restored: bool,
    /// Other accounts holding the admin role, demoted to users.
    pub admins_demoted: usize,
}

impl RepairReport {
    /// True when the pass changed nothing.
    pub fn is_clean(&self) -> bool {
        *self == RepairReport::default()
    }

    /// Repairs that must reach durable storage right away rather than wait
    /// for the next coalesced write.
    pub fn requires_persist(&self) -> bool {
        !self.is_clean()
    }
}

/// Enforce document invariants in place.
pub fn repair(document: &mut Document) -> RepairReport {
    let mut report = RepairReport::default();

    if document.settings.site_name == LEGACY_SITE_NAME_PLACEHOLDER {
        document.settings.site_name.clear();
        report.site_name_reset = true;
    }

    // Keep only the first reserved-admin account.
    let mut seen_admin = false;
    let before = document.users.len();
    document.users.retain(|user| {
        if user.email != ADMIN_EMAIL {
            return true;
        }
        let keep = !seen_admin;
        seen_admin = true;
        keep
    });
    report.duplicate_admins_removed = before - document.users.len();

    match document.users.iter_mut().find(|u| u.is_reserved_admin()) {
        Some(admin) => {
            if admin.password == LEGACY_ADMIN_PASSWORD {
                admin.password = DEFAULT_ADMIN_PASSWORD.to_string();
                report.admin_password_upgraded = true;
            }
            if admin.role != Role::Admin {
                admin.role = Role::Admin;
                report.admin_role_restored = true;
            }
        }
        None => {
            document.users.push(User::default_admin());
            report.admin_injected = true;
        }
    }

    for user in document.users.iter_mut() {
        if !user.is_reserved_admin() && user.role == Role::Admin {
            user.role = Role::User;
            report.admins_demoted += 1;
        }
    }

    if !report.is_clean() {
        warn!(?report, "repaired loaded document");
    }

    report
}
