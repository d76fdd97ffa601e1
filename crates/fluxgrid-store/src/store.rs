//! The narrow key-value contract the engine persists through.
//!
//! A backend holds named groups of integer fields. Every field is bounded to
//! the signed 32-bit range: writes outside it fail with
//! [`StoreError::ValueOutOfRange`] instead of truncating.

use std::collections::BTreeMap;
use std::future::Future;

use crate::error::StoreError;

/// Typed access to named groups of signed 32-bit fields.
///
/// Implementations must make every successful write durable before the
/// returned future resolves; the engine never batches writes across steps.
pub trait FieldStore {
    /// Create the group `key` if it does not exist. No-op otherwise.
    fn ensure_group(&self, key: &str) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Write `value` to `name` inside `key`, creating the group if needed.
    fn set_field(
        &self,
        key: &str,
        name: &str,
        value: i64,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Read `name` inside `key`, or `None` if it was never written.
    fn get_field(
        &self,
        key: &str,
        name: &str,
    ) -> impl Future<Output = Result<Option<i32>, StoreError>> + Send;

    /// Remove `name` from `key`. Missing fields are ignored.
    fn remove_field(
        &self,
        key: &str,
        name: &str,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Delete the group `key` with all its fields. Missing groups are ignored.
    fn delete_group(&self, key: &str) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Whether the group `key` exists.
    fn group_exists(&self, key: &str) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// List every group key.
    fn list_groups(&self) -> impl Future<Output = Result<Vec<String>, StoreError>> + Send;

    /// List the field names written inside `key`.
    fn list_fields(&self, key: &str)
    -> impl Future<Output = Result<Vec<String>, StoreError>> + Send;

    /// Read every field of `key` at once. Empty if the group is missing.
    fn fields(
        &self,
        key: &str,
    ) -> impl Future<Output = Result<BTreeMap<String, i32>, StoreError>> + Send;
}

/// Narrow `value` to the backend's field range.
///
/// # Errors
///
/// Returns [`StoreError::ValueOutOfRange`] if `value` does not fit in `i32`.
pub fn checked_field_value(key: &str, name: &str, value: i64) -> Result<i32, StoreError> {
    i32::try_from(value).map_err(|_err| StoreError::ValueOutOfRange {
        key: key.to_owned(),
        field: name.to_owned(),
        value,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_range_values_pass_through() {
        assert_eq!(checked_field_value("k", "f", 0).ok(), Some(0));
        assert_eq!(
            checked_field_value("k", "f", i64::from(i32::MAX)).ok(),
            Some(i32::MAX)
        );
        assert_eq!(
            checked_field_value("k", "f", i64::from(i32::MIN)).ok(),
            Some(i32::MIN)
        );
    }

    #[test]
    fn out_of_range_values_rejected() {
        let result = checked_field_value("machine:a", "energy", 2_147_483_648);
        assert!(matches!(
            result,
            Err(StoreError::ValueOutOfRange { value, .. }) if value == 2_147_483_648
        ));
    }
}
