//! Manager configuration.

use crate::error::{OrmError, OrmResult};

/// How an UPDATE or DELETE without any filter is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnscopedPolicy {
    /// Run it against every row.
    Allow,
    /// Run it against every row and log a warning.
    #[default]
    Warn,
    /// Refuse with a structural error.
    Deny,
}

/// Column names and policies shared by managers and identifier helpers.
///
/// ```ignore
/// let config = RepoConfig::new()
///     .id_column("pk")
///     .unscoped_delete(UnscopedPolicy::Deny);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoConfig {
    /// Surrogate key column.
    pub id_column: String,
    /// External opaque identifier column.
    pub external_id_column: String,
    pub unscoped_update: UnscopedPolicy,
    pub unscoped_delete: UnscopedPolicy,
    /// Statement text longer than this is truncated in logs (None = never).
    pub max_logged_sql_length: Option<usize>,
}

impl Default for RepoConfig {
    fn default() -> Self {
        Self {
            id_column: "id".to_string(),
            external_id_column: "uuid".to_string(),
            unscoped_update: UnscopedPolicy::Warn,
            unscoped_delete: UnscopedPolicy::Warn,
            max_logged_sql_length: Some(200),
        }
    }
}

impl RepoConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id_column(mut self, column: impl Into<String>) -> Self {
        self.id_column = column.into();
        self
    }

    pub fn external_id_column(mut self, column: impl Into<String>) -> Self {
        self.external_id_column = column.into();
        self
    }

    /// Configure how UPDATE without a filter is handled.
    pub fn unscoped_update(mut self, policy: UnscopedPolicy) -> Self {
        self.unscoped_update = policy;
        self
    }

    /// Configure how DELETE without a filter is handled.
    pub fn unscoped_delete(mut self, policy: UnscopedPolicy) -> Self {
        self.unscoped_delete = policy;
        self
    }

    pub fn max_logged_sql_length(mut self, max: Option<usize>) -> Self {
        self.max_logged_sql_length = max;
        self
    }
}

/// Apply `policy` to an UPDATE/DELETE on `table` that has no filter.
pub(crate) fn check_unscoped(policy: UnscopedPolicy, kind: &str, table: &str) -> OrmResult<()> {
    match policy {
        UnscopedPolicy::Allow => Ok(()),
        UnscopedPolicy::Warn => {
            #[cfg(feature = "tracing")]
            tracing::warn!(
                target: "pgrepo.sql",
                kind,
                table,
                "{kind} without a filter affects every row of {table}"
            );
            Ok(())
        }
        UnscopedPolicy::Deny => Err(OrmError::structural(format!(
            "{kind} without a filter on {table} refused by policy"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = RepoConfig::default();
        assert_eq!(config.id_column, "id");
        assert_eq!(config.external_id_column, "uuid");
        assert_eq!(config.unscoped_update, UnscopedPolicy::Warn);
        assert_eq!(config.unscoped_delete, UnscopedPolicy::Warn);
        assert_eq!(config.max_logged_sql_length, Some(200));
    }

    #[test]
    fn setters_chain() {
        let config = RepoConfig::new()
            .id_column("pk")
            .external_id_column("public_id")
            .unscoped_delete(UnscopedPolicy::Deny)
            .max_logged_sql_length(None);
        assert_eq!(config.id_column, "pk");
        assert_eq!(config.external_id_column, "public_id");
        assert_eq!(config.unscoped_delete, UnscopedPolicy::Deny);
        assert_eq!(config.unscoped_update, UnscopedPolicy::Warn);
        assert_eq!(config.max_logged_sql_length, None);
    }

    #[test]
    fn deny_policy_is_structural() {
        let err = check_unscoped(UnscopedPolicy::Deny, "DELETE", "users").unwrap_err();
        assert!(err.is_structural());
        assert!(check_unscoped(UnscopedPolicy::Warn, "DELETE", "users").is_ok());
        assert!(check_unscoped(UnscopedPolicy::Allow, "UPDATE", "users").is_ok());
    }
}
