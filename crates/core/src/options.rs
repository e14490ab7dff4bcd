//! Operation options, both the caller-side shapes resolved by the
//! framework and the backing-side query shape, plus the translation
//! between them.

use serde::{Deserialize, Serialize};

/// Expected object state that must hold before an update or delete is
/// allowed to commit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preconditions {
    pub uid: Option<String>,
    pub resource_version: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetOptions {
    /// Resource version the read should be served at; `None` means the
    /// backing store's default read semantics.
    pub resource_version: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateOptions {
    pub dry_run: bool,
    pub field_manager: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateOptions {
    pub dry_run: bool,
    pub field_manager: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteOptions {
    pub dry_run: bool,
    pub grace_period_seconds: Option<u32>,
    pub preconditions: Option<Preconditions>,
}

/// Caller-side list/watch options as the framework resolves them from a
/// request. Selectors are forwarded opaquely; nothing here is
/// interpreted by the adapter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListOptions {
    pub label_selector: Option<String>,
    pub field_selector: Option<String>,
    pub resource_version: Option<String>,
    /// Result cap as requests carry it (signed); non-positive means no
    /// limit.
    pub limit: Option<i64>,
    pub continue_token: Option<String>,
    pub timeout_seconds: Option<u32>,
}

/// The backing client's list/watch query shape.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListQuery {
    pub label_selector: Option<String>,
    pub field_selector: Option<String>,
    pub resource_version: Option<String>,
    pub limit: Option<u32>,
    pub continue_token: Option<String>,
}

impl ListQuery {
    /// Translate caller options into the backing query shape. `None`
    /// means defaults; a non-positive limit is dropped.
    pub fn from_options(options: Option<&ListOptions>) -> Self {
        let Some(options) = options else {
            return Self::default();
        };
        Self {
            label_selector: options.label_selector.clone(),
            field_selector: options.field_selector.clone(),
            resource_version: options.resource_version.clone(),
            limit: options
                .limit
                .filter(|n| *n > 0)
                .map(|n| u32::try_from(n).unwrap_or(u32::MAX)),
            continue_token: options.continue_token.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_options_translate_to_defaults() {
        assert_eq!(ListQuery::from_options(None), ListQuery::default());
    }

    #[test]
    fn options_translate_field_for_field() {
        let options = ListOptions {
            label_selector: Some("app=web".into()),
            field_selector: Some("metadata.name=web".into()),
            resource_version: Some("12".into()),
            limit: Some(50),
            continue_token: Some("tok".into()),
            timeout_seconds: Some(30),
        };
        let query = ListQuery::from_options(Some(&options));
        assert_eq!(query.label_selector.as_deref(), Some("app=web"));
        assert_eq!(query.field_selector.as_deref(), Some("metadata.name=web"));
        assert_eq!(query.resource_version.as_deref(), Some("12"));
        assert_eq!(query.limit, Some(50));
        assert_eq!(query.continue_token.as_deref(), Some("tok"));
    }

    #[test]
    fn non_positive_limits_are_dropped() {
        for limit in [0, -1, -50] {
            let options = ListOptions {
                limit: Some(limit),
                ..ListOptions::default()
            };
            assert_eq!(ListQuery::from_options(Some(&options)).limit, None);
        }
    }

    #[test]
    fn oversized_limit_saturates() {
        let options = ListOptions {
            limit: Some(i64::MAX),
            ..ListOptions::default()
        };
        assert_eq!(ListQuery::from_options(Some(&options)).limit, Some(u32::MAX));
    }
}
