use crate::models::{CoreError, CoreErrorKind, CoreResult};
use crate::resource_manager::ResourceManager;

/// Admin-configured cap on the priority users may request.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct PriorityPolicy {
    pub limit: Option<i32>,
}

impl PriorityPolicy {
    pub fn new(limit: Option<i32>) -> Self {
        Self { limit }
    }

    pub fn check(&self, rm: &dyn ResourceManager, priority: i32) -> CoreResult<()> {
        let Some(limit) = self.limit else {
            return Ok(());
        };
        // A manager without a priority notion has nothing to enforce against.
        let Ok(smaller_is_higher) = rm.smaller_value_is_higher_priority() else {
            return Ok(());
        };
        if within_limit(priority, limit, smaller_is_higher) {
            return Ok(());
        }
        Err(CoreError::new(
            CoreErrorKind::PolicyViolation,
            format!("requested priority [{priority}] exceeds limit set by admin [{limit}]"),
        ))
    }
}

pub fn within_limit(priority: i32, limit: i32, smaller_is_higher: bool) -> bool {
    if smaller_is_higher {
        priority >= limit
    } else {
        priority <= limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource_manager::InMemoryResourceManager;

    #[test]
    fn limit_direction_follows_resource_manager() {
        assert!(within_limit(10, 5, true));
        assert!(!within_limit(1, 5, true));
        assert!(within_limit(1, 5, false));
        assert!(!within_limit(10, 5, false));
    }

    #[test]
    fn violation_reports_requested_and_limit() {
        let rm = InMemoryResourceManager::new(["default"]);
        let error = PriorityPolicy::new(Some(20)).check(&rm, 5).unwrap_err();
        assert_eq!(error.kind, CoreErrorKind::PolicyViolation);
        assert_eq!(
            error.message,
            "requested priority [5] exceeds limit set by admin [20]"
        );
    }

    #[test]
    fn managers_without_priority_skip_the_check() {
        let rm = InMemoryResourceManager::new(["default"]).without_group_controls();
        assert!(PriorityPolicy::new(Some(20)).check(&rm, 5).is_ok());
    }
}
