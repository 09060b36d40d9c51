//! Admission Control
//!
//! Gate in front of session allocation. Checks run in a fixed order:
//! owner cooldown, per-owner limit, global limit. Every attempt, approved or
//! not, restarts the owner's cooldown.
//!
//! The quota table only holds weak references (session ids). Ids that are no
//! longer live in the registry are dropped lazily the next time the owner is
//! evaluated.

use std::collections::HashSet;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::OrchestratorConfig;
use crate::error::AdmissionDenied;

/// Caps and cooldown used by the admission decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionLimits {
    pub max_sessions: usize,
    pub max_sessions_per_owner: usize,
    pub cooldown: Duration,
}

impl AdmissionLimits {
    pub fn from_config(config: &OrchestratorConfig) -> Self {
        Self {
            max_sessions: config.max_sessions,
            max_sessions_per_owner: config.max_sessions_per_owner,
            cooldown: config.cooldown(),
        }
    }
}

/// Pure admission decision
pub fn evaluate(
    limits: &AdmissionLimits,
    now: Instant,
    last_attempt: Option<Instant>,
    owner_active: usize,
    global_active: usize,
) -> Result<(), AdmissionDenied> {
    if let Some(last) = last_attempt {
        let elapsed = now.saturating_duration_since(last);
        if elapsed < limits.cooldown {
            return Err(AdmissionDenied::Cooldown {
                remaining: limits.cooldown - elapsed,
            });
        }
    }

    if owner_active >= limits.max_sessions_per_owner {
        return Err(AdmissionDenied::PerOwnerLimit {
            current: owner_active,
            max: limits.max_sessions_per_owner,
        });
    }

    if global_active >= limits.max_sessions {
        return Err(AdmissionDenied::GlobalLimit {
            current: global_active,
            max: limits.max_sessions,
        });
    }

    Ok(())
}

/// Quota bookkeeping for one owner
#[derive(Debug, Clone, Default)]
pub struct OwnerQuota {
    /// Last creation attempt, successful or not
    pub last_attempt: Option<Instant>,
    /// Session ids believed live
    pub active: HashSet<String>,
}

/// Admission controller with its owner quota table
pub struct AdmissionController {
    limits: AdmissionLimits,
    owners: DashMap<String, OwnerQuota>,
}

impl AdmissionController {
    pub fn new(limits: AdmissionLimits) -> Self {
        Self {
            limits,
            owners: DashMap::new(),
        }
    }

    pub fn limits(&self) -> &AdmissionLimits {
        &self.limits
    }

    /// Evaluate a request and stamp the owner's cooldown
    ///
    /// `is_live` tells which recorded ids still exist in the registry. The
    /// caller serializes this with the subsequent allocation.
    pub fn admit(
        &self,
        owner_id: &str,
        now: Instant,
        global_active: usize,
        is_live: impl Fn(&str) -> bool,
    ) -> Result<(), AdmissionDenied> {
        let mut quota = self.owners.entry(owner_id.to_string()).or_default();

        let before = quota.active.len();
        quota.active.retain(|id| is_live(id));
        if quota.active.len() != before {
            debug!(
                "Owner {}: dropped {} stale session ids",
                owner_id,
                before - quota.active.len()
            );
        }

        let decision = evaluate(
            &self.limits,
            now,
            quota.last_attempt,
            quota.active.len(),
            global_active,
        );
        quota.last_attempt = Some(now);

        match &decision {
            Ok(()) => debug!(
                "Owner {} admitted ({}/{} owner, {}/{} global)",
                owner_id,
                quota.active.len(),
                self.limits.max_sessions_per_owner,
                global_active,
                self.limits.max_sessions
            ),
            Err(denied) => info!("Owner {} denied: {}", owner_id, denied),
        }

        decision
    }

    pub fn add_session(&self, owner_id: &str, session_id: &str) {
        self.owners
            .entry(owner_id.to_string())
            .or_default()
            .active
            .insert(session_id.to_string());
    }

    pub fn remove_session(&self, owner_id: &str, session_id: &str) {
        if let Some(mut quota) = self.owners.get_mut(owner_id) {
            quota.active.remove(session_id);
        }
    }

    /// Recorded session ids of an owner (may include ids not yet pruned)
    pub fn owner_sessions(&self, owner_id: &str) -> Vec<String> {
        self.owners
            .get(owner_id)
            .map(|q| q.active.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn last_attempt(&self, owner_id: &str) -> Option<Instant> {
        self.owners.get(owner_id).and_then(|q| q.last_attempt)
    }

    /// Drop cooldown stamps older than `retention`
    ///
    /// Owners left with neither a stamp nor sessions are removed entirely.
    /// Returns the number of stamps purged.
    pub fn purge_cooldowns(&self, now: Instant, retention: Duration) -> usize {
        let mut purged = 0;
        self.owners.retain(|_, quota| {
            if let Some(last) = quota.last_attempt {
                if now.saturating_duration_since(last) > retention {
                    quota.last_attempt = None;
                    purged += 1;
                }
            }
            quota.last_attempt.is_some() || !quota.active.is_empty()
        });
        purged
    }

    /// Owners currently tracked (with a stamp or sessions)
    pub fn tracked_owners(&self) -> usize {
        self.owners.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> AdmissionLimits {
        AdmissionLimits {
            max_sessions: 50,
            max_sessions_per_owner: 3,
            cooldown: Duration::from_secs(30),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_evaluation_order() {
        let limits = limits();
        let last = Instant::now();
        let now = last + Duration::from_secs(10);
        let recent = Some(last);

        // Cooldown wins over both limits
        let denied = evaluate(&limits, now, recent, 3, 50).unwrap_err();
        assert_eq!(
            denied,
            AdmissionDenied::Cooldown {
                remaining: Duration::from_secs(20)
            }
        );

        // Per-owner wins over global
        let denied = evaluate(&limits, now, None, 3, 50).unwrap_err();
        assert_eq!(denied.kind(), "per-owner-limit");

        let denied = evaluate(&limits, now, None, 0, 50).unwrap_err();
        assert_eq!(denied.kind(), "global-limit");

        assert!(evaluate(&limits, now, None, 2, 49).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_stamped_on_denial() {
        let controller = AdmissionController::new(limits());
        let start = Instant::now();

        // Global limit reached: denied, but the stamp is still written
        assert!(controller.admit("alice", start, 50, |_| true).is_err());
        assert_eq!(controller.last_attempt("alice"), Some(start));

        // Retrying right away hits the cooldown instead
        let denied = controller
            .admit("alice", start + Duration::from_secs(1), 0, |_| true)
            .unwrap_err();
        assert_eq!(denied.kind(), "cooldown");

        // After the window it is admitted
        assert!(controller
            .admit("alice", start + Duration::from_secs(60), 0, |_| true)
            .is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_ids_pruned_lazily() {
        let controller = AdmissionController::new(AdmissionLimits {
            cooldown: Duration::ZERO,
            ..limits()
        });
        for id in ["a", "b", "c"] {
            controller.add_session("bob", id);
        }

        let now = Instant::now();
        assert!(controller.admit("bob", now, 3, |_| true).is_err());
        // "b" vanished from the registry without the quota being told
        assert!(controller.admit("bob", now, 2, |id| id != "b").is_ok());
        assert_eq!(controller.owner_sessions("bob").len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_cooldowns() {
        let controller = AdmissionController::new(limits());
        let start = Instant::now();
        controller.admit("idle", start, 0, |_| true).unwrap();
        controller.admit("busy", start, 0, |_| true).unwrap();
        controller.add_session("busy", "s1");

        // Younger than 2x cooldown: kept
        assert_eq!(controller.purge_cooldowns(start + Duration::from_secs(59), Duration::from_secs(60)), 0);

        let later = start + Duration::from_secs(61);
        assert_eq!(controller.purge_cooldowns(later, Duration::from_secs(60)), 2);
        assert_eq!(controller.tracked_owners(), 1);
        assert_eq!(controller.last_attempt("busy"), None);
        assert_eq!(controller.owner_sessions("busy"), vec!["s1".to_string()]);
    }
}
