//! Deterministic calibration identifier allocation

use crate::caldb::CalType;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::Mutex;

/// Allocates identifiers for calibration artifacts created mid-run.
///
/// Identifiers are derived from the artifact's content digest and its recipe
/// position, not wall-clock time, so two runs over identical inputs allocate
/// identical identifiers. The issued-ID namespace is guarded by a mutex so an
/// allocator shared across concurrent runs cannot hand out collisions; a
/// genuine collision (same derivation seed issued twice in one process) gets
/// a counter suffix.
pub struct CalIdAllocator {
    issued: Mutex<HashSet<String>>,
}

impl CalIdAllocator {
    pub fn new() -> Self {
        Self {
            issued: Mutex::new(HashSet::new()),
        }
    }

    /// Allocate an identifier for an artifact of `cal_type` produced by step
    /// `step_index` of `recipe_name` over data with `content_digest`.
    pub fn allocate(
        &self,
        cal_type: CalType,
        content_digest: &str,
        recipe_name: &str,
        step_index: usize,
    ) -> String {
        let mut hasher = Sha256::new();
        hasher.update(cal_type.as_str().as_bytes());
        hasher.update(content_digest.as_bytes());
        hasher.update(recipe_name.as_bytes());
        hasher.update(step_index.to_le_bytes());
        let digest = hasher.finalize();
        let hex: String = digest.iter().take(6).map(|b| format!("{:02x}", b)).collect();

        let base = format!("{}_{}", cal_type.short_name(), hex);

        let mut issued = self.issued.lock().unwrap_or_else(|e| e.into_inner());
        if issued.insert(base.clone()) {
            return base;
        }
        let mut n = 1usize;
        loop {
            let candidate = format!("{}_{}", base, n);
            if issued.insert(candidate.clone()) {
                return candidate;
            }
            n += 1;
        }
    }
}

impl Default for CalIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}
