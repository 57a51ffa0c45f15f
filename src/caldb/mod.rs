//! Calibration store interface and artifact model

pub mod alloc;
pub mod resolver;

pub use alloc::CalIdAllocator;
pub use resolver::{CalibrationResolver, Resolved};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

/// Calibration artifact classes known to the store. Each recipe `calibs` key
/// names exactly one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CalType {
    DetectorParams,
    KGain,
    NonLinearityCalibration,
    DetectorNoiseMaps,
    Dark,
    FlatField,
    TrapCalibration,
    BadPixelMap,
}

impl CalType {
    /// Parse a calibration class name as it appears in recipe documents
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "DetectorParams" => Some(CalType::DetectorParams),
            "KGain" => Some(CalType::KGain),
            "NonLinearityCalibration" => Some(CalType::NonLinearityCalibration),
            "DetectorNoiseMaps" => Some(CalType::DetectorNoiseMaps),
            "Dark" => Some(CalType::Dark),
            "FlatField" => Some(CalType::FlatField),
            "TrapCalibration" => Some(CalType::TrapCalibration),
            "BadPixelMap" => Some(CalType::BadPixelMap),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CalType::DetectorParams => "DetectorParams",
            CalType::KGain => "KGain",
            CalType::NonLinearityCalibration => "NonLinearityCalibration",
            CalType::DetectorNoiseMaps => "DetectorNoiseMaps",
            CalType::Dark => "Dark",
            CalType::FlatField => "FlatField",
            CalType::TrapCalibration => "TrapCalibration",
            CalType::BadPixelMap => "BadPixelMap",
        }
    }

    /// Short tag used as a calibration identifier prefix
    pub fn short_name(&self) -> &'static str {
        match self {
            CalType::DetectorParams => "detpar",
            CalType::KGain => "kgain",
            CalType::NonLinearityCalibration => "nonlin",
            CalType::DetectorNoiseMaps => "noisemap",
            CalType::Dark => "dark",
            CalType::FlatField => "flat",
            CalType::TrapCalibration => "trap",
            CalType::BadPixelMap => "bpmap",
        }
    }
}

impl fmt::Display for CalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered calibration artifact
#[derive(Debug, Clone)]
pub struct CalArtifact {
    /// Calibration identifier, unique within the store
    pub id: String,

    pub cal_type: CalType,

    /// Observing mode this artifact is valid for (None = any mode)
    pub observing_mode: Option<String>,

    /// Start of the validity window
    pub valid_from: DateTime<Utc>,

    /// Creation sequence number, the deterministic tie-break key
    pub created_seq: u64,

    /// Where the artifact data lives (path or URI); the engine never reads it
    pub location: String,
}

/// An artifact produced mid-run, before an identifier has been assigned
#[derive(Debug, Clone)]
pub struct NewCalArtifact {
    pub cal_type: CalType,
    pub observing_mode: Option<String>,
    pub valid_from: DateTime<Utc>,
    pub location: String,

    /// Digest of the producing dataset, folded into the JIT identifier
    pub content_digest: String,
}

/// Metadata query used to select candidate artifacts
#[derive(Debug, Clone)]
pub struct CalQuery {
    pub observing_mode: Option<String>,
    pub reference_time: DateTime<Utc>,
}

/// Calibration store collaborator. Read-shared across concurrent runs.
#[async_trait]
pub trait CalibrationStore: Send + Sync {
    /// Return all candidate artifacts of the given type matching the query's
    /// validity criteria. Ordering is not significant; the resolver applies
    /// the deterministic tie-break.
    async fn find(&self, cal_type: CalType, query: &CalQuery) -> Result<Vec<CalArtifact>>;

    /// Register a new artifact under an already-allocated identifier
    async fn register(&self, id: &str, artifact: NewCalArtifact) -> Result<CalArtifact>;
}

/// Seed record for loading a calibration database from a JSON file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedArtifact {
    pub id: String,
    pub cal_type: String,
    #[serde(default)]
    pub observing_mode: Option<String>,
    pub valid_from: DateTime<Utc>,
    pub location: String,
}

/// In-memory calibration database (also the test double)
pub struct InMemoryCalDb {
    artifacts: tokio::sync::RwLock<Vec<CalArtifact>>,
    next_seq: AtomicU64,
}

impl InMemoryCalDb {
    pub fn new() -> Self {
        Self {
            artifacts: tokio::sync::RwLock::new(Vec::new()),
            next_seq: AtomicU64::new(0),
        }
    }

    /// Load a calibration database from a JSON array of seed records
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let seeds: Vec<SeedArtifact> = serde_json::from_str(&content)?;
        let mut db = Self::new();
        for seed in seeds {
            let cal_type = CalType::parse(&seed.cal_type)
                .ok_or_else(|| anyhow::anyhow!("unknown calibration type '{}'", seed.cal_type))?;
            db.insert(CalArtifact {
                id: seed.id,
                cal_type,
                observing_mode: seed.observing_mode,
                valid_from: seed.valid_from,
                created_seq: 0, // overwritten on insert
                location: seed.location,
            });
        }
        Ok(db)
    }

    /// Insert an artifact while the store is still exclusively owned,
    /// assigning the next creation sequence. Runtime registration goes
    /// through [`CalibrationStore::register`].
    pub fn insert(&mut self, mut artifact: CalArtifact) {
        artifact.created_seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        self.artifacts.get_mut().push(artifact);
    }
}

impl Default for InMemoryCalDb {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CalibrationStore for InMemoryCalDb {
    async fn find(&self, cal_type: CalType, query: &CalQuery) -> Result<Vec<CalArtifact>> {
        let artifacts = self.artifacts.read().await;
        Ok(artifacts
            .iter()
            .filter(|a| a.cal_type == cal_type)
            .filter(|a| match (&a.observing_mode, &query.observing_mode) {
                (Some(artifact_mode), Some(dataset_mode)) => artifact_mode == dataset_mode,
                // Mode-agnostic artifacts match everything
                _ => true,
            })
            .cloned()
            .collect())
    }

    async fn register(&self, id: &str, artifact: NewCalArtifact) -> Result<CalArtifact> {
        let mut artifacts = self.artifacts.write().await;
        if artifacts.iter().any(|a| a.id == id) {
            anyhow::bail!("calibration identifier '{}' is already registered", id);
        }
        let registered = CalArtifact {
            id: id.to_string(),
            cal_type: artifact.cal_type,
            observing_mode: artifact.observing_mode,
            valid_from: artifact.valid_from,
            created_seq: self.next_seq.fetch_add(1, Ordering::SeqCst),
            location: artifact.location,
        };
        artifacts.push(registered.clone());
        Ok(registered)
    }
}
