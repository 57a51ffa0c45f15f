//! Built-in data reduction operations
//!
//! The pixel math behind these operations lives outside the engine; here
//! each operation applies its metadata-level effect (history entries, unit
//! labels, selection flags) and records which calibration artifact it used,
//! so the engine contracts stay fully exercisable.

use crate::caldb::{CalType, NewCalArtifact};
use crate::core::dataset::DatasetState;
use crate::core::recipe::Keywords;
use crate::steps::{apply_per_frame, ResolvedCalibs, StepError, StepOperation, StepOutput, StepRegistry};
use serde_json::Value;
use std::sync::Arc;

pub fn register_builtins(registry: &mut StepRegistry) {
    registry.register("prescan_biassub", Arc::new(PrescanBiasSub));
    registry.register("detect_cosmic_rays", Arc::new(DetectCosmicRays));
    registry.register("correct_nonlinearity", Arc::new(CorrectNonlinearity));
    registry.register("frame_select", Arc::new(FrameSelect));
    registry.register("convert_to_electrons", Arc::new(ConvertToElectrons));
    registry.register("em_gain_division", Arc::new(EmGainDivision));
    registry.register("cti_correction", Arc::new(CtiCorrection));
    registry.register("dark_subtraction", Arc::new(DarkSubtraction));
    registry.register("flat_division", Arc::new(FlatDivision));
    registry.register("correct_bad_pixels", Arc::new(CorrectBadPixels));
    registry.register("create_onsky_flatfield", Arc::new(CreateOnskyFlatfield));
}

/// Subtract the prescan-derived bias level from each frame
struct PrescanBiasSub;

impl StepOperation for PrescanBiasSub {
    fn execute(
        &self,
        dataset: DatasetState,
        calibs: &ResolvedCalibs,
        _keywords: &Keywords,
    ) -> Result<StepOutput, StepError> {
        let detpar = calibs.artifact(CalType::DetectorParams).map(|a| a.id.clone());
        Ok(apply_per_frame(dataset, "prescan_biassub", |frame| {
            frame.set_meta("bias_subtracted", Value::Bool(true));
            if let Some(id) = &detpar {
                frame.set_meta("detector_params", Value::String(id.clone()));
            }
            Ok(())
        }))
    }
}

/// Flag cosmic-ray hits; needs detector parameters and the gain calibration
/// to locate saturated tails
struct DetectCosmicRays;

impl StepOperation for DetectCosmicRays {
    fn execute(
        &self,
        dataset: DatasetState,
        calibs: &ResolvedCalibs,
        _keywords: &Keywords,
    ) -> Result<StepOutput, StepError> {
        let kgain = calibs.artifact(CalType::KGain).map(|a| a.id.clone());
        Ok(apply_per_frame(dataset, "detect_cosmic_rays", |frame| {
            frame.set_meta("cr_flagged", Value::Bool(true));
            if let Some(id) = &kgain {
                frame.set_meta("kgain_used", Value::String(id.clone()));
            }
            Ok(())
        }))
    }
}

/// Correct the detector's nonlinear response
struct CorrectNonlinearity;

impl StepOperation for CorrectNonlinearity {
    fn execute(
        &self,
        dataset: DatasetState,
        calibs: &ResolvedCalibs,
        _keywords: &Keywords,
    ) -> Result<StepOutput, StepError> {
        let nonlin = calibs
            .artifact(CalType::NonLinearityCalibration)
            .map(|a| a.id.clone());
        Ok(apply_per_frame(dataset, "correct_nonlinearity", |frame| {
            frame.set_meta(
                "nonlinearity_corrected",
                Value::Bool(nonlin.is_some()),
            );
            if let Some(id) = &nonlin {
                frame.set_meta("nonlin_cal", Value::String(id.clone()));
            }
            Ok(())
        }))
    }
}

/// Drop frames flagged as unusable (the `bad` metadata flag)
struct FrameSelect;

impl StepOperation for FrameSelect {
    fn execute(
        &self,
        mut dataset: DatasetState,
        _calibs: &ResolvedCalibs,
        _keywords: &Keywords,
    ) -> Result<StepOutput, StepError> {
        dataset.frames.retain(|f| !f.flag("bad"));
        Ok(StepOutput::clean(apply_history(dataset, "frame_select")))
    }
}

/// Convert frame data from ADU to electrons using the gain calibration
struct ConvertToElectrons;

impl StepOperation for ConvertToElectrons {
    fn execute(
        &self,
        dataset: DatasetState,
        calibs: &ResolvedCalibs,
        _keywords: &Keywords,
    ) -> Result<StepOutput, StepError> {
        let kgain = calibs.artifact(CalType::KGain).map(|a| a.id.clone());
        Ok(apply_per_frame(dataset, "convert_to_electrons", |frame| {
            frame.set_meta("units", Value::String("electrons".to_string()));
            if let Some(id) = &kgain {
                frame.set_meta("kgain_used", Value::String(id.clone()));
            }
            Ok(())
        }))
    }
}

/// Divide out the commanded EM gain, leaving photo-electrons
struct EmGainDivision;

impl StepOperation for EmGainDivision {
    fn execute(
        &self,
        dataset: DatasetState,
        _calibs: &ResolvedCalibs,
        _keywords: &Keywords,
    ) -> Result<StepOutput, StepError> {
        Ok(apply_per_frame(dataset, "em_gain_division", |frame| {
            frame.set_meta("units", Value::String("e/phot".to_string()));
            Ok(())
        }))
    }
}

/// Correct charge transfer inefficiency. The trap calibration is commonly
/// declared optional; with no artifact the data passes through unchanged.
struct CtiCorrection;

impl StepOperation for CtiCorrection {
    fn execute(
        &self,
        dataset: DatasetState,
        calibs: &ResolvedCalibs,
        _keywords: &Keywords,
    ) -> Result<StepOutput, StepError> {
        let trap = calibs.artifact(CalType::TrapCalibration).map(|a| a.id.clone());
        Ok(apply_per_frame(dataset, "cti_correction", |frame| {
            frame.set_meta("cti_corrected", Value::Bool(trap.is_some()));
            if let Some(id) = &trap {
                frame.set_meta("trap_cal", Value::String(id.clone()));
            }
            Ok(())
        }))
    }
}

/// Subtract the dark current model frame
struct DarkSubtraction;

impl StepOperation for DarkSubtraction {
    fn execute(
        &self,
        dataset: DatasetState,
        calibs: &ResolvedCalibs,
        _keywords: &Keywords,
    ) -> Result<StepOutput, StepError> {
        let dark = calibs.artifact(CalType::Dark).map(|a| a.id.clone());
        Ok(apply_per_frame(dataset, "dark_subtraction", |frame| {
            frame.set_meta("dark_subtracted", Value::Bool(true));
            if let Some(id) = &dark {
                frame.set_meta("dark_used", Value::String(id.clone()));
            }
            Ok(())
        }))
    }
}

/// Divide by the master flat field
struct FlatDivision;

impl StepOperation for FlatDivision {
    fn execute(
        &self,
        dataset: DatasetState,
        calibs: &ResolvedCalibs,
        _keywords: &Keywords,
    ) -> Result<StepOutput, StepError> {
        let flat = calibs.artifact(CalType::FlatField).map(|a| a.id.clone());
        Ok(apply_per_frame(dataset, "flat_division", |frame| {
            frame.set_meta("flat_divided", Value::Bool(true));
            if let Some(id) = &flat {
                frame.set_meta("flat_used", Value::String(id.clone()));
            }
            Ok(())
        }))
    }
}

/// Interpolate over known bad pixels; the map is tolerated-absent
struct CorrectBadPixels;

impl StepOperation for CorrectBadPixels {
    fn execute(
        &self,
        dataset: DatasetState,
        calibs: &ResolvedCalibs,
        _keywords: &Keywords,
    ) -> Result<StepOutput, StepError> {
        let bpmap = calibs.artifact(CalType::BadPixelMap).map(|a| a.id.clone());
        Ok(apply_per_frame(dataset, "correct_bad_pixels", |frame| {
            frame.set_meta("bad_pixels_corrected", Value::Bool(bpmap.is_some()));
            if let Some(id) = &bpmap {
                frame.set_meta("bpmap_used", Value::String(id.clone()));
            }
            Ok(())
        }))
    }
}

/// Build an on-sky flat field from the current frames and hand it to the
/// engine for registration as a new calibration artifact.
struct CreateOnskyFlatfield;

impl StepOperation for CreateOnskyFlatfield {
    fn execute(
        &self,
        dataset: DatasetState,
        _calibs: &ResolvedCalibs,
        _keywords: &Keywords,
    ) -> Result<StepOutput, StepError> {
        if dataset.frames.is_empty() {
            return Err(StepError::new("cannot build a flat field from zero frames"));
        }

        let valid_from = dataset
            .reference_timestamp()
            .ok_or_else(|| StepError::new("dataset has no reference timestamp"))?;
        let digest = dataset.content_digest();
        let produced = NewCalArtifact {
            cal_type: CalType::FlatField,
            observing_mode: dataset.observing_mode().map(String::from),
            valid_from,
            location: format!("mem://onsky_flat/{}", &digest[..12]),
            content_digest: digest,
        };

        let mut output = apply_per_frame(dataset, "create_onsky_flatfield", |_| Ok(()));
        output.produced = Some(produced);
        Ok(output)
    }
}

fn apply_history(mut dataset: DatasetState, op: &str) -> DatasetState {
    for frame in &mut dataset.frames {
        frame.record(op);
    }
    dataset
}
