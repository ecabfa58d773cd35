//! Per-frame orchestration: both camera sides are fitted and assigned in parallel, then each
//! side gets a PnP pose and the matched pins are triangulated.
use crate::config::PipelineConfig;
use crate::detection::DetectionBox;
use crate::fiducial::{FiducialAssigner, NamedFiducialSet, Side};
use crate::fit::EllipseFitter;
use crate::model::ReferenceObjectModel;
use crate::pnp::{self, Pose, PoseReport};
use crate::stereo::reconstruct::{triangulate_named, DepthResult, Point3dRecord, StereoReconstructor};
use crate::stereo::CalibrationBundle;
use image::GrayImage;
use serde::{Deserialize, Serialize};

/// Everything computed for one stereo frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameReport {
    pub left: NamedFiducialSet,
    pub right: NamedFiducialSet,
    pub left_pose: Option<PoseReport>,
    pub right_pose: Option<PoseReport>,
    /// Triangulated pins in the left camera frame.
    pub points: Vec<Point3dRecord>,
}

/// One camera image with its detector output.
#[derive(Debug, Clone, Copy)]
pub struct SideInput<'a> {
    pub image: &'a GrayImage,
    pub detections: &'a [DetectionBox],
}

#[derive(Debug, Clone)]
pub struct StereoPipeline {
    config: PipelineConfig,
    bundle: CalibrationBundle,
    model: ReferenceObjectModel,
    assigner: FiducialAssigner,
}

impl StereoPipeline {
    pub fn new(config: PipelineConfig, bundle: CalibrationBundle, model: ReferenceObjectModel) -> Self {
        let assigner = FiducialAssigner::new(EllipseFitter::new(config.fitter.clone()));
        Self {
            config,
            bundle,
            model,
            assigner,
        }
    }

    pub fn assign_side(&self, side: Side, input: SideInput<'_>) -> NamedFiducialSet {
        self.assigner.assign(side, input.detections, input.image)
    }

    /// PnP pose of one side with that camera's intrinsics and distortion. Failures are logged and
    /// give `None`.
    pub fn solve_side(&self, set: &NamedFiducialSet, width: u32, height: u32) -> Option<Pose> {
        let (intrinsics, distortion) = match set.side {
            Side::Left => (self.bundle.left_intrinsics(width, height), &self.bundle.d1),
            Side::Right => (self.bundle.right_intrinsics(width, height), &self.bundle.d2),
        };
        pnp::solve_pose(set, &self.model, &intrinsics, distortion, &self.config.pnp)
            .map_err(|e| log::warn!("{} side: no pose, {e}", set.side))
            .ok()
    }

    pub fn process_frame(&self, left: SideInput<'_>, right: SideInput<'_>) -> FrameReport {
        let (left_set, right_set) = rayon::join(
            || self.assign_side(Side::Left, left),
            || self.assign_side(Side::Right, right),
        );
        let (lw, lh) = left.image.dimensions();
        let (rw, rh) = right.image.dimensions();
        let left_pose = self.solve_side(&left_set, lw, lh);
        let right_pose = self.solve_side(&right_set, rw, rh);
        let points = triangulate_named(&left_set, &right_set, &self.bundle.q);
        log::info!("frame: {} pins triangulated", points.len());

        FrameReport {
            left_pose: left_pose.as_ref().map(Pose::report),
            right_pose: right_pose.as_ref().map(Pose::report),
            left: left_set,
            right: right_set,
            points,
        }
    }

    /// Dense depth of a raw stereo pair.
    pub fn reconstruct_depth(&self, left: &GrayImage, right: &GrayImage) -> crate::Result<DepthResult> {
        let (w, h) = left.dimensions();
        let reconstructor = StereoReconstructor::new(&self.bundle, w, h, self.config.sgbm.clone())?;
        Ok(reconstructor.reconstruct_depth(left, right)?)
    }
}
