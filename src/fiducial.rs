//! Named fiducial roles and the assignment of fitted ellipses to them.
use crate::detection::DetectionBox;
use crate::fit::{residual, BoxFit, EllipseFitter, EllipseResult};
use image::{GrayImage, Rgb, RgbImage};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Pins of the connector face. Declaration order is the fixed solve order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PinName {
    #[serde(rename = "center")]
    Center,
    L2,
    L1,
    CP,
    CS,
    PE,
    #[serde(rename = "DC-")]
    DcMinus,
    #[serde(rename = "DC+")]
    DcPlus,
}

impl PinName {
    /// Every pin, in the order correspondences are handed to the pose solver.
    pub const ALL: [PinName; 8] = [
        PinName::Center,
        PinName::L2,
        PinName::L1,
        PinName::CP,
        PinName::CS,
        PinName::PE,
        PinName::DcMinus,
        PinName::DcPlus,
    ];

    /// Names given to the hub sub-fiducials, upper row left to right then lower row.
    pub const HUB_ORDER: [PinName; 6] = [
        PinName::L2,
        PinName::Center,
        PinName::L1,
        PinName::CP,
        PinName::PE,
        PinName::CS,
    ];

    /// Static class id table.
    pub fn from_class(class_id: i32) -> Option<Self> {
        let idx = usize::try_from(class_id).ok()?;
        Self::ALL.get(idx).copied()
    }

    pub fn class_id(self) -> i32 {
        Self::ALL.iter().position(|p| *p == self).unwrap_or_default() as i32
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PinName::Center => "center",
            PinName::L2 => "L2",
            PinName::L1 => "L1",
            PinName::CP => "CP",
            PinName::CS => "CS",
            PinName::PE => "PE",
            PinName::DcMinus => "DC-",
            PinName::DcPlus => "DC+",
        }
    }

    /// Overlay color.
    pub fn color(self) -> Rgb<u8> {
        Rgb(match self {
            PinName::Center => [0, 255, 0],
            PinName::L1 => [255, 255, 0],
            PinName::L2 => [0, 255, 255],
            PinName::CP => [255, 0, 255],
            PinName::CS => [0, 128, 255],
            PinName::PE => [255, 165, 0],
            PinName::DcMinus => [0, 0, 255],
            PinName::DcPlus => [255, 128, 0],
        })
    }
}

impl fmt::Display for PinName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Unknown pin name '{0}'")]
pub struct UnknownPin(pub String);

impl FromStr for PinName {
    type Err = UnknownPin;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| UnknownPin(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Side::Left => "left",
            Side::Right => "right",
        })
    }
}

/// Fitted ellipses of one camera side, keyed by pin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedFiducialSet {
    pub side: Side,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub points: BTreeMap<PinName, EllipseResult>,
}

impl NamedFiducialSet {
    pub fn new(side: Side) -> Self {
        Self {
            side,
            image: None,
            points: BTreeMap::new(),
        }
    }

    pub fn get(&self, pin: PinName) -> Option<&EllipseResult> {
        self.points.get(&pin)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Pins of `required` that have no ellipse.
    pub fn missing(&self, required: &[PinName]) -> Vec<PinName> {
        required
            .iter()
            .filter(|p| !self.points.contains_key(p))
            .copied()
            .collect()
    }

    pub fn centers(&self) -> BTreeMap<PinName, [f64; 2]> {
        self.points.iter().map(|(k, v)| (*k, v.center())).collect()
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> crate::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn to_json_file(&self, path: impl AsRef<Path>) -> crate::Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Draws every fitted outline and its center onto a color frame.
    pub fn draw_overlay(&self, canvas: &mut RgbImage) {
        for (pin, r) in &self.points {
            residual::draw_outline(canvas, &r.ellipse(), 0.0, 0.0, pin.color());
            imageproc::drawing::draw_filled_circle_mut(
                canvas,
                (r.cx.round() as i32, r.cy.round() as i32),
                2,
                Rgb([255, 255, 255]),
            );
        }
    }
}

/// Orders hub sub-ellipses into two rows of three and zips them with [`PinName::HUB_ORDER`].
///
/// Ellipses are sorted top to bottom (ties left to right), the first three form the upper row
/// and each row is then sorted left to right. Only `min(n, 6)` names are assigned.
pub fn order_hub(side: Side, mut fits: Vec<EllipseResult>) -> Vec<(PinName, EllipseResult)> {
    if fits.len() != PinName::HUB_ORDER.len() {
        log::warn!(
            "{side}: hub box produced {} sub-ellipses, expected {}; names may be misassigned",
            fits.len(),
            PinName::HUB_ORDER.len()
        );
    }
    fits.sort_by(|a, b| a.cy.total_cmp(&b.cy).then(a.cx.total_cmp(&b.cx)));
    let lower = fits.split_off(fits.len().min(3));
    let rows = fits
        .into_iter()
        .sorted_by(|a, b| a.cx.total_cmp(&b.cx))
        .chain(lower.into_iter().sorted_by(|a, b| a.cx.total_cmp(&b.cx)));
    PinName::HUB_ORDER.into_iter().zip(rows).collect()
}

/// Maps per-box fits to pins. Later boxes of the same class overwrite earlier ones.
pub fn assign_fits(side: Side, fits: impl IntoIterator<Item = BoxFit>) -> NamedFiducialSet {
    let mut set = NamedFiducialSet::new(side);
    for fit in fits {
        match fit {
            BoxFit::Many(subs) => set.points.extend(order_hub(side, subs)),
            BoxFit::One(r) => match PinName::from_class(r.cls) {
                Some(pin) => {
                    if set.points.insert(pin, r).is_some() {
                        log::debug!("{side}: {pin} detected more than once, keeping the last");
                    }
                }
                None => log::warn!("{side}: class {} has no pin name, skipped", r.cls),
            },
        }
    }
    set
}

/// Fits every detection of one side and assigns the results to pins.
#[derive(Debug, Clone, Default)]
pub struct FiducialAssigner {
    fitter: EllipseFitter,
}

impl FiducialAssigner {
    pub fn new(fitter: EllipseFitter) -> Self {
        Self { fitter }
    }

    pub fn assign(&self, side: Side, detections: &[DetectionBox], gray: &GrayImage) -> NamedFiducialSet {
        let reference = self.fitter.reference_edges(gray);
        let fits = detections.iter().filter_map(|det| {
            let fit = self.fitter.fit_box(gray, &reference, det);
            if fit.is_none() {
                log::warn!("{side}: no ellipse for class {} box {:?}", det.class_id, det.bbox);
            }
            fit
        });
        let set = assign_fits(side, fits);
        log::info!("{side}: {} of {} pins assigned", set.len(), PinName::ALL.len());
        set
    }
}
