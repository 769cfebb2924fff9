//! Matching quantized regions to physical filaments.
//!
//! The inventory is read-only reference data. Matching is a greedy linear
//! scan: regions are served in the order given and each one takes the closest
//! filament that an earlier region has not already claimed.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use palette::Lab;
use serde::{Deserialize, Serialize};

use crate::color::{Rgb, delta_e, hue_degrees, rgb_distance};
use crate::error::FilamentError;
use crate::regions::Region;

/// Matches closer than this ΔE are reported as [`MatchQuality::Good`].
pub const GOOD_MATCH_THRESHOLD: f64 = 10.0;

const BUILTIN_INVENTORY: &str = include_str!("../data/filaments.json");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilamentType {
    Translucent,
    Opaque,
    Metallic,
    Glow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Material {
    Pla,
    Petg,
    Abs,
    Tpu,
    Wood,
    Metal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Basic,
    Premium,
    Specialty,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Filament {
    pub id: String,
    pub vendor: String,
    pub name: String,
    pub hex: String,
    /// Light transmission distance in millimetres.
    pub transmission_distance: f64,
    #[serde(rename = "type")]
    pub kind: FilamentType,
    pub material: Material,
    pub category: Category,
}

impl Filament {
    pub fn rgb(&self) -> Result<Rgb, FilamentError> {
        Rgb::from_hex(&self.hex).map_err(|source| FilamentError::InvalidHex {
            id: self.id.clone(),
            source,
        })
    }
}

/// Distance metric used by [`find_best_filament_match`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchMethod {
    #[default]
    LabDeltaE,
    RgbDistance,
    HueMatch,
}

impl MatchMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            MatchMethod::LabDeltaE => "lab-delta-e",
            MatchMethod::RgbDistance => "rgb-distance",
            MatchMethod::HueMatch => "hue-match",
        }
    }

    pub fn distance(self, a: Rgb, b: Rgb) -> f64 {
        match self {
            MatchMethod::LabDeltaE => delta_e(&a.to_lab(), &b.to_lab()),
            MatchMethod::RgbDistance => rgb_distance(a, b),
            MatchMethod::HueMatch => (hue_degrees(a) - hue_degrees(b)).abs(),
        }
    }
}

impl fmt::Display for MatchMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MatchMethod {
    type Err = FilamentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lab-delta-e" => Ok(MatchMethod::LabDeltaE),
            "rgb-distance" => Ok(MatchMethod::RgbDistance),
            "hue-match" => Ok(MatchMethod::HueMatch),
            other => Err(FilamentError::UnknownMethod(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilamentMatch<'a> {
    pub filament: &'a Filament,
    pub distance: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchQuality {
    Good,
    Approximate,
}

impl MatchQuality {
    pub fn classify(distance: f64) -> Self {
        if distance < GOOD_MATCH_THRESHOLD {
            MatchQuality::Good
        } else {
            MatchQuality::Approximate
        }
    }
}

/// The filament chosen for one region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionAssignment {
    pub region_id: String,
    pub filament_id: String,
    pub distance: f64,
    pub quality: MatchQuality,
}

/// Linear scan of `filaments` with a caller-selected distance metric.
pub fn find_best_filament_match<'a>(
    target: Rgb,
    filaments: &'a [Filament],
    method: MatchMethod,
) -> Result<Option<FilamentMatch<'a>>, FilamentError> {
    let mut best: Option<FilamentMatch<'a>> = None;
    for filament in filaments {
        let distance = method.distance(target, filament.rgb()?);
        if best.is_none_or(|b| distance < b.distance) {
            best = Some(FilamentMatch { filament, distance });
        }
    }
    Ok(best)
}

/// A validated filament inventory with precomputed L*a*b* values.
#[derive(Debug, Clone)]
pub struct FilamentInventory {
    filaments: Vec<Filament>,
    labs: Vec<Lab>,
}

impl FilamentInventory {
    pub fn new(filaments: Vec<Filament>) -> Result<Self, FilamentError> {
        let labs = filaments
            .iter()
            .map(|f| f.rgb().map(Rgb::to_lab))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { filaments, labs })
    }

    /// Parse a JSON array of filament records.
    pub fn from_json(json: &str) -> Result<Self, FilamentError> {
        let filaments: Vec<Filament> =
            serde_json::from_str(json).map_err(|e| FilamentError::Inventory(e.to_string()))?;
        Self::new(filaments)
    }

    /// The starter inventory bundled with the crate.
    pub fn builtin() -> Result<Self, FilamentError> {
        Self::from_json(BUILTIN_INVENTORY)
    }

    pub fn filaments(&self) -> &[Filament] {
        &self.filaments
    }

    pub fn len(&self) -> usize {
        self.filaments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filaments.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Filament> {
        self.filaments.iter().find(|f| f.id == id)
    }

    /// Closest filament by ΔE whose id is not in `exclude`.
    ///
    /// Returns `Ok(None)` when every filament is excluded.
    pub fn find_closest_filament(
        &self,
        target_hex: &str,
        exclude: &HashSet<String>,
    ) -> Result<Option<FilamentMatch<'_>>, FilamentError> {
        let target = Rgb::from_hex(target_hex)?.to_lab();
        Ok(self.closest_to(&target, exclude))
    }

    fn closest_to(&self, target: &Lab, exclude: &HashSet<String>) -> Option<FilamentMatch<'_>> {
        let mut best: Option<FilamentMatch<'_>> = None;
        for (filament, lab) in self.filaments.iter().zip(&self.labs) {
            if exclude.contains(&filament.id) {
                continue;
            }
            let distance = delta_e(target, lab);
            if best.is_none_or(|b| distance < b.distance) {
                best = Some(FilamentMatch { filament, distance });
            }
        }
        best
    }

    /// Greedily give every region its own closest filament.
    ///
    /// Regions are processed in the order given, so earlier regions win ties
    /// for a shared best match. Once every filament has been claimed, the
    /// remaining regions fall back to their closest filament regardless of
    /// reuse. An empty inventory yields no assignments.
    pub fn auto_map_regions(&self, regions: &[Region]) -> Result<Vec<RegionAssignment>, FilamentError> {
        let mut used: HashSet<String> = HashSet::new();
        let mut assignments = Vec::with_capacity(regions.len());

        for region in regions {
            let target = Rgb::from_hex(&region.avg_color)?.to_lab();
            let found = self
                .closest_to(&target, &used)
                .or_else(|| self.closest_to(&target, &HashSet::new()));
            let Some(found) = found else {
                continue;
            };

            used.insert(found.filament.id.clone());
            assignments.push(RegionAssignment {
                region_id: region.id.clone(),
                filament_id: found.filament.id.clone(),
                distance: found.distance,
                quality: MatchQuality::classify(found.distance),
            });
        }

        Ok(assignments)
    }
}
