//! Data models for the ISR planning core.
//!
//! The `Environment` is the only interchange format the core reads. Field
//! aliases accepted on input (`range`/`radius`, `pos`/`position`/`x`+`y`)
//! are normalized on deserialization; serialization always emits the
//! canonical form.

use crate::error::{PlanError, PlanResult};
use crate::geometry::Point;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

/// Target classification. A drone's access list restricts which of these it
/// may be tasked with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetType {
    A,
    B,
    C,
    D,
    E,
}

impl fmt::Display for TargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = match self {
            Self::A => 'a',
            Self::B => 'b',
            Self::C => 'c',
            Self::D => 'd',
            Self::E => 'e',
        };
        write!(f, "{c}")
    }
}

/// A real airport; candidate start/end anchor for drone routes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Airport {
    pub id: String,
    pub x: f64,
    pub y: f64,
}

/// A prioritized surveillance target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    pub id: String,
    pub x: f64,
    pub y: f64,
    #[serde(default = "default_priority")]
    pub priority: u32,
    #[serde(rename = "type", default = "default_target_type")]
    pub target_type: TargetType,
}

fn default_priority() -> u32 {
    5
}

fn default_target_type() -> TargetType {
    TargetType::A
}

/// A circular exclusion zone. Any planned polyline must stay out of the
/// wrapped polygon interiors derived from these disks.
#[derive(Debug, Clone, Serialize)]
pub struct Sam {
    pub x: f64,
    pub y: f64,
    pub range: f64,
}

impl Sam {
    pub fn center(&self) -> Point {
        (self.x, self.y)
    }
}

/// Accepts the aliases the editors emit: `pos`/`position` arrays or explicit
/// `x`/`y`, and `range` or `radius`.
impl<'de> Deserialize<'de> for Sam {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct RawSam {
            #[serde(default)]
            pos: Option<[f64; 2]>,
            #[serde(default)]
            position: Option<[f64; 2]>,
            #[serde(default)]
            x: Option<f64>,
            #[serde(default)]
            y: Option<f64>,
            #[serde(default)]
            range: Option<f64>,
            #[serde(default)]
            radius: Option<f64>,
        }

        let raw = RawSam::deserialize(deserializer)?;
        let (x, y) = match (raw.pos.or(raw.position), raw.x, raw.y) {
            (Some([x, y]), _, _) => (x, y),
            (None, Some(x), Some(y)) => (x, y),
            _ => return Err(serde::de::Error::custom("SAM has no position")),
        };
        let range = raw
            .range
            .or(raw.radius)
            .ok_or_else(|| serde::de::Error::custom("SAM has no range"))?;
        Ok(Self { x, y, range })
    }
}

/// A named coordinate used as a synthetic start anchor.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SyntheticStart {
    pub x: f64,
    pub y: f64,
}

/// A mid-mission checkpoint; behaves like a synthetic start with an id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: String,
    pub x: f64,
    pub y: f64,
}

/// The planning environment. Immutable during a single solve.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Environment {
    #[serde(default)]
    pub airports: Vec<Airport>,
    #[serde(default)]
    pub targets: Vec<Target>,
    #[serde(default)]
    pub sams: Vec<Sam>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub synthetic_starts: BTreeMap<String, SyntheticStart>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub checkpoints: Vec<Checkpoint>,
}

impl Environment {
    /// Parse and validate an environment from interchange JSON. Unknown
    /// fields are ignored; structural problems are rejected here, before any
    /// planning begins.
    pub fn from_json(json: &serde_json::Value) -> PlanResult<Self> {
        let env: Self = serde_json::from_value(json.clone())
            .map_err(|e| PlanError::InvalidEnvironment(e.to_string()))?;
        let errors = env.validate();
        if errors.is_empty() {
            Ok(env)
        } else {
            Err(PlanError::InvalidEnvironment(errors.join("; ")))
        }
    }

    /// Validate environment structure.
    /// Returns list of validation errors (empty = valid).
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        let mut seen: HashSet<&str> = HashSet::new();

        let check_id = |id: &str, errors: &mut Vec<String>| {
            if id.is_empty() {
                errors.push("empty id".to_string());
            }
        };

        for a in &self.airports {
            check_id(&a.id, &mut errors);
            if !seen.insert(&a.id) {
                errors.push(format!("duplicate id: {}", a.id));
            }
            if !a.x.is_finite() || !a.y.is_finite() {
                errors.push(format!("airport {} has non-finite coordinates", a.id));
            }
        }
        for t in &self.targets {
            check_id(&t.id, &mut errors);
            if !seen.insert(&t.id) {
                errors.push(format!("duplicate id: {}", t.id));
            }
            if !t.x.is_finite() || !t.y.is_finite() {
                errors.push(format!("target {} has non-finite coordinates", t.id));
            }
        }
        for c in &self.checkpoints {
            check_id(&c.id, &mut errors);
            if !seen.insert(&c.id) {
                errors.push(format!("duplicate id: {}", c.id));
            }
            if !c.x.is_finite() || !c.y.is_finite() {
                errors.push(format!("checkpoint {} has non-finite coordinates", c.id));
            }
        }
        for id in self.synthetic_starts.keys() {
            check_id(id, &mut errors);
            if !seen.insert(id) {
                errors.push(format!("duplicate id: {id}"));
            }
        }
        for (i, s) in self.sams.iter().enumerate() {
            if !s.x.is_finite() || !s.y.is_finite() {
                errors.push(format!("SAM #{i} has non-finite coordinates"));
            }
            if !(s.range > 0.0) {
                errors.push(format!("SAM #{i} has non-positive range"));
            }
        }

        errors
    }

    /// Position lookup across every anchor kind the planner may reference:
    /// airports, targets, checkpoints, and synthetic starts.
    pub fn waypoint_positions(&self) -> HashMap<String, Point> {
        let mut positions = HashMap::new();
        for a in &self.airports {
            positions.insert(a.id.clone(), (a.x, a.y));
        }
        for t in &self.targets {
            positions.insert(t.id.clone(), (t.x, t.y));
        }
        for c in &self.checkpoints {
            positions.insert(c.id.clone(), (c.x, c.y));
        }
        for (id, s) in &self.synthetic_starts {
            positions.insert(id.clone(), (s.x, s.y));
        }
        positions
    }

    pub fn target(&self, id: &str) -> Option<&Target> {
        self.targets.iter().find(|t| t.id == id)
    }

    pub fn airport(&self, id: &str) -> Option<&Airport> {
        self.airports.iter().find(|a| a.id == id)
    }

    /// All non-airport start anchors: checkpoints plus synthetic starts.
    pub fn synthetic_anchor(&self, id: &str) -> Option<Point> {
        if let Some(c) = self.checkpoints.iter().find(|c| c.id == id) {
            return Some((c.x, c.y));
        }
        self.synthetic_starts.get(id).map(|s| (s.x, s.y))
    }
}

/// Sentinel end ids meaning "any real airport".
pub const END_ANY: &str = "ANY";
pub const END_ANY_DASH: &str = "-";

/// Per-drone planning configuration supplied by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DroneConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub fuel_budget: f64,
    #[serde(alias = "start_airport")]
    pub start_id: String,
    /// `"ANY"` or `"-"` lets the solver choose any real airport as the end.
    #[serde(default = "default_end", alias = "end_airport")]
    pub end_id: String,
    /// Empty means all types are accessible.
    #[serde(default)]
    pub accessible_types: Vec<TargetType>,
}

fn default_enabled() -> bool {
    true
}

fn default_end() -> String {
    END_ANY.to_string()
}

impl DroneConfig {
    /// Whether this drone may be tasked with a target of the given type.
    pub fn can_access(&self, target_type: TargetType) -> bool {
        self.accessible_types.is_empty() || self.accessible_types.contains(&target_type)
    }

    /// Free-end contracts solve once per candidate end airport.
    pub fn end_is_any(&self) -> bool {
        self.end_id == END_ANY || self.end_id == END_ANY_DASH
    }

    /// Replan contracts start from a synthetic position rather than an
    /// airport.
    pub fn is_replan_start(&self, env: &Environment) -> bool {
        self.start_id.ends_with("_START") || env.synthetic_anchor(&self.start_id).is_some()
    }
}

/// Target allocation strategy. A closed set; see the allocator module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AllocationStrategy {
    /// Highest priority first, to the nearest capable drone.
    Greedy,
    /// Even target counts with per-drone quotas.
    Balanced,
    /// Auction on priority / distance.
    Efficient,
    /// Angular sectors around the target centroid.
    Geographic,
    /// Single-drone-accessible targets first, then efficient.
    Exclusive,
}

impl FromStr for AllocationStrategy {
    type Err = PlanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "greedy" => Ok(Self::Greedy),
            "balanced" => Ok(Self::Balanced),
            "efficient" => Ok(Self::Efficient),
            "geographic" => Ok(Self::Geographic),
            "exclusive" => Ok(Self::Exclusive),
            other => Err(PlanError::Allocation(format!(
                "unknown allocation strategy: {other}"
            ))),
        }
    }
}

/// Solve options recognized by the planner facade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolveOptions {
    #[serde(default = "default_true")]
    pub post_optimize: bool,
    #[serde(default = "default_true")]
    pub use_sam_aware_distances: bool,
    #[serde(default = "default_swap_iterations")]
    pub swap_iterations_max: usize,
    /// Targets already visited in a previous mission leg; removed from
    /// planning before allocation (checkpoint replans).
    #[serde(default)]
    pub visited_targets: Vec<String>,
}

fn default_true() -> bool {
    true
}

fn default_swap_iterations() -> usize {
    8
}

impl Default for SolveOptions {
    fn default() -> Self {
        Self {
            post_optimize: true,
            use_sam_aware_distances: true,
            swap_iterations_max: default_swap_iterations(),
            visited_targets: Vec::new(),
        }
    }
}

/// One drone's share of a fleet solution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DroneRoute {
    /// Ordered waypoint ids, start anchor first, end anchor last.
    pub route: Vec<String>,
    /// `route` joined with commas, for display and sequence editing.
    pub sequence: String,
    /// Total collected target priority.
    pub prize: u32,
    /// Total route length over SAM-aware distances.
    pub length: f64,
    pub fuel_budget: f64,
    /// The materialized polyline realizing `route`.
    pub trajectory: Vec<Point>,
    /// Set when the oracle disagreed with the cached matrix on some edge;
    /// the trajectory is truncated at that edge.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trajectory_error: Option<String>,
}

impl DroneRoute {
    /// Target ids visited by this route (everything between the anchors).
    pub fn visited_targets<'a>(&'a self, env: &'a Environment) -> Vec<&'a str> {
        self.route
            .iter()
            .filter(|id| env.target(id).is_some())
            .map(String::as_str)
            .collect()
    }
}

/// Fleet-level planning result.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Solution {
    pub routes: BTreeMap<String, DroneRoute>,
    /// Target ids per drone, derived from the final routes.
    pub allocations: BTreeMap<String, Vec<String>>,
    pub total_prize: u32,
    pub total_length: f64,
    /// Convex obstacle polygons the plan was computed against.
    pub wrapped_polygons: Vec<Vec<Point>>,
    /// Targets excluded from planning (inside an obstacle or unreachable).
    pub excluded_targets: Vec<String>,
}

/// Summary returned by `prepare_matrix` and `matrix_status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatrixSummary {
    pub num_waypoints: usize,
    /// Pairs whose shortest path detours around an obstacle.
    pub num_avoidance_paths: usize,
    pub excluded_targets: Vec<String>,
}

/// Result of validating a hand-edited route sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceReport {
    pub ok: bool,
    pub route: Vec<String>,
    pub length: f64,
    pub prize: u32,
    pub trajectory: Vec<Point>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Mission coverage metrics for a solution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoverageStats {
    pub targets_visited: usize,
    pub targets_total: usize,
    pub coverage_percent: f64,
    pub prize_collected: u32,
    pub prize_possible: u32,
    pub prize_percent: f64,
    pub total_length: f64,
    pub unvisited_targets: Vec<String>,
}

/// Sort key giving numeric ids numeric order ("2" before "10") and falling
/// back to lexicographic for everything else.
pub fn drone_order_key(id: &str) -> (u8, u64, String) {
    match id.parse::<u64>() {
        Ok(n) => (0, n, String::new()),
        Err(_) => (1, 0, id.to_string()),
    }
}
