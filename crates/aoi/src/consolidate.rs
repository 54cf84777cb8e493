//! Turns raw detector candidates into canonical AOIs: area filter,
//! confidence filter, then closest-pair-first radius merging.

use std::{cmp::Reverse, collections::BinaryHeap};

use float_ord::FloatOrd;
use tracing::debug;

use crate::types::{AlgorithmKind, AoiMetadata, AreaOfInterest, DetectionCandidate, PixelRect, ReviewState};

pub const DEFAULT_MERGE_RADIUS: f64 = 25.0;

#[derive(Debug, Clone, PartialEq)]
pub struct ConsolidationConfig {
    pub min_area: u32,
    /// `None` leaves the area unbounded
    pub max_area: Option<u32>,
    /// Minimum confidence for scored candidates, 0..100
    pub confidence_threshold: f64,
    pub merge_radius: f64,
    /// Pool all algorithms into one merge instead of merging per algorithm
    pub combine_aois: bool,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            min_area: 10,
            max_area: None,
            confidence_threshold: 0.0,
            merge_radius: DEFAULT_MERGE_RADIUS,
            combine_aois: true,
        }
    }
}

/// One or more candidates merged together
#[derive(Debug, Clone, PartialEq)]
pub struct Cluster {
    pub bbox: PixelRect,
    pub pixel_area: u32,
    pub members: usize,
    pub methods: Vec<AlgorithmKind>,
    confidence_sum: f64,
    scored: usize,
    raw_sum: f64,
}

impl From<DetectionCandidate> for Cluster {
    fn from(c: DetectionCandidate) -> Self {
        Self {
            bbox: c.bbox,
            pixel_area: c.pixel_area,
            members: 1,
            methods: vec![c.method],
            confidence_sum: c.confidence.unwrap_or(0.0),
            scored: c.confidence.is_some() as usize,
            raw_sum: c.raw_score,
        }
    }
}

impl Cluster {
    /// Mean confidence of the scored members
    pub fn confidence(&self) -> Option<f64> {
        (self.scored > 0).then(|| self.confidence_sum / self.scored as f64)
    }

    pub fn raw_score(&self) -> f64 {
        self.raw_sum / self.members as f64
    }

    pub fn center(&self) -> (f64, f64) {
        self.bbox.center()
    }

    fn distance(&self, other: &Cluster) -> f64 {
        let (ax, ay) = self.center();
        let (bx, by) = other.center();
        ((ax - bx).powi(2) + (ay - by).powi(2)).sqrt()
    }

    /// Pixel area of the union. Overlap between the two pixel sets is
    /// estimated from the bounding-box intersection.
    fn merged_area(&self, other: &Cluster) -> u32 {
        let overlap = self
            .bbox
            .intersection(&other.bbox)
            .map(|r| r.area().min(self.pixel_area as u64).min(other.pixel_area as u64))
            .unwrap_or(0);
        (self.pixel_area as u64 + other.pixel_area as u64 - overlap).min(u32::MAX as u64) as u32
    }

    fn absorb(&mut self, other: &Cluster) {
        self.pixel_area = self.merged_area(other);
        self.bbox = self.bbox.union(&other.bbox);
        self.members += other.members;
        self.confidence_sum += other.confidence_sum;
        self.scored += other.scored;
        self.raw_sum += other.raw_sum;
        self.methods.extend_from_slice(&other.methods);
        self.methods.sort();
        self.methods.dedup();
    }
}

/// Result of a radius merge
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    pub clusters: Vec<Cluster>,
    /// For each input, the index of the cluster it ended up in
    pub assignment: Vec<usize>,
}

/// Arena of clusters with a merged-into forest
struct MergeArena {
    clusters: Vec<Cluster>,
    parent: Vec<usize>,
    version: Vec<u32>,
}

impl MergeArena {
    fn new(clusters: Vec<Cluster>) -> Self {
        let n = clusters.len();
        Self {
            clusters,
            parent: (0..n).collect(),
            version: vec![0; n],
        }
    }

    fn is_root(&self, i: usize) -> bool {
        self.parent[i] == i
    }

    fn find(&mut self, mut i: usize) -> usize {
        while self.parent[i] != i {
            self.parent[i] = self.parent[self.parent[i]];
            i = self.parent[i];
        }
        i
    }

    fn union_into(&mut self, survivor: usize, absorbed: usize) {
        let other = self.clusters[absorbed].clone();
        self.clusters[survivor].absorb(&other);
        self.parent[absorbed] = survivor;
        self.version[survivor] += 1;
    }
}

type PairKey = Reverse<(FloatOrd<f64>, usize, usize, u32, u32)>;

#[derive(Debug, Clone)]
pub struct Consolidator {
    pub config: ConsolidationConfig,
}

impl Consolidator {
    pub fn new(config: ConsolidationConfig) -> Self {
        Self { config }
    }

    fn area_ok(&self, area: u32) -> bool {
        area >= self.config.min_area && self.config.max_area.is_none_or(|max| area <= max)
    }

    /// Steps 1 and 2: area bounds, then confidence for scored candidates
    pub fn filter(&self, candidates: Vec<DetectionCandidate>) -> Vec<DetectionCandidate> {
        candidates
            .into_iter()
            .filter(|c| self.area_ok(c.pixel_area))
            .filter(|c| c.confidence.is_none_or(|conf| conf >= self.config.confidence_threshold))
            .collect()
    }

    /// Merge the closest pair within the radius until none remains. Ties go
    /// to the lower indices. Merges that would exceed the maximum area are
    /// not performed.
    pub fn merge(&self, clusters: Vec<Cluster>) -> MergeOutcome {
        let radius = self.config.merge_radius;
        let n = clusters.len();
        let mut arena = MergeArena::new(clusters);
        let mut heap: BinaryHeap<PairKey> = BinaryHeap::new();

        if radius >= 0.0 {
            let mut order: Vec<usize> = (0..n).collect();
            order.sort_by_key(|&i| FloatOrd(arena.clusters[i].center().0));
            for (a, &i) in order.iter().enumerate() {
                let xi = arena.clusters[i].center().0;
                for &j in &order[a + 1..] {
                    if arena.clusters[j].center().0 - xi > radius {
                        break;
                    }
                    let d = arena.clusters[i].distance(&arena.clusters[j]);
                    if d <= radius {
                        let (lo, hi) = (i.min(j), i.max(j));
                        heap.push(Reverse((FloatOrd(d), lo, hi, 0, 0)));
                    }
                }
            }
        }

        let mut merges = 0usize;
        while let Some(Reverse((_, i, j, vi, vj))) = heap.pop() {
            if !arena.is_root(i) || !arena.is_root(j) || arena.version[i] != vi || arena.version[j] != vj {
                continue;
            }
            let merged_area = arena.clusters[i].merged_area(&arena.clusters[j]);
            if !self.config.max_area.is_none_or(|max| merged_area <= max) {
                continue;
            }

            arena.union_into(i, j);
            merges += 1;

            let vi = arena.version[i];
            for k in 0..n {
                if k == i || !arena.is_root(k) {
                    continue;
                }
                let d = arena.clusters[i].distance(&arena.clusters[k]);
                if d <= radius {
                    let (lo, hi) = (i.min(k), i.max(k));
                    let (vlo, vhi) = if lo == i { (vi, arena.version[k]) } else { (arena.version[k], vi) };
                    heap.push(Reverse((FloatOrd(d), lo, hi, vlo, vhi)));
                }
            }
        }
        debug!("Radius merge: {} inputs, {} merges", n, merges);

        let mut index_of_root = vec![usize::MAX; n];
        let mut survivors = Vec::new();
        for i in 0..n {
            if arena.is_root(i) {
                index_of_root[i] = survivors.len();
                survivors.push(arena.clusters[i].clone());
            }
        }
        let assignment = (0..n).map(|i| index_of_root[arena.find(i)]).collect();

        MergeOutcome {
            clusters: survivors,
            assignment,
        }
    }

    /// Full consolidation of one image's pooled candidates. AOIs are numbered
    /// in reading order of their centres.
    pub fn consolidate(&self, candidates: Vec<DetectionCandidate>) -> Vec<AreaOfInterest> {
        let input = candidates.len();
        let kept = self.filter(candidates);
        let filtered = kept.len();

        let clusters: Vec<Cluster> = if self.config.combine_aois {
            self.merge(kept.into_iter().map(Cluster::from).collect()).clusters
        } else {
            let mut by_method: std::collections::BTreeMap<AlgorithmKind, Vec<Cluster>> = Default::default();
            for c in kept {
                by_method.entry(c.method).or_default().push(Cluster::from(c));
            }
            by_method
                .into_values()
                .flat_map(|group| self.merge(group).clusters)
                .collect()
        };

        let mut aois: Vec<AreaOfInterest> = clusters.into_iter().map(aoi_from_cluster).collect();
        aois.sort_by(|a, b| {
            FloatOrd(a.centroid[1])
                .cmp(&FloatOrd(b.centroid[1]))
                .then(FloatOrd(a.centroid[0]).cmp(&FloatOrd(b.centroid[0])))
        });
        for (id, aoi) in aois.iter_mut().enumerate() {
            aoi.id = id;
        }
        debug!("Consolidated {} candidates ({} after filtering) into {} AOIs", input, filtered, aois.len());
        aois
    }
}

fn aoi_from_cluster(cluster: Cluster) -> AreaOfInterest {
    let (cx, cy) = cluster.center();
    AreaOfInterest {
        id: 0,
        bbox: cluster.bbox,
        centroid: [cx, cy],
        pixel_area: cluster.pixel_area,
        confidence: cluster.confidence(),
        raw_score: cluster.raw_score(),
        methods: cluster.methods.clone(),
        members: cluster.members,
        gps: None,
        metadata: AoiMetadata::default(),
        review: ReviewState::default(),
    }
}

/// Rebuild a cluster from an emitted AOI, e.g. to merge a saved result set
impl From<&AreaOfInterest> for Cluster {
    fn from(aoi: &AreaOfInterest) -> Self {
        let confidence = aoi.confidence;
        Self {
            bbox: aoi.bbox,
            pixel_area: aoi.pixel_area,
            members: aoi.members.max(1),
            methods: aoi.methods.clone(),
            confidence_sum: confidence.unwrap_or(0.0) * aoi.members.max(1) as f64,
            scored: if confidence.is_some() { aoi.members.max(1) } else { 0 },
            raw_sum: aoi.raw_score * aoi.members.max(1) as f64,
        }
    }
}
