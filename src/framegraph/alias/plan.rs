//! Greedy placement of transient textures into a shared frame heap.
//!
//! Textures are taken largest first. The largest unplaced texture opens a new
//! bucket; every smaller texture whose lifetime does not overlap the bucket
//! owner is then fitted into the smallest free gap among the regions that are
//! alive at the same time as it.

use std::cmp::Ordering;

use smallvec::SmallVec;

use crate::framegraph::lifetime::Lifetime;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct AliasCandidate {
    pub size_bytes: u64,
    pub alignment_bytes: u64,
    pub lifetime: Lifetime,
}

/// A sub-range of a bucket handed to one candidate.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Region {
    pub candidate: usize,
    pub lifetime: Lifetime,
    pub offset_bytes: u64,
    pub size_bytes: u64,
}

impl Region {
    fn end_bytes(&self) -> u64 {
        self.offset_bytes + self.size_bytes
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Bucket {
    pub owner: usize,
    pub lifetime: Lifetime,
    pub base_offset_bytes: u64,
    pub size_bytes: u64,
    /// Tenants placed after the owner.
    pub regions: Vec<Region>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Placement {
    pub bucket: usize,
    /// Offset from the start of the frame heap.
    pub offset_bytes: u64,
    pub size_bytes: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AliasPlan {
    pub buckets: Vec<Bucket>,
    /// One entry per candidate, in candidate order.
    pub placements: Vec<Placement>,
    pub frame_heap_size_bytes: u64,
    pub heap_alignment_bytes: u64,
}

pub fn align_up(value: u64, alignment: u64) -> u64 {
    if alignment <= 1 {
        return value;
    }
    value.div_ceil(alignment) * alignment
}

/// Builds an aliasing plan. Bucket sizes are rounded up to the heap
/// placement alignment, the larger of `alignment_floor` and every
/// candidate's alignment.
pub fn plan(candidates: &[AliasCandidate], alignment_floor: u64) -> AliasPlan {
    let heap_alignment_bytes = candidates
        .iter()
        .map(|c| c.alignment_bytes)
        .fold(alignment_floor.max(1), u64::max);

    let mut sorted = (0..candidates.len()).collect::<Vec<_>>();
    sorted.sort_by(|&a, &b| {
        candidates[b]
            .size_bytes
            .cmp(&candidates[a].size_bytes)
            .then(a.cmp(&b))
    });

    let mut placed = vec![false; candidates.len()];
    let mut buckets: Vec<Bucket> = Vec::new();
    let mut base_offset_bytes = 0;

    for (position, &owner) in sorted.iter().enumerate() {
        if placed[owner] {
            continue;
        }
        placed[owner] = true;

        let mut bucket = Bucket {
            owner,
            lifetime: candidates[owner].lifetime,
            base_offset_bytes,
            size_bytes: align_up(candidates[owner].size_bytes, heap_alignment_bytes),
            regions: Vec::new(),
        };

        for &tenant in &sorted[position + 1..] {
            if placed[tenant] {
                continue;
            }
            let candidate = &candidates[tenant];
            if candidate.lifetime.intersects(&bucket.lifetime) {
                continue;
            }
            if let Some(offset_bytes) = best_fit(&bucket, candidate) {
                bucket.regions.push(Region {
                    candidate: tenant,
                    lifetime: candidate.lifetime,
                    offset_bytes,
                    size_bytes: candidate.size_bytes,
                });
                placed[tenant] = true;
            }
        }

        base_offset_bytes += bucket.size_bytes;
        buckets.push(bucket);
    }

    let mut placements = vec![
        Placement {
            bucket: 0,
            offset_bytes: 0,
            size_bytes: 0,
        };
        candidates.len()
    ];
    for (index, bucket) in buckets.iter().enumerate() {
        placements[bucket.owner] = Placement {
            bucket: index,
            offset_bytes: bucket.base_offset_bytes,
            size_bytes: candidates[bucket.owner].size_bytes,
        };
        for region in &bucket.regions {
            placements[region.candidate] = Placement {
                bucket: index,
                offset_bytes: bucket.base_offset_bytes + region.offset_bytes,
                size_bytes: region.size_bytes,
            };
        }
    }

    AliasPlan {
        buckets,
        placements,
        frame_heap_size_bytes: base_offset_bytes,
        heap_alignment_bytes,
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Edge {
    // Ends sort before starts at the same offset so touching regions leave no gap.
    End,
    Start,
}

/// Smallest free gap inside `bucket` that fits `candidate`, considering only
/// regions alive at the same time as it.
fn best_fit(bucket: &Bucket, candidate: &AliasCandidate) -> Option<u64> {
    let mut events: SmallVec<[(u64, Edge); 16]> = SmallVec::new();
    for region in &bucket.regions {
        if region.lifetime.intersects(&candidate.lifetime) {
            events.push((region.offset_bytes, Edge::Start));
            events.push((region.end_bytes(), Edge::End));
        }
    }
    events.sort_unstable();

    let mut best: Option<(u64, u64)> = None;
    let mut consider = |gap_start: u64, gap_end: u64| {
        let offset = align_up(gap_start, candidate.alignment_bytes);
        if offset > gap_end || gap_end - offset < candidate.size_bytes {
            return;
        }
        let gap = gap_end - gap_start;
        let better = match best {
            None => true,
            Some((best_gap, _)) => gap.cmp(&best_gap) == Ordering::Less,
        };
        if better {
            best = Some((gap, offset));
        }
    };

    let mut depth = 0usize;
    let mut free_from = 0u64;
    for (offset, edge) in events {
        match edge {
            Edge::Start => {
                if depth == 0 {
                    consider(free_from, offset);
                }
                depth += 1;
            }
            Edge::End => {
                depth -= 1;
                if depth == 0 {
                    free_from = offset;
                }
            }
        }
    }
    if depth == 0 {
        consider(free_from, bucket.size_bytes);
    }

    best.map(|(_, offset)| offset)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MB: u64 = 1024 * 1024;
    const KB64: u64 = 64 * 1024;

    fn candidate(size_bytes: u64, start: usize, end: usize) -> AliasCandidate {
        AliasCandidate {
            size_bytes,
            alignment_bytes: KB64,
            lifetime: Lifetime { start, end },
        }
    }

    fn overlaps(a: &Placement, b: &Placement) -> bool {
        a.offset_bytes < b.offset_bytes + b.size_bytes
            && b.offset_bytes < a.offset_bytes + a.size_bytes
    }

    fn assert_safe(candidates: &[AliasCandidate], plan: &AliasPlan) {
        for i in 0..candidates.len() {
            for j in i + 1..candidates.len() {
                if overlaps(&plan.placements[i], &plan.placements[j]) {
                    assert!(
                        !candidates[i].lifetime.intersects(&candidates[j].lifetime),
                        "candidates {i} and {j} share memory while both alive"
                    );
                }
            }
            assert_eq!(plan.placements[i].offset_bytes % candidates[i].alignment_bytes, 0);
        }
    }

    #[test]
    fn disjoint_lifetimes_share_the_larger_bucket() {
        let candidates = [candidate(MB, 0, 2), candidate(2 * MB, 3, 5)];
        let plan = plan(&candidates, KB64);

        assert_eq!(plan.frame_heap_size_bytes, 2 * MB);
        assert_eq!(plan.buckets.len(), 1);
        assert_eq!(plan.buckets[0].owner, 1);
        assert_safe(&candidates, &plan);
    }

    #[test]
    fn overlapping_lifetimes_never_alias() {
        let candidates = [candidate(MB, 0, 3), candidate(MB, 2, 5)];
        let plan = plan(&candidates, KB64);

        assert_eq!(plan.frame_heap_size_bytes, 2 * MB);
        assert_eq!(plan.buckets.len(), 2);
        assert_eq!(plan.placements[0].offset_bytes, 0);
        assert_eq!(plan.placements[1].offset_bytes, MB);
        assert_safe(&candidates, &plan);
    }

    #[test]
    fn tenants_with_overlapping_lifetimes_stack_inside_a_bucket() {
        // The owner lives at [0,0]; the two tenants overlap each other.
        let candidates = [
            candidate(4 * MB, 0, 0),
            candidate(MB, 1, 3),
            candidate(MB, 2, 4),
        ];
        let plan = plan(&candidates, KB64);

        assert_eq!(plan.buckets.len(), 1);
        assert_eq!(plan.frame_heap_size_bytes, 4 * MB);
        assert_eq!(plan.placements[1].offset_bytes, 0);
        assert_eq!(plan.placements[2].offset_bytes, MB);
        assert_safe(&candidates, &plan);
    }

    #[test]
    fn best_fit_prefers_the_smallest_gap() {
        // Regions alive during [5,5] leave a 1 MB hole at 1 MB and a 2 MB hole at 6 MB.
        let bucket = Bucket {
            owner: 0,
            lifetime: Lifetime::at(0),
            base_offset_bytes: 0,
            size_bytes: 8 * MB,
            regions: vec![
                Region {
                    candidate: 1,
                    lifetime: Lifetime { start: 1, end: 9 },
                    offset_bytes: 0,
                    size_bytes: MB,
                },
                Region {
                    candidate: 2,
                    lifetime: Lifetime { start: 1, end: 9 },
                    offset_bytes: 2 * MB,
                    size_bytes: 4 * MB,
                },
            ],
        };

        let fits = best_fit(&bucket, &candidate(MB, 5, 5));
        assert_eq!(fits, Some(MB));

        let fits = best_fit(&bucket, &candidate(2 * MB, 5, 5));
        assert_eq!(fits, Some(6 * MB));

        // Regions that are dead by then do not block anything.
        let fits = best_fit(&bucket, &candidate(8 * MB, 10, 10));
        assert_eq!(fits, Some(0));
    }

    #[test]
    fn candidates_too_large_for_every_gap_open_a_bucket() {
        let candidates = [
            candidate(2 * MB, 0, 0),
            candidate(2 * MB, 1, 2),
            candidate(MB, 2, 3),
        ];
        let plan = plan(&candidates, KB64);

        // 1 is placed in 0's bucket; 2 overlaps 1 there and finds no free byte.
        assert_eq!(plan.buckets.len(), 2);
        assert_eq!(plan.frame_heap_size_bytes, 3 * MB);
        assert_safe(&candidates, &plan);
    }

    #[test]
    fn heap_never_exceeds_the_sum_of_aligned_sizes() {
        let candidates = (0..24)
            .map(|i| candidate((1 + (i * 7) % 5) * MB, i as usize % 6, i as usize % 6 + 2))
            .collect::<Vec<_>>();
        let plan = plan(&candidates, KB64);

        let sum = candidates
            .iter()
            .map(|c| align_up(c.size_bytes, KB64))
            .sum::<u64>();
        let buckets = plan.buckets.iter().map(|b| b.size_bytes).sum::<u64>();
        assert!(plan.frame_heap_size_bytes <= sum);
        assert_eq!(plan.frame_heap_size_bytes, buckets);
        assert_safe(&candidates, &plan);
    }

    #[test]
    fn bucket_sizes_are_rounded_to_the_heap_alignment() {
        let candidates = [AliasCandidate {
            size_bytes: 1000,
            alignment_bytes: 256,
            lifetime: Lifetime::at(0),
        }];
        let plan = plan(&candidates, KB64);

        assert_eq!(plan.heap_alignment_bytes, KB64);
        assert_eq!(plan.frame_heap_size_bytes, KB64);
        assert_eq!(plan.placements[0].size_bytes, 1000);
    }

    #[test]
    fn planning_is_deterministic() {
        let candidates = [
            candidate(MB, 0, 1),
            candidate(MB, 2, 3),
            candidate(MB, 1, 2),
            candidate(MB, 4, 4),
        ];

        assert_eq!(plan(&candidates, KB64), plan(&candidates, KB64));
    }

    #[test]
    fn nothing_to_place_needs_no_heap() {
        let plan = plan(&[], KB64);

        assert!(plan.buckets.is_empty());
        assert_eq!(plan.frame_heap_size_bytes, 0);
    }
}
