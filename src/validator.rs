//! Finalization validator: a pure, single-pass algorithm that decides whether
//! an ordered sequence of block assignments forms a gapless, overlap-free
//! cover of `[0, file_size)`.
//!
//! Kept free of any backend concerns so it can be exercised directly in unit
//! tests and reused unchanged by every [`crate::backend::MetadataBackend`]
//! implementation.

use crate::ids::BlockId;
use serde::Serialize;

/// One row of the joined `blocks <-> assignments` view, ordered by `offset`.
///
/// `offset`/`size` are signed to let the algorithm represent the malformed
/// "negative offset" protocol error uniformly with every other diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignedBlock {
    pub block_id: BlockId,
    pub offset: i64,
    pub size: i64,
}

impl AssignedBlock {
    pub fn new(block_id: BlockId, offset: i64, size: i64) -> Self {
        Self {
            block_id,
            offset,
            size,
        }
    }

    fn end(&self) -> i64 {
        self.offset + self.size
    }
}

/// Sentinel-able reference to a block at an offset, used at the edges of the
/// assignment stream where there is no neighbor.
pub type Endpoint = (Option<BlockId>, Option<i64>);

fn endpoint_of(block: &AssignedBlock) -> Endpoint {
    (Some(block.block_id.clone()), Some(block.offset))
}

const NONE_ENDPOINT: Endpoint = (None, None);

/// A single inconsistency found while validating a file's assignments.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "detail")]
pub enum Diagnostic {
    /// A byte range in `[0, file_size)` is not covered by any assignment.
    Gap { after: Endpoint, before: Endpoint },
    /// Two assignments claim the same bytes.
    Overlap { after: Endpoint, before: Endpoint },
}

impl Diagnostic {
    fn gap(after: Endpoint, before: Endpoint) -> Self {
        Diagnostic::Gap { after, before }
    }

    fn overlap(after: Endpoint, before: Endpoint) -> Self {
        Diagnostic::Overlap { after, before }
    }
}

/// Outcome of [`validate`]: either the file is a valid gapless cover, or a
/// list of diagnostics explaining why it isn't. Diagnostics are returned as a
/// value, never raised as an error - finalization failure is an expected
/// outcome a client renders back to the user, not an exceptional condition.
#[derive(Debug, Clone, PartialEq)]
pub enum FinalizeCheck {
    Ok,
    Diagnostics(Vec<Diagnostic>),
}

impl FinalizeCheck {
    pub fn is_ok(&self) -> bool {
        matches!(self, FinalizeCheck::Ok)
    }
}

/// Validates an ordered (by `offset`) stream of assignments against an
/// optional declared `file_size`. See `SPEC_FULL.md` §4.3 for the algorithm.
pub fn validate(rows: &[AssignedBlock], file_size: Option<i64>) -> FinalizeCheck {
    let mut diagnostics = Vec::new();

    if rows.is_empty() {
        return match file_size {
            None | Some(0) => FinalizeCheck::Ok,
            Some(_) => {
                FinalizeCheck::Diagnostics(vec![Diagnostic::gap(NONE_ENDPOINT, NONE_ENDPOINT)])
            }
        };
    }

    let first = &rows[0];
    if first.offset != 0 {
        let kind_is_gap = first.offset > 0;
        let front = endpoint_of(first);
        diagnostics.push(if kind_is_gap {
            Diagnostic::gap(NONE_ENDPOINT, front)
        } else {
            Diagnostic::overlap(NONE_ENDPOINT, front)
        });
    }

    for pair in rows.windows(2) {
        let (l1, l2) = (&pair[0], &pair[1]);
        let delta = l1.end() - l2.offset;
        if delta > 0 {
            diagnostics.push(Diagnostic::overlap(endpoint_of(l1), endpoint_of(l2)));
        } else if delta < 0 {
            diagnostics.push(Diagnostic::gap(endpoint_of(l1), endpoint_of(l2)));
        }
    }

    if let Some(file_size) = file_size {
        if file_size > 0 {
            let last = rows.last().expect("checked non-empty above");
            let tail = file_size - last.end();
            if tail > 0 {
                diagnostics.push(Diagnostic::gap(endpoint_of(last), NONE_ENDPOINT));
            } else if tail < 0 {
                diagnostics.push(Diagnostic::overlap(endpoint_of(last), NONE_ENDPOINT));
            }
        }
    }

    if diagnostics.is_empty() {
        FinalizeCheck::Ok
    } else {
        FinalizeCheck::Diagnostics(diagnostics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(id: &str, offset: i64, size: i64) -> AssignedBlock {
        AssignedBlock::new(BlockId::from(id), offset, size)
    }

    #[test]
    fn empty_stream_with_no_declared_size_is_ok() {
        assert_eq!(validate(&[], None), FinalizeCheck::Ok);
        assert_eq!(validate(&[], Some(0)), FinalizeCheck::Ok);
    }

    #[test]
    fn empty_stream_with_declared_size_is_a_gap() {
        let result = validate(&[], Some(100));
        assert_eq!(
            result,
            FinalizeCheck::Diagnostics(vec![Diagnostic::Gap {
                after: NONE_ENDPOINT,
                before: NONE_ENDPOINT
            }])
        );
    }

    #[test]
    fn three_contiguous_blocks_finalize_cleanly() {
        let rows = vec![
            block("b1", 0, 100),
            block("b2", 100, 100),
            block("b3", 200, 100),
        ];
        assert_eq!(validate(&rows, Some(300)), FinalizeCheck::Ok);
    }

    #[test]
    fn gap_between_two_blocks_is_reported() {
        let rows = vec![block("b1", 0, 100), block("b2", 100, 100), block("b3", 300, 100)];
        let result = validate(&rows, Some(400));
        assert_eq!(
            result,
            FinalizeCheck::Diagnostics(vec![Diagnostic::Gap {
                after: (Some(BlockId::from("b2")), Some(100)),
                before: (Some(BlockId::from("b3")), Some(300)),
            }])
        );
    }

    #[test]
    fn overlap_between_two_blocks_is_reported() {
        let rows = vec![block("b1", 0, 50), block("b2", 50, 100), block("b3", 150, 100)];
        let result = validate(&rows, None);
        assert_eq!(
            result,
            FinalizeCheck::Diagnostics(vec![Diagnostic::Overlap {
                after: (Some(BlockId::from("b2")), Some(50)),
                before: (Some(BlockId::from("b3")), Some(150)),
            }])
        );
    }

    #[test]
    fn front_gap_when_first_offset_is_positive() {
        let rows = vec![block("b1", 10, 90)];
        let result = validate(&rows, None);
        assert_eq!(
            result,
            FinalizeCheck::Diagnostics(vec![Diagnostic::Gap {
                after: NONE_ENDPOINT,
                before: (Some(BlockId::from("b1")), Some(10)),
            }])
        );
    }

    #[test]
    fn front_overlap_when_first_offset_is_negative() {
        let rows = vec![block("b1", -10, 90)];
        let result = validate(&rows, None);
        assert_eq!(
            result,
            FinalizeCheck::Diagnostics(vec![Diagnostic::Overlap {
                after: NONE_ENDPOINT,
                before: (Some(BlockId::from("b1")), Some(-10)),
            }])
        );
    }

    #[test]
    fn tail_gap_when_declared_size_exceeds_coverage() {
        let rows = vec![block("b1", 0, 100)];
        let result = validate(&rows, Some(150));
        assert_eq!(
            result,
            FinalizeCheck::Diagnostics(vec![Diagnostic::Gap {
                after: (Some(BlockId::from("b1")), Some(0)),
                before: NONE_ENDPOINT,
            }])
        );
    }

    #[test]
    fn tail_overlap_when_declared_size_is_short() {
        let rows = vec![block("b1", 0, 100)];
        let result = validate(&rows, Some(50));
        assert_eq!(
            result,
            FinalizeCheck::Diagnostics(vec![Diagnostic::Overlap {
                after: (Some(BlockId::from("b1")), Some(0)),
                before: NONE_ENDPOINT,
            }])
        );
    }

    #[test]
    fn no_declared_size_skips_tail_check() {
        let rows = vec![block("b1", 0, 100)];
        assert_eq!(validate(&rows, None), FinalizeCheck::Ok);
    }
}
