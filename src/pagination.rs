//! Marker/limit pagination shared by every listing operation.
//!
//! Every backend fetches one row beyond what it returns to the caller so it
//! can report whether another page exists without a separate `COUNT(*)`.

/// Caps a client-requested limit at the server-configured ceiling and
/// returns the row count each backend should actually fetch (`limit + 1`,
/// so the extra row signals "there is more").
///
/// Mirrors the `_determine_limit` helper in the reference driver: `None`
/// requests the server's full cap.
pub fn effective_fetch_count(requested: Option<u32>, max_return_num: u32) -> u32 {
    let capped = match requested {
        Some(limit) => limit.min(max_return_num),
        None => max_return_num,
    };
    capped.saturating_add(1)
}

/// Splits a fetched row batch (of up to `effective_fetch_count` rows) into
/// the page to return and the marker for the next page, given the capped
/// `limit` that was used to compute the fetch count.
pub fn paginate<T, M>(mut rows: Vec<T>, limit: u32, marker_of: impl Fn(&T) -> M) -> (Vec<T>, Option<M>) {
    let limit = limit as usize;
    if rows.len() > limit {
        let next_marker = marker_of(&rows[limit]);
        rows.truncate(limit);
        (rows, Some(next_marker))
    } else {
        (rows, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caps_requested_limit_at_server_maximum() {
        assert_eq!(effective_fetch_count(Some(200), 80), 81);
    }

    #[test]
    fn uses_server_maximum_when_no_limit_requested() {
        assert_eq!(effective_fetch_count(None, 80), 81);
    }

    #[test]
    fn requested_limit_under_maximum_is_honored() {
        assert_eq!(effective_fetch_count(Some(10), 80), 11);
    }

    #[test]
    fn full_page_produces_no_next_marker() {
        let rows = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let (page, marker) = paginate(rows, 3, |s| s.clone());
        assert_eq!(page, vec!["a", "b", "c"]);
        assert_eq!(marker, None);
    }

    #[test]
    fn overflow_row_becomes_next_marker_and_is_dropped() {
        let rows = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let (page, marker) = paginate(rows, 2, |s| s.clone());
        assert_eq!(page, vec!["a", "b"]);
        assert_eq!(marker, Some("c".to_string()));
    }
}
