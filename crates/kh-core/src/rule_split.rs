/// One contiguous slice of a concatenated rule file (spec.md §4.2).
/// `line_start`/`line_end` are a half-open `[start, end)` range over rule
/// lines; `content_hash` is the MD5 of the slice's bytes, used to
/// content-address the scratch file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleSlice {
    pub index: u32,
    pub line_start: usize,
    pub line_end: usize,
    pub content_hash: String,
}

/// Deterministically partitions `rule_lines` into at most `max_chunks`
/// contiguous slices. Every line appears in exactly one slice; slice
/// boundaries never split a line because the partition operates on whole
/// lines, not bytes.
pub fn plan(rule_lines: &[String], max_chunks: u32) -> Vec<RuleSlice> {
    let total = rule_lines.len();
    if total == 0 || max_chunks == 0 {
        return Vec::new();
    }

    let chunk_count = max_chunks.min(total as u32).max(1) as usize;
    let base_size = total / chunk_count;
    let remainder = total % chunk_count;

    let mut slices = Vec::with_capacity(chunk_count);
    let mut cursor = 0usize;
    for i in 0..chunk_count {
        // Distribute the remainder one line at a time to the first slices so
        // every line is covered and no slice differs from another by more
        // than one line.
        let size = base_size + if i < remainder { 1 } else { 0 };
        let start = cursor;
        let end = (start + size).min(total);
        cursor = end;

        let slice_bytes = rule_lines[start..end].join("\n");
        let content_hash = format!("{:x}", md5::compute(slice_bytes.as_bytes()));

        slices.push(RuleSlice {
            index: i as u32,
            line_start: start,
            line_end: end,
            content_hash,
        });
    }

    slices
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("rule{i}")).collect()
    }

    #[test]
    fn every_line_covered_exactly_once() {
        let rules = lines(1000);
        let slices = plan(&rules, 4);
        let mut covered = 0;
        for (i, s) in slices.iter().enumerate() {
            assert_eq!(s.index, i as u32);
            covered += s.line_end - s.line_start;
        }
        assert_eq!(covered, 1000);
        assert_eq!(slices.first().unwrap().line_start, 0);
        assert_eq!(slices.last().unwrap().line_end, 1000);
    }

    #[test]
    fn slices_never_overlap() {
        let rules = lines(250_000 * 4);
        let slices = plan(&rules, 4);
        for w in slices.windows(2) {
            assert_eq!(w[0].line_end, w[1].line_start);
        }
        assert_eq!(slices.len(), 4);
        for s in &slices {
            assert_eq!(s.line_end - s.line_start, 250_000);
        }
    }

    #[test]
    fn fewer_lines_than_max_chunks_yields_one_slice_per_line() {
        let rules = lines(3);
        let slices = plan(&rules, 16);
        assert_eq!(slices.len(), 3);
    }

    #[test]
    fn empty_rules_yield_no_slices() {
        assert!(plan(&[], 4).is_empty());
    }

    #[test]
    fn slice_hash_is_stable_for_identical_content() {
        let a = plan(&lines(10), 2);
        let b = plan(&lines(10), 2);
        assert_eq!(a[0].content_hash, b[0].content_hash);
    }
}
