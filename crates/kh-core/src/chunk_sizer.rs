/// Default minimum chunk size (spec.md §4.3).
pub const DEFAULT_MIN_CHUNK_SIZE: u64 = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    pub start: u64,
    pub end: u64,
}

impl Chunk {
    pub fn size(&self) -> u64 {
        self.end - self.start
    }
}

/// Converts a benchmarked speed and configured chunk duration into a
/// `[start, end)` keyspace interval. `remaining` is the undispatched
/// keyspace; `dispatched_so_far` is `job.dispatched_keyspace` and becomes
/// the chunk's start.
pub fn size_chunk(
    speed_hps: u64,
    chunk_duration_seconds: u64,
    dispatched_so_far: u64,
    remaining: u64,
    min_chunk_size: u64,
) -> Chunk {
    if remaining < min_chunk_size {
        return Chunk {
            start: dispatched_so_far,
            end: dispatched_so_far + remaining,
        };
    }

    let target = speed_hps.saturating_mul(chunk_duration_seconds);
    let size = target.clamp(min_chunk_size, remaining);

    Chunk {
        start: dispatched_so_far,
        end: dispatched_so_far + size,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_to_minimum_when_target_too_small() {
        let c = size_chunk(10, 6, 0, 1_000_000_000, DEFAULT_MIN_CHUNK_SIZE);
        assert_eq!(c.size(), DEFAULT_MIN_CHUNK_SIZE);
    }

    #[test]
    fn clamps_to_remaining_when_target_too_large() {
        let c = size_chunk(1_000_000, 600, 0, 500, DEFAULT_MIN_CHUNK_SIZE);
        assert_eq!(c.start, 0);
        assert_eq!(c.end, 500);
    }

    #[test]
    fn remaining_under_minimum_emits_single_final_chunk() {
        let c = size_chunk(10_000, 6, 997, 3, DEFAULT_MIN_CHUNK_SIZE);
        assert_eq!(c.start, 997);
        assert_eq!(c.end, 1000);
        assert_eq!(c.size(), 3);
    }

    #[test]
    fn start_follows_dispatched_so_far() {
        let c = size_chunk(10_000, 6, 5_000, 1_000_000_000, DEFAULT_MIN_CHUNK_SIZE);
        assert_eq!(c.start, 5_000);
        assert_eq!(c.end, 5_000 + 60_000);
    }
}
