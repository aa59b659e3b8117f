//! Exclusive prefix sum, shared by the grid rebuild and the neighbor builder.
//!
//! The scan runs on the host over a blocking read / write round trip of the
//! device array.

use crate::device::ComputeBackend;
use crate::error::DeviceError;

/// In-place exclusive scan: `s[0] = 0`, `s[i + 1] = s[i] + c[i]`.
///
/// Returns the sum of every input, i.e. the value the slot past the end
/// would hold. Saturates instead of wrapping.
pub fn exclusive_scan(values: &mut [u32]) -> u32 {
    let mut running = 0u32;
    for value in values.iter_mut() {
        let count = *value;
        *value = running;
        running = running.saturating_add(count);
    }
    running
}

/// Result of scanning a device array of `len` counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ScanTotals {
    /// Start offset of the last slot (`s[len - 1]`).
    pub last_offset: u32,
    /// Sum of all `len` counts.
    pub total: u32,
}

/// Scan the first `len` u32 counts of `buffer` in place.
pub(crate) fn scan_device<B: ComputeBackend>(
    backend: &mut B,
    buffer: &B::Buffer,
    len: usize,
) -> Result<ScanTotals, DeviceError> {
    let mut counts: Vec<u32> = backend.read_slice(buffer, 0, len)?;
    let total = exclusive_scan(&mut counts);
    backend.write_slice(buffer, 0, &counts)?;
    Ok(ScanTotals {
        last_offset: counts.last().copied().unwrap_or(0),
        total,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(counts: &[u32]) {
        let mut scanned = counts.to_vec();
        let total = exclusive_scan(&mut scanned);
        if let Some(first) = scanned.first() {
            assert_eq!(*first, 0);
        }
        for i in 0..counts.len().saturating_sub(1) {
            assert_eq!(scanned[i + 1], scanned[i] + counts[i]);
        }
        assert_eq!(total, counts.iter().sum::<u32>());
    }

    #[test]
    fn all_zero() {
        let mut zeros = vec![0u32; 64];
        assert_eq!(exclusive_scan(&mut zeros), 0);
        assert!(zeros.iter().all(|&s| s == 0));
    }

    #[test]
    fn skewed() {
        let mut counts = vec![0u32; 100];
        counts[3] = 1;
        counts[50] = 977;
        counts[99] = 22;
        check(&counts);

        let mut scanned = counts.clone();
        exclusive_scan(&mut scanned);
        assert_eq!(scanned[4], 1);
        assert_eq!(scanned[50], 1);
        assert_eq!(scanned[51], 978);
        assert_eq!(scanned[99], 978);
    }

    #[test]
    fn ramp_and_empty() {
        let ramp: Vec<u32> = (0..257).collect();
        check(&ramp);
        check(&[]);
        check(&[7]);
    }

    #[test]
    fn trailing_slot_holds_sum_of_prefix() {
        // k counts plus one trailing slot: after the scan the trailing slot
        // holds the sum of the k counts.
        let mut counts = vec![3, 0, 2, 5, 0];
        exclusive_scan(&mut counts);
        assert_eq!(counts, vec![0, 3, 3, 5, 10]);
    }

    #[test]
    fn saturates() {
        let mut counts = vec![u32::MAX, 1, 1];
        assert_eq!(exclusive_scan(&mut counts), u32::MAX);
        assert_eq!(counts[2], u32::MAX);
    }
}
