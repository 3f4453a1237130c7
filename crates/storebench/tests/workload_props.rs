//! Property tests for workload generation.

use proptest::prelude::*;
use storebench::workload::{generate_many, generate_single, verify_pattern};
use storebench::{Workload, WorkloadShape};

proptest! {
    #[test]
    fn single_payload_has_exact_size_and_law(size in 0usize..20_000) {
        let payload = generate_single(size);
        prop_assert_eq!(payload.len(), size);
        prop_assert!(verify_pattern(&payload));
        for (i, byte) in payload.iter().enumerate() {
            prop_assert_eq!(usize::from(*byte), i % 256);
        }
    }

    #[test]
    fn many_payloads_follow_the_law_independently(count in 0usize..40, size in 0usize..600) {
        let payloads = generate_many(count, size);
        prop_assert_eq!(payloads.len(), count);
        for payload in &payloads {
            prop_assert_eq!(payload.len(), size);
            prop_assert!(verify_pattern(payload));
        }
    }

    #[test]
    fn workload_totals_add_up(count in 0usize..40, size in 0usize..600) {
        let workload = Workload::many(count, size);
        prop_assert_eq!(workload.shape(), WorkloadShape::MultipleFiles);
        prop_assert_eq!(workload.len(), count);
        prop_assert_eq!(workload.total_bytes(), (count * size) as u64);
    }

    #[test]
    fn any_flipped_byte_breaks_the_law(size in 1usize..5_000, at in any::<prop::sample::Index>()) {
        let mut bytes = generate_single(size).to_vec();
        let i = at.index(size);
        bytes[i] = bytes[i].wrapping_add(1);
        prop_assert!(!verify_pattern(&bytes));
    }
}
