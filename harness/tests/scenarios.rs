use insmalloc_harness::scenarios::{
    s1_reuse_after_free_reports_layout_size, s2_huge_allocation_releases_physical_bytes_on_free,
    s3_cross_thread_frees_scavenge_to_full_mask, s4_starvation_recovers_via_rescue_cleanup,
    s4_starvation_with_no_reclaimable_memory_fails, s5_double_free_is_tolerated,
};

#[test]
fn s1_reuse_after_free_reports_layout_size_test() {
    s1_reuse_after_free_reports_layout_size().expect("S1");
}

#[test]
fn s2_huge_allocation_releases_physical_bytes_on_free_test() {
    s2_huge_allocation_releases_physical_bytes_on_free().expect("S2");
}

#[test]
fn s3_cross_thread_frees_scavenge_to_full_mask_test() {
    s3_cross_thread_frees_scavenge_to_full_mask().expect("S3");
}

#[test]
fn s4a_starvation_with_no_reclaimable_memory_fails_test() {
    s4_starvation_with_no_reclaimable_memory_fails().expect("S4a");
}

#[test]
fn s4b_starvation_recovers_via_rescue_cleanup_test() {
    s4_starvation_recovers_via_rescue_cleanup().expect("S4b");
}

#[test]
fn s5_double_free_is_tolerated_test() {
    s5_double_free_is_tolerated().expect("S5");
}
