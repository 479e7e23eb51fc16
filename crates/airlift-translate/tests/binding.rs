use airlift_translate::binding::{argument_buffer_slot, uav_counter_slot, ResourceGroup};
use airlift_translate::sm5::{TessDomain, TessPartitioning};
use airlift_translate::tess::{
    final_max_tess_factor, integer_factor, max_potential_workload_count, reserved_vertex_count,
};

#[test]
fn argument_buffer_slot_rule() {
    // CB at 32+reg, sampler at reg, UAV at 64+reg, texture at 128+reg.
    for reg in [0u32, 1, 7, 13] {
        assert_eq!(argument_buffer_slot(ResourceGroup::CBuffer, reg), 32 + reg);
        assert_eq!(argument_buffer_slot(ResourceGroup::Sampler, reg), reg);
        assert_eq!(argument_buffer_slot(ResourceGroup::Uav, reg), 64 + reg);
        assert_eq!(argument_buffer_slot(ResourceGroup::Texture, reg), 128 + reg);
    }
    assert_eq!(uav_counter_slot(3), 195);
}

#[test]
fn integer_partitioning_clamps_and_ceils() {
    assert_eq!(integer_factor(0.5, TessPartitioning::Integer), 1);
    assert_eq!(integer_factor(3.2, TessPartitioning::Integer), 4);
    assert_eq!(integer_factor(64.0, TessPartitioning::Integer), 64);
    assert_eq!(integer_factor(100.0, TessPartitioning::Integer), 64);
}

#[test]
fn pow2_partitioning_rounds_up_to_powers() {
    assert_eq!(integer_factor(1.0, TessPartitioning::Pow2), 1);
    assert_eq!(integer_factor(3.0, TessPartitioning::Pow2), 4);
    assert_eq!(integer_factor(5.0, TessPartitioning::Pow2), 8);
    assert_eq!(integer_factor(33.0, TessPartitioning::Pow2), 64);
    assert_eq!(integer_factor(64.0, TessPartitioning::Pow2), 64);
}

#[test]
fn fractional_partitionings_round_to_parity() {
    // Odd clamps to [1, 63] and rounds the ceiling up to odd.
    assert_eq!(integer_factor(2.0, TessPartitioning::FractionalOdd), 3);
    assert_eq!(integer_factor(3.0, TessPartitioning::FractionalOdd), 3);
    assert_eq!(integer_factor(63.5, TessPartitioning::FractionalOdd), 63);
    // Even clamps to [2, 64] and rounds up to even.
    assert_eq!(integer_factor(1.0, TessPartitioning::FractionalEven), 2);
    assert_eq!(integer_factor(2.5, TessPartitioning::FractionalEven), 4);
    assert_eq!(integer_factor(4.0, TessPartitioning::FractionalEven), 4);
}

#[test]
fn factor_never_exceeds_declared_max() {
    for declared in 1..=64u32 {
        for partitioning in [
            TessPartitioning::Integer,
            TessPartitioning::Pow2,
            TessPartitioning::FractionalOdd,
            TessPartitioning::FractionalEven,
        ] {
            let (_factor, level) =
                final_max_tess_factor(declared as f32, partitioning, Some(declared));
            assert!(
                level <= declared.max(integer_factor(1.0, partitioning)),
                "declared {declared} {partitioning:?} gave level {level}"
            );
        }
    }
}

#[test]
fn pso_override_lowers_the_declared_factor() {
    let (factor, level) = final_max_tess_factor(64.0, TessPartitioning::Integer, Some(8));
    assert!(level <= 8);
    assert!(factor <= 8.0);

    // Without an override the declared factor stands.
    let (factor, level) = final_max_tess_factor(24.0, TessPartitioning::Integer, None);
    assert_eq!(level, 24);
    assert_eq!(factor, 24.0);
}

#[test]
fn workload_reservation_follows_the_band_formula() {
    // ceil((f-1)/4) bands times the edge count, plus the odd-center row.
    assert_eq!(max_potential_workload_count(1, TessDomain::Triangle), 1);
    assert_eq!(max_potential_workload_count(8, TessDomain::Triangle), 6);
    assert_eq!(max_potential_workload_count(8, TessDomain::Quad), 8);
    assert_eq!(max_potential_workload_count(9, TessDomain::Quad), 9);
    assert_eq!(max_potential_workload_count(9, TessDomain::Isoline), 0);
}

#[test]
fn mesh_vertex_reservation_matches_the_rule() {
    // ((N+2-(N&1))*2+1) with N = factor + 1.
    assert_eq!(reserved_vertex_count(1), 9);
    assert_eq!(reserved_vertex_count(8), 21);
    assert_eq!(reserved_vertex_count(64), 133);
}
