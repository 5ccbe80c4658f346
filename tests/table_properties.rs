//! Property tests for the exponential table.

use mocsim_rs::ExpTable;
use proptest::prelude::*;

proptest! {
    #[test]
    fn interpolation_tracks_exponential(x in 0.0f32..9.9) {
        let table = ExpTable::default();
        let exact = 1.0 - (-x).exp();
        prop_assert!((table.interpolate(x) - exact).abs() < 1e-3);
    }

    #[test]
    fn saturates_beyond_domain(extra in 0.0f32..1.0e6) {
        let table = ExpTable::default();
        prop_assert_eq!(table.interpolate(table.max_val() + extra), 1.0);
    }

    #[test]
    fn interpolation_is_pure(x in 0.0f32..20.0) {
        let table = ExpTable::default();
        prop_assert_eq!(table.interpolate(x).to_bits(), table.interpolate(x).to_bits());
    }

    #[test]
    fn finer_tables_stay_accurate(n in 50usize..2000, x in 0.0f32..9.0) {
        let table = ExpTable::with_segments(n, 10.0);
        let exact = 1.0 - (-x).exp();
        // tangent-line error bound dx²/8 plus f32 slack
        let dx = table.dx();
        prop_assert!((table.interpolate(x) - exact).abs() <= dx * dx / 8.0 + 1e-5);
    }
}
