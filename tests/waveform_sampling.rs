//! Property tests for waveform sampling.

use mesh_couple::waveform::Waveform;
use proptest::prelude::*;

proptest! {
    /// Linear interpolation stays inside the hull of its two samples and
    /// hits them exactly at the window bounds.
    #[test]
    fn linear_sampling_is_bounded(
        start in -1e6f64..1e6,
        end in -1e6f64..1e6,
        t in 0.0f64..=1.0,
    ) {
        let mut w = Waveform::new(1);
        w.initialize(&[start]);
        w.store(&[end]);
        let v = w.sample(t)[0];
        let (lo, hi) = if start <= end { (start, end) } else { (end, start) };
        prop_assert!(v >= lo - 1e-9 && v <= hi + 1e-9);
        prop_assert!((w.sample(0.0)[0] - start).abs() <= 1e-9 * start.abs().max(1.0));
        prop_assert!((w.sample(1.0)[0] - end).abs() <= 1e-9 * end.abs().max(1.0));
    }

    /// Rotation keeps the invariant that the new window starts where the
    /// old one ended, for any sample sequence.
    #[test]
    fn rotation_chains_windows(samples in proptest::collection::vec(-1e3f64..1e3, 1..8)) {
        let mut w = Waveform::new(1);
        w.initialize(&[0.0]);
        let mut last = 0.0;
        for s in samples {
            w.store(&[s]);
            w.move_to_next_window();
            prop_assert_eq!(w.sample(0.0)[0], s);
            last = s;
        }
        prop_assert_eq!(w.sample(1.0)[0], last);
    }

    /// Order zero ignores the sampling position entirely.
    #[test]
    fn order_zero_is_flat(value in -1e3f64..1e3, t in 0.0f64..=1.0) {
        let mut w = Waveform::new(0);
        w.initialize(&[value]);
        prop_assert_eq!(w.sample(t)[0], value);
    }
}
