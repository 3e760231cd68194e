use super::*;
use crate::foundation::core::Rgba;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn random_records(n: usize, seed: u64) -> Vec<FragmentRecord> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| {
            // few distinct depths so ties are common
            let depth = rng.gen_range(0..6) as f32;
            let c = rng.gen_range(0..4) as f32 / 4.0;
            FragmentRecord::new(depth, Rgba::new(c, 1.0 - c, 0.5, 0.5))
        })
        .collect()
}

#[test]
fn all_algorithms_agree_including_ties() {
    for (n, seed) in [(0, 1), (1, 2), (7, 3), (33, 4), (300, 5), (1000, 6)] {
        let input = random_records(n, seed);
        let mut expected = input.clone();
        expected.sort_by(|a, b| a.total_cmp(b));
        for alg in SortAlgorithm::ALL {
            let mut v = input.clone();
            sort_records(alg, &mut v);
            assert_eq!(v, expected, "{} n={n}", alg.name());
        }
    }
}

#[test]
fn farthest_index_uses_total_order() {
    let v = vec![
        FragmentRecord::new(2.0, Rgba::new(0.1, 0.0, 0.0, 1.0)),
        FragmentRecord::new(2.0, Rgba::new(0.4, 0.0, 0.0, 1.0)),
        FragmentRecord::new(1.0, Rgba::new(0.9, 0.0, 0.0, 1.0)),
    ];
    assert_eq!(farthest_index(&v), Some(1));
    assert_eq!(farthest_index(&[]), None);
}
