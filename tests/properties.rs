use ferrule::{
    hash::HashFamily,
    index::prefix_map::{PrefixMap, PREFIX_INDEX_BITS, SEGMENT_SIZE},
    AngularSimilarity, EuclideanSimilarity, JaccardSimilarity, Similarity,
};
use proptest::prelude::*;
use std::collections::HashSet;

fn build_map(hash_length: u32, hashes: &[u32], workers: usize) -> PrefixMap {
    let mut map = PrefixMap::new(hash_length, workers).expect("valid hash length");
    for (id, &hash) in hashes.iter().enumerate() {
        map.insert(id, id as u32, hash);
    }
    map.rebuild();
    map
}

fn shares_prefix(a: u32, b: u32, hash_length: u32, prefix_length: u32) -> bool {
    let shift = hash_length - prefix_length;
    prefix_length == 0 || (a >> shift) == (b >> shift)
}

fn map_inputs() -> impl Strategy<Value = (u32, Vec<u32>, u32, usize)> {
    (PREFIX_INDEX_BITS..=24u32).prop_flat_map(|hash_length| {
        let limit = 1u32 << hash_length;
        // draw from a narrow band too, so long shared prefixes are common
        let hash = prop_oneof![0..limit, (limit / 2)..(limit / 2 + 64)];
        (
            Just(hash_length),
            prop::collection::vec(hash.clone(), 0..300),
            hash,
            1..5usize,
        )
    })
}

proptest! {
    #[test]
    fn entries_are_sorted_and_the_prefix_index_bounds_them(
        (hash_length, hashes, _query, workers) in map_inputs()
    ) {
        let map = build_map(hash_length, &hashes, workers);
        let entries: Vec<(u32, u32)> = map.entries().collect();
        prop_assert_eq!(entries.len(), hashes.len());
        prop_assert!(entries.windows(2).all(|pair| pair[0] <= pair[1]));
        let shift = hash_length - PREFIX_INDEX_BITS;
        for prefix in [0usize, 1, 7, 100, 4095, 4096, 8191, 8192] {
            let below = entries
                .iter()
                .filter(|(hash, _)| ((hash >> shift) as usize) < prefix)
                .count();
            prop_assert_eq!(map.prefix_bound(prefix), Some(SEGMENT_SIZE + below));
        }
        map.validate(hashes.len()).expect("rebuilt maps are valid");
    }

    #[test]
    fn widening_returns_exactly_the_points_sharing_each_prefix(
        (hash_length, hashes, query_hash, workers) in map_inputs()
    ) {
        let map = build_map(hash_length, &hashes, workers);
        let mut query = map.create_query(query_hash);
        let mut returned: HashSet<u32> = HashSet::new();
        while !query.is_exhausted() {
            let (left, right) = map.get_next_range(&mut query);
            for &id in left.iter().chain(right) {
                prop_assert!(returned.insert(id), "point {} returned twice", id);
            }
            let prefix_length = query.prefix_length();
            let expected: HashSet<u32> = hashes
                .iter()
                .enumerate()
                .filter(|(_, &hash)| shares_prefix(hash, query_hash, hash_length, prefix_length))
                .map(|(id, _)| id as u32)
                .collect();
            prop_assert_eq!(&returned, &expected);
        }
        prop_assert_eq!(returned.len(), hashes.len());
        let (left, right) = map.get_next_range(&mut query);
        prop_assert!(left.is_empty() && right.is_empty());
    }

    #[test]
    fn collision_probability_grows_with_similarity(
        low in 0.0f32..=1.0,
        high in 0.0f32..=1.0,
        bits in 1u32..=24,
    ) {
        let (low, high) = (low.min(high), low.max(high));
        let angular = AngularSimilarity::hash_family(16);
        let euclidean = EuclideanSimilarity::hash_family(16);
        let jaccard = JaccardSimilarity::hash_family(256);
        for (low_probability, high_probability) in [
            (angular.collision_probability(low, bits), angular.collision_probability(high, bits)),
            (euclidean.collision_probability(low, bits), euclidean.collision_probability(high, bits)),
            (jaccard.collision_probability(low, bits), jaccard.collision_probability(high, bits)),
        ] {
            prop_assert!((0.0..=1.0).contains(&low_probability));
            prop_assert!(low_probability <= high_probability + 1e-6);
        }
    }

    #[test]
    fn collision_probability_shrinks_with_more_bits(
        similarity in 0.0f32..=1.0,
        bits in 1u32..24,
    ) {
        let angular = AngularSimilarity::hash_family(16);
        let jaccard = JaccardSimilarity::hash_family(256);
        prop_assert!(
            angular.collision_probability(similarity, bits + 1)
                <= angular.collision_probability(similarity, bits) + 1e-6
        );
        prop_assert!(
            jaccard.collision_probability(similarity, bits + 1)
                <= jaccard.collision_probability(similarity, bits) + 1e-6
        );
    }
}
