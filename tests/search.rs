use ferrule::{
    AngularSimilarity, DistanceCounter, EuclideanSimilarity, HashSourceOptions, IndexOptions,
    IndexState, JaccardSimilarity, LshIndex, Similarity,
};
use rand::{rngs::StdRng, SeedableRng};

fn options(seed: u64) -> IndexOptions {
    IndexOptions {
        seed: Some(seed),
        ..Default::default()
    }
}

fn random_index<S: Similarity>(
    dimensions: usize,
    len: usize,
    options: IndexOptions,
    seed: u64,
) -> anyhow::Result<LshIndex<S>> {
    let mut index = LshIndex::<S>::new(dimensions, options)?;
    let mut rng = StdRng::seed_from_u64(seed);
    for _ in 0..len {
        index.insert(&S::random_input(dimensions, &mut rng))?;
    }
    Ok(index)
}

#[test]
fn stored_point_is_its_own_nearest_neighbour() -> anyhow::Result<()> {
    let mut rng = StdRng::seed_from_u64(42);
    let points: Vec<Vec<f32>> = (0..1000)
        .map(|_| AngularSimilarity::random_input(64, &mut rng))
        .collect();
    let mut index = LshIndex::<AngularSimilarity>::new(64, options(1))?;
    for point in &points {
        index.insert(point)?;
    }
    index.rebuild(Some(20))?;
    assert_eq!(index.num_tables(), 20);
    let results = index.search_with_similarities(&points[42], 1, 0.99, 0.0)?;
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].0, 42);
    assert!((results[0].1 - 1.0).abs() < 1e-5);
    Ok(())
}

#[test]
fn empty_indexes_return_nothing() -> anyhow::Result<()> {
    let mut index = LshIndex::<AngularSimilarity>::new(8, options(2))?;
    let query = vec![1.0; 8];
    assert_eq!(index.state(), IndexState::Empty);
    assert!(index.search(&query, 5, 0.9, 0.0)?.is_empty());
    index.rebuild(Some(4))?;
    assert_eq!(index.state(), IndexState::Built);
    assert!(index.search(&query, 5, 0.9, 0.0)?.is_empty());
    Ok(())
}

#[test]
fn invalid_searches_are_rejected() -> anyhow::Result<()> {
    let mut index = random_index::<EuclideanSimilarity>(4, 20, options(3), 3)?;
    index.rebuild(Some(4))?;
    let query = vec![0.0; 4];
    assert!(index.search(&query, 0, 0.9, 0.0).is_err());
    assert!(index.search(&query, 1, 0.0, 0.0).is_err());
    assert!(index.search(&query, 1, 1.5, 0.0).is_err());
    assert!(index.search(&[0.0; 3], 1, 0.9, 0.0).is_err());
    Ok(())
}

/// The fraction of true `k` nearest neighbours found over random queries.
fn average_recall<S: Similarity>(
    dimensions: usize,
    hash_source: HashSourceOptions,
    seed: u64,
) -> anyhow::Result<f32> {
    let k = 10;
    let options = IndexOptions {
        hash_source,
        seed: Some(seed),
        ..Default::default()
    };
    let mut index = random_index::<S>(dimensions, 2000, options, seed)?;
    index.rebuild(Some(32))?;
    let dataset = index.dataset();
    let mut rng = StdRng::seed_from_u64(seed + 100);
    let mut found = 0;
    let queries = 50;
    for _ in 0..queries {
        let query = S::random_input(dimensions, &mut rng);
        let prepared = dataset.prepare(&query)?;
        let mut exact: Vec<(u32, f32)> = (0..dataset.len() as u32)
            .map(|id| Ok((id, dataset.similarity_to(&prepared, id)?)))
            .collect::<ferrule::Result<_>>()?;
        exact.sort_by(|a, b| b.1.total_cmp(&a.1));
        let results = index.search(&query, k, 0.9, 0.0)?;
        assert!(results.len() <= k);
        found += exact[..k]
            .iter()
            .filter(|(id, _)| results.contains(id))
            .count();
    }
    Ok(found as f32 / (queries * k) as f32)
}

#[test]
fn recall_target_is_met_on_average() -> anyhow::Result<()> {
    for (seed, hash_source) in [
        HashSourceOptions::Independent,
        HashSourceOptions::pool(),
        HashSourceOptions::Tensor,
    ]
    .into_iter()
    .enumerate()
    {
        let seed = seed as u64 * 3 + 4;
        let angular = average_recall::<AngularSimilarity>(32, hash_source, seed)?;
        assert!(angular >= 0.8, "angular {hash_source:?}: recall was {angular}");
        let euclidean = average_recall::<EuclideanSimilarity>(16, hash_source, seed + 1)?;
        assert!(euclidean >= 0.8, "euclidean {hash_source:?}: recall was {euclidean}");
        let jaccard = average_recall::<JaccardSimilarity>(500, hash_source, seed + 2)?;
        assert!(jaccard >= 0.8, "jaccard {hash_source:?}: recall was {jaccard}");
    }
    Ok(())
}

#[test]
fn results_are_ordered_and_distinct() -> anyhow::Result<()> {
    let mut index = random_index::<EuclideanSimilarity>(16, 500, options(5), 5)?;
    index.rebuild(None)?;
    let query = vec![0.0; 16];
    let results = index.search_with_similarities(&query, 20, 0.9, 0.0)?;
    assert_eq!(results.len(), 20);
    assert!(results.windows(2).all(|pair| pair[0].1 >= pair[1].1));
    let mut ids: Vec<u32> = results.iter().map(|(id, _)| *id).collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 20);
    Ok(())
}

#[test]
fn inserted_points_become_searchable_after_rebuild() -> anyhow::Result<()> {
    let mut index = random_index::<AngularSimilarity>(24, 200, options(6), 6)?;
    index.rebuild(Some(16))?;
    let mut rng = StdRng::seed_from_u64(66);
    let late = AngularSimilarity::random_input(24, &mut rng);
    let id = index.insert(&late)?;
    assert_eq!(id, 200);
    assert_eq!(index.state(), IndexState::Inserting);
    assert!(!index.search(&late, 1, 0.9, 0.0)?.contains(&id));
    index.rebuild(Some(16))?;
    assert_eq!(index.state(), IndexState::Built);
    assert_eq!(index.search(&late, 1, 0.9, 0.0)?, vec![id]);
    Ok(())
}

#[test]
fn every_hash_source_finds_stored_points() -> anyhow::Result<()> {
    for hash_source in [
        HashSourceOptions::Independent,
        HashSourceOptions::pool(),
        HashSourceOptions::Tensor,
    ] {
        let options = IndexOptions {
            hash_source,
            seed: Some(7),
            ..Default::default()
        };
        let mut index = random_index::<AngularSimilarity>(32, 500, options, 7)?;
        index.rebuild(Some(25))?;
        let query = index.dataset().point(123).to_vec();
        let results = index.search_with_similarities(&query, 1, 0.95, 0.0)?;
        assert_eq!(results[0].0, 123, "{hash_source:?}");
    }
    Ok(())
}

#[test]
fn sketches_can_be_disabled() -> anyhow::Result<()> {
    let options = IndexOptions {
        sketches: false,
        seed: Some(8),
        ..Default::default()
    };
    let mut rng = StdRng::seed_from_u64(8);
    let points: Vec<Vec<f32>> = (0..300)
        .map(|_| AngularSimilarity::random_input(16, &mut rng))
        .collect();
    let mut index = LshIndex::<AngularSimilarity>::new(16, options)?;
    for point in &points {
        index.insert(point)?;
    }
    index.rebuild(Some(10))?;
    assert_eq!(index.search(&points[77], 1, 0.9, 0.0)?, vec![77]);
    Ok(())
}

#[test]
fn jaccard_sets_are_searchable() -> anyhow::Result<()> {
    let mut rng = StdRng::seed_from_u64(9);
    let sets: Vec<Vec<u32>> = (0..300)
        .map(|_| JaccardSimilarity::random_input(1000, &mut rng))
        .collect();
    let mut index = LshIndex::<JaccardSimilarity>::new(1000, options(9))?;
    for set in &sets {
        index.insert(set)?;
    }
    index.rebuild(Some(20))?;
    let results = index.search_with_similarities(&sets[17], 1, 0.9, 0.0)?;
    assert_eq!(results[0].0, 17);
    assert!((results[0].1 - 1.0).abs() < 1e-6);
    assert!(index.insert(&[1000]).is_err());
    Ok(())
}

#[test]
fn euclidean_points_are_searchable() -> anyhow::Result<()> {
    let mut rng = StdRng::seed_from_u64(10);
    let points: Vec<Vec<f32>> = (0..500)
        .map(|_| EuclideanSimilarity::random_input(16, &mut rng))
        .collect();
    let mut index = LshIndex::<EuclideanSimilarity>::new(16, options(10))?;
    for point in &points {
        index.insert(point)?;
    }
    index.rebuild(Some(20))?;
    let results = index.search_with_similarities(&points[9], 1, 0.9, 0.0)?;
    assert_eq!(results[0].0, 9);
    assert!((results[0].1 - 1.0).abs() < 1e-6);
    Ok(())
}

#[test]
fn seeded_indexes_are_reproducible() -> anyhow::Result<()> {
    let mut first = random_index::<AngularSimilarity>(16, 400, options(11), 11)?;
    let mut second = random_index::<AngularSimilarity>(16, 400, options(11), 11)?;
    first.rebuild(Some(12))?;
    second.rebuild(Some(12))?;
    let mut rng = StdRng::seed_from_u64(111);
    let queries: Vec<Vec<f32>> = (0..20)
        .map(|_| AngularSimilarity::random_input(16, &mut rng))
        .collect();
    assert_eq!(
        first.search_batch(&queries, 5, 0.9, 0.0)?,
        second.search_batch(&queries, 5, 0.9, 0.0)?
    );
    for (query, batched) in queries.iter().zip(first.search_batch(&queries, 5, 0.9, 0.0)?) {
        assert_eq!(first.search(query, 5, 0.9, 0.0)?, batched);
    }
    Ok(())
}

#[test]
fn memory_limits_bound_the_table_count() -> anyhow::Result<()> {
    let mut small = random_index::<EuclideanSimilarity>(8, 1000, options(12), 12)?;
    let small_limit = LshIndex::<EuclideanSimilarity>::estimate_memory(8, small.options(), 1000, 5);
    let mut small_options = *small.options();
    small_options.memory_limit = small_limit;
    small = LshIndex::from_dataset(small.dataset().clone(), small_options)?;
    let memory = small.rebuild(None)?;
    assert_eq!(small.num_tables(), 5);
    assert!(memory <= small_limit);

    let mut starved = LshIndex::<EuclideanSimilarity>::from_dataset(
        small.dataset().clone(),
        IndexOptions {
            memory_limit: 64,
            ..small_options
        },
    )?;
    assert!(matches!(
        starved.rebuild(None),
        Err(ferrule::LshError::ResourceExhausted(_))
    ));
    Ok(())
}

#[test]
fn extreme_coordinates_can_be_indexed() -> anyhow::Result<()> {
    let mut index = LshIndex::<EuclideanSimilarity>::new(4, options(14))?;
    index.insert(&[3.0e38, 3.0e38, -3.0e38, 3.0e38])?;
    index.insert(&[-3.0e38, -3.0e38, 3.0e38, -3.0e38])?;
    index.insert(&[1.0, 2.0, 3.0, 4.0])?;
    index.rebuild(Some(4))?;
    assert_eq!(index.state(), IndexState::Built);
    assert_eq!(index.num_tables(), 4);
    Ok(())
}

#[test]
fn searches_report_distance_computations() -> anyhow::Result<()> {
    let counter = DistanceCounter::new();
    let mut index = random_index::<AngularSimilarity>(16, 200, options(13), 13)?.with_counter(counter.clone());
    index.rebuild(Some(8))?;
    assert_eq!(counter.get(), 0);
    let query = index.dataset().point(3).to_vec();
    index.search(&query, 3, 0.9, 0.0)?;
    assert!(counter.get() > 0);
    counter.clear();
    assert_eq!(counter.get(), 0);
    Ok(())
}
