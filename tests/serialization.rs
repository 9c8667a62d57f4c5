use ferrule::{
    AngularSimilarity, AnyIndex, ClusterOptions, Database, EuclideanSimilarity, HashSourceOptions,
    IndexOptions, JaccardSimilarity, LshError, LshIndex, Similarity, SimilarityKind,
};
use rand::{rngs::StdRng, SeedableRng};

fn built_index<S: Similarity>(
    dimensions: usize,
    hash_source: HashSourceOptions,
    seed: u64,
) -> anyhow::Result<(LshIndex<S>, Vec<Vec<S::Scalar>>)> {
    let options = IndexOptions {
        hash_source,
        seed: Some(seed),
        ..Default::default()
    };
    let mut index = LshIndex::<S>::new(dimensions, options)?;
    let mut rng = StdRng::seed_from_u64(seed);
    for _ in 0..300 {
        index.insert(&S::random_input(dimensions, &mut rng))?;
    }
    index.rebuild(Some(16))?;
    let queries = (0..10)
        .map(|_| S::random_input(dimensions, &mut rng))
        .collect();
    Ok((index, queries))
}

#[test]
fn round_trips_reproduce_search_results() -> anyhow::Result<()> {
    for hash_source in [
        HashSourceOptions::Independent,
        HashSourceOptions::Pool { pool_size: 256 },
        HashSourceOptions::Tensor,
    ] {
        let (index, queries) = built_index::<AngularSimilarity>(16, hash_source, 1)?;
        let restored = LshIndex::<AngularSimilarity>::deserialize(&index.serialize()?)?;
        assert_eq!(restored.num_tables(), index.num_tables());
        assert_eq!(restored.len(), index.len());
        assert_eq!(
            restored.search_batch(&queries, 5, 0.9, 0.0)?,
            index.search_batch(&queries, 5, 0.9, 0.0)?
        );
    }
    let (index, queries) = built_index::<JaccardSimilarity>(200, HashSourceOptions::Independent, 2)?;
    let restored = LshIndex::<JaccardSimilarity>::deserialize(&index.serialize()?)?;
    assert_eq!(
        restored.search_batch(&queries, 3, 0.9, 0.0)?,
        index.search_batch(&queries, 3, 0.9, 0.0)?
    );
    Ok(())
}

#[test]
fn unbuilt_indexes_round_trip() -> anyhow::Result<()> {
    let mut index = LshIndex::<EuclideanSimilarity>::new(4, IndexOptions::default())?;
    index.insert(&[1.0, 2.0, 3.0, 4.0])?;
    let restored = LshIndex::<EuclideanSimilarity>::deserialize(&index.serialize()?)?;
    assert_eq!(restored.len(), 1);
    assert_eq!(restored.num_tables(), 0);
    assert!(restored.search(&[1.0, 2.0, 3.0, 4.0], 1, 0.9, 0.0)?.is_empty());
    Ok(())
}

#[test]
fn damaged_streams_are_rejected() -> anyhow::Result<()> {
    let (index, _) = built_index::<AngularSimilarity>(16, HashSourceOptions::Independent, 3)?;
    let bytes = index.serialize()?;

    for cut in [0, 4, 10, bytes.len() / 2, bytes.len() - 1] {
        assert!(matches!(
            LshIndex::<AngularSimilarity>::deserialize(&bytes[..cut]),
            Err(LshError::CorruptState(_))
        ));
    }

    let mut bad_magic = bytes.clone();
    bad_magic[0] ^= 0xff;
    assert!(matches!(
        LshIndex::<AngularSimilarity>::deserialize(&bad_magic),
        Err(LshError::CorruptState(_))
    ));

    let mut trailing = bytes.clone();
    trailing.push(0);
    assert!(matches!(
        LshIndex::<AngularSimilarity>::deserialize(&trailing),
        Err(LshError::CorruptState(_))
    ));

    assert!(matches!(
        LshIndex::<EuclideanSimilarity>::deserialize(&bytes),
        Err(LshError::CorruptState(_))
    ));
    Ok(())
}

#[test]
fn any_index_dispatches_on_the_stored_kind() -> anyhow::Result<()> {
    let (index, queries) = built_index::<EuclideanSimilarity>(8, HashSourceOptions::Tensor, 4)?;
    let bytes = index.serialize()?;
    let any = AnyIndex::deserialize(&bytes)?;
    assert_eq!(any.kind(), SimilarityKind::Euclidean);
    assert_eq!(any.serialize()?, bytes);
    for query in &queries {
        assert_eq!(
            any.search(query.as_slice(), 4, 0.9, 0.0)?,
            index.search(query, 4, 0.9, 0.0)?
        );
    }

    let mut created = AnyIndex::create("jaccard", 64, 1 << 22)?;
    created.insert(&[1u32, 5, 9][..])?;
    created.insert(&[2u32, 5, 10][..])?;
    created.rebuild(None)?;
    let restored = AnyIndex::deserialize(&created.serialize()?)?;
    assert_eq!(restored.kind(), SimilarityKind::Jaccard);
    assert_eq!(restored.search(&[1u32, 5, 9][..], 1, 0.9, 0.0)?, vec![0]);
    Ok(())
}

#[test]
fn databases_round_trip() -> anyhow::Result<()> {
    let options = ClusterOptions {
        memory_per_point: 1 << 16,
        index: IndexOptions {
            seed: Some(5),
            ..Default::default()
        },
        ..Default::default()
    };
    let mut database = Database::<AngularSimilarity>::new(16, options)?;
    let mut rng = StdRng::seed_from_u64(5);
    for _ in 0..400 {
        database.insert(&AngularSimilarity::random_input(16, &mut rng))?;
    }
    database.rebuild()?;
    let queries: Vec<Vec<f32>> = (0..10)
        .map(|_| AngularSimilarity::random_input(16, &mut rng))
        .collect();
    let bytes = database.serialize()?;
    let restored = Database::<AngularSimilarity>::deserialize(&bytes)?;
    assert_eq!(restored.clusters(), database.clusters());
    assert_eq!(
        restored.search_batch(&queries, 5, 0.9)?,
        database.search_batch(&queries, 5, 0.9)?
    );
    assert!(LshIndex::<AngularSimilarity>::deserialize(&bytes).is_err());
    assert!(Database::<AngularSimilarity>::deserialize(&bytes[..bytes.len() - 8]).is_err());
    Ok(())
}
