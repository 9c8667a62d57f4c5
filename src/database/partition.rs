use crate::dataset::Dataset;
use crate::distance::Similarity;
use crate::error::{LshError, Result};
use rand::{seq::index::sample as sample_indices, Rng};
use rayon::iter::{
    IndexedParallelIterator, IntoParallelIterator, IntoParallelRefIterator,
    IntoParallelRefMutIterator, ParallelIterator,
};
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
/// A division of a dataset into clusters around chosen center points.
pub struct Partition {
    /// The point at the center of each cluster.
    pub centers: Vec<u32>,
    /// The members of each cluster, in ascending order.
    pub members: Vec<Vec<u32>>,
    /// The largest distance from each center to one of its members.
    pub radii: Vec<f32>,
}

/// Choose centers by repeatedly taking the point farthest from every center chosen so far.
///
/// # Arguments
///
/// * `dataset` - The points to choose from.
///
/// * `candidates` - The ids centers may be chosen among; the first one is the first center.
///
/// * `num_centers` - The maximum number of centers.
///
/// # Returns
///
/// Up to `num_centers` distinct ids; fewer when every remaining candidate coincides with a center.
pub fn greedy_minimum_maximum<S: Similarity>(
    dataset: &Dataset<S>,
    candidates: &[u32],
    num_centers: usize,
) -> Result<Vec<u32>> {
    let Some(&first) = candidates.first() else {
        return Ok(Vec::new());
    };
    if num_centers == 0 {
        return Ok(Vec::new());
    }
    let mut centers = vec![first];
    let mut nearest: Vec<f32> = candidates
        .par_iter()
        .map(|&id| dataset.distance(first, id))
        .collect::<Result<_>>()?;
    while centers.len() < num_centers {
        let farthest = nearest
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1));
        let Some((position, &distance)) = farthest else {
            break;
        };
        if distance <= 0.0 {
            break;
        }
        let center = candidates[position];
        centers.push(center);
        nearest
            .par_iter_mut()
            .zip(candidates.par_iter())
            .try_for_each(|(nearest, &id)| {
                *nearest = nearest.min(dataset.distance(center, id)?);
                Ok::<_, LshError>(())
            })?;
    }
    Ok(centers)
}

/// Assign every point to its nearest center; each center belongs to its own cluster.
///
/// # Arguments
///
/// * `dataset` - The points to assign.
///
/// * `centers` - Distinct ids of the cluster centers.
///
/// # Returns
///
/// The resulting partition; clusters left without members are dropped.
pub fn assign<S: Similarity>(dataset: &Dataset<S>, centers: &[u32]) -> Result<Partition> {
    let own_cluster: HashMap<u32, usize> = centers
        .iter()
        .enumerate()
        .map(|(cluster, &center)| (center, cluster))
        .collect();
    let assignments: Vec<(usize, f32)> = (0..dataset.len() as u32)
        .into_par_iter()
        .map(|id| {
            if let Some(&cluster) = own_cluster.get(&id) {
                return Ok((cluster, 0.0));
            }
            let mut best = (0, f32::INFINITY);
            for (cluster, &center) in centers.iter().enumerate() {
                let distance = dataset.distance(center, id)?;
                if distance < best.1 {
                    best = (cluster, distance);
                }
            }
            Ok(best)
        })
        .collect::<Result<_>>()?;

    let mut members = vec![Vec::new(); centers.len()];
    let mut radii = vec![0.0f32; centers.len()];
    for (id, (cluster, distance)) in assignments.into_iter().enumerate() {
        members[cluster].push(id as u32);
        radii[cluster] = radii[cluster].max(distance);
    }
    let (mut kept_centers, mut kept_members, mut kept_radii) = (Vec::new(), Vec::new(), Vec::new());
    for ((center, members), radius) in centers.iter().zip(members).zip(radii) {
        if !members.is_empty() {
            kept_centers.push(*center);
            kept_members.push(members);
            kept_radii.push(radius);
        }
    }
    Ok(Partition {
        centers: kept_centers,
        members: kept_members,
        radii: kept_radii,
    })
}

/// Partition a dataset into at most `num_clusters` clusters, choosing centers from a random sample.
///
/// # Arguments
///
/// * `dataset` - The points to partition.
///
/// * `num_clusters` - The maximum number of clusters.
///
/// * `sample_size` - The number of points centers are chosen among.
///
/// * `rng` - The source of randomness for the sample.
pub fn partition<S: Similarity, R: Rng + ?Sized>(
    dataset: &Dataset<S>,
    num_clusters: usize,
    sample_size: usize,
    rng: &mut R,
) -> Result<Partition> {
    let len = dataset.len();
    let sample: Vec<u32> = sample_indices(rng, len, sample_size.min(len))
        .into_iter()
        .map(|id| id as u32)
        .collect();
    let centers = greedy_minimum_maximum(dataset, &sample, num_clusters)?;
    let partition = assign(dataset, &centers)?;
    debug!(
        points = len,
        sampled = sample.len(),
        clusters = partition.centers.len(),
        "partitioned points"
    );
    Ok(partition)
}
