//! End-to-end clustering behaviour through the public index API.

use std::collections::HashSet;

use nornic_search::gpu::{Accelerator, BackendKind};
use nornic_search::{ClusterIndex, KMeansConfig};

use crate::common::{blob, random_vectors};

fn index_with(vectors: &[Vec<f32>], config: KMeansConfig) -> ClusterIndex {
    let accelerator = Accelerator::from_config(BackendKind::Auto, 0).unwrap();
    let index = ClusterIndex::with_accelerator(config, accelerator).with_seed(42);
    for (i, v) in vectors.iter().enumerate() {
        index.add(&format!("v{i}"), v).unwrap();
    }
    index
}

#[test]
fn test_hundred_vectors_into_five_clusters() {
    let index = index_with(
        &random_vectors(100, 64, 1),
        KMeansConfig {
            num_clusters: 5,
            ..KMeansConfig::default()
        },
    );
    index.cluster().unwrap();

    let stats = index.stats();
    assert_eq!(index.num_clusters(), 5);
    assert_eq!(stats.embedding_count, 100);

    let all: Vec<usize> = (0..5).collect();
    let members = index.get_cluster_members(&all).unwrap();
    assert_eq!(members.len(), 100);
    let unique: HashSet<&String> = members.iter().collect();
    assert_eq!(unique.len(), 100);
}

#[test]
fn test_tight_groups_route_to_their_centroid() {
    let mut vectors = Vec::new();
    for axis in 0..3 {
        vectors.extend(blob(axis * 20, 64, 10, 0.05, axis as u64));
    }
    let index = index_with(
        &vectors,
        KMeansConfig {
            num_clusters: 3,
            ..KMeansConfig::default()
        },
    );
    index.cluster().unwrap();

    // Members of group 0 are v0..v9.
    let home = index.find_nearest_centroid(&vectors[0]).unwrap();
    let probes = blob(0, 64, 100, 0.05, 99);
    let hits = probes
        .iter()
        .filter(|p| index.find_nearest_centroid(p) == Some(home))
        .count();
    assert!(hits >= 95, "only {hits}/100 probes reached cluster {home}");

    let members = index.get_cluster_members(&[home]).unwrap();
    assert!(members.contains(&"v3".to_string()));
}

#[test]
fn test_drift_triggers_recluster() {
    let vectors = random_vectors(100, 16, 5);
    let index = index_with(
        &vectors,
        KMeansConfig {
            num_clusters: 4,
            ..KMeansConfig::default()
        },
    );
    index.cluster().unwrap();
    assert!(!index.should_recluster());

    let replacements = random_vectors(15, 16, 6);
    for (i, v) in replacements.iter().enumerate() {
        index.on_node_update(&format!("v{i}"), v).unwrap();
    }
    assert!(index.should_recluster());
    assert_eq!(index.len(), 100);

    index.cluster().unwrap();
    assert!(!index.should_recluster());
}

#[test]
fn test_more_clusters_than_points() {
    let index = index_with(
        &random_vectors(6, 8, 9),
        KMeansConfig {
            num_clusters: 50,
            ..KMeansConfig::default()
        },
    );
    index.cluster().unwrap();
    assert_eq!(index.num_clusters(), 6);
}

#[test]
fn test_unclustered_probe_equals_exact_search() {
    let vectors = random_vectors(64, 12, 21);
    let index = index_with(&vectors, KMeansConfig::default());

    let exact = index.search(&vectors[5], 8).unwrap();
    let probed = index.search_with_clusters(&vectors[5], 8, 1).unwrap();
    assert_eq!(exact, probed);
    assert_eq!(exact.len(), 8);
}
