//! Similarity Clustering
//!
//! Greedy agglomerative clustering over memory embeddings by cosine
//! similarity. Each unassigned memory in arrival order seeds a cluster and
//! absorbs later unassigned memories whose similarity to the running
//! centroid meets the threshold; the centroid is the re-normalised mean of
//! member vectors and is recomputed after every absorption.

use serde::Serialize;

use crate::vectors::{cosine_similarity, mean_vector, normalize};

/// Maximum topic length taken from the centroid content.
const TOPIC_MAX_CHARS: usize = 50;

/// One memory entering the clustering pass.
#[derive(Debug, Clone)]
pub struct ClusterItem {
    pub id: String,
    pub content: String,
    pub vector: Vec<f32>,
}

/// A cluster of semantically related memories.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryCluster {
    /// Member memory ids, in arrival order
    pub member_ids: Vec<String>,
    /// The member closest to the final centroid
    pub centroid_id: String,
    /// Mean pairwise cosine similarity among members
    pub avg_similarity: f64,
    /// First 50 characters of the centroid content
    pub topic: String,
    /// Final (re-normalised mean) centroid vector
    #[serde(skip)]
    pub centroid: Vec<f32>,
}

/// Cluster `items` by cosine similarity.
///
/// Clusters smaller than `min_cluster_size` are dropped.
pub fn identify(
    items: &[ClusterItem],
    similarity_threshold: f64,
    min_cluster_size: usize,
) -> Vec<MemoryCluster> {
    let mut assigned = vec![false; items.len()];
    let mut clusters = Vec::new();

    for seed in 0..items.len() {
        if assigned[seed] {
            continue;
        }
        assigned[seed] = true;

        let mut members = vec![seed];
        let mut centroid = items[seed].vector.clone();
        normalize(&mut centroid);

        for candidate in (seed + 1)..items.len() {
            if assigned[candidate] {
                continue;
            }
            if cosine_similarity(&items[candidate].vector, &centroid) >= similarity_threshold {
                assigned[candidate] = true;
                members.push(candidate);

                let member_vectors: Vec<&[f32]> =
                    members.iter().map(|&i| items[i].vector.as_slice()).collect();
                if let Some(mut mean) = mean_vector(&member_vectors) {
                    normalize(&mut mean);
                    centroid = mean;
                }
            }
        }

        if members.len() < min_cluster_size {
            continue;
        }

        let centroid_index = members
            .iter()
            .copied()
            .max_by(|&a, &b| {
                cosine_similarity(&items[a].vector, &centroid)
                    .total_cmp(&cosine_similarity(&items[b].vector, &centroid))
            })
            .unwrap_or(seed);

        clusters.push(MemoryCluster {
            member_ids: members.iter().map(|&i| items[i].id.clone()).collect(),
            centroid_id: items[centroid_index].id.clone(),
            avg_similarity: mean_pairwise_similarity(items, &members),
            topic: truncate_topic(&items[centroid_index].content),
            centroid,
        });
    }

    clusters
}

fn mean_pairwise_similarity(items: &[ClusterItem], members: &[usize]) -> f64 {
    if members.len() < 2 {
        return 1.0;
    }
    let mut sum = 0.0;
    let mut pairs = 0usize;
    for (i, &a) in members.iter().enumerate() {
        for &b in &members[i + 1..] {
            sum += cosine_similarity(&items[a].vector, &items[b].vector);
            pairs += 1;
        }
    }
    sum / pairs as f64
}

fn truncate_topic(content: &str) -> String {
    let truncated: String = content.chars().take(TOPIC_MAX_CHARS).collect();
    if content.chars().count() > TOPIC_MAX_CHARS {
        format!("{truncated}...")
    } else {
        truncated
    }
}
