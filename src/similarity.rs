//! Pure scoring over a fixed set of vectors.

use std::cmp::Ordering;

use ndarray::ArrayView1;
use rustc_hash::FxHashMap;
use tracing::warn;

use crate::document::{Document, QueryResult};
use crate::error::{RagError, Result};

/// Cosine of the angle between `a` and `b`; 0 when the lengths differ,
/// either has zero norm, or a component is NaN.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let a = ArrayView1::from(a);
    let b = ArrayView1::from(b);
    let dot_product = a.dot(&b);
    let norm_a = a.dot(&a).sqrt();
    let norm_b = b.dot(&b).sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    let similarity = dot_product / (norm_a * norm_b);
    if similarity.is_nan() { 0.0 } else { similarity }
}

/// Scores every document that has a vector, in descending score order.
///
/// The sort is stable over `documents`, so equal scores keep corpus order.
/// Vectors whose dimension differs from the query are skipped.
pub fn rank(
    documents: &[Document],
    vectors: &FxHashMap<&str, &[f32]>,
    query: &[f32],
) -> Vec<QueryResult> {
    let mut scored: Vec<QueryResult> = documents
        .iter()
        .filter_map(|doc| {
            let vector = vectors.get(doc.id.as_str())?;
            if vector.len() != query.len() {
                warn!(
                    document_id = %doc.id,
                    expected = query.len(),
                    found = vector.len(),
                    "skipping embedding with mismatched dimension"
                );
                return None;
            }
            Some(QueryResult {
                document_id: doc.id.clone(),
                score: cosine_similarity(vector, query),
            })
        })
        .collect();

    scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
    scored
}

/// Records the first non-empty dimension seen and rejects any that differ.
pub(crate) fn check_dimensions(expected: &mut Option<usize>, id: &str, found: usize) -> Result<()> {
    match *expected {
        _ if found == 0 => Err(RagError::provider(format!("empty embedding for {}", id))),
        None => {
            *expected = Some(found);
            Ok(())
        }
        Some(d) if d != found => Err(RagError::provider(format!(
            "embedding for {} has {} dimensions, expected {}",
            id, found, d
        ))),
        Some(_) => Ok(()),
    }
}
