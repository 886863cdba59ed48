use papergraph_common::{
    models::{CandidatePair, PaperNode},
    store::{EmbeddingField, GraphStore},
    Result,
};
use std::collections::BTreeSet;

/// Candidate pairs from each paper's nearest problem-embedding neighbours.
///
/// Pairs point from the earlier paper to the later one when both years are
/// known and differ, otherwise by ascending id. Each unordered pair appears
/// at most once.
pub async fn nearest_neighbor_pairs(
    store: &dyn GraphStore,
    papers: &[PaperNode],
    neighbors_per_paper: usize,
) -> Result<Vec<CandidatePair>> {
    let mut pairs = BTreeSet::new();
    if neighbors_per_paper == 0 {
        return Ok(Vec::new());
    }

    for paper in papers {
        let Some(vector) = paper.embedding(EmbeddingField::Problem) else {
            continue;
        };
        let hits = store
            .vector_search(EmbeddingField::Problem, vector, neighbors_per_paper + 1)
            .await?;

        for (neighbor, _) in hits
            .iter()
            .filter(|(n, _)| n.id != paper.id)
            .take(neighbors_per_paper)
        {
            pairs.insert(orient(paper, neighbor));
        }
    }

    Ok(pairs.into_iter().collect())
}

fn orient(a: &PaperNode, b: &PaperNode) -> CandidatePair {
    let a_first = match (a.year, b.year) {
        (Some(ya), Some(yb)) if ya != yb => ya < yb,
        _ => a.id < b.id,
    };
    if a_first {
        CandidatePair::new(a.id.clone(), b.id.clone())
    } else {
        CandidatePair::new(b.id.clone(), a.id.clone())
    }
}
