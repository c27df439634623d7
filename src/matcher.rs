use serde::Serialize;

use crate::{storage::Gallery, Embedding};

/// Score reported when nothing was scanned. Below any attainable cosine.
pub const NO_MATCH_SCORE: f32 = -2.0;

pub const UNKNOWN: &str = "unknown";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    pub best_name: String,
    pub best_score: f32,
    pub matched: bool,
}

/// Nearest enrolled sample to `probe` by cosine similarity.
///
/// Scans every (name, embedding) pair. The first pair reaching the top score
/// wins, so exact ties go to the lexicographically smallest name and then to
/// the earliest enrolled sample. An empty gallery yields `"unknown"` with
/// [`NO_MATCH_SCORE`]; callers should reject an empty store before calling.
pub fn best_match(gallery: &Gallery, probe: &Embedding, threshold: f32) -> MatchResult {
    let mut best_name = UNKNOWN;
    let mut best_score = NO_MATCH_SCORE;

    for (name, samples) in gallery.iter() {
        for sample in samples {
            let score = match_embedding(sample, probe);
            if score > best_score {
                best_score = score;
                best_name = name;
            }
        }
    }

    MatchResult {
        best_name: best_name.to_string(),
        best_score,
        matched: best_score >= threshold,
    }
}

pub fn match_embedding(a: &Embedding, b: &Embedding) -> f32 {
    facegate_vision::face::match_embedding(a, b)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(v: &[f32]) -> Embedding {
        Embedding::normalized(v.to_vec())
    }

    #[test]
    fn test_self_match() {
        let q = unit(&[0.2, -0.4, 0.8, 0.1]);
        let mut gallery = Gallery::new();
        gallery.push("alice", q.clone());

        let r = best_match(&gallery, &q, 0.55);
        assert_eq!(r.best_name, "alice");
        assert!((r.best_score - 1.0).abs() < 1e-5);
        assert!(r.matched);
    }

    #[test]
    fn test_empty_gallery_sentinel() {
        let r = best_match(&Gallery::new(), &unit(&[1.0, 0.0]), 0.55);
        assert_eq!(r.best_name, UNKNOWN);
        assert_eq!(r.best_score, NO_MATCH_SCORE);
        assert!(r.best_score < -1.0);
        assert!(!r.matched);
    }

    #[test]
    fn test_picks_nearest_across_identities() {
        let mut gallery = Gallery::new();
        gallery.push("alice", unit(&[1.0, 0.0, 0.0]));
        gallery.push("bob", unit(&[0.0, 1.0, 0.0]));
        gallery.push("bob", unit(&[0.0, 0.6, 0.8]));

        let r = best_match(&gallery, &unit(&[0.0, 0.5, 0.9]), 0.55);
        assert_eq!(r.best_name, "bob");
        assert!(r.matched);
    }

    #[test]
    fn test_below_threshold_reports_best_anyway() {
        let mut gallery = Gallery::new();
        gallery.push("alice", unit(&[1.0, 0.0]));

        let r = best_match(&gallery, &unit(&[1.0, 1.5]), 0.9);
        assert_eq!(r.best_name, "alice");
        assert!(r.best_score > 0.0);
        assert!(!r.matched);
    }

    #[test]
    fn test_tie_goes_to_smallest_name() {
        let shared = unit(&[0.3, 0.4]);
        let mut gallery = Gallery::new();
        gallery.push("zoe", shared.clone());
        gallery.push("adam", shared.clone());
        gallery.push("mia", shared.clone());

        let r = best_match(&gallery, &shared, 0.5);
        assert_eq!(r.best_name, "adam");
    }

    #[test]
    fn test_identity_without_samples_is_skipped() {
        let mut gallery = Gallery::new();
        gallery.ensure("ghost");
        let r = best_match(&gallery, &unit(&[1.0]), 0.5);
        assert_eq!(r.best_name, UNKNOWN);
        assert_eq!(r.best_score, NO_MATCH_SCORE);
    }
}
