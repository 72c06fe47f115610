use anyhow::{anyhow, Result as AnyhowResult};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use fm_mapper::{
    Archive, ArchiveSearch, MappedMatch, SearchParameters,
    SelectionParameters,
};

pub fn single_archive(text: &[u8]) -> Archive {
    Archive::from_sequences(
        &[("ref".to_string(), text)],
        false,
        false,
    )
    .expect("test archive builds")
}

/// Run one read end to end; returns the selected matches and the
/// container's complete stratum.
pub fn run_search(
    archive: &Archive,
    params: &SearchParameters,
    selection: &SelectionParameters,
    read: &[u8],
) -> AnyhowResult<(Vec<MappedMatch>, usize)> {
    let mut search = ArchiveSearch::new(archive, params);
    search
        .prepare(read)
        .map_err(|e| anyhow!("preparing {:?}: {e}", String::from_utf8_lossy(read)))?;
    search.search();
    let stratum = search.matches().max_complete_stratum();
    Ok((search.select_matches(selection), stratum))
}

pub fn random_dna(length: usize, seed: u64) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..length).map(|_| b"ACGT"[rng.gen_range(0..4)]).collect()
}

/// Substitute `count` bases of `read`, each to a different base, at
/// deterministic distinct positions.
pub fn mutate(read: &[u8], count: usize, seed: u64) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut out = read.to_vec();
    let mut chosen: Vec<usize> = Vec::new();
    while chosen.len() < count {
        let pos = rng.gen_range(0..out.len());
        if chosen.contains(&pos) {
            continue;
        }
        chosen.push(pos);
        let old = out[pos];
        loop {
            let new = b"ACGT"[rng.gen_range(0..4)];
            if new != old {
                out[pos] = new;
                break;
            }
        }
    }
    out
}

fn scrub_pass(
    text: &mut [u8],
    needle: &[u8],
    keep: Option<usize>,
) -> usize {
    let mut rewrites = 0usize;
    let mut at = 0usize;
    while at + needle.len() <= text.len() {
        if &text[at..at + needle.len()] != needle || Some(at) == keep {
            at += 1;
            continue;
        }
        let mid = at + needle.len() / 2;
        text[mid] = if text[mid] == b'A' { b'C' } else { b'A' };
        rewrites += 1;
    }
    rewrites
}

/// Rewrite the text until none of the needles occur anywhere but at
/// their kept position; a rewrite can spell a new occurrence upstream,
/// so passes repeat to a fixpoint.
pub fn scrub_all(
    text: &mut [u8],
    needles: &[(&[u8], Option<usize>)],
) {
    for round in 0.. {
        assert!(round < 100, "scrubbing did not converge");
        let rewrites: usize = needles
            .iter()
            .map(|(needle, keep)| scrub_pass(text, needle, *keep))
            .sum();
        if rewrites == 0 {
            break;
        }
    }
}

fn base_matches(key: u8, text: u8) -> bool {
    match key {
        b'N' => matches!(text, b'A' | b'C' | b'G' | b'T' | b'N'),
        _ => key == text,
    }
}

/// Plain DP edit distance with the engine's wildcard rule (read N
/// matches any base for free), used to re-check reported distances.
pub fn edit_distance_wild(key: &[u8], text: &[u8]) -> usize {
    let (m, n) = (key.len(), text.len());
    let mut prev: Vec<usize> = (0..=n).collect();
    let mut curr = vec![0usize; n + 1];
    for i in 1..=m {
        curr[0] = i;
        for j in 1..=n {
            let sub = prev[j - 1]
                + usize::from(!base_matches(key[i - 1], text[j - 1]));
            curr[j] = sub.min(prev[j] + 1).min(curr[j - 1] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[n]
}

pub fn revcomp(read: &[u8]) -> Vec<u8> {
    read.iter()
        .rev()
        .map(|b| match b {
            b'A' => b'T',
            b'C' => b'G',
            b'G' => b'C',
            b'T' => b'A',
            other => *other,
        })
        .collect()
}
