use similar_asserts::assert_eq;

use fm_mapper::{
    cigar_string, ErrorLimit, LocalAlignmentPolicy, MappingMode,
    SearchParameters, SelectionParameters, Strand,
};

mod common;
use common::{
    edit_distance_wild, mutate, random_dna, revcomp, run_search,
    scrub_all, single_archive,
};

fn params_with(max_error: usize) -> SearchParameters {
    let mut params = SearchParameters::default();
    params.max_error = ErrorLimit::Bases(max_error);
    params
}

#[test]
fn test_exact_pattern_three_occurrences() {
    let archive = single_archive(b"ACGTACGTACGT");
    let params = params_with(0);
    let (matches, _) = run_search(
        &archive,
        &params,
        &SelectionParameters::default(),
        b"ACGT",
    )
    .unwrap();
    assert_eq!(matches.len(), 3);
    let positions =
        matches.iter().map(|m| m.position).collect::<Vec<usize>>();
    assert_eq!(positions, vec![0, 4, 8]);
    for m in &matches {
        assert_eq!(m.distance, 0);
        assert_eq!(m.strand, Strand::Forward);
        assert_eq!(cigar_string(&m.cigar), "4=");
    }
}

#[test]
fn test_one_substitution_occurrences() {
    let archive = single_archive(b"ACGTACGT");
    let params = params_with(1);
    let (matches, _) = run_search(
        &archive,
        &params,
        &SelectionParameters::default(),
        b"ACCT",
    )
    .unwrap();
    let forward = matches
        .iter()
        .filter(|m| m.strand == Strand::Forward)
        .collect::<Vec<_>>();
    assert_eq!(forward.len(), 2);
    let positions =
        forward.iter().map(|m| m.position).collect::<Vec<usize>>();
    assert_eq!(positions, vec![0, 4]);
    for m in &forward {
        assert_eq!(m.distance, 1);
        assert_eq!(cigar_string(&m.cigar), "2=1X1=");
    }
}

#[test]
fn test_wildcard_pattern_matches_free() {
    let archive = single_archive(b"AAAAAAAAAA");
    let params = params_with(0);
    let (matches, _) = run_search(
        &archive,
        &params,
        &SelectionParameters::default(),
        b"AANAA",
    )
    .unwrap();
    assert_eq!(matches.len(), 6);
    let positions =
        matches.iter().map(|m| m.position).collect::<Vec<usize>>();
    assert_eq!(positions, vec![0, 1, 2, 3, 4, 5]);
    for m in &matches {
        assert_eq!(m.distance, 0);
        assert_eq!(m.strand, Strand::Forward);
    }
}

#[test]
fn test_planted_occurrence_in_large_reference() {
    let mut text = random_dna(1_000_000, 17);
    text.splice(500_000..500_007, b"GATTACA".iter().copied());
    scrub_all(
        &mut text,
        &[(b"GATTACA", Some(500_000)), (b"TGTAATC", None)],
    );
    assert_eq!(&text[500_000..500_007], b"GATTACA");
    let archive = single_archive(&text);
    let mut params = params_with(2);
    params.complete_strata_after_best_nominal = 2;
    params.mapping_mode = MappingMode::Complete;
    params.max_matches = usize::MAX;
    let (matches, stratum) = run_search(
        &archive,
        &params,
        &SelectionParameters::default(),
        b"GATTACA",
    )
    .unwrap();
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].position, 500_000);
    assert_eq!(matches[0].distance, 0);
    assert_eq!(matches[0].strand, Strand::Forward);
    assert_eq!(cigar_string(&matches[0].cigar), "7=");
    assert!(stratum >= 3, "stratum {stratum} < 3");
}

#[test]
fn test_strata_after_best_governs_reporting() {
    let read = random_dna(100, 23);
    let fwd_occurrence = mutate(&read, 2, 31);
    let rev_occurrence = revcomp(&mutate(&read, 1, 37));
    let mut text = random_dna(400, 41);
    text.extend_from_slice(&fwd_occurrence);
    text.extend_from_slice(&random_dna(200, 43));
    let rev_at = text.len();
    text.extend_from_slice(&rev_occurrence);
    text.extend_from_slice(&random_dna(400, 47));
    let archive = single_archive(&text);
    let selection = SelectionParameters::default();

    let mut params = params_with(3);
    params.complete_strata_after_best_nominal = 0;
    let (only_best, _) =
        run_search(&archive, &params, &selection, &read).unwrap();
    assert_eq!(only_best.len(), 1);
    assert_eq!(only_best[0].strand, Strand::Reverse);
    assert_eq!(only_best[0].distance, 1);
    assert_eq!(only_best[0].position, rev_at);

    params.complete_strata_after_best_nominal = 1;
    let (both, _) =
        run_search(&archive, &params, &selection, &read).unwrap();
    assert_eq!(both.len(), 2);
    assert_eq!(both[0].distance, 1);
    assert_eq!(both[0].strand, Strand::Reverse);
    assert_eq!(both[1].distance, 2);
    assert_eq!(both[1].strand, Strand::Forward);
    assert_eq!(both[1].position, 400);
}

#[test]
fn test_empty_read_ends_unmapped() {
    let archive = single_archive(b"ACGTACGT");
    let params = SearchParameters::default();
    let (matches, _) = run_search(
        &archive,
        &params,
        &SelectionParameters::default(),
        b"",
    )
    .unwrap();
    assert!(matches.is_empty());
}

#[test]
fn test_reported_distances_are_exact() {
    let text = random_dna(4000, 53);
    let archive = single_archive(&text);
    let mut params = params_with(2);
    params.complete_strata_after_best_nominal = 2;
    params.mapping_mode = MappingMode::Sensitive;
    // soft-clipped local fallbacks report core distances, keep the
    // check on global alignments only
    params.local_alignment = LocalAlignmentPolicy::Never;
    let selection = SelectionParameters::default();
    for (offset, errors, seed) in
        [(100usize, 0usize, 61u64), (1000, 1, 67), (2500, 2, 71)]
    {
        let read = mutate(&text[offset..offset + 40], errors, seed);
        let (matches, _) =
            run_search(&archive, &params, &selection, &read).unwrap();
        assert!(
            !matches.is_empty(),
            "planted read at {offset} with {errors} errors not found"
        );
        for m in &matches {
            let ref_len: usize =
                m.cigar.iter().map(|op| op.reference_len()).sum();
            let window = &text[m.position..m.position + ref_len];
            let key = match m.strand {
                Strand::Forward => read.clone(),
                Strand::Reverse => revcomp(&read),
            };
            assert_eq!(
                edit_distance_wild(&key, window),
                m.distance,
                "match at {} reports a wrong distance",
                m.position
            );
        }
        assert!(matches
            .iter()
            .any(|m| m.position == offset && m.distance == errors));
    }
}

#[test]
fn test_completeness_within_stratum() {
    // every occurrence within the budget must be enumerated when the
    // complete stratum covers it
    let unit = random_dna(60, 73);
    let mut text = Vec::new();
    for _ in 0..4 {
        text.extend_from_slice(&unit);
        text.extend_from_slice(&random_dna(100, 79));
    }
    let archive = single_archive(&text);
    let mut params = params_with(1);
    params.complete_strata_after_best_nominal = 1;
    params.mapping_mode = MappingMode::Complete;
    params.max_matches = usize::MAX;
    let (matches, stratum) = run_search(
        &archive,
        &params,
        &SelectionParameters::default(),
        &unit,
    )
    .unwrap();
    assert!(stratum >= 1);
    let exact = matches
        .iter()
        .filter(|m| m.distance == 0 && m.strand == Strand::Forward)
        .map(|m| m.position)
        .collect::<Vec<usize>>();
    assert_eq!(exact, vec![0, 160, 320, 480]);
}
