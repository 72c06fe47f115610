use similar_asserts::assert_eq;

use fm_mapper::{
    ErrorLimit, MappedMatch, SearchParameters, SearchPipeline,
    SelectionParameters,
};

mod common;
use common::{mutate, random_dna, run_search, single_archive};

fn batch_reads(text: &[u8]) -> Vec<Vec<u8>> {
    let mut reads: Vec<Vec<u8>> = Vec::new();
    for offset in (0..text.len().saturating_sub(30)).step_by(97) {
        reads.push(text[offset..offset + 30].to_vec());
    }
    // one mutated, one alien, one wildcard-heavy, one empty
    reads.push(mutate(&text[40..70], 1, 7));
    reads.push(b"GATTACAGATTACAGATTACAGATTACAGA".to_vec());
    reads.push(b"ANNNANNNANNNANNNANNNANNNANNNAN".to_vec());
    reads.push(Vec::new());
    reads
}

fn inline_results(
    text: &[u8],
    params: &SearchParameters,
    selection: &SelectionParameters,
    reads: &[Vec<u8>],
) -> Vec<Vec<MappedMatch>> {
    let archive = single_archive(text);
    reads
        .iter()
        .map(|read| {
            run_search(&archive, params, selection, read)
                .map(|(matches, _)| matches)
                .unwrap_or_default()
        })
        .collect()
}

#[test]
fn test_pipelined_equals_inline() {
    let text = random_dna(3000, 11);
    let mut params = SearchParameters::default();
    params.max_error = ErrorLimit::Bases(2);
    params.complete_strata_after_best_nominal = 2;
    let selection = SelectionParameters::default();
    let reads = batch_reads(&text);

    let expected = inline_results(&text, &params, &selection, &reads);

    let archive = single_archive(&text);
    let mut pipeline = SearchPipeline::new(&archive, &params);
    let staged = pipeline.map_batch(&reads, &selection);
    assert_eq!(staged, expected);
}

#[test]
fn test_pipeline_back_pressure_rotates_buffers() {
    // a capacity this small cannot hold one read's candidates, so every
    // send path exercises rotation, rejection and mid-batch drains
    let text = random_dna(2000, 13);
    let mut params = SearchParameters::default();
    params.max_error = ErrorLimit::Bases(1);
    params.gpu_buffers_per_stage = 2;
    params.gpu_buffer_capacity = 4;
    let selection = SelectionParameters::default();
    let reads = batch_reads(&text);

    let expected = inline_results(&text, &params, &selection, &reads);

    let archive = single_archive(&text);
    let mut pipeline = SearchPipeline::new(&archive, &params);
    let staged = pipeline.map_batch(&reads, &selection);
    assert_eq!(staged, expected);
}

#[test]
fn test_pipeline_reuse_across_batches() {
    let text = random_dna(1500, 29);
    let mut params = SearchParameters::default();
    params.max_error = ErrorLimit::Bases(1);
    let selection = SelectionParameters::default();
    let archive = single_archive(&text);
    let mut pipeline = SearchPipeline::new(&archive, &params);

    let first: Vec<Vec<u8>> =
        vec![text[0..30].to_vec(), text[500..530].to_vec()];
    let second: Vec<Vec<u8>> =
        vec![text[900..930].to_vec(), b"TTTTTTTTTTTTTTTTTTTTTTTTTTTTTT".to_vec()];
    let first_out = pipeline.map_batch(&first, &selection);
    let second_out = pipeline.map_batch(&second, &selection);

    assert_eq!(
        first_out,
        inline_results(&text, &params, &selection, &first)
    );
    assert_eq!(
        second_out,
        inline_results(&text, &params, &selection, &second)
    );
}

#[test]
fn test_zero_candidate_searches_pass_through() {
    let text = random_dna(1000, 31);
    let mut params = SearchParameters::default();
    params.max_error = ErrorLimit::Bases(0);
    let selection = SelectionParameters::default();
    let archive = single_archive(&text);
    let mut pipeline = SearchPipeline::new(&archive, &params);
    // empty and all-wildcard reads occupy no buffer space but their
    // bookkeeping still advances through all three stages
    let reads: Vec<Vec<u8>> = vec![
        Vec::new(),
        b"NNNNNNNNNN".to_vec(),
        text[100..130].to_vec(),
    ];
    let out = pipeline.map_batch(&reads, &selection);
    assert_eq!(out.len(), 3);
    assert!(out[0].is_empty());
    assert!(out[1].is_empty());
    assert_eq!(out[2].len(), 1);
    assert_eq!(out[2][0].position, 100);
}