//! Integration tests for catalog construction and selection mapping.

mod support;

use support::sample_metadata;
use ytgrab_core::{
    CatalogEntry, FormatSelector, VirtualEntry, build_catalog, parse_selection_input,
    resolve_selection,
};

#[test]
fn test_two_video_one_audio_catalog_indices() {
    let catalog = build_catalog(sample_metadata("Clip"));

    assert_eq!(catalog.len(), 5);
    assert!(matches!(catalog.entry(0), Some(CatalogEntry::Stream(s)) if s.id == "137"));
    assert!(matches!(catalog.entry(1), Some(CatalogEntry::Stream(s)) if s.id == "18"));
    assert!(matches!(catalog.entry(2), Some(CatalogEntry::Stream(s)) if s.id == "140"));
    assert_eq!(
        catalog.entry(3),
        Some(CatalogEntry::Virtual(VirtualEntry::BestCombined))
    );
    assert_eq!(
        catalog.entry(4),
        Some(CatalogEntry::Virtual(VirtualEntry::BestAudio))
    );
    assert_eq!(catalog.best_combined_index(), 3);
    assert_eq!(catalog.best_audio_index(), 4);
}

#[test]
fn test_every_index_resolves_to_a_selector() {
    let catalog = build_catalog(sample_metadata("Clip"));

    let selectors: Vec<FormatSelector> = (0..catalog.len())
        .map(|index| resolve_selection(&catalog, Some(index)))
        .collect();

    let expressions: Vec<&str> = selectors.iter().map(FormatSelector::expression).collect();
    assert_eq!(
        expressions,
        vec!["137", "18", "140", "best[ext=mp4]", "bestaudio[ext=mp3]/bestaudio"]
    );
}

#[test]
fn test_blank_and_garbage_answers_fall_back_to_best_combined() {
    let catalog = build_catalog(sample_metadata("Clip"));

    for answer in ["", "   ", "abc", "5", "999", "-2", "1.5"] {
        assert_eq!(
            resolve_selection(&catalog, parse_selection_input(answer)),
            FormatSelector::BestCombined,
            "answer {answer:?} should fall back"
        );
    }
}

#[test]
fn test_rows_carry_metadata_columns() {
    let catalog = build_catalog(sample_metadata("Clip"));
    let rows = catalog.rows();

    assert_eq!(rows.len(), catalog.len());
    assert_eq!(rows[0].content, "Video");
    assert_eq!(rows[1].content, "Video+Audio");
    assert_eq!(rows[2].resolution, "audio only");
    assert_eq!(rows[2].size, "3.0MB");
    assert_eq!(rows[3].label(), "ID 3: best - Best quality (mp4)");
}
