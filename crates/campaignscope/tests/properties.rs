//! Property-based tests for the filter, summary and export stages.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};

use campaignscope::{
    CacheKey, CategoricalField, Column, CsvReadOptions, Fingerprint, FilterPipelineConfiguration,
    MemoCache, NullKind, RangeSelection, Scalar, Selection, SessionId, Table, apply,
    evaluate_categorical, read_csv_str, summarize, write_csv_bytes,
};
use proptest::prelude::*;

const JOBS: [&str; 4] = ["admin.", "blue-collar", "retired", "student"];

#[derive(Debug, Clone)]
struct Contact {
    age: Option<i64>,
    job: usize,
    subscribed: Option<bool>,
}

fn contact() -> impl Strategy<Value = Contact> {
    (
        prop::option::weighted(0.9, 18i64..95),
        0..JOBS.len(),
        prop::option::weighted(0.9, any::<bool>()),
    )
        .prop_map(|(age, job, subscribed)| Contact {
            age,
            job,
            subscribed,
        })
}

fn contacts(rows: std::ops::Range<usize>) -> impl Strategy<Value = Vec<Contact>> {
    prop::collection::vec(contact(), rows)
}

fn text(value: &str) -> Scalar {
    Scalar::Utf8(value.to_owned())
}

fn table(rows: &[Contact]) -> Table {
    let missing = || Scalar::Null(NullKind::Null);
    let mut columns = vec![
        (
            "age",
            rows.iter()
                .map(|row| row.age.map_or_else(missing, Scalar::Int64))
                .collect(),
        ),
        ("job", rows.iter().map(|row| text(JOBS[row.job])).collect()),
    ];
    for field in &CategoricalField::ALL[1..] {
        columns.push((
            field.column_name(),
            rows.iter()
                .map(|row| text(if row.job % 2 == 0 { "yes" } else { "no" }))
                .collect(),
        ));
    }
    columns.push((
        "y",
        rows.iter()
            .map(|row| {
                row.subscribed
                    .map_or_else(missing, |yes| text(if yes { "yes" } else { "no" }))
            })
            .collect(),
    ));
    Table::from_scalars(columns).expect("table")
}

/// Free-text cells, including ones that read like numbers or booleans and
/// ones with surrounding spaces.
fn note() -> impl Strategy<Value = String> {
    prop_oneof![
        "[a-h]{1,6}( [a-h]{1,6})?",
        "-?[0-9]{1,4}",
        "[0-9]{1,3}\\.[0-9]{1,2}",
        "0[0-9]{1,3}",
        Just("1.0".to_owned()),
        Just("1e3".to_owned()),
        Just("true".to_owned()),
        Just("false".to_owned()),
        " [a-h]{1,4}",
        "[a-h]{1,4} ",
        " [0-9]{1,3}",
    ]
}

fn range() -> impl Strategy<Value = RangeSelection> {
    (0i64..100, 0i64..100).prop_map(|(a, b)| {
        RangeSelection::new(a.min(b) as f64, a.max(b) as f64).expect("ordered range")
    })
}

proptest! {
    #[test]
    fn range_filter_is_idempotent(rows in contacts(0..40), age in range()) {
        let config = FilterPipelineConfiguration::new(age);
        let once = apply(&table(&rows), &config).expect("once");
        let twice = apply(&once, &config).expect("twice");
        prop_assert_eq!(&twice, &once);
        let ages_in_range = once.column("age").expect("age").values().iter().all(|value| {
            value.to_f64().is_ok_and(|age| age >= config.age().lo() && age <= config.age().hi())
        });
        prop_assert!(ages_in_range);
    }

    #[test]
    fn all_selection_marks_every_row(rows in contacts(0..40), field in 0..CategoricalField::ALL.len()) {
        let table = table(&rows);
        let column = CategoricalField::ALL[field].column_name();
        let mask = evaluate_categorical(&table, column, &Selection::All).expect("mask");
        prop_assert_eq!(mask.len(), rows.len());
        prop_assert!(mask.all_selected());
    }

    #[test]
    fn empty_selection_marks_no_row(rows in contacts(0..40), field in 0..CategoricalField::ALL.len()) {
        let table = table(&rows);
        let column = CategoricalField::ALL[field].column_name();
        let empty = Selection::Values(BTreeSet::new());
        let mask = evaluate_categorical(&table, column, &empty).expect("mask");
        prop_assert_eq!(mask.len(), rows.len());
        prop_assert_eq!(mask.count_selected(), 0);
    }

    #[test]
    fn job_selection_keeps_only_selected_jobs(rows in contacts(0..40), picked in prop::collection::vec(any::<bool>(), JOBS.len())) {
        let selection = Selection::values(
            JOBS.iter().zip(&picked).filter(|(_, keep)| **keep).map(|(job, _)| *job),
        );
        let config = FilterPipelineConfiguration::new(RangeSelection::new(0.0, 200.0).expect("range"))
            .with_selection(CategoricalField::Job, selection);
        let filtered = apply(&table(&rows), &config).expect("filtered");

        let expected = rows
            .iter()
            .filter(|row| row.age.is_some() && picked[row.job])
            .count();
        prop_assert_eq!(filtered.row_count(), expected);
    }

    #[test]
    fn distribution_sums_to_one_hundred(rows in contacts(1..60)) {
        let table = table(&rows);
        let summary = summarize(&table, "y").expect("summary");
        if rows.iter().any(|row| row.subscribed.is_some()) {
            prop_assert!((summary.total_percentage() - 100.0).abs() < 1e-6);
        } else {
            prop_assert!(summary.is_empty());
        }
        prop_assert!(summary.entries().windows(2).all(|pair| pair[0].0 < pair[1].0));
    }

    #[test]
    fn filter_is_computed_once_per_key(rows in contacts(0..30), age in range()) {
        let table = table(&rows);
        let config = FilterPipelineConfiguration::new(age);
        let cache = MemoCache::<Table>::new();
        let calls = AtomicUsize::new(0);
        let args = Fingerprint::of_serialized(&(table.id(), &config)).expect("fingerprint");
        let key = CacheKey::new(SessionId::SHARED, "apply", args);
        let run = || {
            calls.fetch_add(1, Ordering::SeqCst);
            apply(&table, &config)
        };

        let first = cache.get_or_try_compute(key, run).expect("first");
        let second = cache.get_or_try_compute(key, run).expect("second");
        prop_assert_eq!(&first, &second);
        prop_assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn csv_export_round_trips_byte_for_byte(
        rows in contacts(0..30),
        scores in prop::collection::vec(prop::option::of(-1.0e6f64..1.0e6), 30),
        notes in prop::collection::vec(prop::option::of(note()), 30),
        word in "[a-h]{1,6}",
    ) {
        let mut columns = vec![
            (
                "age".to_owned(),
                table(&rows).column("age").expect("age").clone(),
            ),
        ];
        let scores = scores[..rows.len()]
            .iter()
            .map(|score| score.map_or(Scalar::Null(NullKind::Null), Scalar::Float64))
            .collect();
        // One plain word keeps the column textual on reload.
        let notes = notes[..rows.len()]
            .iter()
            .enumerate()
            .map(|(idx, note)| match note {
                _ if idx == 0 => Scalar::Utf8(word.clone()),
                Some(note) => Scalar::Utf8(note.clone()),
                None => Scalar::Null(NullKind::Null),
            })
            .collect();
        columns.push(("score".to_owned(), Column::from_values(scores).expect("scores")));
        columns.push(("note".to_owned(), Column::from_values(notes).expect("notes")));
        let original = Table::with_row_count(rows.len(), columns).expect("table");

        let exported = write_csv_bytes(&original).expect("export");
        let decoded = read_csv_str(
            std::str::from_utf8(&exported).expect("utf8"),
            &CsvReadOptions::comma(),
        )
        .expect("decode");
        let again = write_csv_bytes(&decoded).expect("re-export");
        prop_assert_eq!(again, exported);
        prop_assert_eq!(
            decoded.column("note").expect("note").values(),
            original.column("note").expect("note").values()
        );
    }
}
