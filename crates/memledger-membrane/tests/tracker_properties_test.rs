use memledger_core::{Dimension, POINTER_SIZE, ReportSpec};
use memledger_membrane::{
    Block, FatalError, FatalPolicy, FaultInjector, Journal, JournalFormat, LibcBulk, Released,
    Tag, Tracker, TrackerConfig, TrackingMode, site, validate_journal_line,
};

#[derive(Clone, Copy, Debug)]
struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u64(&mut self) -> u64 {
        // xorshift64*
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }

    fn gen_range_usize(&mut self, low: usize, high_inclusive: usize) -> usize {
        assert!(low <= high_inclusive);
        let span = high_inclusive - low + 1;
        low + (self.next_u64() as usize % span)
    }
}

fn tracker() -> Tracker {
    Tracker::with_parts(
        TrackerConfig::default().with_fatal(FatalPolicy::Return),
        LibcBulk,
        Journal::buffer("props", JournalFormat::Jsonl),
    )
}

fn release_all(t: &mut Tracker, blocks: Vec<Block>) {
    for block in blocks {
        let mut pending = Some(block);
        while let Some(b) = pending.take() {
            if let Released::Retained(b) = t.release(b).unwrap() {
                pending = Some(b);
            }
        }
    }
}

#[test]
fn deterministic_sequences_keep_heap_and_registry_in_step() {
    const SEEDS: [u64; 4] = [1, 2, 3, 4];
    const STEPS: usize = 600;
    const TYPES: [&str; 3] = ["f64", "i32", "Cell"];

    for seed in SEEDS {
        let mut t = tracker();
        let mut rng = XorShift64::new(seed);
        let mut live: Vec<Block> = Vec::new();
        let mut last_peak = 0usize;

        for step in 0..STEPS {
            let tag = Tag::new(site!()).with_type(TYPES[rng.gen_range_usize(0, 2)]);
            match rng.gen_range_usize(0, 9) {
                0..=2 => {
                    let len = rng.gen_range_usize(0, 40);
                    live.push(t.alloc_vec(8, len, &tag).unwrap());
                }
                3 => {
                    let dims = [rng.gen_range_usize(1, 4), rng.gen_range_usize(1, 5)];
                    live.push(t.alloc_rect(4, &dims, &tag).unwrap());
                }
                4 => {
                    let rows: Vec<usize> = (0..rng.gen_range_usize(1, 4))
                        .map(|_| rng.gen_range_usize(0, 6))
                        .collect();
                    if let Some(b) = t.alloc_jagged2(2, &rows, &tag).unwrap() {
                        live.push(b);
                    }
                }
                5 if !live.is_empty() => {
                    let i = rng.gen_range_usize(0, live.len() - 1);
                    let b = live.swap_remove(i);
                    let b = match b.shape() {
                        memledger_core::Shape::Vector(_) => {
                            let new_len = rng.gen_range_usize(0, 48);
                            t.realloc_vec(b, new_len, site!()).unwrap()
                        }
                        memledger_core::Shape::Rect(dims) => {
                            let grown: Vec<usize> = dims.iter().map(|d| d + 1).collect();
                            t.resize_rect(b, &grown, site!()).unwrap()
                        }
                        _ => b,
                    };
                    live.push(b);
                }
                6 if !live.is_empty() => {
                    let i = rng.gen_range_usize(0, live.len() - 1);
                    assert_eq!(t.retain(&live[i]).unwrap(), 1);
                    let b = live.swap_remove(i);
                    match t.release(b).unwrap() {
                        Released::Retained(b) => live.push(b),
                        Released::Freed { .. } => panic!("seed={seed} step={step}: freed while retained"),
                    }
                }
                _ if !live.is_empty() => {
                    let i = rng.gen_range_usize(0, live.len() - 1);
                    let b = live.swap_remove(i);
                    let len = b.len();
                    match t.release(b).unwrap() {
                        Released::Freed { bytes } => assert_eq!(bytes, len),
                        Released::Retained(_) => panic!("seed={seed} step={step}: unexpected owner"),
                    }
                }
                _ => {}
            }

            let expected: usize = live.iter().map(Block::len).sum();
            assert_eq!(t.current_bytes(), expected, "seed={seed} step={step}");
            assert_eq!(t.registry().live_bytes(), expected as u64, "seed={seed} step={step}");
            assert_eq!(t.registry().live_count(), live.len(), "seed={seed} step={step}");
            assert!(t.peak_bytes() >= last_peak, "seed={seed} step={step}: peak went down");
            assert!(t.peak_bytes() >= t.current_bytes());
            last_peak = t.peak_bytes();
        }

        t.summarize();
        let types = &t.hierarchies().types;
        assert_eq!(
            types.counters(types.root()).current,
            t.registry().live_bytes(),
            "seed={seed}"
        );
        release_all(&mut t, live);
        assert_eq!(t.current_bytes(), 0);
        assert_eq!(t.report_leaks(), 0);
    }
}

#[test]
fn jagged_rows_alias_across_empty_row() {
    let mut t = tracker();
    let b = t
        .alloc_jagged2(8, &[3, 0, 2], &Tag::new(site!()).with_type("f64"))
        .unwrap()
        .unwrap();
    assert_eq!(b.len(), 3 * POINTER_SIZE + 8 * 5);
    let row1 = b.pointer_at(POINTER_SIZE).unwrap();
    let row2 = b.pointer_at(2 * POINTER_SIZE).unwrap();
    assert_eq!(row1, row2);
    assert_eq!(row2, b.addr() + 3 * POINTER_SIZE + 24);
    let _ = t.release(b).unwrap();
}

#[test]
fn rect_enlarge_keeps_values_and_rejects_shrink() {
    let mut t = tracker();
    let mut b = t
        .alloc_rect(4, &[2, 2], &Tag::new(site!()).with_type("u32"))
        .unwrap();
    b.fill_from(&[1u32, 2, 3, 4]).unwrap();

    let b = t.resize_rect(b, &[3, 3], site!()).unwrap();
    assert_eq!(b.get::<u32>(&[0, 0]).unwrap(), 1);
    assert_eq!(b.get::<u32>(&[0, 1]).unwrap(), 2);
    assert_eq!(b.get::<u32>(&[1, 0]).unwrap(), 3);
    assert_eq!(b.get::<u32>(&[1, 1]).unwrap(), 4);
    for index in [[0, 2], [1, 2], [2, 0], [2, 1], [2, 2]] {
        assert_eq!(b.get::<u32>(&index).unwrap(), 0, "{index:?}");
    }
    // row pointers follow the new row width
    assert_eq!(
        b.pointer_at(POINTER_SIZE).unwrap(),
        b.addr() + 3 * POINTER_SIZE + 3 * 4
    );
    assert_eq!(t.registry().live_bytes(), b.len() as u64);

    let err = t.resize_rect(b, &[2, 3], site!()).unwrap_err();
    assert!(matches!(err, FatalError::InvariantViolation { .. }));
    assert!(
        t.journal()
            .entries()
            .iter()
            .any(|e| e.event == "invariant_violation")
    );
}

#[test]
fn rect_resize_rejects_rank_change() {
    let mut t = tracker();
    let b = t
        .alloc_rect(4, &[2, 2], &Tag::new(site!()).with_type("u32"))
        .unwrap();
    let err = t.resize_rect(b, &[2, 2, 2], site!()).unwrap_err();
    assert!(matches!(err, FatalError::InvariantViolation { .. }));
}

#[test]
fn leak_walk_reports_live_blocks_only() {
    let mut t = tracker();
    let tag = Tag::new(site!()).with_type("Cell").with_name("mesh");
    let mut blocks: Vec<Block> = (0..5).map(|i| t.alloc_vec(8, i + 1, &tag).unwrap()).collect();
    let freed = blocks.split_off(3);
    release_all(&mut t, freed);

    assert_eq!(t.report_leaks(), 3);
    let entries = t.journal().entries();
    let leaks: Vec<_> = entries.iter().filter(|e| e.event == "leak").collect();
    assert_eq!(leaks.len(), 3);
    for (entry, block) in leaks.iter().zip(&blocks) {
        assert!(entry.message.starts_with(&format!("ptr={:#x} ", block.addr())));
        assert!(entry.message.contains("type=Cell name=mesh"));
    }
    let summary = entries
        .iter()
        .rfind(|e| e.event == "leak_summary")
        .unwrap();
    assert_eq!(summary.details.as_ref().unwrap()["leaks"], 3);
    release_all(&mut t, blocks);
}

#[test]
fn blocks_only_return_to_their_own_tracker() {
    let mut a = tracker();
    let mut b = tracker();
    assert_ne!(a.heap_id(), b.heap_id());
    let tag = Tag::new(site!()).with_type("u8").with_name("owned");
    let first = a.alloc_vec(1, 64, &tag).unwrap();
    let second = a.alloc_vec(1, 32, &tag).unwrap();
    assert_eq!(first.heap_id(), a.heap_id());

    assert!(matches!(b.retain(&first), Err(FatalError::InvariantViolation { .. })));
    let refused = b.release(second);
    match refused {
        Err(FatalError::InvariantViolation { what, .. }) => {
            assert!(what.contains("was handed to"), "{what}");
        }
        other => panic!("foreign release accepted: {other:?}"),
    }
    assert!(matches!(
        b.realloc_vec(first, 128, site!()),
        Err(FatalError::InvariantViolation { .. })
    ));

    // the foreign heap never moved
    assert_eq!((b.current_bytes(), b.peak_bytes()), (0, 0));
    assert_eq!(b.registry().live_count(), 0);
    // both refused blocks are still live in the heap that made them
    assert_eq!(a.current_bytes(), 96);
    assert_eq!(a.registry().live_count(), 2);
    assert_eq!(a.report_leaks(), 2);
}

#[test]
fn report_groups_by_type() {
    let mut t = tracker();
    let a = Tag::new(site!()).with_type("A");
    let b = Tag::new(site!()).with_type("B");
    let mut blocks = Vec::new();
    for _ in 0..3 {
        blocks.push(t.alloc_vec(1, 10, &a).unwrap());
    }
    for _ in 0..2 {
        blocks.push(t.alloc_vec(1, 7, &b).unwrap());
    }
    let tree = t.report(&ReportSpec::new().group_by(Dimension::Type));
    let groups = tree.groups();
    assert_eq!(groups.len(), 2);
    assert_eq!(groups[0].0, Some("A"));
    assert_eq!(groups[0].1.allocs, 3);
    assert_eq!(groups[0].1.total, 30);
    assert_eq!(groups[1].0, Some("B"));
    assert_eq!(groups[1].1.allocs, 2);
    assert_eq!(groups[1].1.current, 14);

    let filtered = t.report(&ReportSpec::new().group_by(Dimension::Name).filter(Dimension::Type, Some("B")));
    assert_eq!(filtered.matched(), 2);
    assert!(t.journal().entries().iter().any(|e| e.event == "report"));
    release_all(&mut t, blocks);
}

#[test]
fn double_bulk_failure_is_fatal_out_of_memory() {
    let mut t = Tracker::with_parts(
        TrackerConfig::default().with_fatal(FatalPolicy::Return),
        FaultInjector::new(LibcBulk),
        Journal::buffer("oom", JournalFormat::Jsonl),
    );

    t.bulk_mut().fail_next(1);
    let survived = t.alloc_vec(8, 10, &Tag::new(site!())).unwrap();
    assert_eq!(t.snapshot().heap.retries, 1);

    t.bulk_mut().fail_next(2);
    let err = t.alloc_vec(8, 10, &Tag::new(site!())).unwrap_err();
    match err {
        FatalError::OutOfMemory { requested, current, .. } => {
            assert_eq!(requested, 80);
            assert_eq!(current, 80);
        }
        other => panic!("unexpected {other:?}"),
    }
    let fatal = t
        .journal()
        .entries()
        .into_iter()
        .find(|e| e.event == "out_of_memory")
        .unwrap();
    assert_eq!(fatal.details.unwrap()["current_bytes"], 80);
    assert_eq!(t.registry().live_count(), 1);
    let _ = t.release(survived).unwrap();
}

#[test]
fn suspended_tracking_changes_bookkeeping_only() {
    fn run(mode: TrackingMode) -> (Vec<u32>, usize, usize) {
        let mut t = Tracker::with_parts(
            TrackerConfig::default()
                .with_fatal(FatalPolicy::Return)
                .with_tracking(mode),
            LibcBulk,
            Journal::discard(),
        );
        let tag = Tag::new(site!()).with_type("u32");
        let mut b = t.alloc_rect(4, &[2, 3], &tag).unwrap();
        b.fill_from(&[9u32, 8, 7, 6, 5, 4]).unwrap();
        let b = t.resize_rect(b, &[3, 3], site!()).unwrap();
        let values = b.to_vec::<u32>().unwrap();
        let bytes = t.current_bytes();
        let records = t.registry().len();
        let _ = t.release(b).unwrap();
        assert_eq!(t.current_bytes(), 0);
        (values, bytes, records)
    }

    let (on_values, on_bytes, on_records) = run(TrackingMode::On);
    let (off_values, off_bytes, off_records) = run(TrackingMode::Off);
    assert_eq!(on_values, off_values);
    assert_eq!(on_values, vec![9, 8, 7, 6, 5, 4, 0, 0, 0]);
    assert_eq!(on_bytes, off_bytes);
    assert!(on_records > 0);
    assert_eq!(off_records, 0);
}

#[test]
fn jagged3_from_setup_table() {
    let mut t = tracker();
    let tag = Tag::new(site!()).with_type("f32").with_name("faces");
    let mut setup = t.alloc_jagged_setup(&[2, 1], &tag).unwrap().unwrap();
    setup.set_cell_len(0, 0, 3).unwrap();
    setup.set_cell_len(0, 1, 0).unwrap();
    setup.set_cell_len(1, 0, 2).unwrap();

    let mesh = t.alloc_jagged3_from_setup(4, &setup, &tag).unwrap().unwrap();
    // 2 row pointers, 3 cell pointers, 5 items
    assert_eq!(mesh.len(), 5 * POINTER_SIZE + 5 * 4);
    assert_eq!(t.registry().live_count(), 2);

    let _ = t.release(setup.into_block()).unwrap();
    let _ = t.release(mesh).unwrap();
    assert_eq!(t.report_leaks(), 0);
}

#[test]
fn jsonl_journal_lines_validate() {
    let mut t = tracker();
    let b = t.alloc_vec(8, 3, &Tag::new(site!()).with_type("f64")).unwrap();
    let _ = t.describe(b.addr());
    t.print_types(None);
    t.print_files(Some(1));
    t.report_leaks();
    let _ = t.release(b).unwrap();
    let lines = t.journal().lines();
    assert!(lines.len() >= 5);
    for (i, line) in lines.iter().enumerate() {
        validate_journal_line(line, i + 1).unwrap();
    }
}
