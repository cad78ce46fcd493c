use std::collections::HashMap;

use memledger_core::{
    ArrayLayout, Classification, Dimension, Hierarchies, Labels, Registry, ReportSpec, Shape,
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

const TYPES: [&str; 3] = ["f64", "i32", "Cell"];
const NAMES: [&str; 2] = ["field", "scratch"];
const FILES: [&str; 2] = ["grid.rs", "solver.rs"];

fn random_shape(rng: &mut XorShift64) -> Shape {
    match rng.gen_range_usize(0, 3) {
        0 => Shape::Vector(rng.gen_range_usize(1, 64)),
        1 => Shape::Rect(vec![rng.gen_range_usize(1, 6), rng.gen_range_usize(1, 6)]),
        2 => Shape::Flat(vec![rng.gen_range_usize(1, 4); 3]),
        _ => Shape::Jagged2 {
            rows: (0..rng.gen_range_usize(1, 5))
                .map(|_| rng.gen_range_usize(0, 7))
                .collect(),
        },
    }
}

#[test]
fn deterministic_sequences_keep_bytes_and_counts_consistent() {
    const SEEDS: [u64; 4] = [11, 22, 33, 44];
    const STEPS: usize = 1_500;
    const SLOTS: usize = 24;

    for seed in SEEDS {
        let mut rng = XorShift64::new(seed);
        let mut reg = Registry::new();
        let mut h = Hierarchies::new();
        let mut slots: [Option<(usize, Classification)>; SLOTS] = [None; SLOTS];
        let mut next_addr = 0x1000usize;
        let mut last_peak = 0u64;

        for step in 0..STEPS {
            let slot = rng.gen_range_usize(0, SLOTS - 1);
            match slots[slot] {
                None => {
                    let class = h.classify(&Labels {
                        type_name: Some(TYPES[rng.gen_range_usize(0, TYPES.len() - 1)]),
                        name: Some(NAMES[rng.gen_range_usize(0, NAMES.len() - 1)]),
                        file: Some(FILES[rng.gen_range_usize(0, FILES.len() - 1)]),
                        function: Some("step"),
                        line: step as u32,
                    });
                    let layout = ArrayLayout::compute(8, &random_shape(&mut rng)).unwrap();
                    h.record_alloc(&class, layout.total_bytes() as u64);
                    reg.register(next_addr, class, layout).unwrap();
                    slots[slot] = Some((next_addr, class));
                    next_addr += 0x100;
                }
                Some((addr, class)) if rng.gen_range_usize(0, 2) == 0 => {
                    let id = reg.lookup_id(addr).unwrap();
                    let old = reg.get(id).unwrap().total_size() as u64;
                    let layout =
                        ArrayLayout::compute(8, &Shape::Vector(rng.gen_range_usize(1, 64))).unwrap();
                    let new = layout.total_bytes() as u64;
                    let moved = rng.gen_range_usize(0, 1) == 1;
                    let target = if moved { next_addr } else { addr };
                    reg.relocate(id, target, layout).unwrap();
                    h.record_resize(&class, old, new);
                    if moved {
                        next_addr += 0x100;
                        slots[slot] = Some((target, class));
                    }
                }
                Some((addr, class)) => {
                    let id = reg.retire(addr).unwrap();
                    h.record_free(&class, reg.get(id).unwrap().total_size() as u64);
                    slots[slot] = None;
                }
            }

            let expected: u64 = reg.live().map(|r| r.total_size() as u64).sum();
            assert_eq!(reg.live_bytes(), expected, "seed={seed} step={step}");

            h.summarize();
            let root = h.types.counters(h.types.root());
            assert_eq!(root.current, expected, "seed={seed} step={step}: types root");
            assert!(root.peak >= root.current, "seed={seed} step={step}: peak");
            let files_root = h.files.counters(h.files.root());
            assert_eq!(files_root.current, expected, "seed={seed} step={step}: files root");

            let leaf_peak: u64 = h
                .types
                .leaves(h.types.root())
                .into_iter()
                .map(|n| h.types.counters(n).peak)
                .sum();
            assert!(leaf_peak >= last_peak, "seed={seed} step={step}: leaf peak regressed");
            last_peak = leaf_peak;
        }

        // alloc - free per leaf equals the live records routed there
        let mut live_per_leaf: HashMap<_, u64> = HashMap::new();
        for r in reg.live() {
            *live_per_leaf.entry(r.classification().name_node).or_default() += 1;
        }
        for leaf in h.types.leaves(h.types.root()) {
            let c = h.types.counters(leaf);
            assert!(c.allocs >= c.frees, "seed={seed}: negative live count");
            assert_eq!(
                c.live(),
                live_per_leaf.get(&leaf).copied().unwrap_or(0),
                "seed={seed}: leaf {:?}",
                h.types.label(leaf)
            );
        }

        let report = ReportSpec::new().group_by(Dimension::Type).run(&reg, &h);
        assert_eq!(report.matched(), reg.len(), "seed={seed}");
        assert_eq!(report.totals().current, reg.live_bytes(), "seed={seed}");
    }
}

#[test]
fn stamps_totally_order_history() {
    let mut reg = Registry::new();
    let mut h = Hierarchies::new();
    let class = h.classify(&Labels::default());
    let mut rng = XorShift64::new(7);
    let mut live = Vec::new();
    for i in 0..200usize {
        if live.is_empty() || rng.gen_range_usize(0, 2) > 0 {
            let addr = 0x10 * (i + 1);
            reg.register(addr, class, ArrayLayout::compute(1, &Shape::Scalar).unwrap())
                .unwrap();
            live.push(addr);
        } else {
            let idx = rng.gen_range_usize(0, live.len() - 1);
            reg.retire(live.swap_remove(idx)).unwrap();
        }
    }
    let created: Vec<_> = reg.iter().map(|r| r.created()).collect();
    assert!(created.windows(2).all(|w| w[0] < w[1]));
    assert!(reg.iter().all(|r| r.stamp() <= reg.last_stamp()));
    assert_eq!(reg.live_count(), live.len());
}

#[test]
fn records_serialize_with_addresses() {
    let mut reg = Registry::new();
    let mut h = Hierarchies::new();
    let class = h.classify(&Labels {
        type_name: Some("f64"),
        ..Labels::default()
    });
    reg.register(0x40, class, ArrayLayout::compute(8, &Shape::Vector(4)).unwrap())
        .unwrap();
    let live = serde_json::to_value(reg.lookup(0x40).unwrap()).unwrap();
    assert_eq!(live["address"], 0x40);
    assert_eq!(live["last_address"], 0x40);

    let id = reg.retire(0x40).unwrap();
    let released = serde_json::to_value(reg.get(id).unwrap()).unwrap();
    assert!(released["address"].is_null());
    assert_eq!(released["last_address"], 0x40);
}
