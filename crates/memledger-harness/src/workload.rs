//! Canned simulation workload.
//!
//! Allocates the kinds of arrays a small grid solver keeps around: scalar
//! parameters, rectangular and flat fields, a jagged cell mesh built from a
//! setup table, an adjacency list and a history buffer that grows and
//! shrinks. Everything is released again except the requested number of
//! deliberate leaks.

use memledger_membrane::{
    Block, BulkAllocator, FatalError, Tag, Tracker, WatchDelta, site,
};

use crate::HarnessError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkloadOptions {
    /// Blocks deliberately left allocated.
    pub leaks: usize,
    /// Grid edge length.
    pub grid: usize,
}

impl Default for WorkloadOptions {
    fn default() -> Self {
        Self { leaks: 2, grid: 16 }
    }
}

#[derive(Debug)]
pub struct WorkloadOutcome {
    pub allocations: usize,
    /// Sum of every value read back; equal across tracking modes.
    pub checksum: f64,
    pub mesh_watch: Option<WatchDelta>,
    /// Handles of the deliberate leaks, still allocated.
    pub leaked: Vec<Block>,
}

fn free<B: BulkAllocator>(tracker: &mut Tracker<B>, block: Block) -> Result<(), FatalError> {
    let _ = tracker.release(block)?;
    Ok(())
}

pub fn run_workload<B: BulkAllocator>(
    tracker: &mut Tracker<B>,
    options: WorkloadOptions,
) -> Result<WorkloadOutcome, HarnessError> {
    let n = options.grid.max(2);
    let mut allocations = 0usize;
    let mut checksum = 0.0f64;

    let mut dt = tracker.alloc_scalar(8, &Tag::new(site!()).with_type("Params").with_name("dt"))?;
    dt.set::<f64>(&[], 0.125)?;
    allocations += 1;

    let field = Tag::new(site!()).with_type("Grid");
    let mut pressure = tracker.alloc_rect(8, &[n, n], &field.with_name("pressure"))?;
    let mut velocity = tracker.alloc_rect(8, &[2, n, n], &field.with_name("velocity"))?;
    let mut temperature = tracker.alloc_flat(8, &[4, n, n], &field.with_name("temperature"))?;
    allocations += 3;
    for i in 0..n {
        for j in 0..n {
            let p = (i * n + j) as f64;
            pressure.set(&[i, j], p)?;
            velocity.set(&[0, i, j], p * 0.5)?;
            velocity.set(&[1, i, j], -p * 0.5)?;
            temperature.set(&[i % 4, i, j], 300.0 + p)?;
        }
    }

    let mesh_tag = Tag::new(site!()).with_type("Cell").with_name("faces");
    let mark = tracker.watch_begin("mesh");
    let mut mesh = None;
    if let Some(mut setup) = tracker.alloc_jagged_setup(&[3, 2, 4], &mesh_tag)? {
        allocations += 1;
        for (row, cells) in [3usize, 2, 4].into_iter().enumerate() {
            for cell in 0..cells {
                setup.set_cell_len(row, cell, (row + cell) % 3 + 1)?;
            }
        }
        mesh = tracker.alloc_jagged3_from_setup(4, &setup, &mesh_tag)?;
        free(tracker, setup.into_block())?;
    }
    let mesh_watch = tracker.watch_end(mark);
    if let Some(mesh) = mesh.as_mut() {
        allocations += 1;
        let values: Vec<f32> = (0..mesh.data().len() / 4).map(|v| v as f32).collect();
        mesh.fill_from(&values)?;
        checksum += mesh.to_vec::<f32>()?.iter().map(|&v| f64::from(v)).sum::<f64>();
    }

    let edges = tracker.alloc_jagged2(
        4,
        &[2, 0, 3, 1],
        &Tag::new(site!()).with_type("Edge").with_name("adjacency"),
    )?;
    if edges.is_some() {
        allocations += 1;
    }

    let history_tag = Tag::new(site!()).with_type("u64").with_name("history");
    let mut history = tracker.alloc_vec(8, 8, &history_tag)?;
    allocations += 1;
    for len in [16, 32, 24] {
        let start = history.to_vec::<u64>()?.len();
        history = tracker.realloc_vec(history, len, site!())?;
        for i in start..len {
            history.set(&[i], i as u64)?;
        }
    }
    checksum += history.to_vec::<u64>()?.iter().map(|&v| v as f64).sum::<f64>();

    pressure = tracker.resize_rect(pressure, &[n + 4, n + 4], site!())?;
    for i in 0..n {
        for j in 0..n {
            checksum += pressure.get::<f64>(&[i, j])?;
        }
    }
    checksum += dt.get::<f64>(&[])?;
    checksum += temperature.to_vec::<f64>()?.iter().sum::<f64>();

    let probe = Tag::new(site!()).with_type("Probe").with_name("leaked");
    let mut leaked = Vec::with_capacity(options.leaks);
    for i in 0..options.leaks {
        leaked.push(tracker.alloc_vec(1, 32 * (i + 1), &probe)?);
        allocations += 1;
    }

    for block in [dt, pressure, velocity, temperature, history] {
        free(tracker, block)?;
    }
    for block in mesh.into_iter().chain(edges) {
        free(tracker, block)?;
    }

    Ok(WorkloadOutcome {
        allocations,
        checksum,
        mesh_watch,
        leaked,
    })
}
